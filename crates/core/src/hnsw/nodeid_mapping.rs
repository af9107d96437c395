//! Mapping from documents to graph node ids.
//!
//! With one vector per document the node id is the document id. With several
//! vectors per document each subspace gets its own node id; freed ids go on
//! hold and are handed out again only after every reader that could still
//! reach the old node has finished.

use crate::error::{Error, Result};
use crate::generation::Generation;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Writer-side document to node id mapping.
#[derive(Debug)]
pub enum NodeIdMapping {
    /// Node id equals document id, subspace 0.
    Identity,
    Multi(MultiNodeIdMapping),
}

impl NodeIdMapping {
    pub fn new(multi_vector: bool) -> Self {
        if multi_vector {
            NodeIdMapping::Multi(MultiNodeIdMapping::default())
        } else {
            NodeIdMapping::Identity
        }
    }

    /// True if node identity is implied by the node id.
    pub fn is_identity(&self) -> bool {
        matches!(self, NodeIdMapping::Identity)
    }

    /// Allocate one node id per subspace of `docid`.
    pub fn allocate_ids(&mut self, docid: u32, num_subspaces: usize) -> Vec<u32> {
        match self {
            NodeIdMapping::Identity => {
                assert!(
                    num_subspaces <= 1,
                    "document {docid} has {num_subspaces} subspaces but the index is single-vector"
                );
                vec![docid; num_subspaces]
            }
            NodeIdMapping::Multi(m) => m.allocate_ids(docid, num_subspaces),
        }
    }

    /// Release the node ids of `docid`, returning them.
    pub fn free_ids(&mut self, docid: u32) -> Vec<u32> {
        match self {
            NodeIdMapping::Identity => vec![docid],
            NodeIdMapping::Multi(m) => m.free_ids(docid),
        }
    }

    pub fn assign_generation(&mut self, current_gen: Generation) {
        if let NodeIdMapping::Multi(m) = self {
            m.assign_generation(current_gen);
        }
    }

    pub fn reclaim_memory(&mut self, oldest_used_gen: Generation) {
        if let NodeIdMapping::Multi(m) = self {
            m.reclaim_memory(oldest_used_gen);
        }
    }

    /// Record a node restored from a saved graph. Fails if another node
    /// already holds the same document subspace.
    pub fn on_load(&mut self, nodeid: u32, docid: u32, subspace: u32) -> Result<()> {
        match self {
            NodeIdMapping::Identity => Ok(()),
            NodeIdMapping::Multi(m) => m.on_load(nodeid, docid, subspace),
        }
    }

    /// Build the document table and the free id list once every node has
    /// been loaded. Fails if a document is missing one of its subspaces.
    pub fn finish_load(&mut self) -> Result<()> {
        match self {
            NodeIdMapping::Identity => Ok(()),
            NodeIdMapping::Multi(m) => m.finish_load(),
        }
    }

    pub fn clear(&mut self) {
        if let NodeIdMapping::Multi(m) = self {
            *m = MultiNodeIdMapping::default();
        }
    }
}

/// Node ids for documents with several vectors.
#[derive(Debug, Default)]
pub struct MultiNodeIdMapping {
    docid_to_nodeids: HashMap<u32, Vec<u32>>,
    free: BTreeSet<u32>,
    pending: Vec<u32>,
    hold: VecDeque<(u32, Generation)>,
    next: u32,
    /// (docid, subspace) -> node id, collected while a saved graph is read.
    loaded: BTreeMap<(u32, u32), u32>,
}

impl MultiNodeIdMapping {
    fn allocate_ids(&mut self, docid: u32, num_subspaces: usize) -> Vec<u32> {
        assert!(
            !self.docid_to_nodeids.contains_key(&docid),
            "document {docid} is already inserted"
        );
        let mut ids = Vec::with_capacity(num_subspaces);
        for _ in 0..num_subspaces {
            let id = match self.free.pop_first() {
                Some(id) => id,
                None => {
                    self.next += 1;
                    self.next - 1
                }
            };
            ids.push(id);
        }
        if !ids.is_empty() {
            self.docid_to_nodeids.insert(docid, ids.clone());
        }
        ids
    }

    fn free_ids(&mut self, docid: u32) -> Vec<u32> {
        let ids = self.docid_to_nodeids.remove(&docid).unwrap_or_default();
        self.pending.extend_from_slice(&ids);
        ids
    }

    fn assign_generation(&mut self, current_gen: Generation) {
        for id in self.pending.drain(..) {
            self.hold.push_back((id, current_gen));
        }
    }

    fn reclaim_memory(&mut self, oldest_used_gen: Generation) {
        while let Some(&(id, generation)) = self.hold.front() {
            if generation >= oldest_used_gen {
                break;
            }
            self.hold.pop_front();
            self.free.insert(id);
        }
    }

    fn on_load(&mut self, nodeid: u32, docid: u32, subspace: u32) -> Result<()> {
        if let Some(previous) = self.loaded.insert((docid, subspace), nodeid) {
            return Err(Error::CorruptedGraph(format!(
                "nodes {previous} and {nodeid} both hold document {docid} subspace {subspace}"
            )));
        }
        self.next = self.next.max(nodeid + 1);
        Ok(())
    }

    fn finish_load(&mut self) -> Result<()> {
        for ((docid, subspace), nodeid) in std::mem::take(&mut self.loaded) {
            let ids = self.docid_to_nodeids.entry(docid).or_default();
            if subspace as usize != ids.len() {
                return Err(Error::CorruptedGraph(format!(
                    "document {docid} is missing subspace {}",
                    ids.len()
                )));
            }
            ids.push(nodeid);
        }
        let used: BTreeSet<u32> = self.docid_to_nodeids.values().flatten().copied().collect();
        self.free = (0..self.next).filter(|id| !used.contains(id)).collect();
        Ok(())
    }
}
