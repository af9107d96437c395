//! HNSW insertion.
//!
//! Insertion runs in two phases. [`HnswIndex::prepare_add_document`] only
//! reads the graph and may run on any thread; it finds the neighbors of each
//! new node and records them together with the level array handle it saw.
//! [`HnswIndex::complete_add_document`] runs on the writer thread, drops
//! neighbors whose handle is no longer published, and links the new nodes in.

use crate::generation::GenerationGuard;
use crate::hnsw::array_store::EntryRef;
use crate::hnsw::graph::EntryNode;
use crate::hnsw::index::HnswIndex;
use crate::hnsw::queue::{FurthestPriQ, HnswCandidate};
use crate::vectors::VectorBundle;

/// Planned links of one new node, one list per level.
#[derive(Debug, Clone, Default)]
pub struct PreparedAddNode {
    pub(crate) connections: Vec<Vec<(u32, EntryRef)>>,
}

impl PreparedAddNode {
    pub fn num_levels(&self) -> usize {
        self.connections.len()
    }
}

/// Result of the read-only insertion phase.
///
/// Holds a generation guard so every handle it recorded stays readable until
/// the plan is completed or dropped.
#[derive(Debug)]
pub struct PreparedAddDoc {
    docid: u32,
    nodes: Vec<PreparedAddNode>,
    graph_was_empty: bool,
    _read_guard: GenerationGuard,
}

impl PreparedAddDoc {
    pub fn docid(&self) -> u32 {
        self.docid
    }

    pub fn nodes(&self) -> &[PreparedAddNode] {
        &self.nodes
    }
}

/// Outcome of neighbor selection.
#[derive(Debug, Default)]
pub struct SelectResult {
    pub used: Vec<HnswCandidate>,
    pub unused: Vec<HnswCandidate>,
}

impl HnswIndex {
    /// Read-only insertion phase for all subspaces of `docid`.
    pub fn prepare_add_document(
        &self,
        docid: u32,
        bundle: VectorBundle,
        read_guard: GenerationGuard,
    ) -> PreparedAddDoc {
        let entry = self.graph.get_entry_node();
        let nodes = bundle
            .iter()
            .map(|vector| {
                let num_levels = self.level_generator.lock().max_level() as usize + 1;
                self.prepare_add_node(vector, num_levels, entry)
            })
            .collect();
        PreparedAddDoc {
            docid,
            nodes,
            graph_was_empty: entry.is_none(),
            _read_guard: read_guard,
        }
    }

    /// Writer phase: allocate node ids and link the prepared nodes in.
    ///
    /// A plan made for a different number of subspaces, or made against an
    /// empty graph that has since gained nodes, is prepared again first.
    pub fn complete_add_document(&self, docid: u32, prepared: PreparedAddDoc) {
        assert_eq!(
            prepared.docid, docid,
            "prepared insert for document {} completed as {docid}",
            prepared.docid
        );
        let bundle = self.vectors.vectors(docid);
        let stale = prepared.nodes.len() != bundle.subspaces()
            || (prepared.graph_was_empty && self.graph.get_entry_node().is_some());
        let prepared = if stale {
            tracing::debug!(docid, "prepared insert is stale, preparing again");
            drop(prepared);
            self.prepare_add_document(docid, bundle, self.read_guard())
        } else {
            prepared
        };

        let nodeids = self
            .id_mapping
            .lock()
            .allocate_ids(docid, prepared.nodes.len());
        for (subspace, (nodeid, node)) in nodeids.into_iter().zip(&prepared.nodes).enumerate() {
            self.complete_add_node(nodeid, docid, subspace as u32, node);
        }
    }

    /// Insert `docid` using the vectors currently stored for it.
    pub fn add_document(&self, docid: u32) {
        let bundle = self.vectors.vectors(docid);
        let prepared = self.prepare_add_document(docid, bundle, self.read_guard());
        self.complete_add_document(docid, prepared);
    }

    fn prepare_add_node(
        &self,
        vector: &[f32],
        num_levels: usize,
        entry: Option<EntryNode>,
    ) -> PreparedAddNode {
        let mut connections = vec![Vec::new(); num_levels];
        let Some(entry) = entry else {
            return PreparedAddNode { connections };
        };
        let Some(entry_distance) = self.distance_to_node(vector, entry.nodeid) else {
            return PreparedAddNode { connections };
        };
        let mut nearest = HnswCandidate::new(
            entry.nodeid,
            self.graph.docid(entry.nodeid),
            entry.levels_ref,
            entry_distance,
        );
        let node_top_level = num_levels - 1;
        let mut level = entry.level as usize;
        while level > node_top_level {
            nearest = self.find_nearest_in_layer(vector, nearest, level);
            level -= 1;
        }

        let ef = self.config.neighbors_to_explore_at_construction as usize;
        let mut best_neighbors = FurthestPriQ::new();
        best_neighbors.push(nearest);
        for level in (0..=level.min(node_top_level)).rev() {
            self.search_layer(vector, ef, &mut best_neighbors, level, None);
            let candidates: Vec<HnswCandidate> = best_neighbors.iter().copied().collect();
            let selected =
                self.select_neighbors(candidates, self.config.max_links_on_inserts as usize);
            connections[level] = selected
                .used
                .iter()
                .map(|c| (c.nodeid, c.levels_ref))
                .collect();
        }
        PreparedAddNode { connections }
    }

    /// Greedy hill-climb at one level: move to any closer neighbor until none is.
    pub(crate) fn find_nearest_in_layer(
        &self,
        vector: &[f32],
        entry: HnswCandidate,
        level: usize,
    ) -> HnswCandidate {
        let mut nearest = entry;
        let mut improved = true;
        while improved {
            improved = false;
            let links = self.graph.acquire_link_array(nearest.levels_ref, level);
            for neighbor in links.iter() {
                let levels_ref = self.graph.acquire_levels_ref(neighbor);
                if !levels_ref.valid() || self.graph.levels_len(levels_ref) <= level {
                    continue;
                }
                let Some(distance) = self.distance_to_node(vector, neighbor) else {
                    continue;
                };
                if distance < nearest.distance {
                    nearest = HnswCandidate::new(
                        neighbor,
                        self.graph.docid(neighbor),
                        levels_ref,
                        distance,
                    );
                    improved = true;
                }
            }
        }
        nearest
    }

    fn complete_add_node(&self, nodeid: u32, docid: u32, subspace: u32, node: &PreparedAddNode) {
        let num_levels = node.num_levels();
        self.graph.make_node(nodeid, docid, subspace, num_levels);
        for (level, connections) in node.connections.iter().enumerate() {
            let neighbors: Vec<u32> = connections
                .iter()
                .filter(|&&(neighbor, levels_ref)| {
                    neighbor != nodeid
                        && self.graph.still_valid(neighbor, levels_ref)
                        && self.graph.levels_len(levels_ref) > level
                })
                .map(|&(neighbor, _)| neighbor)
                .collect();
            self.connect_new_node(nodeid, &neighbors, level);
        }
        let top_level = num_levels as u32 - 1;
        let promote = match self.graph.get_entry_node() {
            None => true,
            Some(entry) => top_level > entry.level,
        };
        if promote {
            tracing::debug!(nodeid, level = top_level, "new entry point");
            self.graph.set_entry_node(Some((nodeid, top_level)));
        }
    }

    fn connect_new_node(&self, nodeid: u32, neighbors: &[u32], level: usize) {
        self.graph.set_link_array(nodeid, level, neighbors);
        for &neighbor in neighbors {
            self.add_link_to(neighbor, nodeid, level);
            self.shrink_if_needed(neighbor, level);
        }
    }

    pub(crate) fn add_link_to(&self, nodeid: u32, new_link: u32, level: usize) {
        if self.graph.get_level_array(nodeid).len() <= level {
            return;
        }
        let links = self.graph.get_link_array(nodeid, level);
        if links.contains(new_link) {
            return;
        }
        let mut new_links = links.to_vec();
        new_links.push(new_link);
        self.graph.set_link_array(nodeid, level, &new_links);
    }

    pub(crate) fn remove_link_to(&self, nodeid: u32, remove_id: u32, level: usize) {
        let links = self.graph.get_link_array(nodeid, level);
        if !links.contains(remove_id) {
            return;
        }
        let new_links: Vec<u32> = links.iter().filter(|&id| id != remove_id).collect();
        self.graph.set_link_array(nodeid, level, &new_links);
    }

    /// Bring the links of `nodeid` at `level` back within budget, dropping
    /// the back-link at every evicted neighbor.
    pub(crate) fn shrink_if_needed(&self, nodeid: u32, level: usize) {
        let links = self.graph.get_link_array(nodeid, level);
        let max_links = self.config.max_links_for_level(level) as usize;
        if links.len() <= max_links {
            return;
        }
        let Some(node_vector) = self.node_vector(nodeid) else {
            tracing::warn!(nodeid, level, "vector missing while shrinking links, truncating");
            let all = links.to_vec();
            self.graph.set_link_array(nodeid, level, &all[..max_links]);
            for &evicted in &all[max_links..] {
                self.remove_link_to(evicted, nodeid, level);
            }
            return;
        };
        let candidates: Vec<HnswCandidate> = links
            .iter()
            .map(|neighbor| {
                let distance = self
                    .distance_to_node(&node_vector, neighbor)
                    .unwrap_or(f64::INFINITY);
                HnswCandidate::new(
                    neighbor,
                    self.graph.docid(neighbor),
                    self.graph.get_levels_ref(neighbor),
                    distance,
                )
            })
            .collect();
        let selected = self.select_neighbors(candidates, max_links);
        let new_links: Vec<u32> = selected.used.iter().map(|c| c.nodeid).collect();
        self.graph.set_link_array(nodeid, level, &new_links);
        for evicted in &selected.unused {
            self.remove_link_to(evicted.nodeid, nodeid, level);
        }
    }

    /// Pick up to `max_links` of `candidates` with the configured policy.
    pub fn select_neighbors(&self, candidates: Vec<HnswCandidate>, max_links: usize) -> SelectResult {
        if self.config.heuristic_select_neighbors {
            self.select_neighbors_heuristic(candidates, max_links)
        } else {
            select_neighbors_simple(candidates, max_links)
        }
    }

    fn select_neighbors_heuristic(
        &self,
        mut candidates: Vec<HnswCandidate>,
        max_links: usize,
    ) -> SelectResult {
        candidates.sort();
        let mut result = SelectResult::default();
        for candidate in candidates {
            if result.used.len() >= max_links {
                result.unused.push(candidate);
                continue;
            }
            let vector = self.node_vector(candidate.nodeid);
            let redundant = vector.is_some_and(|vector| {
                result.used.iter().any(|selected| {
                    self.distance_to_node(&vector, selected.nodeid)
                        .is_some_and(|d| d < candidate.distance)
                })
            });
            if redundant {
                result.unused.push(candidate);
            } else {
                result.used.push(candidate);
            }
        }
        result
    }
}

fn select_neighbors_simple(mut candidates: Vec<HnswCandidate>, max_links: usize) -> SelectResult {
    candidates.sort();
    let unused = candidates.split_off(max_links.min(candidates.len()));
    SelectResult {
        used: candidates,
        unused,
    }
}
