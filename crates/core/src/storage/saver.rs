//! Binary graph snapshot writer.
//!
//! Layout (little-endian):
//!
//! ```text
//! entry nodeid: u32, entry level: i32 (-1 if none), node count N: u32
//! per node id 0..N:
//!   level count L: u32 (0 = no node)
//!   if L > 0 and multi-vector: docid: u32, subspace: u32
//!   per level 0..L: link count: u32, link node ids: u32 * count
//! ```

use crate::error::Result;
use crate::generation::GenerationGuard;
use crate::hnsw::array_store::EntryRef;
use crate::hnsw::graph::HnswGraph;
use crate::hnsw::index::HnswIndex;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use std::sync::Arc;

#[derive(Debug)]
struct SavedNode {
    docid: u32,
    subspace: u32,
    /// Link array handle per level; empty if the id holds no node.
    links: Vec<EntryRef>,
}

/// Snapshot of the graph taken on the writer thread.
///
/// The snapshot only records handles. The generation guard it holds keeps
/// every recorded array readable, so [`save`](Self::save) can run on another
/// thread while the writer keeps mutating the graph.
#[derive(Debug)]
pub struct HnswIndexSaver {
    entry_nodeid: u32,
    entry_level: i32,
    multi_vector: bool,
    nodes: Vec<SavedNode>,
    graph: Arc<HnswGraph>,
    _guard: GenerationGuard,
}

impl HnswIndexSaver {
    pub fn node_id_limit(&self) -> usize {
        self.nodes.len()
    }

    /// Write the snapshot to `writer`.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.entry_nodeid)?;
        writer.write_i32::<LittleEndian>(self.entry_level)?;
        writer.write_u32::<LittleEndian>(self.nodes.len() as u32)?;
        let mut links_written = 0usize;
        for node in &self.nodes {
            writer.write_u32::<LittleEndian>(node.links.len() as u32)?;
            if node.links.is_empty() {
                continue;
            }
            if self.multi_vector {
                writer.write_u32::<LittleEndian>(node.docid)?;
                writer.write_u32::<LittleEndian>(node.subspace)?;
            }
            for &link in &node.links {
                let links = self.graph.link_array(link);
                writer.write_u32::<LittleEndian>(links.len() as u32)?;
                for neighbor in links.iter() {
                    writer.write_u32::<LittleEndian>(neighbor)?;
                }
                links_written += links.len();
            }
        }
        tracing::info!(
            nodes = self.nodes.len(),
            links = links_written,
            "saved hnsw graph"
        );
        Ok(())
    }
}

impl HnswIndex {
    /// Capture a snapshot for saving. Must be called on the writer thread.
    pub fn make_saver(&self) -> HnswIndexSaver {
        let guard = self.read_guard();
        let (entry_nodeid, entry_level) = match self.graph.get_entry_node() {
            Some(entry) => (entry.nodeid, entry.level as i32),
            None => (0, -1),
        };
        let nodes = (0..self.graph.node_id_limit())
            .map(|nodeid| {
                let links = self
                    .graph
                    .get_level_array(nodeid)
                    .iter()
                    .map(EntryRef::from_raw)
                    .collect();
                SavedNode {
                    docid: self.graph.docid(nodeid),
                    subspace: self.graph.subspace(nodeid),
                    links,
                }
            })
            .collect();
        HnswIndexSaver {
            entry_nodeid,
            entry_level,
            multi_vector: !self.id_mapping.lock().is_identity(),
            nodes,
            graph: Arc::clone(&self.graph),
            _guard: guard,
        }
    }

    /// Snapshot and write the graph in one go.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.make_saver().save(writer)
    }
}
