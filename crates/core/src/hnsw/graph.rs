//! Concurrent HNSW graph storage.
//!
//! [`HnswGraph`] owns the node table plus two [`ArrayStore`]s: one holding a
//! level array per node (one link-array handle per level) and one holding the
//! link arrays themselves. A single writer mutates the graph; readers resolve
//! handles with acquire loads and never block.
//!
//! Link arrays are immutable once published. [`HnswGraph::set_link_array`]
//! builds a replacement, publishes its handle into the level array and retires
//! the old array.

use crate::config;
use crate::generation::Generation;
use crate::hnsw::array_store::{
    AddressSpace, ArrayRef, ArrayStore, AtomicEntryRef, EntryRef, MemoryUsage,
};
use crate::hnsw::compaction::CompactionStrategy;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// One row of the node table.
#[derive(Debug, Default)]
pub struct NodeSlot {
    levels_ref: AtomicEntryRef,
    docid: AtomicU32,
    subspace: AtomicU32,
}

/// The node every search starts from, with the level array observed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryNode {
    pub nodeid: u32,
    pub levels_ref: EntryRef,
    pub level: u32,
}

/// Memory usage of a graph, split by storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphMemoryUsage {
    pub nodes: MemoryUsage,
    pub level_arrays: MemoryUsage,
    pub link_arrays: MemoryUsage,
}

impl GraphMemoryUsage {
    pub fn total(&self) -> MemoryUsage {
        let mut total = self.nodes;
        total.merge(&self.level_arrays);
        total.merge(&self.link_arrays);
        total
    }
}

/// Chunked node table. Chunks are shared between directory versions, so a
/// grown table still points at the same rows.
struct NodeTable {
    chunks: ArcSwap<Vec<Arc<[NodeSlot]>>>,
    size: AtomicU32,
}

impl NodeTable {
    fn new() -> Self {
        Self {
            chunks: ArcSwap::from_pointee(Vec::new()),
            size: AtomicU32::new(0),
        }
    }

    #[inline]
    fn with_slot<R>(&self, nodeid: u32, f: impl FnOnce(&NodeSlot) -> R) -> Option<R> {
        let chunks = self.chunks.load();
        let index = nodeid as usize;
        chunks
            .get(index / config::NODE_TABLE_CHUNK_SIZE)
            .map(|chunk| f(&chunk[index % config::NODE_TABLE_CHUNK_SIZE]))
    }

    fn ensure_capacity(&self, nodeid: u32) {
        let needed = nodeid as usize / config::NODE_TABLE_CHUNK_SIZE + 1;
        let current = self.chunks.load();
        if current.len() >= needed {
            return;
        }
        let mut grown: Vec<Arc<[NodeSlot]>> = (**current).clone();
        while grown.len() < needed {
            grown.push(
                (0..config::NODE_TABLE_CHUNK_SIZE)
                    .map(|_| NodeSlot::default())
                    .collect(),
            );
        }
        self.chunks.store(Arc::new(grown));
    }

    fn capacity(&self) -> usize {
        self.chunks.load().len() * config::NODE_TABLE_CHUNK_SIZE
    }
}

/// HNSW graph: node table, level arrays, link arrays and the entry point.
pub struct HnswGraph {
    nodes: NodeTable,
    levels_store: ArrayStore,
    links_store: ArrayStore,
    /// `(nodeid << 32) | (level + 1)`, or 0 when the graph has no entry.
    entry: AtomicU64,
    node_count: AtomicU32,
}

impl Default for HnswGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn pack_entry(nodeid: u32, level: u32) -> u64 {
    ((nodeid as u64) << 32) | (level as u64 + 1)
}

fn unpack_entry(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, (packed as u32) - 1)
}

impl HnswGraph {
    pub fn new() -> Self {
        Self {
            nodes: NodeTable::new(),
            levels_store: ArrayStore::new("level_arrays"),
            links_store: ArrayStore::new("link_arrays"),
            entry: AtomicU64::new(0),
            node_count: AtomicU32::new(0),
        }
    }

    /// One past the highest node id that may hold a node.
    #[inline]
    pub fn node_id_limit(&self) -> u32 {
        self.nodes.size.load(Ordering::Acquire)
    }

    pub fn node_count(&self) -> usize {
        self.node_count.load(Ordering::Relaxed) as usize
    }

    /// Register a node with `num_levels` empty levels and publish it.
    ///
    /// Panics if `nodeid` already holds a node.
    pub fn make_node(&self, nodeid: u32, docid: u32, subspace: u32, num_levels: usize) -> EntryRef {
        assert!(num_levels > 0, "node {nodeid} needs at least one level");
        assert!(
            !self.get_levels_ref(nodeid).valid(),
            "node {nodeid} is already present"
        );
        let levels_ref = self
            .levels_store
            .add(&vec![EntryRef::INVALID.raw(); num_levels]);
        self.nodes.ensure_capacity(nodeid);
        self.nodes.with_slot(nodeid, |slot| {
            slot.docid.store(docid, Ordering::Relaxed);
            slot.subspace.store(subspace, Ordering::Relaxed);
            slot.levels_ref.store_release(levels_ref);
        });
        if nodeid >= self.nodes.size.load(Ordering::Relaxed) {
            self.nodes.size.store(nodeid + 1, Ordering::Release);
        }
        self.node_count.fetch_add(1, Ordering::Relaxed);
        levels_ref
    }

    /// Unpublish a node and retire its level array and link arrays.
    ///
    /// Panics if `nodeid` holds no node.
    pub fn remove_node(&self, nodeid: u32) {
        let levels_ref = self.get_levels_ref(nodeid);
        assert!(levels_ref.valid(), "node {nodeid} is not present");
        self.nodes
            .with_slot(nodeid, |slot| slot.levels_ref.store_release(EntryRef::INVALID));
        for link in self.levels_store.get(levels_ref).iter() {
            self.links_store.remove(EntryRef::from_raw(link));
        }
        self.levels_store.remove(levels_ref);
        self.node_count.fetch_sub(1, Ordering::Relaxed);

        let mut size = self.nodes.size.load(Ordering::Relaxed);
        while size > 0 && !self.get_levels_ref(size - 1).valid() {
            size -= 1;
        }
        self.nodes.size.store(size, Ordering::Release);
    }

    /// Level array handle as seen by the writer.
    #[inline]
    pub fn get_levels_ref(&self, nodeid: u32) -> EntryRef {
        self.nodes
            .with_slot(nodeid, |slot| slot.levels_ref.load_relaxed())
            .unwrap_or(EntryRef::INVALID)
    }

    /// Level array handle as seen by a concurrent reader.
    #[inline]
    pub fn acquire_levels_ref(&self, nodeid: u32) -> EntryRef {
        self.nodes
            .with_slot(nodeid, |slot| slot.levels_ref.load_acquire())
            .unwrap_or(EntryRef::INVALID)
    }

    pub fn get_level_array(&self, nodeid: u32) -> ArrayRef {
        self.levels_store.get(self.get_levels_ref(nodeid))
    }

    pub fn acquire_level_array(&self, nodeid: u32) -> ArrayRef {
        self.levels_store.get(self.acquire_levels_ref(nodeid))
    }

    /// Number of levels of the node behind `levels_ref`.
    pub fn levels_len(&self, levels_ref: EntryRef) -> usize {
        self.levels_store.get(levels_ref).len()
    }

    /// Link array of `nodeid` at `level` as seen by the writer.
    pub fn get_link_array(&self, nodeid: u32, level: usize) -> ArrayRef {
        let levels = self.get_level_array(nodeid);
        let link = if level < levels.len() {
            EntryRef::from_raw(levels.get(level))
        } else {
            EntryRef::INVALID
        };
        self.links_store.get(link)
    }

    /// Link array at `level` of the level array behind `levels_ref`, for readers.
    pub fn acquire_link_array(&self, levels_ref: EntryRef, level: usize) -> ArrayRef {
        let levels = self.levels_store.get(levels_ref);
        let link = if level < levels.len() {
            EntryRef::from_raw(levels.load_acquire(level))
        } else {
            EntryRef::INVALID
        };
        self.links_store.get(link)
    }

    /// Link array behind a handle taken from a level array.
    pub fn link_array(&self, link: EntryRef) -> ArrayRef {
        self.links_store.get(link)
    }

    /// Replace the links of `nodeid` at `level`.
    pub fn set_link_array(&self, nodeid: u32, level: usize, links: &[u32]) {
        let levels_ref = self.get_levels_ref(nodeid);
        let levels = self.levels_store.get(levels_ref);
        assert!(
            level < levels.len(),
            "node {nodeid} has no level {level} (has {})",
            levels.len()
        );
        let old = EntryRef::from_raw(levels.get(level));
        let new = self.links_store.add(links);
        self.levels_store
            .set_element_release(levels_ref, level, new.raw());
        self.links_store.remove(old);
    }

    /// True if `levels_ref` is still the published level array of `nodeid`.
    #[inline]
    pub fn still_valid(&self, nodeid: u32, levels_ref: EntryRef) -> bool {
        levels_ref.valid() && self.acquire_levels_ref(nodeid) == levels_ref
    }

    /// Document id of a node. Only meaningful after its level array was observed.
    #[inline]
    pub fn docid(&self, nodeid: u32) -> u32 {
        self.nodes
            .with_slot(nodeid, |slot| slot.docid.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    #[inline]
    pub fn subspace(&self, nodeid: u32) -> u32 {
        self.nodes
            .with_slot(nodeid, |slot| slot.subspace.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current entry point, re-read until it is stable.
    pub fn get_entry_node(&self) -> Option<EntryNode> {
        loop {
            let packed = self.entry.load(Ordering::Acquire);
            if packed == 0 {
                return None;
            }
            let (nodeid, level) = unpack_entry(packed);
            let levels_ref = self.acquire_levels_ref(nodeid);
            if self.entry.load(Ordering::Acquire) == packed {
                return Some(EntryNode {
                    nodeid,
                    levels_ref,
                    level,
                });
            }
        }
    }

    pub fn set_entry_node(&self, entry: Option<(u32, u32)>) {
        let packed = entry.map_or(0, |(nodeid, level)| pack_entry(nodeid, level));
        self.entry.store(packed, Ordering::Release);
    }

    pub fn assign_generation(&self, current_gen: Generation) {
        self.levels_store.assign_generation(current_gen);
        self.links_store.assign_generation(current_gen);
    }

    pub fn reclaim_memory(&self, oldest_used_gen: Generation) {
        self.levels_store.reclaim_memory(oldest_used_gen);
        self.links_store.reclaim_memory(oldest_used_gen);
    }

    pub fn memory_usage(&self) -> GraphMemoryUsage {
        let slot_bytes = std::mem::size_of::<NodeSlot>();
        let size = self.nodes.size.load(Ordering::Relaxed) as usize;
        let nodes = MemoryUsage {
            allocated_bytes: self.nodes.capacity() * slot_bytes,
            used_bytes: size * slot_bytes,
            dead_bytes: size.saturating_sub(self.node_count()) * slot_bytes,
            on_hold_bytes: 0,
        };
        GraphMemoryUsage {
            nodes,
            level_arrays: self.levels_store.memory_usage(),
            link_arrays: self.links_store.memory_usage(),
        }
    }

    pub fn level_arrays_address_space(&self) -> AddressSpace {
        self.levels_store.address_space()
    }

    pub fn link_arrays_address_space(&self) -> AddressSpace {
        self.links_store.address_space()
    }

    /// Move level arrays out of the most fragmented buffers and repoint the
    /// node table. Returns false if nothing was worth moving.
    pub fn compact_level_arrays(&self, strategy: &CompactionStrategy) -> bool {
        let compacting = self.levels_store.start_compact_worst_buffers(strategy);
        if compacting.is_empty() {
            return false;
        }
        let mut moved = 0usize;
        for nodeid in 0..self.node_id_limit() {
            let old = self.get_levels_ref(nodeid);
            if compacting.contains(old) {
                let new = self.levels_store.move_on_compact(old);
                self.nodes
                    .with_slot(nodeid, |slot| slot.levels_ref.store_release(new));
                moved += 1;
            }
        }
        tracing::info!(
            buffers = compacting.len(),
            moved,
            "compacted level arrays"
        );
        true
    }

    /// Move link arrays out of the most fragmented buffers and repoint the
    /// handles stored in level arrays.
    pub fn compact_link_arrays(&self, strategy: &CompactionStrategy) -> bool {
        let compacting = self.links_store.start_compact_worst_buffers(strategy);
        if compacting.is_empty() {
            return false;
        }
        let mut moved = 0usize;
        for nodeid in 0..self.node_id_limit() {
            let levels_ref = self.get_levels_ref(nodeid);
            if !levels_ref.valid() {
                continue;
            }
            let levels = self.levels_store.get(levels_ref);
            for level in 0..levels.len() {
                let old = EntryRef::from_raw(levels.get(level));
                if compacting.contains(old) {
                    let new = self.links_store.move_on_compact(old);
                    self.levels_store
                        .set_element_release(levels_ref, level, new.raw());
                    moved += 1;
                }
            }
        }
        tracing::info!(
            buffers = compacting.len(),
            moved,
            "compacted link arrays"
        );
        true
    }

    /// Remove every node and clear the entry point.
    pub fn clear(&self) {
        self.set_entry_node(None);
        for nodeid in (0..self.node_id_limit()).rev() {
            if self.get_levels_ref(nodeid).valid() {
                self.remove_node(nodeid);
            }
        }
    }
}

impl std::fmt::Debug for HnswGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswGraph")
            .field("node_count", &self.node_count())
            .field("node_id_limit", &self.node_id_limit())
            .field("entry", &self.get_entry_node())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_node_and_links() {
        let graph = HnswGraph::new();
        let r0 = graph.make_node(0, 10, 0, 2);
        graph.make_node(1, 11, 0, 1);
        assert!(graph.still_valid(0, r0));
        assert_eq!(graph.node_id_limit(), 2);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.docid(0), 10);
        assert_eq!(graph.levels_len(r0), 2);

        assert!(graph.get_link_array(0, 0).is_empty());
        graph.set_link_array(0, 0, &[1]);
        graph.set_link_array(1, 0, &[0]);
        assert_eq!(graph.get_link_array(0, 0).to_vec(), vec![1]);
        assert_eq!(graph.acquire_link_array(r0, 0).to_vec(), vec![1]);
        assert!(graph.acquire_link_array(r0, 5).is_empty());
    }

    #[test]
    #[should_panic(expected = "already present")]
    fn test_double_make_node_panics() {
        let graph = HnswGraph::new();
        graph.make_node(3, 3, 0, 1);
        graph.make_node(3, 3, 0, 1);
    }

    #[test]
    fn test_lookup_beyond_table_is_invalid() {
        let graph = HnswGraph::new();
        assert!(!graph.acquire_levels_ref(1_000_000).valid());
        assert!(graph.acquire_level_array(1_000_000).is_empty());
    }

    #[test]
    fn test_remove_last_node_shrinks_table() {
        let graph = HnswGraph::new();
        graph.make_node(0, 0, 0, 1);
        graph.make_node(5, 5, 0, 1);
        assert_eq!(graph.node_id_limit(), 6);
        graph.remove_node(5);
        assert_eq!(graph.node_id_limit(), 1);
        assert_eq!(graph.node_count(), 1);
        graph.remove_node(0);
        assert_eq!(graph.node_id_limit(), 0);
    }

    #[test]
    fn test_old_links_survive_until_reclaimed() {
        let graph = HnswGraph::new();
        let r = graph.make_node(0, 0, 0, 1);
        graph.make_node(1, 1, 0, 1);
        graph.set_link_array(0, 0, &[1]);
        let before = graph.acquire_link_array(r, 0);
        graph.set_link_array(0, 0, &[]);
        graph.assign_generation(0);
        // A reader still holding the old view sees the old contents
        assert_eq!(before.to_vec(), vec![1]);
        assert!(graph.get_link_array(0, 0).is_empty());
        graph.reclaim_memory(1);
        assert!(graph.memory_usage().link_arrays.dead_bytes > 0);
    }

    #[test]
    fn test_entry_node_packing() {
        let graph = HnswGraph::new();
        assert!(graph.get_entry_node().is_none());
        let r = graph.make_node(0, 0, 0, 1);
        graph.set_entry_node(Some((0, 0)));
        let entry = graph.get_entry_node().unwrap();
        assert_eq!((entry.nodeid, entry.level, entry.levels_ref), (0, 0, r));
        graph.set_entry_node(Some((u32::MAX - 1, 15)));
        let entry = graph.get_entry_node().unwrap();
        assert_eq!((entry.nodeid, entry.level), (u32::MAX - 1, 15));
        graph.set_entry_node(None);
        assert!(graph.get_entry_node().is_none());
    }

    #[test]
    fn test_compaction_rewrites_handles() {
        let graph = HnswGraph::new();
        let n = 600u32;
        for nodeid in 0..n {
            graph.make_node(nodeid, nodeid, 0, 2);
        }
        for round in 0..4u32 {
            for nodeid in 0..n {
                graph.set_link_array(nodeid, 0, &[(nodeid + 1) % n, round]);
                graph.set_link_array(nodeid, 1, &[(nodeid + 2) % n]);
            }
        }
        for nodeid in (0..n).filter(|id| id % 3 == 0) {
            graph.remove_node(nodeid);
        }
        graph.assign_generation(1);
        graph.reclaim_memory(2);

        let strategy = CompactionStrategy {
            active_buffers_ratio: 1.0,
            ..CompactionStrategy::default()
        };
        assert!(graph.compact_link_arrays(&strategy));
        assert!(graph.compact_level_arrays(&strategy));
        graph.assign_generation(2);
        graph.reclaim_memory(3);

        for nodeid in 0..n {
            if nodeid % 3 == 0 {
                assert!(!graph.get_levels_ref(nodeid).valid());
                continue;
            }
            assert_eq!(graph.get_link_array(nodeid, 0).to_vec(), vec![(nodeid + 1) % n, 3]);
            assert_eq!(graph.get_link_array(nodeid, 1).to_vec(), vec![(nodeid + 2) % n]);
        }
        assert_eq!(graph.memory_usage().link_arrays.dead_bytes, 0);
    }
}
