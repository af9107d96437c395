//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! The graph lives in generation-tracked arenas so that a single writer can
//! insert, remove and compact while any number of readers search without
//! taking locks. Readers only follow handles published with release
//! semantics; retired storage is reclaimed once no reader can still see it.
//!
//! Insertion is split into a read-only prepare phase, which may run on any
//! thread, and a short complete phase on the writer thread.

/// Generation-tracked arena of `u32` arrays addressed by `EntryRef` handles.
pub mod array_store;
/// Compaction thresholds for the graph arenas.
pub mod compaction;
/// Distance functions and built-in metrics.
pub mod distance;
/// Document-level inclusion filters for filtered search.
pub mod filter;
/// Node table, level arrays, link arrays and the entry point.
pub mod graph;
/// Index configuration and the `HnswIndex` orchestrator.
pub mod index;
/// Two-phase insertion and neighbor selection.
pub mod insert;
/// Random level assignment for new nodes.
pub mod level_generator;
/// Document to node id mapping.
pub mod nodeid_mapping;
/// Candidate priority queues.
pub mod queue;
/// Node removal and local repair.
pub mod remove;
/// Layer search and top-k queries.
pub mod search;
/// Introspection: histograms, reachability, symmetry checks.
pub mod stats;
/// Dense and sparse visited tracking.
pub mod visited;

pub use array_store::{AddressSpace, EntryRef, MemoryUsage};
pub use compaction::CompactionStrategy;
pub use distance::{DistanceFunction, DistanceMetric};
pub use filter::{BitVectorFilter, GlobalFilter};
pub use graph::{EntryNode, GraphMemoryUsage, HnswGraph};
pub use index::{HnswIndex, HnswIndexConfig, Neighbor};
pub use insert::{PreparedAddDoc, PreparedAddNode, SelectResult};
pub use level_generator::{InvLogLevelGenerator, RandomLevelGenerator};
pub use stats::{IndexStats, ReachableNodes};
