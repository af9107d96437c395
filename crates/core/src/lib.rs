//! # navgraph-core
//!
//! Embeddable HNSW approximate nearest neighbor index with lock-free
//! concurrent search, online insertion and removal, arena compaction and a
//! streaming binary save format.
//!
//! Vectors and distance math are supplied by the caller through
//! [`VectorAccess`](vectors::VectorAccess) and
//! [`DistanceFunction`](hnsw::DistanceFunction); the index only stores the graph.

/// Global configuration constants: defaults, limits, and arena geometry.
pub mod config;
/// Error types and the crate `Result` alias.
pub mod error;
/// Generation tracking for deferred reclamation of retired storage.
pub mod generation;
/// HNSW index: arena storage, graph, insertion, removal, search, and compaction.
pub mod hnsw;
/// Graph persistence: snapshot saver, streaming loader, and file helpers.
pub mod storage;
/// Vector access interface and an in-memory implementation.
pub mod vectors;

pub use error::{Error, Result};
pub use generation::{GenerationGuard, GenerationHandler};
pub use hnsw::{
    BitVectorFilter, CompactionStrategy, DistanceMetric, GlobalFilter, HnswIndex,
    HnswIndexConfig, Neighbor,
};
pub use vectors::{InMemoryVectors, VectorAccess, VectorBundle};
