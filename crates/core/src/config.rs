//! Global configuration constants for navgraph.
//!
//! All tuning parameters and arena geometry are defined here.
//! These are compile-time constants; runtime configuration is handled via
//! [`HnswIndexConfig`](crate::hnsw::HnswIndexConfig) and
//! [`CompactionStrategy`](crate::hnsw::CompactionStrategy).

/// Default maximum number of links per node at level 0.
///
/// Level 0 holds every node, so it gets twice the budget of the upper levels.
pub const HNSW_DEFAULT_MAX_LINKS_AT_LEVEL_0: u32 = 32;

/// Default maximum number of links a node selects when it is inserted,
/// and the budget for every level above 0.
///
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_MAX_LINKS_ON_INSERTS: u32 = 16;

/// Default candidate list size while searching for neighbors of a new node.
///
/// Higher values produce a better graph but slow down inserts.
pub const HNSW_DEFAULT_NEIGHBORS_TO_EXPLORE: u32 = 200;

/// Default seed for the random level generator.
pub const HNSW_DEFAULT_LEVEL_SEED: u64 = 42;

/// Maximum number of levels a node can be assigned.
pub const HNSW_MAX_LEVELS: u32 = 16;

/// A dense visited tracker is used once the estimated number of visited
/// nodes reaches `node_id_limit / VISITED_DENSE_DIVISOR`.
pub const VISITED_DENSE_DIVISOR: u32 = 128;

/// Number of node-table rows per chunk (must be a power of two).
pub const NODE_TABLE_CHUNK_SIZE: usize = 4096;

/// Size in 32-bit words of the first buffer opened by an array store.
pub const ARRAY_STORE_INITIAL_BUFFER_WORDS: u32 = 1024;

/// Upper bound for the size of a single array store buffer, in 32-bit words.
/// Matches the offset part of an `EntryRef`.
pub const ARRAY_STORE_MAX_BUFFER_WORDS: u32 = 1 << 20;

/// Maximum number of buffers an array store can address.
/// Matches the buffer-id part of an `EntryRef`.
pub const ARRAY_STORE_MAX_BUFFERS: usize = 1 << 12;

/// Compaction is considered once dead bytes exceed this ratio of used bytes.
pub const COMPACTION_MAX_DEAD_BYTES_RATIO: f64 = 0.2;

/// Compaction is considered once dead arrays exceed this ratio of used arrays.
pub const COMPACTION_MAX_DEAD_ADDRESS_SPACE_RATIO: f64 = 0.2;

/// Fraction of the open buffers that one compaction pass may evacuate.
pub const COMPACTION_ACTIVE_BUFFERS_RATIO: f64 = 0.1;

/// Dead bytes below this amount never trigger compaction.
pub const COMPACTION_DEAD_BYTES_SLACK: usize = 64 * 1024;

/// Dead arrays below this count never trigger compaction.
pub const COMPACTION_DEAD_ADDRESS_SPACE_SLACK: usize = 64 * 1024;

/// How many nodes a reachability count expands between deadline checks.
pub const REACHABLE_DEADLINE_CHECK_INTERVAL: usize = 1024;
