//! Compaction policy for the graph's array stores.

use crate::config;
use crate::hnsw::array_store::{AddressSpace, MemoryUsage};
use serde::{Deserialize, Serialize};

/// Thresholds deciding when an array store is compacted, and how much of it
/// one pass may evacuate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionStrategy {
    /// Compact once dead bytes exceed this share of used bytes.
    pub max_dead_bytes_ratio: f64,
    /// Compact once dead arrays exceed this share of used arrays.
    pub max_dead_address_space_ratio: f64,
    /// Share of the open buffers evacuated by one pass (at least one buffer).
    pub active_buffers_ratio: f64,
    pub dead_bytes_slack: usize,
    pub dead_address_space_slack: usize,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        Self {
            max_dead_bytes_ratio: config::COMPACTION_MAX_DEAD_BYTES_RATIO,
            max_dead_address_space_ratio: config::COMPACTION_MAX_DEAD_ADDRESS_SPACE_RATIO,
            active_buffers_ratio: config::COMPACTION_ACTIVE_BUFFERS_RATIO,
            dead_bytes_slack: config::COMPACTION_DEAD_BYTES_SLACK,
            dead_address_space_slack: config::COMPACTION_DEAD_ADDRESS_SPACE_SLACK,
        }
    }
}

impl CompactionStrategy {
    /// Strategy that compacts as soon as anything is dead. Mostly for tests
    /// and tooling that wants a fully compacted graph.
    pub fn eager() -> Self {
        Self {
            max_dead_bytes_ratio: 0.0,
            max_dead_address_space_ratio: 0.0,
            active_buffers_ratio: 1.0,
            dead_bytes_slack: 0,
            dead_address_space_slack: 0,
        }
    }

    pub fn should_compact_memory(&self, usage: &MemoryUsage) -> bool {
        usage.dead_bytes > 0
            && usage.dead_bytes >= self.dead_bytes_slack
            && usage.dead_bytes as f64 > usage.used_bytes as f64 * self.max_dead_bytes_ratio
    }

    pub fn should_compact_address_space(&self, space: &AddressSpace) -> bool {
        space.dead > 0
            && space.dead >= self.dead_address_space_slack
            && space.dead as f64 > space.used as f64 * self.max_dead_address_space_ratio
    }

    pub fn should_compact(&self, usage: &MemoryUsage, space: &AddressSpace) -> bool {
        self.should_compact_memory(usage) || self.should_compact_address_space(space)
    }
}
