//! Graph introspection: histograms, reachability and link symmetry.

use crate::config;
use crate::hnsw::graph::GraphMemoryUsage;
use crate::hnsw::index::HnswIndex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

/// Result of a bounded reachability count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReachableNodes {
    pub count: usize,
    /// False if the deadline was hit before the traversal finished.
    pub complete: bool,
}

/// Snapshot of index state for tooling.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub node_count: usize,
    pub node_id_limit: u32,
    pub entry_nodeid: Option<u32>,
    pub entry_level: Option<u32>,
    pub generation: u64,
    /// Read guards still pinning an older generation.
    pub stale_guards: usize,
    pub memory_usage: GraphMemoryUsage,
    /// `level_histogram[l]` = nodes whose highest level is `l`.
    pub level_histogram: Vec<usize>,
    /// `links_histogram[n]` = nodes with `n` links at level 0.
    pub links_histogram: Vec<usize>,
}

impl HnswIndex {
    pub fn level_histogram(&self) -> Vec<usize> {
        let mut histogram = Vec::new();
        for nodeid in 0..self.graph.node_id_limit() {
            let levels = self.graph.get_level_array(nodeid).len();
            if levels == 0 {
                continue;
            }
            if histogram.len() < levels {
                histogram.resize(levels, 0);
            }
            histogram[levels - 1] += 1;
        }
        histogram
    }

    pub fn links_histogram(&self) -> Vec<usize> {
        let mut histogram = Vec::new();
        for nodeid in 0..self.graph.node_id_limit() {
            if !self.graph.get_levels_ref(nodeid).valid() {
                continue;
            }
            let links = self.graph.get_link_array(nodeid, 0).len();
            if histogram.len() <= links {
                histogram.resize(links + 1, 0);
            }
            histogram[links] += 1;
        }
        histogram
    }

    /// Count nodes reachable from the entry point at level 0, giving up once
    /// `deadline` has passed.
    pub fn count_reachable_nodes(&self, deadline: Instant) -> ReachableNodes {
        let _guard = self.read_guard();
        let Some(entry) = self.graph.get_entry_node() else {
            return ReachableNodes {
                count: 0,
                complete: true,
            };
        };
        let node_id_limit = self.graph.node_id_limit() as usize;
        let mut visited = vec![false; node_id_limit];
        let mut queue = VecDeque::new();
        if (entry.nodeid as usize) < node_id_limit {
            visited[entry.nodeid as usize] = true;
            queue.push_back(entry.nodeid);
        }
        let mut count = 0usize;
        while let Some(nodeid) = queue.pop_front() {
            count += 1;
            if count % config::REACHABLE_DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline
            {
                tracing::warn!(count, "reachability count stopped at deadline");
                return ReachableNodes {
                    count,
                    complete: false,
                };
            }
            let levels_ref = self.graph.acquire_levels_ref(nodeid);
            for neighbor in self.graph.acquire_link_array(levels_ref, 0).iter() {
                let index = neighbor as usize;
                if index < node_id_limit
                    && !visited[index]
                    && self.graph.acquire_levels_ref(neighbor).valid()
                {
                    visited[index] = true;
                    queue.push_back(neighbor);
                }
            }
        }
        ReachableNodes {
            count,
            complete: true,
        }
    }

    /// True if every link has its back-link. Logs each asymmetric pair.
    pub fn check_link_symmetry(&self) -> bool {
        let mut symmetric = true;
        for nodeid in 0..self.graph.node_id_limit() {
            let levels = self.graph.get_level_array(nodeid).len();
            for level in 0..levels {
                for neighbor in self.graph.get_link_array(nodeid, level).iter() {
                    if !self.graph.get_link_array(neighbor, level).contains(nodeid) {
                        tracing::warn!(nodeid, neighbor, level, "link without back-link");
                        symmetric = false;
                    }
                }
            }
        }
        symmetric
    }

    pub fn get_state(&self) -> IndexStats {
        let entry = self.graph.get_entry_node();
        IndexStats {
            node_count: self.node_count(),
            node_id_limit: self.graph.node_id_limit(),
            entry_nodeid: entry.map(|e| e.nodeid),
            entry_level: entry.map(|e| e.level),
            generation: self.generation.current_generation(),
            stale_guards: self.generation.stale_guard_count(),
            memory_usage: self.memory_usage(),
            level_histogram: self.level_histogram(),
            links_histogram: self.links_histogram(),
        }
    }
}
