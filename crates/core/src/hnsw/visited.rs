//! Per-query visited tracking for graph traversal.
//!
//! A search that is expected to touch a large share of the graph uses a dense
//! bit vector sized to the node id limit. Small searches on large graphs use a
//! hash set so they do not pay for clearing megabytes of bits.

use crate::config;
use std::collections::HashSet;

/// Dense visited set: one bit per node id below the limit.
#[derive(Debug)]
pub struct BitVectorVisited {
    bits: Vec<u64>,
    limit: u32,
}

impl BitVectorVisited {
    pub fn new(node_id_limit: u32) -> Self {
        let words = (node_id_limit as usize).div_ceil(64);
        Self {
            bits: vec![0; words],
            limit: node_id_limit,
        }
    }

    /// Mark `nodeid` as visited. Returns `true` if it was NOT previously visited.
    /// Ids at or above the limit are reported as already visited.
    #[inline]
    pub fn try_mark(&mut self, nodeid: u32) -> bool {
        if nodeid >= self.limit {
            return false;
        }
        let word = &mut self.bits[(nodeid / 64) as usize];
        let mask = 1u64 << (nodeid % 64);
        if *word & mask != 0 {
            false
        } else {
            *word |= mask;
            true
        }
    }
}

/// Sparse visited set for traversals that touch few nodes.
#[derive(Debug)]
pub struct HashSetVisited {
    set: HashSet<u32>,
    limit: u32,
}

impl HashSetVisited {
    pub fn new(node_id_limit: u32, estimated_visits: usize) -> Self {
        Self {
            set: HashSet::with_capacity(estimated_visits),
            limit: node_id_limit,
        }
    }

    #[inline]
    pub fn try_mark(&mut self, nodeid: u32) -> bool {
        nodeid < self.limit && self.set.insert(nodeid)
    }
}

/// Visited tracker chosen by estimated visit fraction.
#[derive(Debug)]
pub enum VisitedTracker {
    Dense(BitVectorVisited),
    Sparse(HashSetVisited),
}

impl VisitedTracker {
    /// Pick a tracker for a traversal expected to visit `estimated_visits` of
    /// `node_id_limit` nodes.
    pub fn new(node_id_limit: u32, estimated_visits: usize) -> Self {
        let dense_threshold = (node_id_limit / config::VISITED_DENSE_DIVISOR) as usize;
        if estimated_visits >= dense_threshold {
            VisitedTracker::Dense(BitVectorVisited::new(node_id_limit))
        } else {
            VisitedTracker::Sparse(HashSetVisited::new(node_id_limit, estimated_visits))
        }
    }

    /// Mark `nodeid` as visited. Returns `true` if this is the first visit.
    #[inline]
    pub fn try_mark(&mut self, nodeid: u32) -> bool {
        match self {
            VisitedTracker::Dense(v) => v.try_mark(nodeid),
            VisitedTracker::Sparse(v) => v.try_mark(nodeid),
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, VisitedTracker::Dense(_))
    }
}
