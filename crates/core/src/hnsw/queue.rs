//! Candidate priority queues used during traversal and result collection.
//!
//! [`NearestPriQ`] pops the closest candidate first and drives expansion.
//! [`FurthestPriQ`] keeps the current best `k` with the worst on top so it can
//! be evicted cheaply. Ties on distance are broken by node id so traversal
//! order is deterministic.

use crate::hnsw::array_store::EntryRef;
use ordered_float::OrderedFloat;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A node considered during search, with its distance to the query.
#[derive(Debug, Clone, Copy)]
pub struct HnswCandidate {
    pub nodeid: u32,
    pub docid: u32,
    /// Level array handle observed when the candidate was found.
    pub levels_ref: EntryRef,
    pub distance: f64,
}

impl HnswCandidate {
    pub fn new(nodeid: u32, docid: u32, levels_ref: EntryRef, distance: f64) -> Self {
        Self {
            nodeid,
            docid,
            levels_ref,
            distance,
        }
    }

    #[inline]
    fn key(&self) -> (OrderedFloat<f64>, u32) {
        (OrderedFloat(self.distance), self.nodeid)
    }
}

impl PartialEq for HnswCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HnswCandidate {}

impl Ord for HnswCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for HnswCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Nearest-first ordering.
#[derive(Debug, Default)]
pub struct NearestPriQ {
    heap: BinaryHeap<Reverse<HnswCandidate>>,
}

impl NearestPriQ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: HnswCandidate) {
        self.heap.push(Reverse(candidate));
    }

    pub fn pop(&mut self) -> Option<HnswCandidate> {
        self.heap.pop().map(|Reverse(c)| c)
    }
}

/// Furthest-first ordering; holds the best `k` seen so far.
#[derive(Debug, Default)]
pub struct FurthestPriQ {
    heap: BinaryHeap<HnswCandidate>,
}

impl FurthestPriQ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: HnswCandidate) {
        self.heap.push(candidate);
    }

    /// Remove the furthest candidate.
    pub fn pop(&mut self) -> Option<HnswCandidate> {
        self.heap.pop()
    }

    /// The furthest candidate.
    pub fn peek(&self) -> Option<&HnswCandidate> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop the furthest candidates until at most `k` remain.
    pub fn truncate(&mut self, k: usize) {
        while self.heap.len() > k {
            self.heap.pop();
        }
    }

    /// Unordered view of the contents.
    pub fn iter(&self) -> impl Iterator<Item = &HnswCandidate> + '_ {
        self.heap.iter()
    }

    /// Consume the queue, returning candidates nearest first.
    pub fn into_sorted_vec(self) -> Vec<HnswCandidate> {
        self.heap.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(nodeid: u32, distance: f64) -> HnswCandidate {
        HnswCandidate::new(nodeid, nodeid, EntryRef::INVALID, distance)
    }

    #[test]
    fn test_nearest_pops_closest_first() {
        let mut q = NearestPriQ::new();
        q.push(cand(1, 3.0));
        q.push(cand(2, 1.0));
        q.push(cand(3, 2.0));
        let order: Vec<u32> = std::iter::from_fn(|| q.pop()).map(|c| c.nodeid).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_furthest_keeps_best_k() {
        let mut q = FurthestPriQ::new();
        for (id, d) in [(1, 5.0), (2, 1.0), (3, 4.0), (4, 2.0), (5, 3.0)] {
            q.push(cand(id, d));
        }
        assert_eq!(q.peek().unwrap().nodeid, 1);
        q.truncate(3);
        assert_eq!(q.len(), 3);
        let ids: Vec<u32> = q.into_sorted_vec().iter().map(|c| c.nodeid).collect();
        assert_eq!(ids, vec![2, 4, 5]);
    }

    #[test]
    fn test_ties_broken_by_nodeid() {
        let mut q = NearestPriQ::new();
        q.push(cand(9, 1.0));
        q.push(cand(4, 1.0));
        assert_eq!(q.pop().unwrap().nodeid, 4);
        assert_eq!(q.pop().unwrap().nodeid, 9);
        assert!(q.pop().is_none());
    }
}
