//! HNSW search: bounded best-first layer search and top-k queries.

use crate::hnsw::filter::GlobalFilter;
use crate::hnsw::index::{HnswIndex, Neighbor};
use crate::hnsw::queue::{FurthestPriQ, HnswCandidate, NearestPriQ};
use crate::hnsw::visited::VisitedTracker;
use std::collections::HashSet;

impl HnswIndex {
    /// Best-first search of one level.
    ///
    /// `best` holds the seeds on entry and the best `neighbors_to_find` nodes
    /// on return (furthest on top). With a filter, only passing nodes are kept
    /// in `best`, but every node is still expanded through.
    pub(crate) fn search_layer(
        &self,
        input: &[f32],
        neighbors_to_find: usize,
        best: &mut FurthestPriQ,
        level: usize,
        filter: Option<&dyn GlobalFilter>,
    ) {
        let neighbors_to_find = neighbors_to_find.max(1);
        let node_id_limit = self.graph.node_id_limit();
        let mut estimated_visits =
            self.config.max_links_for_level(level) as usize * neighbors_to_find;
        if let Some(filter) = filter {
            if filter.count() > 0 && filter.size() > 0 {
                let selectivity = filter.count() as f64 / filter.size() as f64;
                estimated_visits = (estimated_visits as f64 / selectivity) as usize;
            }
        }
        let mut visited =
            VisitedTracker::new(node_id_limit, estimated_visits.min(node_id_limit as usize));

        let mut candidates = NearestPriQ::new();
        let mut seeds = std::mem::take(best);
        while let Some(seed) = seeds.pop() {
            visited.try_mark(seed.nodeid);
            candidates.push(seed);
            if filter.map_or(true, |f| f.check(seed.docid)) {
                best.push(seed);
            }
        }
        best.truncate(neighbors_to_find);

        let mut limit = if best.len() >= neighbors_to_find {
            best.peek().map_or(f64::INFINITY, |c| c.distance)
        } else {
            f64::INFINITY
        };
        while let Some(candidate) = candidates.pop() {
            if candidate.distance > limit {
                break;
            }
            let links = self.graph.acquire_link_array(candidate.levels_ref, level);
            for neighbor in links.iter() {
                if !visited.try_mark(neighbor) {
                    continue;
                }
                let levels_ref = self.graph.acquire_levels_ref(neighbor);
                if !levels_ref.valid() || self.graph.levels_len(levels_ref) <= level {
                    continue;
                }
                let docid = self.graph.docid(neighbor);
                let Some(cells) = self.vectors.vector(docid, self.graph.subspace(neighbor)) else {
                    continue;
                };
                let distance = self.distance.calc_with_limit(input, &cells, limit);
                if distance >= limit {
                    continue;
                }
                let found = HnswCandidate::new(neighbor, docid, levels_ref, distance);
                candidates.push(found);
                if filter.map_or(true, |f| f.check(docid)) {
                    best.push(found);
                    if best.len() > neighbors_to_find {
                        best.pop();
                    }
                    if best.len() >= neighbors_to_find {
                        limit = best.peek().map_or(f64::INFINITY, |c| c.distance);
                    }
                }
            }
        }
    }

    /// Approximate `k` nearest documents to `vector`, sorted by docid.
    ///
    /// `explore_k` widens the level-0 search beyond `k`. Hits further away
    /// than `distance_threshold` (in external units) are dropped; pass
    /// `f64::INFINITY` for no threshold.
    pub fn find_top_k(
        &self,
        k: usize,
        vector: &[f32],
        explore_k: usize,
        distance_threshold: f64,
    ) -> Vec<Neighbor> {
        self.top_k(k, vector, explore_k, distance_threshold, None)
    }

    /// Like [`find_top_k`](Self::find_top_k), returning only documents
    /// passing `filter`.
    pub fn find_top_k_with_filter(
        &self,
        k: usize,
        vector: &[f32],
        filter: &dyn GlobalFilter,
        explore_k: usize,
        distance_threshold: f64,
    ) -> Vec<Neighbor> {
        self.top_k(k, vector, explore_k, distance_threshold, Some(filter))
    }

    fn top_k(
        &self,
        k: usize,
        vector: &[f32],
        explore_k: usize,
        distance_threshold: f64,
        filter: Option<&dyn GlobalFilter>,
    ) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let _guard = self.read_guard();
        let Some(entry) = self.graph.get_entry_node() else {
            return Vec::new();
        };
        let entry_distance = self
            .distance_to_node(vector, entry.nodeid)
            .unwrap_or(f64::INFINITY);
        let mut best = FurthestPriQ::new();
        best.push(HnswCandidate::new(
            entry.nodeid,
            self.graph.docid(entry.nodeid),
            entry.levels_ref,
            entry_distance,
        ));
        for level in (1..=entry.level as usize).rev() {
            self.search_layer(vector, 1, &mut best, level, None);
        }
        self.search_layer(vector, k.max(explore_k), &mut best, 0, filter);

        let threshold = self.distance.convert_threshold(distance_threshold);
        let mut seen = HashSet::new();
        let mut hits: Vec<Neighbor> = best
            .into_sorted_vec()
            .into_iter()
            .filter(|c| filter.map_or(true, |f| f.check(c.docid)))
            .filter(|c| !threshold.is_finite() || c.distance <= threshold)
            .filter(|c| seen.insert(c.docid))
            .take(k)
            .map(|c| Neighbor {
                docid: c.docid,
                distance: c.distance,
            })
            .collect();
        hits.sort_by_key(|hit| hit.docid);
        hits
    }
}

#[cfg(test)]
mod tests {
    use crate::hnsw::filter::BitVectorFilter;
    use crate::hnsw::index::{HnswIndex, HnswIndexConfig};
    use crate::vectors::InMemoryVectors;
    use std::sync::Arc;

    fn grid_index() -> HnswIndex {
        let vectors = Arc::new(InMemoryVectors::new(2));
        for docid in 0..100u32 {
            vectors.set(docid, &[(docid % 10) as f32, (docid / 10) as f32]);
        }
        let config = HnswIndexConfig::default().with_max_links(4);
        let index = HnswIndex::new(config, vectors).unwrap();
        for docid in 0..100 {
            index.add_document(docid);
        }
        index
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let vectors = Arc::new(InMemoryVectors::new(2));
        let index = HnswIndex::new(HnswIndexConfig::default(), vectors).unwrap();
        assert!(index.find_top_k(5, &[0.0, 0.0], 10, f64::INFINITY).is_empty());
    }

    #[test]
    fn test_exact_match_found() {
        let index = grid_index();
        let hits = index.find_top_k(1, &[3.0, 7.0], 50, f64::INFINITY);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].docid, 73);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_results_sorted_by_docid() {
        let index = grid_index();
        let hits = index.find_top_k(5, &[5.0, 5.0], 50, f64::INFINITY);
        assert_eq!(hits.len(), 5);
        let docids: Vec<u32> = hits.iter().map(|h| h.docid).collect();
        assert_eq!(docids, vec![45, 54, 55, 56, 65]);
    }

    #[test]
    fn test_distance_threshold() {
        let index = grid_index();
        // Euclidean threshold 1.0 keeps the point itself and its 4 grid neighbors
        let hits = index.find_top_k(10, &[5.0, 5.0], 50, 1.0);
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| h.distance <= 1.0));
    }

    #[test]
    fn test_filter_limits_results() {
        let index = grid_index();
        let filter = BitVectorFilter::from_docids(100, [0, 99]);
        let hits = index.find_top_k_with_filter(5, &[5.0, 5.0], &filter, 10, f64::INFINITY);
        let docids: Vec<u32> = hits.iter().map(|h| h.docid).collect();
        assert_eq!(docids, vec![0, 99]);
    }
}
