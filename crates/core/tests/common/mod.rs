#![allow(dead_code)]

use navgraph_core::hnsw::{DistanceFunction, HnswIndex, HnswIndexConfig};
use navgraph_core::InMemoryVectors;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::Arc;

pub fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

pub fn store_for(points: &[Vec<f32>]) -> Arc<InMemoryVectors> {
    let dim = points.first().map_or(1, Vec::len);
    let store = Arc::new(InMemoryVectors::new(dim));
    for (docid, point) in points.iter().enumerate() {
        store.set(docid as u32, point);
    }
    store
}

/// Index with every point inserted in docid order.
pub fn build_index(points: &[Vec<f32>], config: HnswIndexConfig) -> (HnswIndex, Arc<InMemoryVectors>) {
    let store = store_for(points);
    let index = HnswIndex::new(config, store.clone()).expect("valid config");
    for docid in 0..points.len() as u32 {
        index.add_document(docid);
    }
    index.commit();
    (index, store)
}

/// Exact k nearest docids among `live`, nearest first.
pub fn brute_force(
    distance: &dyn DistanceFunction,
    points: &[Vec<f32>],
    live: impl IntoIterator<Item = u32>,
    query: &[f32],
    k: usize,
) -> Vec<u32> {
    let mut scored: Vec<(f64, u32)> = live
        .into_iter()
        .map(|docid| (distance.calc(query, &points[docid as usize]), docid))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, docid)| docid).collect()
}

/// Per-node, per-level neighbor sets, for order-insensitive graph comparison.
pub fn link_sets(index: &HnswIndex) -> Vec<Vec<BTreeSet<u32>>> {
    let graph = index.graph();
    (0..graph.node_id_limit())
        .map(|nodeid| {
            let levels = graph.get_level_array(nodeid).len();
            (0..levels)
                .map(|level| graph.get_link_array(nodeid, level).iter().collect())
                .collect()
        })
        .collect()
}

/// Check link budgets for every node and level.
pub fn assert_link_budgets(index: &HnswIndex) {
    let graph = index.graph();
    let config = index.config();
    for nodeid in 0..graph.node_id_limit() {
        let levels = graph.get_level_array(nodeid).len();
        for level in 0..levels {
            let links = graph.get_link_array(nodeid, level).len();
            let budget = config.max_links_for_level(level) as usize;
            assert!(
                links <= budget,
                "node {nodeid} level {level} has {links} links, budget {budget}"
            );
        }
    }
}

pub fn save_to_vec(index: &HnswIndex) -> Vec<u8> {
    let mut bytes = Vec::new();
    index.save(&mut bytes).expect("save to memory");
    bytes
}
