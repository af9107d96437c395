mod common;

use navgraph_core::hnsw::HnswIndexConfig;
use navgraph_core::{BitVectorFilter, GlobalFilter};
use std::collections::HashSet;

#[test]
fn outlier_query_returns_nearest_cluster_point() {
    let points = vec![vec![1.0, 1.0], vec![1.1, 0.9], vec![0.9, 1.2]];
    let (index, _store) = common::build_index(&points, HnswIndexConfig::default());
    let outlier = [9.0, 9.5];
    let hits = index.find_top_k(1, &outlier, 10, f64::INFINITY);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].docid, 2, "(0.9, 1.2) is closest to the outlier");
}

#[test]
fn removed_outlier_is_never_returned() {
    let points = vec![
        vec![1.0, 1.0],
        vec![1.1, 0.9],
        vec![0.9, 1.2],
        vec![10.0, 10.0],
    ];
    let (index, _store) = common::build_index(&points, HnswIndexConfig::default());
    assert_eq!(index.find_top_k(1, &[10.0, 10.0], 10, f64::INFINITY)[0].docid, 3);

    index.remove_document(3);
    index.commit();
    let hits = index.find_top_k(1, &[10.0, 10.0], 10, f64::INFINITY);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].docid, 2);

    // Same answer when the outlier is only filtered out
    let (index, _store) = common::build_index(&points, HnswIndexConfig::default());
    let live = BitVectorFilter::from_docids(4, [0, 1, 2]);
    let hits = index.find_top_k_with_filter(1, &[10.0, 10.0], &live, 10, f64::INFINITY);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].docid, 2);
}

#[test]
fn removing_entry_point_keeps_exact_recall() {
    let points = common::random_vectors(60, 4, 11);
    let config = HnswIndexConfig::default().with_max_links(6);
    let (index, _store) = common::build_index(&points, config);

    let entry = index.graph().get_entry_node().expect("non-empty graph");
    let entry_neighbors: HashSet<u32> = (0..=entry.level as usize)
        .flat_map(|level| index.graph().get_link_array(entry.nodeid, level).to_vec())
        .collect();

    index.remove_document(entry.nodeid);
    index.commit();

    let new_entry = index.graph().get_entry_node().expect("graph still has nodes");
    assert_ne!(new_entry.nodeid, entry.nodeid);
    assert!(
        entry_neighbors.contains(&new_entry.nodeid),
        "new entry {} was not a neighbor of the removed entry",
        new_entry.nodeid
    );
    assert!(index.check_link_symmetry());

    let live: Vec<u32> = (0..60).filter(|&d| d != entry.nodeid).collect();
    for &docid in &live {
        let query = &points[docid as usize];
        let hits = index.find_top_k(1, query, 60, f64::INFINITY);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].docid, docid, "self lookup of doc {docid}");
    }
    for query in common::random_vectors(20, 4, 12) {
        let expected = common::brute_force(index.distance_function(), &points, live.clone(), &query, 5);
        let mut got: Vec<u32> = index
            .find_top_k(5, &query, 60, f64::INFINITY)
            .iter()
            .map(|h| h.docid)
            .collect();
        let mut expected_sorted = expected.clone();
        got.sort_unstable();
        expected_sorted.sort_unstable();
        assert_eq!(got, expected_sorted);
    }
}

#[test]
fn filtered_search_returns_only_passing_ids() {
    let points = common::random_vectors(1000, 8, 3);
    let (index, _store) = common::build_index(&points, HnswIndexConfig::default());
    let passing: Vec<u32> = (0..1000).step_by(100).collect();
    let filter = BitVectorFilter::from_docids(1000, passing.iter().copied());
    assert_eq!(filter.count(), 10);

    for query in common::random_vectors(10, 8, 4) {
        for k in [1, 5, 10, 20] {
            let hits = index.find_top_k_with_filter(k, &query, &filter, 50, f64::INFINITY);
            assert!(hits.iter().all(|h| filter.check(h.docid)));
            assert_eq!(hits.len(), k.min(filter.count()), "k = {k}");
        }
    }
}

#[test]
fn recall_on_random_data() {
    let points = common::random_vectors(2000, 16, 21);
    let (index, _store) = common::build_index(&points, HnswIndexConfig::default());
    let queries = common::random_vectors(50, 16, 22);
    let mut found = 0usize;
    for query in &queries {
        let truth: HashSet<u32> =
            common::brute_force(index.distance_function(), &points, 0..2000, query, 10)
                .into_iter()
                .collect();
        found += index
            .find_top_k(10, query, 100, f64::INFINITY)
            .iter()
            .filter(|h| truth.contains(&h.docid))
            .count();
    }
    let recall = found as f64 / (queries.len() * 10) as f64;
    assert!(recall > 0.9, "recall@10 = {recall}");
}
