mod common;

use navgraph_core::hnsw::{CompactionStrategy, HnswIndexConfig, PreparedAddDoc};
use navgraph_core::{HnswIndex, Neighbor, VectorAccess};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

fn check_hits(hits: &[Neighbor], limit: u32, k: usize) {
    assert!(hits.len() <= k);
    assert!(hits.windows(2).all(|w| w[0].docid < w[1].docid));
    for hit in hits {
        assert!(hit.docid < limit, "unknown docid {}", hit.docid);
        assert!(hit.distance.is_finite());
    }
}

#[test]
fn readers_run_while_writer_inserts_removes_and_compacts() {
    const DOCS: u32 = 3000;
    let points = common::random_vectors(DOCS as usize, 8, 31);
    let store = common::store_for(&points);
    let config = HnswIndexConfig::default().with_max_links(8);
    let index = Arc::new(HnswIndex::new(config, store).unwrap());
    let done = AtomicBool::new(false);
    let searches = AtomicUsize::new(0);

    thread::scope(|scope| {
        for reader in 0..4u64 {
            let index = Arc::clone(&index);
            let points = &points;
            let done = &done;
            let searches = &searches;
            scope.spawn(move || {
                let queries = common::random_vectors(64, 8, 100 + reader);
                let mut i = 0usize;
                while !done.load(Ordering::Acquire) {
                    let query = &queries[i % queries.len()];
                    check_hits(&index.find_top_k(10, query, 40, f64::INFINITY), DOCS, 10);
                    let own = &points[i % points.len()];
                    check_hits(&index.find_top_k(1, own, 20, f64::INFINITY), DOCS, 1);
                    searches.fetch_add(2, Ordering::Relaxed);
                    i += 1;
                }
            });
        }

        let index = Arc::clone(&index);
        let done = &done;
        scope.spawn(move || {
            let strategy = CompactionStrategy::eager();
            for docid in 0..DOCS {
                index.add_document(docid);
                if docid % 4 == 3 {
                    index.remove_document(docid - 2);
                }
                if docid % 64 == 63 {
                    index.commit();
                }
                if docid % 512 == 511 {
                    index.consider_compact(&strategy);
                    index.commit();
                }
            }
            index.commit();
            done.store(true, Ordering::Release);
        });
    });

    assert!(searches.load(Ordering::Relaxed) > 0);
    assert_eq!(index.node_count(), (DOCS - DOCS / 4) as usize);
    assert!(index.check_link_symmetry());
    common::assert_link_budgets(&index);

    let removed: HashSet<u32> = (0..DOCS).filter(|d| d % 4 == 1).collect();
    for docid in (0..DOCS).step_by(37) {
        let hits = index.find_top_k(5, &points[docid as usize], 80, f64::INFINITY);
        assert!(hits.iter().all(|h| !removed.contains(&h.docid)));
    }
}

#[test]
fn held_guard_keeps_retired_arrays_readable() {
    let points = common::random_vectors(500, 4, 41);
    let (index, _store) = common::build_index(&points, HnswIndexConfig::default().with_max_links(4));
    let graph = index.graph();

    let guard = index.read_guard();
    let links = graph.get_link_array(7, 0);
    let snapshot = links.to_vec();
    assert!(!snapshot.is_empty());

    for docid in snapshot.iter().copied() {
        index.remove_document(docid);
    }
    for docid in (100..500).filter(|d| d % 2 == 0) {
        index.remove_document(docid);
    }
    index.commit();
    index.consider_compact(&CompactionStrategy::eager());
    index.commit();
    for docid in (100..500).filter(|d| d % 2 == 0) {
        index.add_document(docid);
    }
    index.commit();

    assert_eq!(links.to_vec(), snapshot);
    assert!(index.generation_handler().oldest_used_generation() <= guard.generation());

    drop(guard);
    index.commit();
    assert_eq!(
        index.generation_handler().oldest_used_generation(),
        index.generation_handler().current_generation()
    );
}

#[test]
fn inserts_prepared_on_worker_threads_complete_on_writer() {
    const DOCS: u32 = 2000;
    const WORKERS: u32 = 4;
    let points = common::random_vectors(DOCS as usize, 8, 51);
    let store = common::store_for(&points);
    let config = HnswIndexConfig::default().with_max_links(8);
    let index = Arc::new(HnswIndex::new(config, store.clone()).unwrap());
    let (plans_tx, plans_rx) = mpsc::channel::<PreparedAddDoc>();

    let removed = thread::scope(|scope| {
        for worker in 0..WORKERS {
            let index = Arc::clone(&index);
            let store = Arc::clone(&store);
            let plans_tx = plans_tx.clone();
            scope.spawn(move || {
                for docid in (worker..DOCS).step_by(WORKERS as usize) {
                    let prepared =
                        index.prepare_add_document(docid, store.vectors(docid), index.read_guard());
                    if plans_tx.send(prepared).is_err() {
                        break;
                    }
                }
            });
        }
        drop(plans_tx);

        let strategy = CompactionStrategy::eager();
        let mut completed = 0u32;
        let mut removed = HashSet::new();
        for prepared in plans_rx {
            let docid = prepared.docid();
            index.complete_add_document(docid, prepared);
            completed += 1;
            if completed % 8 == 0 {
                index.remove_document(docid);
                removed.insert(docid);
            }
            if completed % 32 == 0 {
                index.commit();
            }
            if completed % 256 == 0 {
                index.consider_compact(&strategy);
                index.commit();
            }
        }
        index.commit();
        removed
    });

    assert_eq!(index.node_count(), (DOCS as usize) - removed.len());
    assert!(index.check_link_symmetry());
    common::assert_link_budgets(&index);
    let reachable = index.count_reachable_nodes(Instant::now() + Duration::from_secs(60));
    assert!(reachable.complete);
    assert_eq!(reachable.count, index.node_count());

    for docid in (0..DOCS).filter(|d| !removed.contains(d)).step_by(41) {
        let hits = index.find_top_k(1, &points[docid as usize], 100, f64::INFINITY);
        assert_eq!(hits[0].docid, docid);
    }
}
