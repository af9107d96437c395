use clap::{Args, Parser, Subcommand};
use navgraph_core::hnsw::{CompactionStrategy, DistanceFunction, IndexStats, ReachableNodes};
use navgraph_core::storage::{save_graph_file, HnswIndexLoader};
use navgraph_core::{HnswIndex, HnswIndexConfig, InMemoryVectors};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "navgraph", about = "Benchmark and inspect HNSW graphs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a graph from random vectors while concurrent readers search it
    Bench(BenchArgs),
    /// Load a saved graph and print its statistics as JSON
    Inspect(InspectArgs),
}

#[derive(Args)]
struct BenchArgs {
    /// Number of documents to insert
    #[arg(long, default_value_t = 10_000)]
    docs: u32,

    /// Vector dimension
    #[arg(long, default_value_t = 32)]
    dim: usize,

    /// Number of query vectors
    #[arg(long, default_value_t = 200)]
    queries: usize,

    /// Reader threads searching while the writer inserts
    #[arg(long, default_value_t = 4)]
    readers: usize,

    #[arg(long, default_value_t = 10)]
    k: usize,

    /// Level-0 candidate list size for queries
    #[arg(long, default_value_t = 100)]
    explore_k: usize,

    /// Links per node on insert (level 0 gets twice as many)
    #[arg(long, default_value_t = 16)]
    max_links: u32,

    /// Use diversity-aware neighbor selection
    #[arg(long, default_value_t = false)]
    heuristic: bool,

    /// Fraction of documents removed after the build (0.0 - 1.0)
    #[arg(long, default_value_t = 0.0)]
    remove_fraction: f64,

    /// Compact the graph after removals
    #[arg(long, default_value_t = false)]
    compact: bool,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Save the final graph to this file
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Args)]
struct InspectArgs {
    /// Graph file written by `bench --save` or `HnswIndex::save`
    path: PathBuf,

    /// Links per node on insert the graph was built with
    #[arg(long, default_value_t = 16)]
    max_links: u32,

    /// The graph was built with one node per subspace
    #[arg(long, default_value_t = false)]
    multi_vector: bool,

    /// Time limit for the reachability count in milliseconds
    #[arg(long, default_value_t = 5_000)]
    deadline_ms: u64,
}

#[derive(Serialize)]
struct BenchReport {
    docs: u32,
    live_docs: usize,
    build_secs: f64,
    inserts_per_sec: f64,
    concurrent_searches: usize,
    recall_at_k: f64,
    qps: f64,
    link_symmetry: bool,
    stats: IndexStats,
}

#[derive(Serialize)]
struct InspectReport {
    declared_node_ids: u32,
    stats: IndexStats,
    reachable: ReachableNodes,
}

fn random_vectors(rng: &mut ChaCha8Rng, count: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn brute_force(
    distance: &dyn DistanceFunction,
    docs: &[Vec<f32>],
    live: &HashSet<u32>,
    query: &[f32],
    k: usize,
) -> HashSet<u32> {
    let mut scored: Vec<(f64, u32)> = live
        .iter()
        .map(|&docid| (distance.calc(query, &docs[docid as usize]), docid))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    scored.into_iter().take(k).map(|(_, docid)| docid).collect()
}

fn run_bench(args: BenchArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&args.remove_fraction) {
        return Err(format!(
            "remove_fraction must be in [0, 1], got {}",
            args.remove_fraction
        )
        .into());
    }
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let docs = random_vectors(&mut rng, args.docs as usize, args.dim);
    let queries = random_vectors(&mut rng, args.queries.max(1), args.dim);

    let store = Arc::new(InMemoryVectors::new(args.dim));
    for (docid, vector) in docs.iter().enumerate() {
        store.set(docid as u32, vector);
    }
    let config = HnswIndexConfig::default()
        .with_max_links(args.max_links)
        .with_heuristic_select_neighbors(args.heuristic)
        .with_level_seed(args.seed);
    let index = Arc::new(HnswIndex::new(config, store)?);
    tracing::info!(docs = args.docs, dim = args.dim, readers = args.readers, "building graph");

    let done = AtomicBool::new(false);
    let searches = AtomicUsize::new(0);
    let (k, explore_k) = (args.k, args.explore_k);
    let build_time = thread::scope(|scope| {
        for _ in 0..args.readers {
            let index = Arc::clone(&index);
            let (queries, done, searches) = (&queries, &done, &searches);
            scope.spawn(move || {
                let mut i = 0usize;
                while !done.load(Ordering::Acquire) {
                    let query = &queries[i % queries.len()];
                    let _ = index.find_top_k(k, query, explore_k, f64::INFINITY);
                    searches.fetch_add(1, Ordering::Relaxed);
                    i += 1;
                }
            });
        }
        let t0 = Instant::now();
        for docid in 0..args.docs {
            index.add_document(docid);
            if docid % 256 == 255 {
                index.commit();
            }
        }
        index.commit();
        done.store(true, Ordering::Release);
        t0.elapsed()
    });
    tracing::info!(
        secs = build_time.as_secs_f64(),
        searches = searches.load(Ordering::Relaxed),
        "graph built"
    );

    let mut live: HashSet<u32> = (0..args.docs).collect();
    let to_remove = (args.docs as f64 * args.remove_fraction) as usize;
    for _ in 0..to_remove {
        let docid = rng.gen_range(0..args.docs);
        if live.remove(&docid) {
            index.remove_document(docid);
        }
    }
    index.commit();
    if to_remove > 0 {
        tracing::info!(removed = args.docs as usize - live.len(), "documents removed");
    }
    if args.compact {
        let compacted = index.consider_compact(&CompactionStrategy::default());
        index.commit();
        tracing::info!(compacted, "compaction pass finished");
    }

    let t0 = Instant::now();
    let results: Vec<Vec<u32>> = queries
        .iter()
        .map(|q| {
            index
                .find_top_k(args.k, q, args.explore_k, f64::INFINITY)
                .iter()
                .map(|hit| hit.docid)
                .collect()
        })
        .collect();
    let query_time = t0.elapsed();

    let mut found = 0usize;
    let mut expected = 0usize;
    for (q, predicted) in queries.iter().zip(&results) {
        let truth = brute_force(index.distance_function(), &docs, &live, q, args.k);
        expected += truth.len();
        found += predicted.iter().filter(|id| truth.contains(id)).count();
    }

    if let Some(path) = &args.save {
        save_graph_file(&index.make_saver(), path)?;
        tracing::info!(path = %path.display(), "graph saved");
    }

    let report = BenchReport {
        docs: args.docs,
        live_docs: live.len(),
        build_secs: build_time.as_secs_f64(),
        inserts_per_sec: args.docs as f64 / build_time.as_secs_f64(),
        concurrent_searches: searches.load(Ordering::Relaxed),
        recall_at_k: if expected == 0 { 1.0 } else { found as f64 / expected as f64 },
        qps: queries.len() as f64 / query_time.as_secs_f64(),
        link_symmetry: index.check_link_symmetry(),
        stats: index.get_state(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = HnswIndexConfig::default()
        .with_max_links(args.max_links)
        .with_multi_vector(args.multi_vector);
    // Loading and graph statistics never read vectors
    let index = HnswIndex::new(config, Arc::new(InMemoryVectors::new(1)))?;
    let reader = BufReader::new(File::open(&args.path)?);
    let mut loader = HnswIndexLoader::new(&index, reader)?;
    let declared_node_ids = loader.num_nodes();
    tracing::info!(path = %args.path.display(), node_ids = declared_node_ids, "loading graph");
    let mut loaded = 0u32;
    while loader.load_next()? {
        loaded += 1;
        if loaded % 100_000 == 0 {
            tracing::info!(loaded, node_ids = declared_node_ids, "loading graph");
        }
    }
    loader.finish()?;
    tracing::info!(nodes = index.node_count(), "graph loaded");

    let deadline = Instant::now() + Duration::from_millis(args.deadline_ms);
    let reachable = index.count_reachable_nodes(deadline);
    if !reachable.complete {
        tracing::warn!(counted = reachable.count, "reachability count hit the deadline");
    } else if reachable.count < index.node_count() {
        tracing::warn!(
            reachable = reachable.count,
            nodes = index.node_count(),
            "graph has unreachable nodes"
        );
    }
    let report = InspectReport {
        declared_node_ids,
        stats: index.get_state(),
        reachable,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("navgraph_cli=info".parse().expect("valid directive literal"))
                .add_directive("navgraph_core=info".parse().expect("valid directive literal")),
        )
        .init();

    match Cli::parse().command {
        Command::Bench(args) => run_bench(args),
        Command::Inspect(args) => run_inspect(args),
    }
}
