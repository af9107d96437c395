//! HNSW index configuration and the [`HnswIndex`] orchestrator.
//!
//! [`HnswIndexConfig`] holds the runtime tuning parameters. [`HnswIndex`] ties
//! the graph storage to its collaborators (vector access, distance function,
//! level generator, generation handler). Insertion, removal, search and
//! introspection live in their own modules as further `impl HnswIndex` blocks.

use crate::config;
use crate::error::{Error, Result};
use crate::generation::{Generation, GenerationGuard, GenerationHandler};
use crate::hnsw::compaction::CompactionStrategy;
use crate::hnsw::distance::{DistanceFunction, DistanceMetric};
use crate::hnsw::graph::{GraphMemoryUsage, HnswGraph};
use crate::hnsw::level_generator::{InvLogLevelGenerator, RandomLevelGenerator};
use crate::hnsw::nodeid_mapping::NodeIdMapping;
use crate::vectors::{VectorAccess, VectorCells};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Runtime configuration of an HNSW index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswIndexConfig {
    /// Link budget at level 0.
    pub max_links_at_level_0: u32,
    /// Links selected for a new node, and link budget above level 0.
    pub max_links_on_inserts: u32,
    /// Candidate list size while searching for neighbors of a new node.
    pub neighbors_to_explore_at_construction: u32,
    pub distance_metric: DistanceMetric,
    /// Use diversity-aware neighbor selection instead of nearest-first.
    pub heuristic_select_neighbors: bool,
    /// Index one node per subspace instead of one node per document.
    pub multi_vector: bool,
    /// Seed of the random level generator.
    pub level_seed: u64,
}

impl Default for HnswIndexConfig {
    fn default() -> Self {
        Self {
            max_links_at_level_0: config::HNSW_DEFAULT_MAX_LINKS_AT_LEVEL_0,
            max_links_on_inserts: config::HNSW_DEFAULT_MAX_LINKS_ON_INSERTS,
            neighbors_to_explore_at_construction: config::HNSW_DEFAULT_NEIGHBORS_TO_EXPLORE,
            distance_metric: DistanceMetric::Euclidean,
            heuristic_select_neighbors: false,
            multi_vector: false,
            level_seed: config::HNSW_DEFAULT_LEVEL_SEED,
        }
    }
}

impl HnswIndexConfig {
    /// Set the insert budget to `m` and the level-0 budget to `2m`.
    pub fn with_max_links(mut self, m: u32) -> Self {
        self.max_links_on_inserts = m;
        self.max_links_at_level_0 = m.saturating_mul(2);
        self
    }

    pub fn with_neighbors_to_explore(mut self, neighbors: u32) -> Self {
        self.neighbors_to_explore_at_construction = neighbors;
        self
    }

    pub fn with_distance_metric(mut self, metric: DistanceMetric) -> Self {
        self.distance_metric = metric;
        self
    }

    pub fn with_heuristic_select_neighbors(mut self, heuristic: bool) -> Self {
        self.heuristic_select_neighbors = heuristic;
        self
    }

    pub fn with_multi_vector(mut self, multi_vector: bool) -> Self {
        self.multi_vector = multi_vector;
        self
    }

    pub fn with_level_seed(mut self, seed: u64) -> Self {
        self.level_seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_links_at_level_0 == 0 || self.max_links_on_inserts == 0 {
            return Err(Error::InvalidParameter(
                "link budgets must be greater than 0".into(),
            ));
        }
        if self.max_links_on_inserts > self.max_links_at_level_0 {
            return Err(Error::InvalidParameter(format!(
                "max_links_on_inserts ({}) exceeds max_links_at_level_0 ({})",
                self.max_links_on_inserts, self.max_links_at_level_0
            )));
        }
        if self.neighbors_to_explore_at_construction == 0 {
            return Err(Error::InvalidParameter(
                "neighbors_to_explore_at_construction must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Link budget of a level.
    #[inline]
    pub fn max_links_for_level(&self, level: usize) -> u32 {
        if level == 0 {
            self.max_links_at_level_0
        } else {
            self.max_links_on_inserts
        }
    }
}

/// A search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub docid: u32,
    /// Internal distance (lower is closer).
    pub distance: f64,
}

/// Approximate nearest neighbor index over vectors owned by a [`VectorAccess`].
///
/// One thread at a time may call the writer methods (`add_document`,
/// `complete_add_document`, `remove_document`, `commit`, `consider_compact`,
/// `load`). Searches and `prepare_add_document` may run on any thread
/// concurrently with the writer.
pub struct HnswIndex {
    pub(crate) config: HnswIndexConfig,
    pub(crate) graph: Arc<HnswGraph>,
    pub(crate) vectors: Arc<dyn VectorAccess>,
    pub(crate) distance: Box<dyn DistanceFunction>,
    pub(crate) level_generator: Mutex<Box<dyn RandomLevelGenerator>>,
    pub(crate) id_mapping: Mutex<NodeIdMapping>,
    pub(crate) generation: Arc<GenerationHandler>,
}

impl HnswIndex {
    /// Create an empty index using the configured distance metric and a
    /// seeded level generator.
    pub fn new(config: HnswIndexConfig, vectors: Arc<dyn VectorAccess>) -> Result<Self> {
        let distance = config.distance_metric.boxed();
        let level_generator = Box::new(InvLogLevelGenerator::new(
            config.max_links_on_inserts,
            config.level_seed,
        ));
        Self::with_components(
            config,
            vectors,
            distance,
            level_generator,
            Arc::new(GenerationHandler::new()),
        )
    }

    /// Create an empty index with caller-supplied collaborators.
    pub fn with_components(
        config: HnswIndexConfig,
        vectors: Arc<dyn VectorAccess>,
        distance: Box<dyn DistanceFunction>,
        level_generator: Box<dyn RandomLevelGenerator>,
        generation: Arc<GenerationHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let id_mapping = NodeIdMapping::new(config.multi_vector);
        Ok(Self {
            config,
            graph: Arc::new(HnswGraph::new()),
            vectors,
            distance,
            level_generator: Mutex::new(level_generator),
            id_mapping: Mutex::new(id_mapping),
            generation,
        })
    }

    pub fn config(&self) -> &HnswIndexConfig {
        &self.config
    }

    pub fn graph(&self) -> &HnswGraph {
        &self.graph
    }

    pub fn generation_handler(&self) -> &Arc<GenerationHandler> {
        &self.generation
    }

    pub fn distance_function(&self) -> &dyn DistanceFunction {
        self.distance.as_ref()
    }

    /// Guard keeping everything published up to now alive.
    pub fn read_guard(&self) -> GenerationGuard {
        self.generation.take_guard()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }

    /// Writer housekeeping: tag retired storage with the current generation,
    /// advance the generation and reclaim what no reader can still see.
    pub fn commit(&self) {
        self.assign_generation(self.generation.current_generation());
        self.generation.increment_generation();
        self.reclaim_memory(self.generation.oldest_used_generation());
    }

    pub fn assign_generation(&self, current_gen: Generation) {
        self.graph.assign_generation(current_gen);
        self.id_mapping.lock().assign_generation(current_gen);
    }

    pub fn reclaim_memory(&self, oldest_used_gen: Generation) {
        self.graph.reclaim_memory(oldest_used_gen);
        self.id_mapping.lock().reclaim_memory(oldest_used_gen);
    }

    pub fn memory_usage(&self) -> GraphMemoryUsage {
        self.graph.memory_usage()
    }

    /// Compact the level and link array stores that exceed `strategy`.
    /// Returns true if anything was compacted.
    pub fn consider_compact(&self, strategy: &CompactionStrategy) -> bool {
        let usage = self.graph.memory_usage();
        let mut compacted = false;
        if strategy.should_compact(&usage.level_arrays, &self.graph.level_arrays_address_space()) {
            compacted |= self.graph.compact_level_arrays(strategy);
        }
        if strategy.should_compact(&usage.link_arrays, &self.graph.link_arrays_address_space()) {
            compacted |= self.graph.compact_link_arrays(strategy);
        }
        compacted
    }

    /// Rank score of an internal distance.
    pub fn to_rawscore(&self, distance: f64) -> f64 {
        self.distance.to_rawscore(distance)
    }

    pub(crate) fn node_vector(&self, nodeid: u32) -> Option<VectorCells> {
        self.vectors
            .vector(self.graph.docid(nodeid), self.graph.subspace(nodeid))
    }

    pub(crate) fn distance_to_node(&self, vector: &[f32], nodeid: u32) -> Option<f64> {
        self.node_vector(nodeid)
            .map(|cells| self.distance.calc(vector, &cells))
    }

    /// Drop every node. Used to back out of a failed load.
    pub(crate) fn reset(&self) {
        self.graph.clear();
        self.id_mapping.lock().clear();
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("config", &self.config)
            .field("graph", &self.graph)
            .finish()
    }
}
