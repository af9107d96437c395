//! Random level assignment for new nodes.

use crate::config;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Draws the highest level a new node participates in.
pub trait RandomLevelGenerator: Send + std::fmt::Debug {
    fn max_level(&mut self) -> u32;
}

/// Geometric level distribution: `floor(-ln(u) / ln(M))` for uniform `u`.
///
/// With `M` links per node the expected number of levels is O(log N).
#[derive(Debug, Clone)]
pub struct InvLogLevelGenerator {
    rng: ChaCha8Rng,
    level_multiplier: f64,
}

impl InvLogLevelGenerator {
    pub fn new(links_per_node: u32, seed: u64) -> Self {
        let m = links_per_node.max(2) as f64;
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            level_multiplier: 1.0 / m.ln(),
        }
    }
}

impl RandomLevelGenerator for InvLogLevelGenerator {
    fn max_level(&mut self) -> u32 {
        // gen::<f64>() is in [0, 1); flip it so ln() never sees zero
        let u = 1.0 - self.rng.gen::<f64>();
        let level = (-u.ln() * self.level_multiplier).floor() as u32;
        level.min(config::HNSW_MAX_LEVELS - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_levels() {
        let mut a = InvLogLevelGenerator::new(16, 7);
        let mut b = InvLogLevelGenerator::new(16, 7);
        let levels_a: Vec<u32> = (0..100).map(|_| a.max_level()).collect();
        let levels_b: Vec<u32> = (0..100).map(|_| b.max_level()).collect();
        assert_eq!(levels_a, levels_b);
    }

    #[test]
    fn test_level_distribution_is_geometric() {
        let mut generator = InvLogLevelGenerator::new(16, 42);
        let n = 20_000;
        let mut counts = [0usize; config::HNSW_MAX_LEVELS as usize];
        for _ in 0..n {
            counts[generator.max_level() as usize] += 1;
        }
        // P(level >= 1) = 1/16
        let above_zero = n - counts[0];
        let expected = n / 16;
        assert!(
            above_zero > expected / 2 && above_zero < expected * 2,
            "got {above_zero} nodes above level 0, expected about {expected}"
        );
        assert!(counts[3..].iter().sum::<usize>() < 50);
    }

    #[test]
    fn test_levels_are_clamped() {
        let mut generator = InvLogLevelGenerator::new(2, 1);
        for _ in 0..10_000 {
            assert!(generator.max_level() < config::HNSW_MAX_LEVELS);
        }
    }
}
