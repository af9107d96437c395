//! Distance functions used by the HNSW graph.
//!
//! The graph only ever compares distances, so every metric returns an internal
//! distance where **lower is better**. Conversion to and from the external
//! threshold and rank score happens through [`DistanceFunction`].

use serde::{Deserialize, Serialize};

/// Computes distances between vectors and converts them for callers.
pub trait DistanceFunction: Send + Sync + std::fmt::Debug {
    /// Internal distance between two vectors.
    fn calc(&self, a: &[f32], b: &[f32]) -> f64;

    /// Like [`calc`](Self::calc), but may stop early and return any value
    /// above `limit` once the distance is known to exceed it.
    fn calc_with_limit(&self, a: &[f32], b: &[f32], limit: f64) -> f64 {
        let _ = limit;
        self.calc(a, b)
    }

    /// Convert an external distance threshold to an internal distance.
    fn convert_threshold(&self, threshold: f64) -> f64;

    /// Convert an internal distance to a rank score in (0, 1].
    fn to_rawscore(&self, distance: f64) -> f64;
}

/// Built-in distance metrics, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared euclidean distance (L2²). Thresholds are plain euclidean distances.
    #[default]
    Euclidean,
    /// Angular distance, stored as `1 - cosine_similarity`. Thresholds are angles in radians.
    Angular,
    /// `1 - dot(a, b)` for vectors normalized by the caller.
    PrenormalizedInnerProduct,
}

impl DistanceMetric {
    /// Box this metric for use as a pluggable [`DistanceFunction`].
    pub fn boxed(self) -> Box<dyn DistanceFunction> {
        Box::new(self)
    }
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}

#[inline]
fn squared_euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum()
}

/// Chunked squared euclidean that bails out once past `limit`.
#[inline]
fn squared_euclidean_with_limit(a: &[f32], b: &[f32], limit: f64) -> f64 {
    let mut sum = 0.0;
    for (ca, cb) in a.chunks(16).zip(b.chunks(16)) {
        sum += squared_euclidean(ca, cb);
        if sum > limit {
            return sum;
        }
    }
    sum
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let norms = dot_product(a, a) * dot_product(b, b);
    if norms <= 0.0 {
        return 0.0;
    }
    (dot_product(a, b) / norms.sqrt()).clamp(-1.0, 1.0)
}

impl DistanceFunction for DistanceMetric {
    fn calc(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Euclidean => squared_euclidean(a, b),
            DistanceMetric::Angular => 1.0 - cosine_similarity(a, b),
            DistanceMetric::PrenormalizedInnerProduct => 1.0 - dot_product(a, b),
        }
    }

    fn calc_with_limit(&self, a: &[f32], b: &[f32], limit: f64) -> f64 {
        match self {
            DistanceMetric::Euclidean => squared_euclidean_with_limit(a, b, limit),
            _ => self.calc(a, b),
        }
    }

    fn convert_threshold(&self, threshold: f64) -> f64 {
        match self {
            DistanceMetric::Euclidean => threshold * threshold,
            DistanceMetric::Angular => {
                if threshold >= std::f64::consts::PI {
                    f64::INFINITY
                } else {
                    1.0 - threshold.cos()
                }
            }
            DistanceMetric::PrenormalizedInnerProduct => threshold,
        }
    }

    fn to_rawscore(&self, distance: f64) -> f64 {
        match self {
            DistanceMetric::Euclidean => 1.0 / (1.0 + distance.max(0.0).sqrt()),
            DistanceMetric::Angular => {
                let angle = (1.0 - distance).clamp(-1.0, 1.0).acos();
                1.0 / (1.0 + angle)
            }
            DistanceMetric::PrenormalizedInnerProduct => 1.0 / (1.0 + distance.max(0.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_is_squared() {
        let d = DistanceMetric::Euclidean.calc(&[0.0, 0.0, 0.0], &[3.0, 4.0, 0.0]);
        assert!((d - 25.0).abs() < 1e-9, "squared euclidean should be 25, got {d}");
    }

    #[test]
    fn test_euclidean_limit_exits_early_above_limit() {
        let a = vec![0.0f32; 64];
        let b = vec![1.0f32; 64];
        let exact = DistanceMetric::Euclidean.calc(&a, &b);
        let limited = DistanceMetric::Euclidean.calc_with_limit(&a, &b, 5.0);
        assert!(limited > 5.0);
        assert!(limited < exact);
        // Under the limit the full distance is returned
        let full = DistanceMetric::Euclidean.calc_with_limit(&a, &b, 100.0);
        assert!((full - exact).abs() < 1e-9);
    }

    #[test]
    fn test_angular_orthogonal_and_identical() {
        let d = DistanceMetric::Angular.calc(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((d - 1.0).abs() < 1e-9, "orthogonal angular distance = 1, got {d}");
        let d = DistanceMetric::Angular.calc(&[1.0, 2.0], &[2.0, 4.0]);
        assert!(d.abs() < 1e-9, "parallel vectors have distance 0, got {d}");
    }

    #[test]
    fn test_angular_zero_vector_is_not_nan() {
        let d = DistanceMetric::Angular.calc(&[0.0, 0.0], &[1.0, 0.0]);
        assert!((d - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_inner_product_distance() {
        let d = DistanceMetric::PrenormalizedInnerProduct.calc(&[0.6, 0.8], &[0.6, 0.8]);
        assert!(d.abs() < 1e-6, "self distance ~0, got {d}");
    }

    #[test]
    fn test_threshold_conversion() {
        assert_eq!(DistanceMetric::Euclidean.convert_threshold(3.0), 9.0);
        let t = DistanceMetric::Angular.convert_threshold(std::f64::consts::FRAC_PI_2);
        assert!((t - 1.0).abs() < 1e-9);
        assert_eq!(
            DistanceMetric::Angular.convert_threshold(4.0),
            f64::INFINITY
        );
        assert_eq!(
            DistanceMetric::PrenormalizedInnerProduct.convert_threshold(0.25),
            0.25
        );
    }

    #[test]
    fn test_rawscore_range() {
        for metric in [
            DistanceMetric::Euclidean,
            DistanceMetric::Angular,
            DistanceMetric::PrenormalizedInnerProduct,
        ] {
            assert!((metric.to_rawscore(0.0) - 1.0).abs() < 1e-9);
            let far = metric.to_rawscore(1.5);
            assert!(far > 0.0 && far < 1.0, "{metric:?} score {far}");
        }
    }

    #[test]
    fn test_metric_serde_names() {
        let json = serde_json::to_string(&DistanceMetric::PrenormalizedInnerProduct).unwrap();
        assert_eq!(json, "\"prenormalized_inner_product\"");
        let parsed: DistanceMetric = serde_json::from_str("\"angular\"").unwrap();
        assert_eq!(parsed, DistanceMetric::Angular);
    }
}
