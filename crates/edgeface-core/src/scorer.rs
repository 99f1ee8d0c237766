//! Distance-to-confidence mapping.
//!
//! `score = 100 * exp(-mean_distance / decay_constant)`
//!
//! Raw-pixel distances run into the thousands, so any linear `100 - d` style
//! mapping saturates at 0 for every face. Exponential decay over the mean
//! neighbor distance stays monotonic and spreads scores over the whole range.

use crate::config::RecognitionConfig;
use crate::knn::NeighborSet;

/// Upper bound of the confidence scale, reached at distance 0.
pub const MAX_CONFIDENCE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScorer {
    decay_constant: f32,
}

impl ConfidenceScorer {
    /// `decay_constant` must be positive and finite; [`RecognitionConfig::validate`] enforces it.
    pub fn new(decay_constant: f32) -> Self {
        Self { decay_constant }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(config.decay_constant)
    }

    pub fn decay_constant(&self) -> f32 {
        self.decay_constant
    }

    /// Confidence in [0, 100] for a neighbor set.
    pub fn score(&self, neighbors: &NeighborSet) -> f32 {
        self.score_distance(neighbors.mean_distance())
    }

    /// Confidence for a raw mean distance, in (0, 100]; 100 at 0.
    ///
    /// Strictly decreasing while the result is representable in `f32`.
    /// Past roughly `87 * decay_constant` it would underflow, so it floors at
    /// [`f32::MIN_POSITIVE`] and never reaches 0.
    pub fn score_distance(&self, mean_distance: f32) -> f32 {
        let decay = (-(mean_distance as f64) / self.decay_constant as f64).exp();
        ((MAX_CONFIDENCE as f64 * decay) as f32).max(f32::MIN_POSITIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance_is_full_confidence() {
        let scorer = ConfidenceScorer::new(4500.0);
        assert_eq!(scorer.score_distance(0.0), 100.0);
    }

    #[test]
    fn test_one_decay_constant_is_one_over_e() {
        let scorer = ConfidenceScorer::new(4500.0);
        let expected = 100.0 / std::f32::consts::E;
        assert!((scorer.score_distance(4500.0) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_strictly_decreasing() {
        let scorer = ConfidenceScorer::new(4500.0);
        let mut prev = scorer.score_distance(0.0);
        for d in (1..=40).map(|i| i as f32 * 250.0) {
            let s = scorer.score_distance(d);
            assert!(s < prev, "score({d}) = {s} not below {prev}");
            prev = s;
        }
    }

    #[test]
    fn test_tends_to_zero() {
        let scorer = ConfidenceScorer::new(4500.0);
        assert!(scorer.score_distance(100_000.0) < 1e-6);
        assert!(scorer.score_distance(1e9) >= 0.0);
    }

    #[test]
    fn test_far_distances_stay_positive() {
        let scorer = ConfidenceScorer::new(4500.0);
        for d in [1e6, 4e6, 4.1e6, f32::MAX] {
            let s = scorer.score_distance(d);
            assert!(s > 0.0, "score({d}) = {s}");
            assert_eq!(s, f32::MIN_POSITIVE);
        }
        // Largest possible distance for a 50x50x3 crop is still well above the floor.
        let farthest = (50.0f32 * 50.0 * 3.0).sqrt() * 255.0;
        let s = scorer.score_distance(farthest);
        assert!(s > f32::MIN_POSITIVE && s < scorer.score_distance(farthest - 100.0));
    }

    #[test]
    fn test_typical_match_band() {
        // A true match on 50x50x3 raw pixels sits around 3000 mean distance.
        let scorer = ConfidenceScorer::new(4500.0);
        let s = scorer.score_distance(3000.0);
        assert!((50.0..=53.0).contains(&s), "got {s}");
    }
}
