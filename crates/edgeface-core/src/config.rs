//! Session configuration for the recognition pipeline.
//!
//! Built once before the frame loop and passed by reference to every
//! component constructor. Nothing in the pipeline reads ambient state.

use crate::dataset::Dataset;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Color channels per pixel in a feature vector (RGB).
pub const FEATURE_CHANNELS: usize = 3;

const DEFAULT_K: usize = 5;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 40.0;
/// Calibrated for 50×50×3 raw-pixel vectors. Changing the crop size or the
/// channel layout invalidates it.
const DEFAULT_DECAY_CONSTANT: f32 = 4500.0;
const DEFAULT_FRAME_SKIP_INTERVAL: u32 = 2;
const DEFAULT_CROP_SIZE: u32 = 50;
const DEFAULT_UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("k must be at least 1")]
    ZeroNeighbors,
    #[error("confidence_threshold must be within 0–100, got {0}")]
    ThresholdOutOfRange(f32),
    #[error("decay_constant must be a positive finite number, got {0}")]
    InvalidDecayConstant(f32),
    #[error("frame_skip_interval must be at least 1")]
    ZeroFrameSkipInterval,
    #[error("crop size must be non-zero, got {width}x{height}")]
    EmptyCropSize { width: u32, height: u32 },
    #[error("unknown_label must not be empty")]
    EmptyUnknownLabel,
    #[error(
        "feature dimension mismatch: extractor produces {expected} values per face but the \
         dataset holds {actual}-dimensional vectors (the dataset was built with a different \
         crop size or channel layout); re-collect it or fix crop_width/crop_height"
    )]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("k = {k} exceeds the {samples} enrolled samples")]
    KExceedsSamples { k: usize, samples: usize },
}

/// How neighbors contribute to the label vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    /// Every neighbor counts once.
    Uniform,
    /// Neighbors count with weight `1 / distance`.
    #[default]
    Distance,
}

/// Immutable parameters of one recognition session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Number of neighbors per query.
    pub k: usize,
    pub weights: Weighting,
    /// Minimum confidence (0–100) for an identity to be accepted.
    pub confidence_threshold: f32,
    /// Calibration constant of the exponential distance-to-confidence mapping.
    pub decay_constant: f32,
    /// Run the full pipeline on one of every N frames.
    pub frame_skip_interval: u32,
    pub crop_width: u32,
    pub crop_height: u32,
    /// Label shown for rejected faces.
    pub unknown_label: String,
    /// Replace the predicted label of rejected faces with `unknown_label`.
    pub reject_unknowns: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            weights: Weighting::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            decay_constant: DEFAULT_DECAY_CONSTANT,
            frame_skip_interval: DEFAULT_FRAME_SKIP_INTERVAL,
            crop_width: DEFAULT_CROP_SIZE,
            crop_height: DEFAULT_CROP_SIZE,
            unknown_label: DEFAULT_UNKNOWN_LABEL.to_string(),
            reject_unknowns: true,
        }
    }
}

impl RecognitionConfig {
    /// Check every value is usable. Call once before building components.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::ZeroNeighbors);
        }
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.confidence_threshold));
        }
        if !self.decay_constant.is_finite() || self.decay_constant <= 0.0 {
            return Err(ConfigError::InvalidDecayConstant(self.decay_constant));
        }
        if self.frame_skip_interval == 0 {
            return Err(ConfigError::ZeroFrameSkipInterval);
        }
        if self.crop_width == 0 || self.crop_height == 0 {
            return Err(ConfigError::EmptyCropSize {
                width: self.crop_width,
                height: self.crop_height,
            });
        }
        if self.unknown_label.is_empty() {
            return Err(ConfigError::EmptyUnknownLabel);
        }
        Ok(())
    }

    /// Length of the feature vectors this configuration produces.
    pub fn feature_dimension(&self) -> usize {
        self.crop_width as usize * self.crop_height as usize * FEATURE_CHANNELS
    }

    /// Check a dataset is usable under this configuration: same D, at least k samples.
    pub fn check_dataset(&self, dataset: &Dataset) -> Result<(), ConfigError> {
        let expected = self.feature_dimension();
        if dataset.dimension() != expected {
            return Err(ConfigError::DimensionMismatch {
                expected,
                actual: dataset.dimension(),
            });
        }
        if self.k > dataset.len() {
            return Err(ConfigError::KExceedsSamples {
                k: self.k,
                samples: dataset.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaceSample;

    fn dataset(n: usize, dim: usize) -> Dataset {
        let samples = (0..n)
            .map(|i| FaceSample { vector: vec![i as f32; dim], label: format!("p{i}") })
            .collect();
        Dataset::from_samples(samples).unwrap()
    }

    #[test]
    fn test_default_is_valid() {
        let config = RecognitionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.feature_dimension(), 50 * 50 * 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = RecognitionConfig::default();

        let c = RecognitionConfig { k: 0, ..base.clone() };
        assert_eq!(c.validate(), Err(ConfigError::ZeroNeighbors));

        let c = RecognitionConfig { confidence_threshold: 101.0, ..base.clone() };
        assert_eq!(c.validate(), Err(ConfigError::ThresholdOutOfRange(101.0)));

        let c = RecognitionConfig { decay_constant: 0.0, ..base.clone() };
        assert_eq!(c.validate(), Err(ConfigError::InvalidDecayConstant(0.0)));

        let c = RecognitionConfig { frame_skip_interval: 0, ..base.clone() };
        assert_eq!(c.validate(), Err(ConfigError::ZeroFrameSkipInterval));

        let c = RecognitionConfig { crop_width: 0, ..base.clone() };
        assert!(matches!(c.validate(), Err(ConfigError::EmptyCropSize { .. })));

        let c = RecognitionConfig { unknown_label: String::new(), ..base };
        assert_eq!(c.validate(), Err(ConfigError::EmptyUnknownLabel));
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: RecognitionConfig =
            serde_json::from_str(r#"{"k": 3, "weights": "uniform"}"#).unwrap();
        assert_eq!(config.k, 3);
        assert_eq!(config.weights, Weighting::Uniform);
        assert_eq!(config.decay_constant, DEFAULT_DECAY_CONSTANT);
        assert_eq!(config.unknown_label, "Unknown");
    }

    #[test]
    fn test_check_dataset_dimension_mismatch() {
        let config = RecognitionConfig { crop_width: 2, crop_height: 2, k: 1, ..Default::default() };
        let err = config.check_dataset(&dataset(3, 10)).unwrap_err();
        assert_eq!(err, ConfigError::DimensionMismatch { expected: 12, actual: 10 });
    }

    #[test]
    fn test_check_dataset_k_too_large() {
        let config = RecognitionConfig { crop_width: 1, crop_height: 1, k: 5, ..Default::default() };
        let err = config.check_dataset(&dataset(3, 3)).unwrap_err();
        assert_eq!(err, ConfigError::KExceedsSamples { k: 5, samples: 3 });
    }

    #[test]
    fn test_check_dataset_ok() {
        let config = RecognitionConfig { crop_width: 1, crop_height: 1, k: 3, ..Default::default() };
        assert!(config.check_dataset(&dataset(3, 3)).is_ok());
    }
}
