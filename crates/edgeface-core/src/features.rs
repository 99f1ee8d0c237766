//! Raw-pixel feature vectors from color face crops.
//!
//! The crop is resized to a fixed size and flattened row-major with the RGB
//! channels interleaved, giving `width * height * 3` values in 0–255.
//! Detection runs on grayscale upstream; features always come from color.

use crate::config::{RecognitionConfig, FEATURE_CHANNELS};
use crate::types::{BoundingBox, QueryVector};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("face region {bbox:?} lies outside the {frame_width}x{frame_height} frame")]
    EmptyRegion {
        bbox: BoundingBox,
        frame_width: u32,
        frame_height: u32,
    },
}

/// Converts a detected face region into a [`QueryVector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureExtractor {
    width: u32,
    height: u32,
}

impl FeatureExtractor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self::new(config.crop_width, config.crop_height)
    }

    /// Length of every vector this extractor produces.
    pub fn dimension(&self) -> usize {
        self.width as usize * self.height as usize * FEATURE_CHANNELS
    }

    /// Crop `bbox` (clamped to the frame) from `frame` and flatten it.
    pub fn extract(&self, frame: &RgbImage, bbox: &BoundingBox) -> Result<QueryVector, FeatureError> {
        let (x, y, w, h) = bbox
            .clamp_to(frame.width(), frame.height())
            .ok_or(FeatureError::EmptyRegion {
                bbox: *bbox,
                frame_width: frame.width(),
                frame_height: frame.height(),
            })?;

        let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
        Ok(self.flatten(&crop))
    }

    /// Resize a ready-made crop and flatten it.
    pub fn flatten(&self, crop: &RgbImage) -> QueryVector {
        let resized = if crop.dimensions() == (self.width, self.height) {
            crop.clone()
        } else {
            // Bilinear, matching how the enrollment crops were produced.
            imageops::resize(crop, self.width, self.height, FilterType::Triangle)
        };

        let values: Vec<f32> = resized.into_raw().into_iter().map(f32::from).collect();
        debug_assert_eq!(values.len(), self.dimension());
        QueryVector::new(values)
    }
}
