//! Per-frame recognition: detector boxes → features → KNN → score → decision.
//!
//! Synchronous and single-threaded. Each processed frame blocks the caller
//! for the whole pipeline; skipped frames return the previous results.

use crate::config::{ConfigError, RecognitionConfig, Weighting};
use crate::dataset::{Dataset, DatasetHandle};
use crate::detector::{DetectorError, FaceDetector};
use crate::features::{FeatureError, FeatureExtractor};
use crate::knn::{self, SearchError};
use crate::policy::RejectionPolicy;
use crate::scheduler::{FramePhase, FrameScheduler};
use crate::scorer::ConfidenceScorer;
use crate::types::{BoundingBox, ClassificationResult, QueryVector};
use image::{imageops, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("search error: {0}")]
    Search(#[from] SearchError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// Results for one frame of the stream.
#[derive(Debug, Clone, Copy)]
pub struct FrameOutcome<'a> {
    pub index: u64,
    pub phase: FramePhase,
    /// Fresh results on a processed frame; the previous ones on a skipped frame.
    pub results: &'a [ClassificationResult],
}

/// The classification core for one session.
#[derive(Debug)]
pub struct Recognizer {
    extractor: FeatureExtractor,
    scorer: ConfidenceScorer,
    policy: RejectionPolicy,
    scheduler: FrameScheduler,
    k: usize,
    weights: Weighting,
    dataset: DatasetHandle,
    last_results: Vec<ClassificationResult>,
}

impl Recognizer {
    /// Build every component from `config` and check the current dataset fits.
    ///
    /// Fails before the first frame on invalid configuration, a dimension
    /// mismatch, or a `k` larger than the dataset.
    pub fn new(config: &RecognitionConfig, dataset: DatasetHandle) -> Result<Self, PipelineError> {
        config.validate()?;
        let extractor = FeatureExtractor::from_config(config);
        config.check_dataset(&dataset.snapshot())?;

        tracing::info!(
            k = config.k,
            weights = ?config.weights,
            threshold = config.confidence_threshold,
            decay = config.decay_constant,
            frame_skip = config.frame_skip_interval,
            dimension = extractor.dimension(),
            "recognizer ready"
        );

        Ok(Self {
            extractor,
            scorer: ConfidenceScorer::from_config(config),
            policy: RejectionPolicy::from_config(config),
            scheduler: FrameScheduler::new(config.frame_skip_interval),
            k: config.k,
            weights: config.weights,
            dataset,
            last_results: Vec::new(),
        })
    }

    pub fn dataset(&self) -> &DatasetHandle {
        &self.dataset
    }

    /// Results of the most recent processed frame.
    pub fn last_results(&self) -> &[ClassificationResult] {
        &self.last_results
    }

    /// Classify every box in `frame` against one dataset snapshot.
    ///
    /// Zero boxes gives zero results. A box entirely outside the frame is
    /// skipped with a warning.
    pub fn classify(
        &self,
        frame: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<ClassificationResult>, PipelineError> {
        let dataset = self.dataset.snapshot();
        let mut results = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let vector = match self.extractor.extract(frame, bbox) {
                Ok(v) => v,
                Err(FeatureError::EmptyRegion { .. }) => {
                    tracing::warn!(?bbox, "face box outside frame; skipped");
                    continue;
                }
            };
            results.push(self.classify_vector(&vector, *bbox, &dataset)?);
        }

        Ok(results)
    }

    fn classify_vector(
        &self,
        vector: &QueryVector,
        bbox: BoundingBox,
        dataset: &Dataset,
    ) -> Result<ClassificationResult, PipelineError> {
        let neighbors = knn::query(vector, dataset, self.k)?;
        let score = self.scorer.score(&neighbors);
        let predicted = knn::vote(&neighbors, self.weights).unwrap_or(self.policy.unknown_label());
        let decision = self.policy.apply(predicted, score);

        tracing::debug!(
            predicted,
            label = %decision.label,
            confidence = score,
            mean_distance = neighbors.mean_distance(),
            accepted = decision.accepted,
            "classified face"
        );

        Ok(ClassificationResult {
            label: decision.label,
            confidence: score,
            accepted: decision.accepted,
            bbox,
        })
    }

    /// Advance the schedule by one frame.
    ///
    /// On a processed frame the detector runs on the grayscale frame and the
    /// results replace the stored ones; on a skipped frame nothing runs.
    pub fn on_frame<D: FaceDetector + ?Sized>(
        &mut self,
        frame: &RgbImage,
        detector: &mut D,
    ) -> Result<FrameOutcome<'_>, PipelineError> {
        let (index, phase) = self.scheduler.next_frame();

        if phase == FramePhase::Process {
            let gray = imageops::grayscale(frame);
            let boxes = detector.detect(&gray)?;
            self.last_results = self.classify(frame, &boxes)?;
            tracing::trace!(index, faces = self.last_results.len(), "processed frame");
        }

        Ok(FrameOutcome {
            index,
            phase,
            results: &self.last_results,
        })
    }
}
