//! edgeface-core — closed-set face classification for camera streams.
//!
//! Raw-pixel feature vectors, exhaustive KNN against an enrolled dataset,
//! exponential distance-to-confidence scoring and threshold rejection,
//! driven per frame by a fixed-period scheduler. Face detection sits behind
//! the [`FaceDetector`] trait.

pub mod config;
pub mod dataset;
pub mod detector;
pub mod features;
pub mod knn;
pub mod pipeline;
pub mod policy;
pub mod scheduler;
pub mod scorer;
pub mod types;

pub use config::{ConfigError, RecognitionConfig, Weighting};
pub use dataset::{Dataset, DatasetError, DatasetHandle, DatasetStore};
pub use detector::{DetectorConfig, DetectorError, FaceDetector, ScrfdDetector};
pub use features::FeatureExtractor;
pub use pipeline::{FrameOutcome, PipelineError, Recognizer};
pub use scheduler::FramePhase;
pub use types::{BoundingBox, ClassificationResult, FaceSample, QueryVector};
