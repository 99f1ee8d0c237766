//! Accept/reject decision on a confidence score.
//!
//! A wrongly logged identity costs more than a retry, so anything below the
//! threshold becomes the unknown label and is never loggable.

use crate::config::RecognitionConfig;

/// Final label and acceptance for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub label: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectionPolicy {
    threshold: f32,
    unknown_label: String,
    reject_unknowns: bool,
}

impl RejectionPolicy {
    pub fn new(threshold: f32, unknown_label: impl Into<String>) -> Self {
        Self {
            threshold,
            unknown_label: unknown_label.into(),
            reject_unknowns: true,
        }
    }

    pub fn from_config(config: &RecognitionConfig) -> Self {
        Self {
            threshold: config.confidence_threshold,
            unknown_label: config.unknown_label.clone(),
            reject_unknowns: config.reject_unknowns,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn unknown_label(&self) -> &str {
        &self.unknown_label
    }

    /// `score >= threshold`.
    pub fn decide(&self, score: f32) -> bool {
        score >= self.threshold
    }

    /// Relabel a prediction according to its score.
    ///
    /// With `reject_unknowns` off, a rejected face keeps its predicted label
    /// for display, but is still not accepted.
    pub fn apply(&self, predicted: &str, score: f32) -> Decision {
        let accepted = self.decide(score);
        let label = if accepted || !self.reject_unknowns {
            predicted.to_string()
        } else {
            self.unknown_label.clone()
        };
        Decision { label, accepted }
    }
}
