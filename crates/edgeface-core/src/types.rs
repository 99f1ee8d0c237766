use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector score for this box, not the identity confidence.
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, confidence: 1.0 }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Integer pixel rectangle `(x, y, w, h)` clamped to a `frame_w × frame_h` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn clamp_to(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(frame_w as f32);
        let y1 = (self.y + self.height).ceil().min(frame_h as f32);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// An enrolled observation: one feature vector and the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    pub vector: Vec<f32>,
    pub label: String,
}

/// Feature vector derived from one detected face in the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryVector {
    pub values: Vec<f32>,
}

impl QueryVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to `other`, accumulated in f64.
    ///
    /// Raw pixel vectors have thousands of components in 0–255, so the sum of
    /// squares easily reaches 1e8 where f32 accumulation drifts.
    pub fn euclidean_distance(&self, other: &[f32]) -> f32 {
        euclidean_distance(&self.values, other)
    }
}

impl From<Vec<f32>> for QueryVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

pub(crate) fn euclidean_distance<'a, I>(a: &[f32], b: I) -> f32
where
    I: IntoIterator<Item = &'a f32>,
{
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

/// Final per-face outcome of one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Predicted identity, or the configured unknown label when rejected.
    pub label: String,
    /// Confidence score in [0, 100].
    pub confidence: f32,
    /// Whether the score met the acceptance threshold. Only accepted results
    /// may be recorded as an identity sighting.
    pub accepted: bool,
    pub bbox: BoundingBox,
}

impl ClassificationResult {
    /// Identity to log, if this result is loggable at all.
    pub fn loggable_identity(&self) -> Option<&str> {
        self.accepted.then_some(self.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let q = QueryVector::new(vec![1.0, 2.0, 3.0]);
        assert_eq!(q.euclidean_distance(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_euclidean_distance_3_4_5() {
        let q = QueryVector::new(vec![0.0, 0.0]);
        assert!((q.euclidean_distance(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_large_pixel_vectors() {
        // 7500 components at full 0 vs 255 contrast: sqrt(7500) * 255
        let q = QueryVector::new(vec![0.0; 7500]);
        let other = vec![255.0f32; 7500];
        let expected = (7500.0f64).sqrt() * 255.0;
        let got = q.euclidean_distance(&other) as f64;
        assert!((got - expected).abs() < 0.01, "got {got}, expected {expected}");
    }

    #[test]
    fn test_clamp_inside_frame() {
        let b = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(b.clamp_to(100, 100), Some((10, 20, 30, 40)));
    }

    #[test]
    fn test_clamp_partially_outside() {
        let b = BoundingBox::new(-10.0, 90.0, 30.0, 40.0);
        assert_eq!(b.clamp_to(100, 100), Some((0, 90, 20, 10)));
    }

    #[test]
    fn test_clamp_fully_outside() {
        let b = BoundingBox::new(150.0, 10.0, 20.0, 20.0);
        assert_eq!(b.clamp_to(100, 100), None);
    }

    #[test]
    fn test_rejected_result_is_not_loggable() {
        let result = ClassificationResult {
            label: "Unknown".into(),
            confidence: 12.0,
            accepted: false,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        };
        assert_eq!(result.loggable_identity(), None);

        let accepted = ClassificationResult { accepted: true, label: "Alice".into(), ..result };
        assert_eq!(accepted.loggable_identity(), Some("Alice"));
    }
}
