use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Face embedding vector (512-dimensional for ArcFace, but any length is accepted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1], or `None` when either vector has zero norm
    /// or the lengths differ.
    ///
    /// Accumulates in f64 so that `a·a` and `a·(-a)` land on the exact endpoints.
    pub fn similarity(&self, other: &Embedding) -> Option<f64> {
        if self.values.len() != other.values.len() {
            return None;
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.values.iter()) {
            let (a, b) = (a as f64, b as f64);
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 && denom.is_finite() {
            Some((dot / denom).clamp(-1.0, 1.0))
        } else {
            None
        }
    }

    /// Cosine distance `1 - cos(a, b)`, in [0, 2].
    pub fn cosine_distance(&self, other: &Embedding) -> Option<f64> {
        self.similarity(other).map(|s| 1.0 - s)
    }

    /// Negated copy, useful for probing the far end of the distance range.
    pub fn negated(&self) -> Embedding {
        Embedding::new(self.values.iter().map(|v| -v).collect())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Pixel rectangle of a detected face, clamped to the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Round a floating-point detector box to whole pixels and clip it to
    /// `image_width` × `image_height`.
    pub fn from_float(x: f32, y: f32, width: f32, height: f32, image_width: u32, image_height: u32) -> Self {
        let x0 = x.max(0.0).round() as u32;
        let y0 = y.max(0.0).round() as u32;
        let x1 = ((x + width).round().max(0.0) as u32).min(image_width);
        let y1 = ((y + height).round().max(0.0) as u32).min(image_height);
        let x0 = x0.min(image_width);
        let y0 = y0.min(image_height);

        Self {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Crop the face region out of `image` for use as a selection thumbnail.
    ///
    /// The box is clipped again against `image`, so a box from a different
    /// image never panics; it just yields a smaller (possibly empty) crop.
    pub fn crop(&self, image: &RgbImage) -> RgbImage {
        let x = self.x.min(image.width());
        let y = self.y.min(image.height());
        let w = self.width.min(image.width() - x);
        let h = self.height.min(image.height() - y);
        image::imageops::crop_imm(image, x, y, w, h).to_image()
    }
}

/// One face found by the extractor: its embedding plus where it sits in the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub embedding: Embedding,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Match,
    NoMatch,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Match => f.write_str("MATCH"),
            Decision::NoMatch => f.write_str("NO_MATCH"),
        }
    }
}

/// Outcome of comparing one candidate against one signature's mean vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub decision: Decision,
    /// Raw cosine distance; always reported, whatever the decision.
    pub distance: f64,
    pub threshold: f64,
}

impl VerificationResult {
    pub fn is_match(&self) -> bool {
        self.decision == Decision::Match
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Rgb;

    #[test]
    fn test_cosine_distance_identical() {
        let a = Embedding::new(vec![0.3, -1.2, 4.0, 0.01]);
        assert_abs_diff_eq!(a.cosine_distance(&a).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let a = Embedding::new(vec![0.3, -1.2, 4.0, 0.01]);
        assert_abs_diff_eq!(a.cosine_distance(&a.negated()).unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cosine_distance_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert_abs_diff_eq!(a.cosine_distance(&b).unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cosine_distance_scale_invariant() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        let b = Embedding::new(vec![10.0, 20.0, 30.0]);
        assert_abs_diff_eq!(a.cosine_distance(&b).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_similarity_zero_vector_is_undefined() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert!(a.similarity(&b).is_none());
    }

    #[test]
    fn test_similarity_length_mismatch_is_undefined() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert!(a.similarity(&b).is_none());
    }

    #[test]
    fn test_bbox_from_float_clamps_to_image() {
        let bbox = BoundingBox::from_float(-5.2, 10.4, 50.0, 300.0, 40, 100);
        assert_eq!(bbox, BoundingBox::new(0, 10, 40, 90));
    }

    #[test]
    fn test_bbox_crop_dimensions() {
        let image = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
        let crop = BoundingBox::new(8, 4, 16, 20).crop(&image);
        assert_eq!(crop.dimensions(), (16, 20));
    }

    #[test]
    fn test_bbox_crop_out_of_bounds_is_clipped() {
        let image = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
        let crop = BoundingBox::new(30, 30, 16, 16).crop(&image);
        assert_eq!(crop.dimensions(), (2, 2));
    }

    #[test]
    fn test_detected_face_json_embedding_is_flat_array() {
        let face = DetectedFace {
            embedding: Embedding::new(vec![0.5, -0.25]),
            bounding_box: BoundingBox::new(1, 2, 3, 4),
        };
        let json = serde_json::to_value(&face).unwrap();
        assert_eq!(json["embedding"], serde_json::json!([0.5, -0.25]));
        assert_eq!(json["bounding_box"]["width"], 3);
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::Match.to_string(), "MATCH");
        assert_eq!(Decision::NoMatch.to_string(), "NO_MATCH");
    }
}
