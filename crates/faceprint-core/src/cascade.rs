//! Detector fallback cascade.
//!
//! Tries each configured strategy in order and stops at the first one that
//! finds a face. Only [`ExtractError::NoFaceDetected`] advances the cascade;
//! every other failure ends it.

use crate::extractor::{DetectionStrategy, EmbeddingExtractor, ExtractError};
use crate::types::DetectedFace;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CascadeError {
    #[error("no face detected by any of {attempted} detector strategies")]
    NoFaceDetected { attempted: usize },
    #[error("detector strategy {strategy} failed: {source}")]
    Extraction {
        strategy: String,
        #[source]
        source: ExtractError,
    },
}

#[derive(Error, Debug, PartialEq)]
#[error("detector cascade needs at least one strategy")]
pub struct EmptyCascade;

/// Immutable, ordered list of detection strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorCascade {
    strategies: Vec<DetectionStrategy>,
}

impl DetectorCascade {
    pub fn new(strategies: Vec<DetectionStrategy>) -> Result<Self, EmptyCascade> {
        if strategies.is_empty() {
            return Err(EmptyCascade);
        }
        Ok(Self { strategies })
    }

    pub fn strategies(&self) -> &[DetectionStrategy] {
        &self.strategies
    }

    /// The first strategy; enrollment uses it alone.
    pub fn primary(&self) -> &DetectionStrategy {
        &self.strategies[0]
    }

    /// A cascade of just the primary strategy.
    pub fn primary_only(&self) -> DetectorCascade {
        DetectorCascade {
            strategies: vec![self.primary().clone()],
        }
    }

    /// Run the cascade over `image`, returning every face from the first
    /// strategy that finds one.
    pub fn detect<E: EmbeddingExtractor + ?Sized>(
        &self,
        extractor: &mut E,
        image: &RgbImage,
    ) -> Result<Vec<DetectedFace>, CascadeError> {
        for (position, strategy) in self.strategies.iter().enumerate() {
            tracing::info!(%strategy, "trying detector strategy");

            match extractor.represent(image, strategy) {
                Ok(faces) if !faces.is_empty() => {
                    tracing::info!(%strategy, faces = faces.len(), "face(s) detected");
                    return Ok(faces);
                }
                // An empty success is a provider bug, but it means the same thing.
                Ok(_) | Err(ExtractError::NoFaceDetected) => match Miss::at(position, self.strategies.len()) {
                    Miss::Fallback => tracing::warn!(%strategy, "detector found no face; trying next strategy"),
                    Miss::Exhausted => tracing::warn!(%strategy, "detector found no face; no strategies left"),
                    Miss::Single => tracing::debug!(%strategy, "detector found no face"),
                },
                Err(source) => {
                    tracing::error!(%strategy, error = %source, "detector strategy failed");
                    return Err(CascadeError::Extraction {
                        strategy: strategy.to_string(),
                        source,
                    });
                }
            }
        }

        Err(CascadeError::NoFaceDetected {
            attempted: self.strategies.len(),
        })
    }
}

/// How a strategy miss is reported. A one-strategy cascade (enrollment) misses
/// routinely, so it logs below `warn`.
#[derive(Debug, PartialEq, Eq)]
enum Miss {
    Fallback,
    Exhausted,
    Single,
}

impl Miss {
    fn at(position: usize, len: usize) -> Self {
        if len == 1 {
            Miss::Single
        } else if position + 1 < len {
            Miss::Fallback
        } else {
            Miss::Exhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};
    use image::Rgb;
    use std::collections::HashMap;

    /// Scripted extractor: per-model outcome, with a call log.
    struct Scripted {
        outcomes: HashMap<String, Result<Vec<DetectedFace>, ExtractError>>,
        calls: Vec<String>,
    }

    impl Scripted {
        fn new(outcomes: &[(&str, Result<Vec<DetectedFace>, ExtractError>)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                calls: Vec::new(),
            }
        }
    }

    impl EmbeddingExtractor for Scripted {
        fn represent(
            &mut self,
            _image: &RgbImage,
            strategy: &DetectionStrategy,
        ) -> Result<Vec<DetectedFace>, ExtractError> {
            self.calls.push(strategy.model.clone());
            self.outcomes
                .get(&strategy.model)
                .cloned()
                .unwrap_or(Err(ExtractError::NoFaceDetected))
        }
    }

    fn face(v: f32) -> DetectedFace {
        DetectedFace {
            embedding: Embedding::new(vec![v, 1.0]),
            bounding_box: BoundingBox::new(0, 0, 10, 10),
        }
    }

    fn cascade(models: &[&str]) -> DetectorCascade {
        DetectorCascade::new(
            models
                .iter()
                .map(|m| DetectionStrategy::new(*m, 640, 0.5))
                .collect(),
        )
        .unwrap()
    }

    fn blank() -> RgbImage {
        RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]))
    }

    #[test]
    fn test_cascade_stops_at_first_success() {
        let mut ex = Scripted::new(&[
            ("x", Err(ExtractError::NoFaceDetected)),
            ("y", Ok(vec![face(2.0)])),
            ("z", Ok(vec![face(3.0)])),
        ]);
        let faces = cascade(&["x", "y", "z"]).detect(&mut ex, &blank()).unwrap();
        assert_eq!(ex.calls, vec!["x", "y"]);
        assert_eq!(faces, vec![face(2.0)]);
    }

    #[test]
    fn test_cascade_exhaustion() {
        let mut ex = Scripted::new(&[]);
        let err = cascade(&["x", "y", "z"]).detect(&mut ex, &blank()).unwrap_err();
        assert_eq!(err, CascadeError::NoFaceDetected { attempted: 3 });
        assert_eq!(ex.calls, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_cascade_propagates_other_errors_immediately() {
        let mut ex = Scripted::new(&[
            ("x", Err(ExtractError::Failed("corrupt model".into()))),
            ("y", Ok(vec![face(2.0)])),
        ]);
        let err = cascade(&["x", "y"]).detect(&mut ex, &blank()).unwrap_err();
        assert!(matches!(
            err,
            CascadeError::Extraction { source: ExtractError::Failed(_), .. }
        ));
        assert_eq!(ex.calls, vec!["x"]);
    }

    #[test]
    fn test_cascade_does_not_merge_strategies() {
        let mut ex = Scripted::new(&[
            ("x", Ok(vec![face(1.0), face(1.5)])),
            ("y", Ok(vec![face(2.0)])),
        ]);
        let faces = cascade(&["x", "y"]).detect(&mut ex, &blank()).unwrap();
        assert_eq!(faces, vec![face(1.0), face(1.5)]);
    }

    #[test]
    fn test_cascade_treats_empty_success_as_no_face() {
        let mut ex = Scripted::new(&[("x", Ok(vec![])), ("y", Ok(vec![face(2.0)]))]);
        let faces = cascade(&["x", "y"]).detect(&mut ex, &blank()).unwrap();
        assert_eq!(ex.calls, vec!["x", "y"]);
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_primary_only() {
        let c = cascade(&["x", "y", "z"]).primary_only();
        assert_eq!(c.strategies().len(), 1);
        assert_eq!(c.primary().model, "x");
    }

    #[test]
    fn test_empty_cascade_rejected() {
        assert_eq!(DetectorCascade::new(vec![]), Err(EmptyCascade));
    }

    #[test]
    fn test_miss_reporting_by_position() {
        assert_eq!(Miss::at(0, 3), Miss::Fallback);
        assert_eq!(Miss::at(1, 3), Miss::Fallback);
        assert_eq!(Miss::at(2, 3), Miss::Exhausted);
        assert_eq!(Miss::at(0, 1), Miss::Single);
    }
}
