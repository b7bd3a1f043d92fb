//! The embedding capability seam.
//!
//! Anything that can turn an image into faces + embeddings implements
//! [`EmbeddingExtractor`]. The cascade, enrollment and warm-up only ever see
//! this trait; the ONNX provider in [`crate::onnx`] is one implementation and
//! the tests use scripted ones.

use crate::types::DetectedFace;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// The strategy ran and found nothing. The only error the cascade skips past.
    #[error("no face detected")]
    NoFaceDetected,
    #[error("extraction failed: {0}")]
    Failed(String),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("extractor worker is not running")]
    Unavailable,
}

impl ExtractError {
    pub fn is_no_face(&self) -> bool {
        matches!(self, ExtractError::NoFaceDetected)
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("invalid detection strategy {input:?}: {reason} (expected <model>@<input-size>:<score-threshold>)")]
pub struct StrategyParseError {
    input: String,
    reason: &'static str,
}

/// One detector configuration: which model file, at which letterbox size,
/// with which score cut-off.
///
/// Written as `det_10g.onnx@640:0.5`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DetectionStrategy {
    pub model: String,
    pub input_size: usize,
    pub score_threshold: f32,
}

impl DetectionStrategy {
    pub fn new(model: impl Into<String>, input_size: usize, score_threshold: f32) -> Self {
        Self {
            model: model.into(),
            input_size,
            score_threshold,
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.model, self.input_size, self.score_threshold)
    }
}

impl FromStr for DetectionStrategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| StrategyParseError {
            input: s.to_string(),
            reason,
        };

        let s = s.trim();
        let (model, rest) = s.rsplit_once('@').ok_or_else(|| err("missing '@'"))?;
        let (size, threshold) = rest.split_once(':').ok_or_else(|| err("missing ':'"))?;

        if model.is_empty() {
            return Err(err("empty model name"));
        }
        let input_size: usize = size.parse().map_err(|_| err("input size is not an integer"))?;
        // SCRFD's coarsest stride is 32; anything else leaves a partial grid cell.
        if input_size == 0 || input_size % 32 != 0 {
            return Err(err("input size must be a positive multiple of 32"));
        }
        let score_threshold: f32 = threshold.parse().map_err(|_| err("threshold is not a number"))?;
        if !(0.0..1.0).contains(&score_threshold) {
            return Err(err("threshold must be in [0, 1)"));
        }

        Ok(Self::new(model, input_size, score_threshold))
    }
}

impl TryFrom<String> for DetectionStrategy {
    type Error = StrategyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DetectionStrategy> for String {
    fn from(value: DetectionStrategy) -> Self {
        value.to_string()
    }
}

/// Given an image and a detector strategy, produce every face found.
///
/// Implementations must report "nothing found" as
/// [`ExtractError::NoFaceDetected`] rather than `Ok(vec![])`, and must keep
/// the returned order stable for a given input: callers address faces by
/// position.
pub trait EmbeddingExtractor {
    fn represent(
        &mut self,
        image: &RgbImage,
        strategy: &DetectionStrategy,
    ) -> Result<Vec<DetectedFace>, ExtractError>;
}

impl<E: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<E> {
    fn represent(
        &mut self,
        image: &RgbImage,
        strategy: &DetectionStrategy,
    ) -> Result<Vec<DetectedFace>, ExtractError> {
        (**self).represent(image, strategy)
    }
}

impl<E: EmbeddingExtractor + ?Sized> EmbeddingExtractor for &mut E {
    fn represent(
        &mut self,
        image: &RgbImage,
        strategy: &DetectionStrategy,
    ) -> Result<Vec<DetectedFace>, ExtractError> {
        (**self).represent(image, strategy)
    }
}
