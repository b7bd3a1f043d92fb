//! ONNX Runtime embedding provider: SCRFD detection, landmark alignment and
//! ArcFace embedding.
//!
//! One detector session is loaded per distinct model file named by the
//! configured strategies; input size and score threshold vary per call.

pub mod alignment;
pub mod detector;
pub mod recognizer;

use crate::extractor::{DetectionStrategy, EmbeddingExtractor, ExtractError};
use crate::types::{BoundingBox, DetectedFace};
use alignment::{align_face, ALIGNED_SIZE};
use detector::{DetectorError, ScrfdDetector};
use image::RgbImage;
use recognizer::{ArcFaceRecognizer, RecognizerError};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("detector {model}: {source}")]
    Detector {
        model: String,
        #[source]
        source: DetectorError,
    },
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

pub struct OnnxExtractor {
    detectors: HashMap<String, ScrfdDetector>,
    recognizer: ArcFaceRecognizer,
}

impl OnnxExtractor {
    /// Load the recognizer and every detector model the strategies reference.
    pub fn load(
        model_dir: &Path,
        recognizer_model: &str,
        strategies: &[DetectionStrategy],
    ) -> Result<Self, OnnxError> {
        let recognizer = ArcFaceRecognizer::load(&model_dir.join(recognizer_model))?;

        let mut detectors = HashMap::new();
        for strategy in strategies {
            if detectors.contains_key(&strategy.model) {
                continue;
            }
            let detector = ScrfdDetector::load(&model_dir.join(&strategy.model)).map_err(|source| {
                OnnxError::Detector {
                    model: strategy.model.clone(),
                    source,
                }
            })?;
            detectors.insert(strategy.model.clone(), detector);
        }

        tracing::info!(
            model_dir = %model_dir.display(),
            detectors = detectors.len(),
            recognizer = recognizer_model,
            "ONNX extractor ready"
        );
        Ok(Self {
            detectors,
            recognizer,
        })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn represent(
        &mut self,
        image: &RgbImage,
        strategy: &DetectionStrategy,
    ) -> Result<Vec<DetectedFace>, ExtractError> {
        let detector = self.detectors.get_mut(&strategy.model).ok_or_else(|| {
            ExtractError::Failed(format!("detector model {} is not loaded", strategy.model))
        })?;

        let detections = detector
            .detect(image, strategy.input_size, strategy.score_threshold)
            .map_err(|e| ExtractError::Failed(e.to_string()))?;
        if detections.is_empty() {
            return Err(ExtractError::NoFaceDetected);
        }

        let mut faces = Vec::with_capacity(detections.len());
        for det in &detections {
            let bounding_box =
                BoundingBox::from_float(det.x, det.y, det.width, det.height, image.width(), image.height());
            let crop = match &det.landmarks {
                Some(landmarks) => align_face(image, landmarks),
                None => {
                    let region = bounding_box.crop(image);
                    if region.width() == 0 || region.height() == 0 {
                        continue;
                    }
                    image::imageops::resize(
                        &region,
                        ALIGNED_SIZE,
                        ALIGNED_SIZE,
                        image::imageops::FilterType::Triangle,
                    )
                }
            };
            let embedding = self
                .recognizer
                .embed(&crop)
                .map_err(|e| ExtractError::Failed(e.to_string()))?;
            faces.push(DetectedFace {
                embedding,
                bounding_box,
            });
        }

        if faces.is_empty() {
            return Err(ExtractError::NoFaceDetected);
        }
        tracing::debug!(%strategy, faces = faces.len(), "faces represented");
        Ok(faces)
    }
}
