//! Engine facade: the enrollment and verification entry points.
//!
//! Wires one extractor, the detector cascade, the signature builder, the
//! verifier and the store together. Every method takes `&self`; calls that
//! need the extractor work on a cheap clone of it, so an [`Engine`] over a
//! [`crate::worker::WorkerHandle`] can be shared across threads.

use crate::augment::AugmentConfig;
use crate::builder::{BuildError, SignatureBuilder};
use crate::cascade::{CascadeError, DetectorCascade, EmptyCascade};
use crate::extractor::{DetectionStrategy, EmbeddingExtractor, ExtractError};
use crate::identity::{Identity, IdentityError};
use crate::signature::Signature;
use crate::store::{SignatureStore, StoreError};
use crate::types::{DetectedFace, Embedding, VerificationResult};
use crate::verify::{select_face, InvalidThreshold, SelectError, Verifier, VerifyError, DEFAULT_THRESHOLD};
use image::RgbImage;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

const WARM_UP_SIZE: u32 = 100;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid identity: {0}")]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Cascade(#[from] CascadeError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    EmptyCascade(#[from] EmptyCascade),
    #[error(transparent)]
    Threshold(#[from] InvalidThreshold),
    #[error("model warm-up failed: {0}")]
    WarmUp(#[source] ExtractError),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Construction-time settings. Immutable once the engine exists.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub detectors: Vec<DetectionStrategy>,
    pub augment: AugmentConfig,
    pub augment_count: usize,
    pub threshold: f64,
    pub enroll_workers: usize,
    /// Fixed augmentation seed; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detectors: vec![
                DetectionStrategy::new("det_10g.onnx", 640, 0.5),
                DetectionStrategy::new("det_10g.onnx", 640, 0.3),
                DetectionStrategy::new("det_10g.onnx", 1280, 0.4),
            ],
            augment: AugmentConfig::default(),
            augment_count: 10,
            threshold: DEFAULT_THRESHOLD,
            enroll_workers: 1,
            seed: None,
        }
    }
}

/// Result of a photo enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollSummary {
    pub identity: String,
    pub success_count: usize,
    pub failure_count: usize,
    pub embeddings: usize,
    pub path: PathBuf,
}

pub struct Engine<E> {
    extractor: E,
    cascade: DetectorCascade,
    builder: SignatureBuilder,
    verifier: Verifier,
    store: SignatureStore,
    enroll_workers: usize,
}

impl<E: EmbeddingExtractor + Clone + Send> Engine<E> {
    pub fn new(extractor: E, store: SignatureStore, config: EngineConfig) -> Result<Self, EngineError> {
        let cascade = DetectorCascade::new(config.detectors)?;
        let mut builder = SignatureBuilder::new(&cascade, config.augment, config.augment_count)?;
        if let Some(seed) = config.seed {
            builder = builder.with_seed(seed);
        }
        let verifier = Verifier::new(config.threshold)?;

        tracing::info!(
            strategies = cascade.strategies().len(),
            primary = %cascade.primary(),
            augment_count = config.augment_count,
            threshold = verifier.threshold(),
            store = %store.root().display(),
            "engine initialized"
        );

        Ok(Self {
            extractor,
            cascade,
            builder,
            verifier,
            store,
            enroll_workers: config.enroll_workers.max(1),
        })
    }

    pub fn store(&self) -> &SignatureStore {
        &self.store
    }

    pub fn cascade(&self) -> &DetectorCascade {
        &self.cascade
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Run the primary strategy once on a blank frame so model loading and
    /// first-inference cost are paid up front. "No face" is the expected
    /// answer; anything else is a startup failure.
    pub fn warm_up(&self) -> Result<(), EngineError> {
        let blank = RgbImage::new(WARM_UP_SIZE, WARM_UP_SIZE);
        let mut extractor = self.extractor.clone();
        let started = std::time::Instant::now();
        match extractor.represent(&blank, self.cascade.primary()) {
            Ok(_) | Err(ExtractError::NoFaceDetected) => {
                tracing::info!(elapsed = ?started.elapsed(), "warm-up complete");
                Ok(())
            }
            Err(e) => Err(EngineError::WarmUp(e)),
        }
    }

    /// Build a fresh signature from `photos` and replace whatever `name` had.
    ///
    /// Nothing is written when no image yields a face.
    pub fn enroll_from_photos(&self, name: &str, photos: &[RgbImage]) -> Result<EnrollSummary, EngineError> {
        let identity = Identity::new(name)?;
        let enrollment = self
            .builder
            .build_parallel(&identity, photos, &self.extractor, self.enroll_workers)?;
        let path = self.store.save(&identity, &enrollment.signature)?;

        Ok(EnrollSummary {
            identity: identity.display_name(),
            success_count: enrollment.success_count,
            failure_count: enrollment.failure_count,
            embeddings: enrollment.signature.len(),
            path,
        })
    }

    /// Store a precomputed matrix verbatim under `name`.
    pub fn enroll_from_raw(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, EngineError> {
        let identity = Identity::new(name)?;
        Ok(self.store.save_raw(&identity, bytes)?)
    }

    /// Every face the cascade finds, in the provider's stable order.
    pub fn detect_faces(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, EngineError> {
        let mut extractor = self.extractor.clone();
        Ok(self.cascade.detect(&mut extractor, image)?)
    }

    pub fn verify(&self, name: &str, candidate: &Embedding) -> Result<VerificationResult, EngineError> {
        let identity = Identity::new(name)?;
        Ok(self.verifier.verify(&self.store, &identity, candidate)?)
    }

    /// Verify the face at `index` of a previously detected sequence.
    pub fn verify_face(
        &self,
        name: &str,
        faces: &[DetectedFace],
        index: usize,
    ) -> Result<VerificationResult, EngineError> {
        let face = select_face(faces, index)?;
        self.verify(name, &face.embedding)
    }

    pub fn load_signature(&self, name: &str) -> Result<Signature, EngineError> {
        let identity = Identity::new(name)?;
        Ok(self.store.load(&identity)?)
    }

    /// Display names of every enrolled identity.
    pub fn list_identities(&self) -> Result<BTreeSet<String>, EngineError> {
        Ok(self.store.list()?.iter().map(Identity::display_name).collect())
    }
}

/// Decode an encoded photo (any format `image` understands) into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, EngineError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}
