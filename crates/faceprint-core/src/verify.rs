//! Verification: one candidate embedding against one identity's mean vector.

use crate::identity::Identity;
use crate::signature::Signature;
use crate::store::{SignatureStore, StoreError};
use crate::types::{Decision, DetectedFace, Embedding, VerificationResult};
use thiserror::Error;

/// Maximum cosine distance still accepted as the same person.
pub const DEFAULT_THRESHOLD: f64 = 0.4;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("candidate embedding has {found} dimensions but the signature has {expected} (model mismatch?)")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("cosine distance undefined: candidate or signature mean has zero norm")]
    DegenerateEmbedding,
}

#[derive(Error, Debug, PartialEq)]
pub enum SelectError {
    #[error("face index {index} out of range ({len} faces detected)")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Error, Debug, PartialEq)]
#[error("threshold {0} must be a finite number in [0, 2]")]
pub struct InvalidThreshold(pub f64);

/// Pick the face the operator chose, by its position in the detected sequence.
pub fn select_face(faces: &[DetectedFace], index: usize) -> Result<&DetectedFace, SelectError> {
    faces.get(index).ok_or(SelectError::OutOfRange {
        index,
        len: faces.len(),
    })
}

/// Threshold-based cosine-distance verifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verifier {
    threshold: f64,
}

impl Default for Verifier {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Verifier {
    pub fn new(threshold: f64) -> Result<Self, InvalidThreshold> {
        if !threshold.is_finite() || !(0.0..=2.0).contains(&threshold) {
            return Err(InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare `candidate` to the mean of `signature`.
    pub fn compare(&self, candidate: &Embedding, signature: &Signature) -> Result<VerificationResult, VerifyError> {
        let expected = signature.dimension();
        if candidate.len() != expected {
            return Err(VerifyError::DimensionMismatch {
                expected,
                found: candidate.len(),
            });
        }

        let mean = signature.mean_vector();
        let distance = candidate
            .cosine_distance(&mean)
            .ok_or(VerifyError::DegenerateEmbedding)?;

        let decision = if distance <= self.threshold {
            Decision::Match
        } else {
            Decision::NoMatch
        };

        Ok(VerificationResult {
            decision,
            distance,
            threshold: self.threshold,
        })
    }

    /// Load `identity` from `store` and compare. Store failures propagate;
    /// they never turn into a `NO_MATCH`.
    pub fn verify(
        &self,
        store: &SignatureStore,
        identity: &Identity,
        candidate: &Embedding,
    ) -> Result<VerificationResult, VerifyError> {
        let signature = store.load(identity)?;
        let result = self.compare(candidate, &signature)?;
        tracing::info!(
            identity = %identity,
            decision = %result.decision,
            distance = result.distance,
            threshold = self.threshold,
            "verification complete"
        );
        Ok(result)
    }
}
