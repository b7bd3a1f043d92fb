//! faceprint-core: signature enrollment and face verification.
//!
//! Enrollment expands each reference photo with random photometric
//! augmentations, embeds every face found and stores the rows as a per-identity
//! signature matrix. Verification compares one candidate embedding with the
//! signature's mean vector by cosine distance.
//!
//! Face embedding is a capability behind [`EmbeddingExtractor`]; the bundled
//! [`onnx::OnnxExtractor`] runs SCRFD + ArcFace through ONNX Runtime.

pub mod augment;
pub mod builder;
pub mod cascade;
pub mod engine;
pub mod extractor;
pub mod identity;
pub mod onnx;
pub mod signature;
pub mod store;
pub mod types;
pub mod verify;
pub mod worker;

pub use augment::{AugmentConfig, Augmenter};
pub use builder::{Enrollment, SignatureBuilder};
pub use cascade::{CascadeError, DetectorCascade};
pub use engine::{decode_image, EngineConfig, EngineError, EnrollSummary, Engine};
pub use extractor::{DetectionStrategy, EmbeddingExtractor, ExtractError};
pub use identity::Identity;
pub use signature::{Signature, SignatureError};
pub use store::{SignatureStore, StoreError};
pub use types::{BoundingBox, Decision, DetectedFace, Embedding, VerificationResult};
pub use verify::{select_face, SelectError, Verifier, VerifyError, DEFAULT_THRESHOLD};
pub use worker::{spawn_worker, WorkerHandle};
