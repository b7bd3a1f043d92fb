//! Signature builder: reference photos → augmented working set → embeddings.

use crate::augment::{AugmentConfig, AugmentConfigError, Augmenter};
use crate::cascade::{CascadeError, DetectorCascade};
use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::identity::Identity;
use crate::signature::{Signature, SignatureError};
use crate::types::Embedding;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("no reference photos supplied")]
    NoReferencePhotos,
    #[error("no face extracted for {identity} from any of {attempted} images")]
    EmptySignature { identity: String, attempted: usize },
    #[error("augmentation config: {0}")]
    Augment(#[from] AugmentConfigError),
    /// Nothing was extracted and at least one image failed for a reason
    /// other than "no face"; `source` is the last such failure.
    #[error("enrollment of {identity} failed: {source}")]
    Extraction {
        identity: String,
        #[source]
        source: CascadeError,
    },
    #[error("extracted embeddings do not form a valid signature: {0}")]
    Inconsistent(#[source] SignatureError),
    #[error("enrollment worker panicked")]
    WorkerPanicked,
}

/// A freshly built signature plus per-image bookkeeping.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub identity: Identity,
    pub signature: Signature,
    /// Images (originals + augmentations) that yielded at least one embedding.
    pub success_count: usize,
    /// Images that were skipped because extraction failed.
    pub failure_count: usize,
}

/// What one reference photo contributed.
#[derive(Debug, Default)]
struct PhotoOutcome {
    embeddings: Vec<Embedding>,
    successes: usize,
    failures: usize,
    last_error: Option<CascadeError>,
}

/// Drives augmentation and single-strategy extraction over a batch of photos.
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    cascade: DetectorCascade,
    augment: AugmentConfig,
    augment_count: usize,
    seed: Option<u64>,
}

impl SignatureBuilder {
    /// Only the cascade's primary strategy is kept: enrollment photos are
    /// expected to be cooperative, and a face the primary misses is skipped.
    pub fn new(
        cascade: &DetectorCascade,
        augment: AugmentConfig,
        augment_count: usize,
    ) -> Result<Self, BuildError> {
        augment.validate()?;
        Ok(Self {
            cascade: cascade.primary_only(),
            augment,
            augment_count,
            seed: None,
        })
    }

    /// Fix the augmentation RNG seed (worker `i` uses `seed + i`).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn augment_count(&self) -> usize {
        self.augment_count
    }

    fn augmenter(&self, worker: usize) -> Result<Augmenter, AugmentConfigError> {
        match self.seed {
            Some(seed) => Augmenter::with_seed(self.augment.clone(), seed.wrapping_add(worker as u64)),
            None => Augmenter::new(self.augment.clone()),
        }
    }

    /// Build on the calling thread.
    pub fn build<E: EmbeddingExtractor + ?Sized>(
        &self,
        identity: &Identity,
        photos: &[RgbImage],
        extractor: &mut E,
    ) -> Result<Enrollment, BuildError> {
        if photos.is_empty() {
            return Err(BuildError::NoReferencePhotos);
        }
        let mut augmenter = self.augmenter(0)?;
        let outcomes: Vec<PhotoOutcome> = photos
            .iter()
            .enumerate()
            .map(|(i, photo)| self.process_photo(identity, i, photo, &mut augmenter, &mut *extractor))
            .collect::<Result<_, _>>()?;
        self.finish(identity, outcomes)
    }

    /// Build with up to `workers` threads, each holding its own extractor
    /// clone and augmenter. Photos are dealt round-robin; the partial results
    /// are merged back in photo order, so the signature's row order does not
    /// depend on `workers`.
    pub fn build_parallel<E: EmbeddingExtractor + Clone + Send>(
        &self,
        identity: &Identity,
        photos: &[RgbImage],
        extractor: &E,
        workers: usize,
    ) -> Result<Enrollment, BuildError> {
        let workers = workers.clamp(1, photos.len().max(1));
        if workers == 1 {
            let mut extractor = extractor.clone();
            return self.build(identity, photos, &mut extractor);
        }

        let mut augmenters = (0..workers)
            .map(|w| self.augmenter(w))
            .collect::<Result<Vec<_>, _>>()?;

        let partials: Vec<Result<Vec<(usize, PhotoOutcome)>, BuildError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = augmenters
                .iter_mut()
                .enumerate()
                .map(|(worker, augmenter)| {
                    let mut extractor = extractor.clone();
                    scope.spawn(move || {
                        photos
                            .iter()
                            .enumerate()
                            .skip(worker)
                            .step_by(workers)
                            .map(|(i, photo)| {
                                self.process_photo(identity, i, photo, &mut *augmenter, &mut extractor)
                                    .map(|o| (i, o))
                            })
                            .collect::<Result<Vec<_>, BuildError>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| BuildError::WorkerPanicked).and_then(|r| r))
                .collect()
        });

        let mut indexed = Vec::with_capacity(photos.len());
        for partial in partials {
            indexed.extend(partial?);
        }
        indexed.sort_by_key(|(i, _)| *i);

        self.finish(identity, indexed.into_iter().map(|(_, o)| o).collect())
    }

    /// Extract from one photo and its augmentations. A vanished extractor
    /// aborts the whole build; any other failure only skips the image.
    fn process_photo<E: EmbeddingExtractor + ?Sized>(
        &self,
        identity: &Identity,
        index: usize,
        photo: &RgbImage,
        augmenter: &mut Augmenter,
        extractor: &mut E,
    ) -> Result<PhotoOutcome, BuildError> {
        let mut outcome = PhotoOutcome::default();
        let variants = augmenter.augment(photo, self.augment_count);

        for (variant, image) in std::iter::once(photo).chain(variants.iter()).enumerate() {
            match self.cascade.detect(&mut *extractor, image) {
                Ok(faces) => {
                    outcome.successes += 1;
                    outcome
                        .embeddings
                        .extend(faces.into_iter().map(|f| f.embedding));
                }
                Err(CascadeError::Extraction {
                    source: ExtractError::Unavailable,
                    strategy,
                }) => {
                    tracing::error!(photo = index, variant, "enroll: extractor unavailable; aborting");
                    return Err(BuildError::Extraction {
                        identity: identity.to_string(),
                        source: CascadeError::Extraction {
                            strategy,
                            source: ExtractError::Unavailable,
                        },
                    });
                }
                Err(e) => {
                    tracing::debug!(photo = index, variant, error = %e, "enroll: image skipped");
                    outcome.failures += 1;
                    if !matches!(e, CascadeError::NoFaceDetected { .. }) {
                        outcome.last_error = Some(e);
                    }
                }
            }
        }

        tracing::debug!(
            photo = index,
            successes = outcome.successes,
            failures = outcome.failures,
            "enroll: reference photo processed"
        );
        Ok(outcome)
    }

    fn finish(&self, identity: &Identity, outcomes: Vec<PhotoOutcome>) -> Result<Enrollment, BuildError> {
        let mut embeddings = Vec::new();
        let mut success_count = 0;
        let mut failure_count = 0;
        let mut last_error = None;
        for o in outcomes {
            embeddings.extend(o.embeddings);
            success_count += o.successes;
            failure_count += o.failures;
            last_error = o.last_error.or(last_error);
        }

        tracing::info!(
            identity = %identity,
            embeddings = embeddings.len(),
            success_count,
            failure_count,
            "enroll: extraction finished"
        );

        let signature = Signature::new(embeddings).map_err(|e| match (e, last_error) {
            (SignatureError::Empty, Some(source)) => BuildError::Extraction {
                identity: identity.to_string(),
                source,
            },
            (SignatureError::Empty, None) => BuildError::EmptySignature {
                identity: identity.to_string(),
                attempted: success_count + failure_count,
            },
            (other, _) => BuildError::Inconsistent(other),
        })?;

        Ok(Enrollment {
            identity: identity.clone(),
            signature,
            success_count,
            failure_count,
        })
    }
}
