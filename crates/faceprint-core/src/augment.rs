//! Photometric augmentation of reference photos.
//!
//! Each synthetic variant gets, in random order: an occasional mild Gaussian
//! blur, a linear contrast stretch around mid-gray, and a brightness gain that
//! is sometimes drawn per channel. The goal is to sample the lighting / focus /
//! gain variation a second photo of the same person would have.

use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pivot for the contrast stretch.
const CONTRAST_PIVOT: f32 = 128.0;
/// Below this sigma the 3-tap kernel is numerically the identity.
const MIN_BLUR_SIGMA: f32 = 0.01;

#[derive(Error, Debug, PartialEq)]
pub enum AugmentConfigError {
    #[error("{field}: probability {value} outside [0, 1]")]
    Probability { field: &'static str, value: f64 },
    #[error("{field}: range ({lo}, {hi}) is empty or negative")]
    Range { field: &'static str, lo: f32, hi: f32 },
}

/// Sampling ranges for the augmentation pipeline. Ranges are inclusive `(lo, hi)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Chance that a variant is blurred at all.
    pub blur_probability: f64,
    /// Gaussian sigma in pixels.
    pub blur_sigma: (f32, f32),
    /// Multiplicative contrast factor.
    pub contrast: (f32, f32),
    /// Multiplicative brightness gain.
    pub brightness: (f32, f32),
    /// Chance that brightness is drawn independently for each channel.
    pub per_channel_probability: f64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            blur_probability: 0.5,
            blur_sigma: (0.0, 0.2),
            contrast: (0.85, 1.15),
            brightness: (0.9, 1.1),
            per_channel_probability: 0.2,
        }
    }
}

impl AugmentConfig {
    pub fn validate(&self) -> Result<(), AugmentConfigError> {
        for (field, value) in [
            ("blur_probability", self.blur_probability),
            ("per_channel_probability", self.per_channel_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AugmentConfigError::Probability { field, value });
            }
        }
        for (field, (lo, hi)) in [
            ("blur_sigma", self.blur_sigma),
            ("contrast", self.contrast),
            ("brightness", self.brightness),
        ] {
            if !(lo.is_finite() && hi.is_finite()) || lo < 0.0 || lo > hi {
                return Err(AugmentConfigError::Range { field, lo, hi });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Blur,
    Contrast,
    Brightness,
}

/// Augmentation engine. Holds its own RNG, so give each worker its own instance.
pub struct Augmenter {
    config: AugmentConfig,
    rng: StdRng,
}

impl Augmenter {
    /// Entropy-seeded augmenter.
    pub fn new(config: AugmentConfig) -> Result<Self, AugmentConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            rng: StdRng::from_entropy(),
        })
    }

    /// Reproducible augmenter for tests and debugging.
    pub fn with_seed(config: AugmentConfig, seed: u64) -> Result<Self, AugmentConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Produce `count` independently perturbed copies of `image`.
    pub fn augment(&mut self, image: &RgbImage, count: usize) -> Vec<RgbImage> {
        (0..count).map(|_| self.augment_one(image)).collect()
    }

    fn augment_one(&mut self, image: &RgbImage) -> RgbImage {
        let mut ops = [Op::Blur, Op::Contrast, Op::Brightness];
        ops.shuffle(&mut self.rng);

        let mut out = image.clone();
        for op in ops {
            match op {
                Op::Blur => {
                    if self.rng.gen_bool(self.config.blur_probability) {
                        let (lo, hi) = self.config.blur_sigma;
                        let sigma = self.rng.gen_range(lo..=hi);
                        gaussian_blur(&mut out, sigma);
                    }
                }
                Op::Contrast => {
                    let (lo, hi) = self.config.contrast;
                    let alpha = self.rng.gen_range(lo..=hi);
                    linear_contrast(&mut out, alpha);
                }
                Op::Brightness => {
                    let (lo, hi) = self.config.brightness;
                    let gains = if self.rng.gen_bool(self.config.per_channel_probability) {
                        [
                            self.rng.gen_range(lo..=hi),
                            self.rng.gen_range(lo..=hi),
                            self.rng.gen_range(lo..=hi),
                        ]
                    } else {
                        [self.rng.gen_range(lo..=hi); 3]
                    };
                    multiply(&mut out, gains);
                }
            }
        }
        out
    }
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// `v' = pivot + alpha * (v - pivot)` on every channel.
fn linear_contrast(image: &mut RgbImage, alpha: f32) {
    for px in image.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = to_u8(CONTRAST_PIVOT + alpha * (*c as f32 - CONTRAST_PIVOT));
        }
    }
}

fn multiply(image: &mut RgbImage, gains: [f32; 3]) {
    for px in image.pixels_mut() {
        for (c, gain) in px.0.iter_mut().zip(gains) {
            *c = to_u8(*c as f32 * gain);
        }
    }
}

/// Normalized 1D Gaussian for `sigma`, radius `ceil(3σ)`.
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as isize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / two_sigma_sq).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur with edge clamping.
fn gaussian_blur(image: &mut RgbImage, sigma: f32) {
    if sigma < MIN_BLUR_SIGMA {
        return;
    }
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return;
    }
    let kernel = gaussian_kernel(sigma);
    let half = (kernel.len() / 2) as isize;
    let data: &mut [u8] = image;
    let mut temp = vec![0.0f32; w * h * 3];

    // Horizontal: data → temp
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                let mut sum = 0.0f32;
                for (k, &weight) in kernel.iter().enumerate() {
                    let sx = (x as isize + k as isize - half).clamp(0, w as isize - 1) as usize;
                    sum += data[(y * w + sx) * 3 + c] as f32 * weight;
                }
                temp[(y * w + x) * 3 + c] = sum;
            }
        }
    }

    // Vertical: temp → data
    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                let mut sum = 0.0f32;
                for (k, &weight) in kernel.iter().enumerate() {
                    let sy = (y as isize + k as isize - half).clamp(0, h as isize - 1) as usize;
                    sum += temp[(sy * w + x) * 3 + c] * weight;
                }
                data[(y * w + x) * 3 + c] = to_u8(sum);
            }
        }
    }
}
