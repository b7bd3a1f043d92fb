use anyhow::{bail, Context, Result};
use faceprint_core::{AugmentConfig, DetectionStrategy, EngineConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_RECOGNIZER_MODEL: &str = "w600k_r50.onnx";
const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 30;

/// CLI configuration: defaults, then the TOML file, then `FACEPRINT_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding `signature_<name>.csv` files.
    pub store_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// ArcFace model file name, relative to `model_dir`.
    pub recognizer_model: String,
    /// Per-call wait on the extractor thread.
    pub extract_timeout: Duration,
    pub engine: EngineConfig,
}

/// On-disk shape. Every key is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    store_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    recognizer_model: Option<String>,
    detectors: Option<Vec<DetectionStrategy>>,
    augment_count: Option<usize>,
    threshold: Option<f64>,
    enroll_workers: Option<usize>,
    extract_timeout_secs: Option<u64>,
    seed: Option<u64>,
    augment: Option<AugmentConfig>,
}

impl Config {
    /// Load from the process environment. `config_file` wins over `FACEPRINT_CONFIG`.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Self::from_sources(config_file, |key| std::env::var(key).ok())
    }

    fn from_sources(config_file: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("faceprint");

        let mut config = Self {
            store_dir: data_dir.join("signatures"),
            model_dir: data_dir.join("models"),
            recognizer_model: DEFAULT_RECOGNIZER_MODEL.to_string(),
            extract_timeout: Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS),
            engine: EngineConfig::default(),
        };

        let file = config_file
            .map(Path::to_path_buf)
            .or_else(|| env("FACEPRINT_CONFIG").map(PathBuf::from));
        if let Some(path) = file {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            let parsed: FileConfig =
                toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;
            config.apply_file(parsed);
            tracing::debug!(path = %path.display(), "config file applied");
        }

        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        let e = &mut self.engine;
        if let Some(v) = file.store_dir {
            self.store_dir = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.recognizer_model {
            self.recognizer_model = v;
        }
        if let Some(v) = file.extract_timeout_secs {
            self.extract_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.detectors {
            e.detectors = v;
        }
        if let Some(v) = file.augment_count {
            e.augment_count = v;
        }
        if let Some(v) = file.threshold {
            e.threshold = v;
        }
        if let Some(v) = file.enroll_workers {
            e.enroll_workers = v;
        }
        if let Some(v) = file.augment {
            e.augment = v;
        }
        if file.seed.is_some() {
            e.seed = file.seed;
        }
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("FACEPRINT_STORE_DIR") {
            self.store_dir = PathBuf::from(v);
        }
        if let Some(v) = env("FACEPRINT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("FACEPRINT_RECOGNIZER_MODEL") {
            self.recognizer_model = v;
        }
        if let Some(v) = env("FACEPRINT_DETECTORS") {
            self.engine.detectors = parse_detectors(&v).context("FACEPRINT_DETECTORS")?;
        }
        if let Some(v) = env_parsed(env, "FACEPRINT_AUGMENT_COUNT")? {
            self.engine.augment_count = v;
        }
        if let Some(v) = env_parsed(env, "FACEPRINT_THRESHOLD")? {
            self.engine.threshold = v;
        }
        if let Some(v) = env_parsed(env, "FACEPRINT_ENROLL_WORKERS")? {
            self.engine.enroll_workers = v;
        }
        if let Some(v) = env_parsed(env, "FACEPRINT_EXTRACT_TIMEOUT_SECS")? {
            self.extract_timeout = Duration::from_secs(v);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.engine.detectors.is_empty() {
            bail!("at least one detector strategy is required");
        }
        if self.engine.enroll_workers == 0 {
            bail!("enroll_workers must be at least 1");
        }
        if self.extract_timeout.is_zero() {
            bail!("extract_timeout_secs must be at least 1");
        }
        // Threshold and augmentation ranges are checked by the engine itself.
        Ok(())
    }
}

/// Comma-separated `<model>@<size>:<threshold>` list, in cascade order.
fn parse_detectors(value: &str) -> Result<Vec<DetectionStrategy>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<DetectionStrategy>().map_err(anyhow::Error::from))
        .collect()
}

/// A set but unparsable variable is an error, not a silent default.
fn env_parsed<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}")),
    }
}
