use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use faceprint_core::onnx::OnnxExtractor;
use faceprint_core::{
    decode_image, spawn_worker, DetectedFace, DetectionStrategy, EmbeddingExtractor, Engine, ExtractError,
    SignatureStore, WorkerHandle,
};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "faceprint", about = "Face signature enrollment and verification")]
struct Cli {
    /// TOML config file (overrides FACEPRINT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a signature from reference photos, replacing any existing one
    Enroll {
        /// Identity name (e.g., "Ana Maria")
        name: String,
        /// Reference photos
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Store a precomputed signature matrix (CSV, one embedding per line)
    EnrollRaw {
        name: String,
        csv: PathBuf,
    },
    /// List every face in a photo
    Detect {
        photo: PathBuf,
        /// Write the face list as JSON, for `verify --faces`
        #[arg(long)]
        faces_out: Option<PathBuf>,
        /// Write a PNG crop per face (face_<index>.png)
        #[arg(long)]
        thumbnails: Option<PathBuf>,
    },
    /// Verify one face against an enrolled identity
    #[command(group(ArgGroup::new("source").required(true).args(["photo", "faces"])))]
    Verify {
        name: String,
        #[arg(long)]
        photo: Option<PathBuf>,
        /// Face list written by `detect --faces-out`
        #[arg(long)]
        faces: Option<PathBuf>,
        /// Which face to verify
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// List enrolled identities
    List,
}

/// Stand-in extractor for commands that never touch the models.
#[derive(Clone)]
struct NoModels;

impl EmbeddingExtractor for NoModels {
    fn represent(&mut self, _: &RgbImage, _: &DetectionStrategy) -> Result<Vec<DetectedFace>, ExtractError> {
        Err(ExtractError::Unavailable)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;
    let store = SignatureStore::open(&config.store_dir)
        .with_context(|| format!("opening signature store {}", config.store_dir.display()))?;

    match cli.command {
        Commands::Enroll { name, photos } => {
            let images = photos.iter().map(|p| read_photo(p)).collect::<Result<Vec<_>>>()?;
            let engine = model_engine(&config, store)?;
            let summary = engine.enroll_from_photos(&name, &images)?;
            println!(
                "Enrolled {}: {} embeddings ({} images succeeded, {} failed) -> {}",
                summary.identity,
                summary.embeddings,
                summary.success_count,
                summary.failure_count,
                summary.path.display()
            );
        }
        Commands::EnrollRaw { name, csv } => {
            let bytes = std::fs::read(&csv).with_context(|| format!("reading {}", csv.display()))?;
            let engine = Engine::new(NoModels, store, config.engine.clone())?;
            let path = engine.enroll_from_raw(&name, &bytes)?;
            println!("Stored raw signature for {name} -> {}", path.display());
        }
        Commands::Detect {
            photo,
            faces_out,
            thumbnails,
        } => {
            let image = read_photo(&photo)?;
            let engine = model_engine(&config, store)?;
            let faces = engine.detect_faces(&image)?;
            for (index, face) in faces.iter().enumerate() {
                let b = &face.bounding_box;
                println!("[{index}] x={} y={} w={} h={}", b.x, b.y, b.width, b.height);
            }
            if let Some(path) = faces_out {
                write_faces(&path, &faces)?;
                println!("Face list written to {}", path.display());
            }
            if let Some(dir) = thumbnails {
                write_thumbnails(&dir, &image, &faces)?;
            }
        }
        Commands::Verify {
            name,
            photo,
            faces,
            index,
        } => {
            let result = match (photo, faces) {
                (_, Some(path)) => {
                    let faces = read_faces(&path)?;
                    let engine = Engine::new(NoModels, store, config.engine.clone())?;
                    engine.verify_face(&name, &faces, index)?
                }
                (Some(path), None) => {
                    let image = read_photo(&path)?;
                    let engine = model_engine(&config, store)?;
                    let faces = engine.detect_faces(&image)?;
                    engine.verify_face(&name, &faces, index)?
                }
                (None, None) => anyhow::bail!("one of --photo or --faces is required"),
            };
            println!("{} distance={:.4} threshold={}", result.decision, result.distance, result.threshold);
            return Ok(if result.is_match() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            });
        }
        Commands::List => {
            let engine = Engine::new(NoModels, store, config.engine.clone())?;
            let names = engine.list_identities()?;
            if names.is_empty() {
                println!("No identities enrolled");
            }
            for name in names {
                println!("{name}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Spawn the extractor thread, build the engine over it and warm it up.
fn model_engine(config: &Config, store: SignatureStore) -> Result<Engine<WorkerHandle>> {
    let model_dir = config.model_dir.clone();
    let recognizer = config.recognizer_model.clone();
    let strategies = config.engine.detectors.clone();
    let handle = spawn_worker(
        move || OnnxExtractor::load(&model_dir, &recognizer, &strategies).map_err(|e| e.to_string()),
        config.extract_timeout,
    )
    .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    let engine = Engine::new(handle, store, config.engine.clone())?;
    engine.warm_up()?;
    Ok(engine)
}

fn read_photo(path: &Path) -> Result<RgbImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    decode_image(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn write_faces(path: &Path, faces: &[DetectedFace]) -> Result<()> {
    let json = serde_json::to_string_pretty(faces)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

fn read_faces(path: &Path) -> Result<Vec<DetectedFace>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing face list {}", path.display()))
}

fn write_thumbnails(dir: &Path, image: &RgbImage, faces: &[DetectedFace]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (index, face) in faces.iter().enumerate() {
        let path = dir.join(format!("face_{index}.png"));
        face.bounding_box
            .crop(image)
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    tracing::info!(dir = %dir.display(), count = faces.len(), "thumbnails written");
    Ok(())
}
