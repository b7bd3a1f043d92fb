use approx::assert_abs_diff_eq;
use faceprint_core::builder::BuildError;
use faceprint_core::{
    spawn_worker, AugmentConfig, BoundingBox, CascadeError, Decision, DetectedFace, DetectionStrategy, EmbeddingExtractor, Embedding,
    Engine, EngineConfig, EngineError, ExtractError, SelectError, SignatureStore, StoreError, VerifyError,
};
use image::{Rgb, RgbImage};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted stand-in for the ONNX provider.
///
/// Returns `faces` for every image, except images `fail_width` pixels wide,
/// and only for strategies listed in `succeed_on` (all when empty).
#[derive(Clone, Default)]
struct MockExtractor {
    faces: Vec<DetectedFace>,
    succeed_on: Vec<String>,
    fail_width: Option<u32>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockExtractor {
    fn returning(embeddings: &[&[f32]]) -> Self {
        Self {
            faces: embeddings
                .iter()
                .enumerate()
                .map(|(i, e)| DetectedFace {
                    embedding: Embedding::new(e.to_vec()),
                    bounding_box: BoundingBox::new(i as u32 * 40, 10, 30, 30),
                })
                .collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl EmbeddingExtractor for MockExtractor {
    fn represent(
        &mut self,
        image: &RgbImage,
        strategy: &DetectionStrategy,
    ) -> Result<Vec<DetectedFace>, ExtractError> {
        self.log.lock().unwrap().push(strategy.model.clone());
        if self.fail_width == Some(image.width()) {
            return Err(ExtractError::NoFaceDetected);
        }
        if !self.succeed_on.is_empty() && !self.succeed_on.contains(&strategy.model) {
            return Err(ExtractError::NoFaceDetected);
        }
        Ok(self.faces.clone())
    }
}

const V: [f32; 4] = [0.5, -0.25, 0.75, 0.1];

fn config(detectors: &[&str]) -> EngineConfig {
    EngineConfig {
        detectors: detectors
            .iter()
            .map(|m| DetectionStrategy::new(*m, 640, 0.5))
            .collect(),
        augment: AugmentConfig::default(),
        augment_count: 2,
        seed: Some(42),
        ..EngineConfig::default()
    }
}

fn solid_photos(n: usize) -> Vec<RgbImage> {
    (0..n)
        .map(|i| RgbImage::from_pixel(64, 64, Rgb([20 + i as u8 * 20, 100, 200 - i as u8 * 10])))
        .collect()
}

fn engine(extractor: MockExtractor, dir: &tempfile::TempDir) -> Engine<MockExtractor> {
    Engine::new(extractor, SignatureStore::open(dir.path()).unwrap(), config(&["primary"])).unwrap()
}

#[test]
fn test_ana_enroll_and_verify() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(MockExtractor::returning(&[&V]), &dir);

    let summary = engine.enroll_from_photos("ana", &solid_photos(10)).unwrap();
    // Each photo contributes itself plus two augmentations.
    assert_eq!(summary.success_count, 30);
    assert_eq!(summary.failure_count, 0);

    let mean = engine.load_signature("ana").unwrap().mean_vector();
    for (m, v) in mean.values.iter().zip(V) {
        assert_abs_diff_eq!(*m, v, epsilon = 1e-6);
    }

    let same = engine.verify("ana", &Embedding::new(V.to_vec())).unwrap();
    assert_eq!(same.decision, Decision::Match);
    assert_abs_diff_eq!(same.distance, 0.0, epsilon = 1e-6);

    let opposite = engine.verify("ana", &Embedding::new(V.to_vec()).negated()).unwrap();
    assert_eq!(opposite.decision, Decision::NoMatch);
    assert_abs_diff_eq!(opposite.distance, 2.0, epsilon = 1e-6);
}

#[test]
fn test_verify_unknown_identity_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(MockExtractor::returning(&[&V]), &dir);
    let err = engine.verify("ghost", &Embedding::new(V.to_vec())).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Verify(VerifyError::Store(StoreError::NotFound { .. }))
    ));
}

#[test]
fn test_two_face_photo_routes_by_index() {
    let dir = tempfile::tempdir().unwrap();
    let left: [f32; 3] = [1.0, 0.0, 0.0];
    let right: [f32; 3] = [0.0, 1.0, 0.0];
    let engine = engine(MockExtractor::returning(&[&left, &right]), &dir);
    engine.enroll_from_raw("left", b"1.0,0.0,0.0\n").unwrap();
    engine.enroll_from_raw("right", b"0.0,1.0,0.0\n").unwrap();

    let faces = engine.detect_faces(&RgbImage::new(128, 64)).unwrap();
    assert_eq!(faces.len(), 2);

    // Indices stay valid after the face list round-trips through JSON.
    let json = serde_json::to_string(&faces).unwrap();
    let restored: Vec<DetectedFace> = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, faces);

    assert!(engine.verify_face("left", &restored, 0).unwrap().is_match());
    assert!(!engine.verify_face("left", &restored, 1).unwrap().is_match());
    assert!(engine.verify_face("right", &restored, 1).unwrap().is_match());
    assert!(!engine.verify_face("right", &restored, 0).unwrap().is_match());

    let err = engine.verify_face("left", &restored, 2).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Select(SelectError::OutOfRange { index: 2, len: 2 })
    ));
}

#[test]
fn test_one_bad_photo_is_a_partial_failure() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = MockExtractor {
        fail_width: Some(33),
        ..MockExtractor::returning(&[&V])
    };
    let engine = engine(extractor, &dir);

    let mut photos = solid_photos(9);
    photos.push(RgbImage::from_pixel(33, 64, Rgb([90, 90, 90])));

    let summary = engine.enroll_from_photos("ana", &photos).unwrap();
    assert_eq!(summary.success_count, 27);
    assert_eq!(summary.failure_count, 3);
    assert_eq!(summary.embeddings, 27);
}

#[test]
fn test_all_photos_failing_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = MockExtractor {
        fail_width: Some(64),
        ..MockExtractor::returning(&[&V])
    };
    let engine = engine(extractor, &dir);

    let err = engine.enroll_from_photos("ana", &solid_photos(10)).unwrap_err();
    assert!(matches!(err, EngineError::Build(BuildError::EmptySignature { attempted: 30, .. })));
    assert!(matches!(
        engine.verify("ana", &Embedding::new(V.to_vec())),
        Err(EngineError::Verify(VerifyError::Store(StoreError::NotFound { .. })))
    ));
}

#[test]
fn test_detect_stops_at_first_successful_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = MockExtractor {
        succeed_on: vec!["y".into()],
        ..MockExtractor::returning(&[&V])
    };
    let log = extractor.clone();
    let engine = Engine::new(extractor, SignatureStore::open(dir.path()).unwrap(), config(&["x", "y", "z"])).unwrap();

    let faces = engine.detect_faces(&RgbImage::new(64, 64)).unwrap();
    assert_eq!(faces.len(), 1);
    assert_eq!(log.calls(), vec!["x", "y"]);
}

#[test]
fn test_enrollment_uses_primary_strategy_only() {
    let dir = tempfile::tempdir().unwrap();
    let extractor = MockExtractor {
        succeed_on: vec!["y".into()],
        ..MockExtractor::returning(&[&V])
    };
    let log = extractor.clone();
    let engine = Engine::new(extractor, SignatureStore::open(dir.path()).unwrap(), config(&["x", "y"])).unwrap();

    assert!(engine.enroll_from_photos("ana", &solid_photos(2)).is_err());
    assert!(log.calls().iter().all(|c| c == "x"));
}

#[test]
fn test_reenrollment_replaces_signature() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(MockExtractor::returning(&[&V]), &dir);
    engine.enroll_from_raw("ana", b"0,0,1,0\n0,0,1,0\n").unwrap();
    engine.enroll_from_photos("ana", &solid_photos(1)).unwrap();

    let signature = engine.load_signature("ana").unwrap();
    assert_eq!(signature.len(), 3);
    assert!(engine.verify("ana", &Embedding::new(V.to_vec())).unwrap().is_match());
}

#[test]
fn test_list_shows_display_names() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(MockExtractor::returning(&[&V]), &dir);
    engine.enroll_from_raw("Maria Clara", b"1,2,3\n").unwrap();
    engine.enroll_from_photos("bob", &solid_photos(1)).unwrap();

    let names: Vec<String> = engine.list_identities().unwrap().into_iter().collect();
    assert_eq!(names, vec!["Bob", "Maria clara"]);
}

#[test]
fn test_engine_over_worker_thread() {
    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_worker(|| Ok(MockExtractor::returning(&[&V])), Duration::from_secs(5)).unwrap();
    let cfg = EngineConfig {
        enroll_workers: 3,
        ..config(&["primary"])
    };
    let engine = Engine::new(handle, SignatureStore::open(dir.path()).unwrap(), cfg).unwrap();

    engine.warm_up().unwrap();
    let summary = engine.enroll_from_photos("ana", &solid_photos(6)).unwrap();
    assert_eq!(summary.success_count, 18);
    assert!(engine.verify("ana", &Embedding::new(V.to_vec())).unwrap().is_match());
}

#[derive(Clone)]
struct Crashing;

impl EmbeddingExtractor for Crashing {
    fn represent(&mut self, _: &RgbImage, _: &DetectionStrategy) -> Result<Vec<DetectedFace>, ExtractError> {
        panic!("inference crashed");
    }
}

#[test]
fn test_crashed_worker_is_reported_as_extraction_failure() {
    let dir = tempfile::tempdir().unwrap();
    let handle = spawn_worker(|| Ok(Crashing), Duration::from_secs(5)).unwrap();
    let engine = Engine::new(handle, SignatureStore::open(dir.path()).unwrap(), config(&["primary"])).unwrap();

    let err = engine.enroll_from_photos("ana", &solid_photos(3)).unwrap_err();
    assert!(
        matches!(
            err,
            EngineError::Build(BuildError::Extraction {
                source: CascadeError::Extraction { source: ExtractError::Unavailable, .. },
                ..
            })
        ),
        "got {err}"
    );
    assert!(engine.list_identities().unwrap().is_empty());
}
