//! File-backed signature store: one `signature_<key>.csv` per identity.

use crate::identity::Identity;
use crate::signature::{Signature, SignatureError};
use std::collections::{BTreeSet, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const FILE_PREFIX: &str = "signature_";
const FILE_EXTENSION: &str = "csv";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no signature enrolled for {identity}")]
    NotFound { identity: String },
    #[error("signature for {identity} is unreadable: {source}")]
    Unreadable {
        identity: String,
        #[source]
        source: SignatureError,
    },
    #[error("refusing to store an empty signature payload for {identity}")]
    EmptyPayload { identity: String },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable identity → signature mapping rooted at one directory.
///
/// Writes go through a temp file in the same directory and are renamed into
/// place, so readers only ever see whole files. Writers of the same identity
/// are serialized in-process; the last one wins.
#[derive(Debug)]
pub struct SignatureStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SignatureStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        tracing::debug!(root = %root.display(), "signature store opened");
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, identity: &Identity) -> PathBuf {
        self.root
            .join(format!("{FILE_PREFIX}{}.{FILE_EXTENSION}", identity.key()))
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.path_for(identity).is_file()
    }

    /// Replace the identity's signature with `signature`.
    pub fn save(&self, identity: &Identity, signature: &Signature) -> Result<PathBuf, StoreError> {
        let path = self.write_atomic(identity, signature.to_csv().as_bytes())?;
        tracing::info!(
            identity = %identity,
            embeddings = signature.len(),
            dimension = signature.dimension(),
            path = %path.display(),
            "signature saved"
        );
        Ok(path)
    }

    /// Store an already-serialized matrix byte-for-byte.
    ///
    /// The payload is not parsed; a malformed one surfaces as
    /// [`StoreError::Unreadable`] on the next `load`.
    pub fn save_raw(&self, identity: &Identity, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(StoreError::EmptyPayload {
                identity: identity.to_string(),
            });
        }
        let path = self.write_atomic(identity, bytes)?;
        tracing::info!(
            identity = %identity,
            bytes = bytes.len(),
            path = %path.display(),
            "raw signature stored"
        );
        Ok(path)
    }

    pub fn load(&self, identity: &Identity) -> Result<Signature, StoreError> {
        let path = self.path_for(identity);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    identity: identity.to_string(),
                })
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let signature = Signature::from_bytes(&bytes).map_err(|source| StoreError::Unreadable {
            identity: identity.to_string(),
            source,
        })?;
        tracing::debug!(
            identity = %identity,
            embeddings = signature.len(),
            dimension = signature.dimension(),
            "signature loaded"
        );
        Ok(signature)
    }

    /// Every identity with a signature file, in key order.
    pub fn list(&self) -> Result<BTreeSet<Identity>, StoreError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut identities = BTreeSet::new();

        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix(FILE_PREFIX))
            else {
                continue;
            };
            match Identity::from_key(key) {
                Ok(id) => {
                    identities.insert(id);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping signature file"),
            }
        }

        Ok(identities)
    }

    fn lock_for(&self, identity: &Identity) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(identity.key().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn write_atomic(&self, identity: &Identity, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let lock = self.lock_for(identity);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = self.path_for(identity);
        let mut tmp = tempfile::Builder::new()
            .prefix(".signature-")
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(|e| StoreError::io(&self.root, e))?;
        tmp.write_all(bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| StoreError::io(&path, e.error))?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;
    use approx::assert_abs_diff_eq;

    fn sig(rows: &[&[f32]]) -> Signature {
        Signature::new(rows.iter().map(|r| Embedding::new(r.to_vec())).collect()).unwrap()
    }

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    #[test]
    fn test_save_then_load_preserves_mean() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        let s = sig(&[&[0.1, 0.2, 0.3], &[0.3, 0.2, 0.1]]);
        store.save(&id("ana"), &s).unwrap();

        let loaded = store.load(&id("ana")).unwrap();
        for (a, b) in loaded.mean_vector().values.iter().zip(s.mean_vector().values) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_file_name_uses_normalized_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        let path = store.save(&id("Ana Maria"), &sig(&[&[1.0]])).unwrap();
        assert_eq!(path.file_name().unwrap(), "signature_ana_maria.csv");
        assert!(store.contains(&id("ana maria")));
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.save(&id("ana"), &sig(&[&[1.0, 1.0], &[2.0, 2.0]])).unwrap();
        store.save(&id("ana"), &sig(&[&[5.0, 6.0]])).unwrap();
        let loaded = store.load(&id("ana")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.mean_vector().values, vec![5.0, 6.0]);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        assert!(matches!(store.load(&id("ghost")), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_raw_payload_stored_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        let raw = b"1.0,2.0\n3.0,4.0\n";
        let path = store.save_raw(&id("bob"), raw).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), raw);
        assert_eq!(store.load(&id("bob")).unwrap().mean_vector().values, vec![2.0, 3.0]);
    }

    #[test]
    fn test_malformed_raw_payload_is_unreadable_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.save_raw(&id("bob"), b"1.0,oops\n").unwrap();
        assert!(matches!(
            store.load(&id("bob")),
            Err(StoreError::Unreadable { source: SignatureError::NotNumeric { .. }, .. })
        ));
    }

    #[test]
    fn test_empty_raw_payload_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.save_raw(&id("bob"), b" \n"),
            Err(StoreError::EmptyPayload { .. })
        ));
        assert!(!store.contains(&id("bob")));
    }

    #[test]
    fn test_list_returns_identities_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        store.save(&id("ana"), &sig(&[&[1.0]])).unwrap();
        store.save(&id("Joao Silva"), &sig(&[&[1.0]])).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("other.csv"), "1").unwrap();

        let names: Vec<String> = store.list().unwrap().iter().map(|i| i.display_name()).collect();
        assert_eq!(names, vec!["Ana", "Joao silva"]);
    }

    #[test]
    fn test_concurrent_writers_leave_a_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path()).unwrap();
        let ana = id("ana");

        std::thread::scope(|scope| {
            for t in 0..8 {
                let store = &store;
                let ana = &ana;
                scope.spawn(move || {
                    let rows: Vec<Embedding> = (0..50).map(|_| Embedding::new(vec![t as f32; 64])).collect();
                    store.save(ana, &Signature::new(rows).unwrap()).unwrap();
                });
            }
        });

        let loaded = store.load(&ana).unwrap();
        assert_eq!(loaded.len(), 50);
        let first = loaded.embeddings()[0].values[0];
        assert!(loaded.embeddings().iter().all(|e| e.values.iter().all(|&v| v == first)));
    }
}
