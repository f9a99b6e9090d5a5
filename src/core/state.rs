//! Durable digest -> record store.
//!
//! The store is the only writer of the state artifact. Every `record` rewrites
//! the artifact through a temp file and an atomic rename, so a yanked volume or
//! killed process never loses a record that was already reported as copied.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::models::{Digest, FileRecord};
use crate::error::{Error, Result};

const STATE_VERSION: u32 = 1;

/// In-memory view of every record, keyed by digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyState {
    records: HashMap<Digest, FileRecord>,
}

impl CopyState {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.records.contains_key(digest)
    }

    pub fn get(&self, digest: &Digest) -> Option<&FileRecord> {
        self.records.get(digest)
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    version: u32,
    records: BTreeMap<String, PersistedRecord>,
}

#[derive(Serialize, Deserialize)]
struct PersistedRecord {
    source_path: PathBuf,
    destination_path: PathBuf,
    size_bytes: u64,
    copied_at: DateTime<Utc>,
}

/// Read the state artifact at `path`.
///
/// A missing file is an empty state. Content that cannot be parsed, or that
/// carries an unknown version, is [`Error::StateCorruption`].
pub fn load_state(path: &Path) -> Result<CopyState> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CopyState::default()),
        Err(e) => return Err(Error::io(path, e)),
    };

    let persisted: PersistedState =
        serde_json::from_slice(&bytes).map_err(|e| Error::StateCorruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if persisted.version != STATE_VERSION {
        return Err(Error::StateCorruption {
            path: path.to_path_buf(),
            reason: format!("unsupported state version {}", persisted.version),
        });
    }

    let mut records = HashMap::with_capacity(persisted.records.len());
    for (hex, stored) in persisted.records {
        let digest = Digest::try_from(hex).map_err(|reason| Error::StateCorruption {
            path: path.to_path_buf(),
            reason,
        })?;

        records.insert(
            digest,
            FileRecord {
                digest,
                source_path: stored.source_path,
                destination_path: stored.destination_path,
                size_bytes: stored.size_bytes,
                copied_at: stored.copied_at,
            },
        );
    }

    Ok(CopyState { records })
}

/// Atomically replace the artifact at `path` with `state`.
pub fn write_state(path: &Path, state: &CopyState) -> Result<()> {
    let persisted = PersistedState {
        version: STATE_VERSION,
        records: state
            .records
            .values()
            .map(|r| {
                (
                    r.digest.to_hex(),
                    PersistedRecord {
                        source_path: r.source_path.clone(),
                        destination_path: r.destination_path.clone(),
                        size_bytes: r.size_bytes,
                        copied_at: r.copied_at,
                    },
                )
            })
            .collect(),
    };

    let json = serde_json::to_vec_pretty(&persisted)
        .map_err(|e| Error::io(path, std::io::Error::other(e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let tmp_path = temp_path_for(path);
    {
        let mut file = File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
        file.write_all(&json).map_err(|e| Error::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| Error::io(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;

    // Make the rename itself durable.
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(dir = %parent.display(), error = %e, "Failed to sync state directory");
        }
    }

    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

struct Inner {
    /// `None` for an ephemeral session store that never touches disk.
    path: Option<PathBuf>,
    state: CopyState,
}

/// Shared handle to the copy state. Clones refer to the same store; all
/// mutation is serialized through one lock.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<Inner>>,
}

impl StateStore {
    /// Open the store backed by `path`, recovering from a corrupt artifact by
    /// moving it aside and starting empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let state = match load_state(&path) {
            Ok(state) => {
                info!(path = %path.display(), records = state.len(), "Loaded copy state");
                state
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Copy state unreadable, starting empty");
                quarantine(&path);
                CopyState::default()
            }
        };

        Self {
            inner: Arc::new(Mutex::new(Inner {
                path: Some(path),
                state,
            })),
        }
    }

    /// A session-only store that starts empty and is never persisted.
    pub fn ephemeral() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                path: None,
                state: CopyState::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.lock().state.contains(digest)
    }

    pub fn len(&self) -> usize {
        self.lock().state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().state.is_empty()
    }

    pub fn get(&self, digest: &Digest) -> Option<FileRecord> {
        self.lock().state.get(digest).cloned()
    }

    pub fn snapshot(&self) -> CopyState {
        self.lock().state.clone()
    }

    /// Insert a record and persist it before returning.
    ///
    /// Returns `Ok(false)` without touching anything when the digest is
    /// already known; records are never replaced. If persisting fails the
    /// insert is undone so memory and disk agree.
    pub fn record(&self, record: FileRecord) -> Result<bool> {
        let mut inner = self.lock();
        let digest = record.digest;

        if inner.state.contains(&digest) {
            return Ok(false);
        }

        inner.state.records.insert(digest, record);

        if let Some(path) = inner.path.clone() {
            if let Err(e) = write_state(&path, &inner.state) {
                inner.state.records.remove(&digest);
                return Err(e);
            }
        }

        debug!(digest = %digest.short(), "Recorded copied file");
        Ok(true)
    }

    /// Write the current state to disk.
    pub fn persist(&self) -> Result<()> {
        let inner = self.lock();
        match &inner.path {
            Some(path) => write_state(path, &inner.state),
            None => Ok(()),
        }
    }

    /// Drop every record. Only ever called on explicit user request.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.lock();
        let previous = std::mem::take(&mut inner.state);

        if let Some(path) = inner.path.clone() {
            if let Err(e) = write_state(&path, &inner.state) {
                inner.state = previous;
                return Err(e);
            }
        }

        info!(cleared = previous.len(), "Copy state reset");
        Ok(())
    }
}

/// Move an unreadable artifact out of the way so the next write does not
/// destroy it.
fn quarantine(path: &Path) {
    if !path.exists() {
        return;
    }

    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state.json".into());
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S")));
    let target = path.with_file_name(name);

    match fs::rename(path, &target) {
        Ok(()) => warn!(moved_to = %target.display(), "Preserved corrupt copy state"),
        Err(e) => warn!(error = %e, "Failed to preserve corrupt copy state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(content: &[u8], name: &str) -> FileRecord {
        FileRecord {
            digest: Digest::from(blake3::hash(content)),
            source_path: PathBuf::from("/media/card").join(name),
            destination_path: PathBuf::from("/backup").join(name),
            size_bytes: content.len() as u64,
            copied_at: Utc::now(),
        }
    }

    #[test]
    fn missing_artifact_loads_empty() {
        let temp = tempdir().unwrap();
        let state = load_state(&temp.path().join("state.json")).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn persist_then_load_round_trips() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");

        let store = StateStore::open(&path);
        assert!(store.record(record(b"one", "a.jpg")).unwrap());
        assert!(store.record(record(b"two", "b.mp4")).unwrap());
        store.persist().unwrap();

        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded, store.snapshot());
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn each_record_is_durable_without_explicit_persist() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");

        let store = StateStore::open(&path);
        let rec = record(b"content", "a.jpg");
        store.record(rec.clone()).unwrap();

        let reopened = StateStore::open(&path);
        assert!(reopened.contains(&rec.digest));
        assert!(!temp.path().join("state.json.tmp").exists());
    }

    #[test]
    fn existing_digest_is_not_replaced() {
        let store = StateStore::ephemeral();
        let first = record(b"same", "first.jpg");
        let second = record(b"same", "second.jpg");

        assert!(store.record(first.clone()).unwrap());
        assert!(!store.record(second).unwrap());
        assert_eq!(store.get(&first.digest).unwrap().source_path, first.source_path);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn malformed_artifact_is_state_corruption() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(load_state(&path), Err(Error::StateCorruption { .. })));
    }

    #[test]
    fn open_recovers_from_corruption_and_keeps_the_evidence() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, b"[\"legacy\"]").unwrap();

        let store = StateStore::open(&path);
        assert!(store.is_empty());
        assert!(!path.exists());

        let preserved = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(preserved);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, br#"{"version": 99, "records": {}}"#).unwrap();

        assert!(matches!(load_state(&path), Err(Error::StateCorruption { .. })));
    }

    #[test]
    fn reset_clears_memory_and_disk() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");

        let store = StateStore::open(&path);
        store.record(record(b"x", "x.jpg")).unwrap();
        store.reset().unwrap();

        assert!(store.is_empty());
        assert!(load_state(&path).unwrap().is_empty());
    }

    #[test]
    fn ephemeral_store_never_writes() {
        let store = StateStore::ephemeral();
        store.record(record(b"x", "x.jpg")).unwrap();
        store.persist().unwrap();
        assert!(store.path().is_none());
        assert_eq!(store.len(), 1);
    }
}
