//! # Endpoint Store
//!
//! The set of known node endpoints, persisted across restarts.
//!
//! ## Normalization
//!
//! Endpoints are trimmed and stripped of trailing slashes before they are
//! stored, so `http://h:8080/` and `http://h:8080` are the same entry.
//!
//! ## Persistence
//!
//! Mutations only mark the store dirty. The owner takes a [`PendingSave`]
//! holding a copy of the full set and writes it through the
//! [`EndpointPersistence`] backend after releasing whatever lock guards the
//! store, so disk I/O never runs under that lock. Saves carry a revision and
//! a save older than one already written is skipped.
//!
//! A failed write is logged and switches the store to session-only mode: it
//! keeps working in memory and stops touching the backend until it is
//! rebuilt. Persistence problems never fail an `add` or `remove`.
//!
//! ## File Layout
//!
//! [`FilePersistence`] writes one JSON object holding the list under the
//! fixed key [`PERSISTENCE_KEY`]:
//!
//! ```text
//! { "discoveredEndpoints": ["http://10.0.0.1:8080", "https://h2"] }
//! ```

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

// ════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

/// Key the endpoint list is stored under.
pub const PERSISTENCE_KEY: &str = "discoveredEndpoints";

// ════════════════════════════════════════════════════════════════════════════
// PERSISTENCE BACKENDS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("endpoint persistence I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("endpoint persistence data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("endpoint persistence unavailable: {0}")]
    Unavailable(String),
}

/// Storage for the endpoint list.
pub trait EndpointPersistence: Send + Sync {
    /// Loads the stored list. A backend with nothing stored returns an
    /// empty list.
    fn load(&self) -> Result<Vec<String>, PersistenceError>;

    /// Replaces the stored list.
    fn save(&self, endpoints: &[String]) -> Result<(), PersistenceError>;
}

#[derive(Serialize, Deserialize)]
struct PersistedEndpoints {
    #[serde(rename = "discoveredEndpoints", default)]
    endpoints: Vec<String>,
}

/// JSON file backend.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EndpointPersistence for FilePersistence {
    fn load(&self) -> Result<Vec<String>, PersistenceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let parsed: PersistedEndpoints = serde_json::from_str(&raw)?;
        Ok(parsed.endpoints)
    }

    fn save(&self, endpoints: &[String]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_vec_pretty(&PersistedEndpoints {
            endpoints: endpoints.to_vec(),
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&body)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

/// In-process backend.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    saved: Mutex<Option<Vec<String>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that starts with `endpoints` already stored.
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        Self {
            saved: Mutex::new(Some(endpoints)),
        }
    }
}

impl EndpointPersistence for MemoryPersistence {
    fn load(&self) -> Result<Vec<String>, PersistenceError> {
        Ok(self.saved.lock().clone().unwrap_or_default())
    }

    fn save(&self, endpoints: &[String]) -> Result<(), PersistenceError> {
        *self.saved.lock() = Some(endpoints.to_vec());
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NORMALIZATION
// ════════════════════════════════════════════════════════════════════════════

/// Canonical form of an endpoint: trimmed, no trailing slash.
///
/// Returns `None` for an empty address.
pub fn normalize_endpoint(raw: &str) -> Option<String> {
    let normalized = raw.trim().trim_end_matches('/');
    if normalized.is_empty() {
        None
    } else {
        Some(normalized.to_string())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ENDPOINT STORE
// ════════════════════════════════════════════════════════════════════════════

/// Backend shared between the store and its pending saves.
struct Writer {
    backend: Box<dyn EndpointPersistence>,
    session_only: AtomicBool,
    /// Revision of the newest list written.
    written: Mutex<u64>,
}

/// Copy of the endpoint set waiting to be written.
#[must_use = "a pending save does nothing until written"]
pub struct PendingSave {
    writer: Arc<Writer>,
    endpoints: Vec<String>,
    revision: u64,
}

impl PendingSave {
    /// Writes the copy unless a newer one was already written or the store
    /// went session-only.
    ///
    /// Blocks on backend I/O.
    pub fn write(self) {
        let mut written = self.writer.written.lock();
        if *written >= self.revision || self.writer.session_only.load(Ordering::SeqCst) {
            return;
        }
        match self.writer.backend.save(&self.endpoints) {
            Ok(()) => *written = self.revision,
            Err(e) => {
                warn!("failed to persist endpoints, continuing in memory for this session: {}", e);
                self.writer.session_only.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Known endpoints plus their persistence backend.
///
/// Not synchronized; the owner serializes access and writes the
/// [`PendingSave`] returned by [`EndpointStore::take_save`].
pub struct EndpointStore {
    endpoints: HashSet<String>,
    writer: Arc<Writer>,
    revision: u64,
    dirty: bool,
}

impl EndpointStore {
    /// Builds a store and loads whatever the backend holds.
    ///
    /// A backend that fails to load leaves the store empty and in
    /// session-only mode, so a later write cannot clobber data that is
    /// merely unreadable right now.
    pub fn open(backend: Box<dyn EndpointPersistence>) -> Self {
        let (endpoints, session_only) = match backend.load() {
            Ok(saved) => {
                let endpoints: HashSet<String> = saved.iter().filter_map(|e| normalize_endpoint(e)).collect();
                debug!("loaded {} persisted endpoints", endpoints.len());
                (endpoints, false)
            }
            Err(e) => {
                warn!("failed to load saved endpoints, continuing in memory: {}", e);
                (HashSet::new(), true)
            }
        };
        Self {
            endpoints,
            writer: Arc::new(Writer {
                backend,
                session_only: AtomicBool::new(session_only),
                written: Mutex::new(0),
            }),
            revision: 0,
            dirty: false,
        }
    }

    /// Store without persistence.
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryPersistence::new()))
    }

    /// Inserts `endpoint` if absent.
    ///
    /// Returns the normalized endpoint when it was newly inserted and
    /// `None` when it was empty or already present.
    pub fn add(&mut self, endpoint: &str) -> Option<String> {
        let normalized = normalize_endpoint(endpoint)?;
        if !self.endpoints.insert(normalized.clone()) {
            return None;
        }
        self.mark_dirty();
        Some(normalized)
    }

    /// Inserts several endpoints.
    ///
    /// Returns the endpoints that were new.
    pub fn extend<I, S>(&mut self, endpoints: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let added: Vec<String> = endpoints
            .into_iter()
            .filter_map(|e| normalize_endpoint(e.as_ref()))
            .filter(|e| self.endpoints.insert(e.clone()))
            .collect();
        if !added.is_empty() {
            self.mark_dirty();
        }
        added
    }

    /// Removes `endpoint`. Returns `true` if it was present.
    pub fn remove(&mut self, endpoint: &str) -> bool {
        let Some(normalized) = normalize_endpoint(endpoint) else {
            return false;
        };
        if !self.endpoints.remove(&normalized) {
            return false;
        }
        self.mark_dirty();
        true
    }

    /// Removes every listed endpoint.
    pub fn remove_all(&mut self, endpoints: &[String]) -> usize {
        let removed = endpoints
            .iter()
            .filter(|e| self.endpoints.remove(e.as_str()))
            .count();
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        normalize_endpoint(endpoint).is_some_and(|e| self.endpoints.contains(&e))
    }

    /// All known endpoints, sorted for stable output.
    pub fn list(&self) -> Vec<String> {
        let mut out: Vec<String> = self.endpoints.iter().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// `true` once a persistence failure has been observed.
    pub fn is_session_only(&self) -> bool {
        self.writer.session_only.load(Ordering::SeqCst)
    }

    /// Copy of the set to write, if it changed since the last call.
    pub fn take_save(&mut self) -> Option<PendingSave> {
        if !std::mem::take(&mut self.dirty) || self.is_session_only() {
            return None;
        }
        Some(PendingSave {
            writer: Arc::clone(&self.writer),
            endpoints: self.list(),
            revision: self.revision,
        })
    }

    /// Writes pending changes in place. For owners without a lock to
    /// release first.
    pub fn flush(&mut self) {
        if let Some(save) = self.take_save() {
            save.write();
        }
    }

    fn mark_dirty(&mut self) {
        self.revision += 1;
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FailingPersistence {
        saves: Arc<AtomicUsize>,
    }

    impl EndpointPersistence for FailingPersistence {
        fn load(&self) -> Result<Vec<String>, PersistenceError> {
            Ok(Vec::new())
        }

        fn save(&self, _: &[String]) -> Result<(), PersistenceError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Err(PersistenceError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(normalize_endpoint("http://a:1/").as_deref(), Some("http://a:1"));
        assert_eq!(normalize_endpoint(" http://a:1// ").as_deref(), Some("http://a:1"));
        assert_eq!(normalize_endpoint("  "), None);
    }

    #[test]
    fn add_is_idempotent() {
        let mut store = EndpointStore::in_memory();
        assert_eq!(store.add("http://a:1/").as_deref(), Some("http://a:1"));
        assert_eq!(store.add("http://a:1"), None);
        assert_eq!(store.len(), 1);
        assert!(store.contains("http://a:1/"));
    }

    #[test]
    fn remove_reports_presence() {
        let mut store = EndpointStore::in_memory();
        store.add("http://a:1");
        assert!(store.remove("http://a:1/"));
        assert!(!store.remove("http://a:1"));
        assert!(store.is_empty());
    }

    #[test]
    fn extend_returns_only_new_entries() {
        let mut store = EndpointStore::in_memory();
        store.add("http://a");
        let added = store.extend(["http://a/", "http://b", "", "http://b"]);
        assert_eq!(added, vec!["http://b".to_string()]);
        assert_eq!(store.list(), vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[test]
    fn loads_from_backend_and_normalizes() {
        let backend = MemoryPersistence::with_endpoints(vec!["http://x/".into(), "http://y".into()]);
        let store = EndpointStore::open(Box::new(backend));
        assert_eq!(store.list(), vec!["http://x".to_string(), "http://y".to_string()]);
    }

    #[test]
    fn save_failure_degrades_to_session_only() {
        let saves = Arc::new(AtomicUsize::new(0));
        let mut store = EndpointStore::open(Box::new(FailingPersistence { saves: saves.clone() }));
        assert!(store.add("http://a").is_some());
        store.flush();
        assert!(store.is_session_only());
        assert!(store.add("http://b").is_some());
        assert!(store.remove("http://a"));
        assert!(store.take_save().is_none());
        assert_eq!(store.list(), vec!["http://b".to_string()]);
        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_round_trip_preserves_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("endpoints.json");
        {
            let mut store = EndpointStore::open(Box::new(FilePersistence::new(&path)));
            store.extend(["http://h1:8080", "https://h2", "http://10.0.0.5:8090"]);
            store.remove("https://h2");
            store.add("https://h3");
            store.flush();
        }
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains(PERSISTENCE_KEY));

        let reloaded = EndpointStore::open(Box::new(FilePersistence::new(&path)));
        let got: HashSet<String> = reloaded.list().into_iter().collect();
        let want: HashSet<String> = ["http://h1:8080", "http://10.0.0.5:8090", "https://h3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(got, want);
        assert!(!reloaded.is_session_only());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EndpointStore::open(Box::new(FilePersistence::new(dir.path().join("none.json"))));
        assert!(store.is_empty());
        assert!(!store.is_session_only());
    }

    #[test]
    fn corrupt_file_degrades_to_session_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.json");
        fs::write(&path, b"{not json").unwrap();
        let mut store = EndpointStore::open(Box::new(FilePersistence::new(&path)));
        assert!(store.is_session_only());
        store.add("http://a");
        assert!(store.take_save().is_none());
        store.flush();
        assert_eq!(fs::read(&path).unwrap(), b"{not json");
    }

    #[test]
    fn unchanged_store_has_nothing_to_save() {
        let mut store = EndpointStore::in_memory();
        assert!(store.take_save().is_none());
        store.add("http://a");
        assert!(store.take_save().is_some());
        assert!(store.take_save().is_none());
        store.add("http://a");
        assert!(store.take_save().is_none());
    }

    #[test]
    fn stale_save_never_overwrites_newer_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.json");
        let mut store = EndpointStore::open(Box::new(FilePersistence::new(&path)));

        store.add("http://a");
        let older = store.take_save().unwrap();
        store.add("http://b");
        let newer = store.take_save().unwrap();

        newer.write();
        older.write();

        let reloaded = EndpointStore::open(Box::new(FilePersistence::new(&path)));
        assert_eq!(reloaded.list(), vec!["http://a".to_string(), "http://b".to_string()]);
    }
}
