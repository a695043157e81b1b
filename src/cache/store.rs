//! Cache backing stores.
//!
//! [`CacheStore`] is the boundary the response cache talks to. Two
//! implementations ship with the crate: [`MemoryStore`] for tests and
//! single-process deployments, and [`JsonFileStore`], which persists to
//! `~/.crewclause/cache/responses.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::key::{CacheContext, CompositeKey};
use crate::error::{CrewError, Result};

/// A single cached answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint of the composite key; unique per store.
    pub fingerprint: String,
    /// Normalized question text.
    pub query: String,
    pub context: CacheContext,
    /// The answer. Never rewritten after insertion.
    pub value: String,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Fresh entry for `key` with zero hits.
    pub fn new(key: &CompositeKey, value: String) -> Self {
        let now = Utc::now();
        Self {
            fingerprint: key.fingerprint(),
            query: key.query().to_string(),
            context: key.context().clone(),
            value,
            access_count: 0,
            last_accessed_at: now,
            created_at: now,
        }
    }
}

/// Result of an insert-or-ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An entry for the key already existed and was left untouched.
    AlreadyPresent,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently stored.
    pub entries: usize,
    /// Cumulative hits across all entries.
    pub hits: u64,
}

/// Keyed store behind [`super::ResponseCache`].
///
/// Implementations provide their own atomicity: `insert` is insert-or-ignore
/// and `touch` is an increment-in-place. Callers hold no locks across calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Fetch the entry for `key`, or `None` when absent.
    async fn find(&self, key: &CompositeKey) -> Result<Option<CacheEntry>>;

    /// Insert `entry` unless one with the same fingerprint exists.
    async fn insert(&self, entry: CacheEntry) -> Result<InsertOutcome>;

    /// Bump `access_count` by one and set `last_accessed_at = at`.
    ///
    /// Touching a fingerprint that is not stored is a no-op.
    async fn touch(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()>;

    async fn stats(&self) -> Result<CacheStats>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store guarded by a mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_entries(entries: HashMap<String, CacheEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| CrewError::CacheStore("memory store lock poisoned".into()))
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Result<HashMap<String, CacheEntry>> {
        Ok(self.lock()?.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_sync(&self, key: &CompositeKey) -> Result<Option<CacheEntry>> {
        let fingerprint = key.fingerprint();
        let guard = self
            .entries
            .lock()
            .map_err(|_| CrewError::CacheLookup("memory store lock poisoned".into()))?;
        Ok(guard.get(&fingerprint).cloned())
    }

    fn insert_sync(&self, entry: CacheEntry) -> Result<InsertOutcome> {
        let mut guard = self.lock()?;
        if guard.contains_key(&entry.fingerprint) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        guard.insert(entry.fingerprint.clone(), entry);
        Ok(InsertOutcome::Inserted)
    }

    fn touch_sync(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()> {
        let mut guard = self.lock()?;
        match guard.get_mut(fingerprint) {
            Some(entry) => {
                entry.access_count = entry.access_count.saturating_add(1);
                entry.last_accessed_at = at;
            }
            None => {
                debug!(key = %&fingerprint[..8.min(fingerprint.len())], "Touch on missing cache entry");
            }
        }
        Ok(())
    }

    fn stats_sync(&self) -> Result<CacheStats> {
        let guard = self.lock()?;
        Ok(CacheStats {
            entries: guard.len(),
            hits: guard.values().map(|e| e.access_count).sum(),
        })
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find(&self, key: &CompositeKey) -> Result<Option<CacheEntry>> {
        self.find_sync(key)
    }

    async fn insert(&self, entry: CacheEntry) -> Result<InsertOutcome> {
        self.insert_sync(entry)
    }

    async fn touch(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()> {
        self.touch_sync(fingerprint, at)
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.stats_sync()
    }
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Serialized form of the file store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedEntries {
    entries: HashMap<String, CacheEntry>,
}

/// Memory store mirrored to a JSON file.
///
/// Inserts write through to disk. Hit bookkeeping stays in memory and is
/// flushed on the next insert or an explicit [`JsonFileStore::flush`], so a
/// read never costs a full file rewrite.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    state: Arc<FileState>,
}

#[derive(Debug)]
struct FileState {
    entries: MemoryStore,
    path: PathBuf,
    /// Held across snapshot and rename so writes land one at a time, each
    /// carrying at least everything the previous one did.
    write_lock: Mutex<()>,
}

impl FileState {
    fn write(&self) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CrewError::CacheStore("file store write lock poisoned".into()))?;
        let snapshot = self.entries.snapshot()?;
        save_to_disk(&self.path, snapshot)
    }
}

impl JsonFileStore {
    /// Open the store at `path`, loading whatever is already there.
    pub fn open(path: PathBuf) -> Self {
        let entries = load_from_disk(&path);
        Self {
            state: Arc::new(FileState {
                entries: MemoryStore::from_entries(entries),
                path,
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Default location: `~/.crewclause/cache/responses.json`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".crewclause")
            .join("cache")
            .join("responses.json")
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// Write the current in-memory state to disk.
    pub fn flush(&self) -> Result<()> {
        self.state.write()
    }

    /// [`Self::flush`] on the blocking pool.
    async fn persist(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || state.write())
            .await
            .map_err(|e| CrewError::CacheStore(format!("file store write task failed: {e}")))?
    }
}

#[async_trait]
impl CacheStore for JsonFileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn find(&self, key: &CompositeKey) -> Result<Option<CacheEntry>> {
        self.state.entries.find_sync(key)
    }

    async fn insert(&self, entry: CacheEntry) -> Result<InsertOutcome> {
        let outcome = self.state.entries.insert_sync(entry)?;
        if outcome == InsertOutcome::Inserted {
            self.persist().await?;
        }
        Ok(outcome)
    }

    async fn touch(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()> {
        self.state.entries.touch_sync(fingerprint, at)
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.state.entries.stats_sync()
    }
}

fn load_from_disk(path: &Path) -> HashMap<String, CacheEntry> {
    match std::fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str::<PersistedEntries>(&data) {
            Ok(store) => store.entries,
            Err(e) => {
                warn!("Response cache file is corrupt, starting empty: {}", e);
                HashMap::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
        Err(e) => {
            warn!("Failed to read response cache, starting empty: {}", e);
            HashMap::new()
        }
    }
}

fn save_to_disk(path: &Path, entries: HashMap<String, CacheEntry>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CrewError::CacheStore(e.to_string()))?;
    }
    let data = serde_json::to_string_pretty(&PersistedEntries { entries })
        .map_err(|e| CrewError::CacheStore(e.to_string()))?;
    // Write beside the target, then rename, so a crash never leaves half a file.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(|e| CrewError::CacheStore(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| CrewError::CacheStore(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(q: &str) -> CompositeKey {
        CompositeKey::new(q, CacheContext::new().with("airline", "UAL"))
    }

    #[tokio::test]
    async fn test_memory_find_missing() {
        let store = MemoryStore::new();
        assert!(store.find(&key("anything")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_insert_then_find() {
        let store = MemoryStore::new();
        let k = key("Minimum rest?");
        let outcome = store
            .insert(CacheEntry::new(&k, "10 hours".into()))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let found = store.find(&key("minimum REST")).await.unwrap().unwrap();
        assert_eq!(found.value, "10 hours");
        assert_eq!(found.query, "minimum rest");
        assert_eq!(found.access_count, 0);
    }

    #[tokio::test]
    async fn test_memory_insert_is_first_writer_wins() {
        let store = MemoryStore::new();
        let k = key("q");
        store.insert(CacheEntry::new(&k, "first".into())).await.unwrap();
        let outcome = store
            .insert(CacheEntry::new(&k, "second".into()))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::AlreadyPresent);
        assert_eq!(store.find(&k).await.unwrap().unwrap().value, "first");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_touch_increments_and_stamps() {
        let store = MemoryStore::new();
        let k = key("q");
        let entry = CacheEntry::new(&k, "v".into());
        let created = entry.created_at;
        store.insert(entry).await.unwrap();

        let later = created + chrono::Duration::seconds(30);
        store.touch(&k.fingerprint(), later).await.unwrap();
        store.touch(&k.fingerprint(), later).await.unwrap();

        let found = store.find(&k).await.unwrap().unwrap();
        assert_eq!(found.access_count, 2);
        assert_eq!(found.last_accessed_at, later);
        assert_eq!(found.created_at, created);
    }

    #[tokio::test]
    async fn test_memory_touch_missing_is_noop() {
        let store = MemoryStore::new();
        store.touch("deadbeef", Utc::now()).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_stats() {
        let store = MemoryStore::new();
        let a = key("a");
        let b = key("b");
        store.insert(CacheEntry::new(&a, "1".into())).await.unwrap();
        store.insert(CacheEntry::new(&b, "2".into())).await.unwrap();
        store.touch(&a.fingerprint(), Utc::now()).await.unwrap();
        store.touch(&a.fingerprint(), Utc::now()).await.unwrap();
        store.touch(&b.fingerprint(), Utc::now()).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, CacheStats { entries: 2, hits: 3 });
    }

    #[tokio::test]
    async fn test_file_store_persists_inserts() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache").join("responses.json");
        let k = key("seniority bidding");

        {
            let store = JsonFileStore::open(path.clone());
            store.insert(CacheEntry::new(&k, "by date of hire".into())).await.unwrap();
        }

        let reopened = JsonFileStore::open(path);
        let found = reopened.find(&k).await.unwrap().unwrap();
        assert_eq!(found.value, "by date of hire");
    }

    #[tokio::test]
    async fn test_file_store_touch_deferred_until_flush() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("responses.json");
        let k = key("q");

        let store = JsonFileStore::open(path.clone());
        store.insert(CacheEntry::new(&k, "v".into())).await.unwrap();
        store.touch(&k.fingerprint(), Utc::now()).await.unwrap();

        let before_flush = JsonFileStore::open(path.clone());
        assert_eq!(before_flush.find(&k).await.unwrap().unwrap().access_count, 0);

        store.flush().unwrap();
        let after_flush = JsonFileStore::open(path);
        assert_eq!(after_flush.find(&k).await.unwrap().unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("responses.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(path);
        assert_eq!(store.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_file_store_unwritable_path_reports_store_failure() {
        let tmp = TempDir::new().unwrap();
        // A regular file where the parent directory should be.
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = JsonFileStore::open(blocker.join("responses.json"));

        let err = store
            .insert(CacheEntry::new(&key("q"), "v".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CrewError::CacheStore(_)), "got {err:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_inserts_all_persist() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("responses.json");
        let store = JsonFileStore::open(path.clone());

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let entry = CacheEntry::new(&key(&format!("question {i}")), format!("answer {i}"));
                    store.insert(entry).await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), InsertOutcome::Inserted);
        }

        // No flush: every insert must already be on disk.
        let reopened = JsonFileStore::open(path.clone());
        assert_eq!(reopened.stats().await.unwrap().entries, 64);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_default_path_under_home() {
        let path = JsonFileStore::default_path();
        assert!(path.ends_with(".crewclause/cache/responses.json"));
    }
}
