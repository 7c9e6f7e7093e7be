use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::book::BookId;
use crate::error::{CardsError, Result};

pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if let Ok(step) = chrono::Duration::from_std(by) {
            *now += step;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheScope {
    Book,
    Chapter { index: u32 },
}

impl CacheScope {
    pub fn chapter(index: u32) -> Self {
        CacheScope::Chapter { index }
    }

    fn path_segment(&self) -> String {
        match self {
            CacheScope::Book => "book".to_string(),
            CacheScope::Chapter { index } => format!("chapter-{index:04}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub book: BookId,
    pub scope: CacheScope,
    pub stage: String,
    pub version: String,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{}",
            self.book.short(),
            self.scope.path_segment(),
            self.stage,
            self.version
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Valid iff `now - created_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now.signed_duration_since(self.created_at) < ttl,
            Err(_) => true,
        }
    }
}

/// Byte store behind the result cache. Implementations must tolerate
/// concurrent calls on distinct keys; concurrent writes to one key may
/// resolve in any order.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;
    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()>;
    fn remove(&self, key: &CacheKey) -> Result<bool>;
    fn remove_book(&self, book: &BookId) -> Result<usize>;
    fn keys(&self) -> Result<Vec<CacheKey>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        self.entries.write().insert(key.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn remove_book(&self, book: &BookId) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| &key.book != book);
        Ok(before - entries.len())
    }

    fn keys(&self) -> Result<Vec<CacheKey>> {
        let mut keys: Vec<CacheKey> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Stores nothing; every read is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStore;

impl CacheStore for DisabledStore {
    fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn put(&self, _key: &CacheKey, _entry: &CacheEntry) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &CacheKey) -> Result<bool> {
        Ok(false)
    }

    fn remove_book(&self, _book: &BookId) -> Result<usize> {
        Ok(0)
    }

    fn keys(&self) -> Result<Vec<CacheKey>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEnvelope {
    key: CacheKey,
    created_at: DateTime<Utc>,
    ttl_ms: u64,
    payload: String,
}

/// One JSON file per entry under
/// `<root>/<book id>/<scope>/<stage>@<version>.json`. Writes go through a
/// temporary file in the same directory and an atomic rename.
///
/// Nothing is evicted except through TTL-on-read, `prune` and book
/// invalidation, so the directory grows with the number of books and
/// chapters analyzed.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn book_dir(&self, book: &BookId) -> PathBuf {
        self.root.join(sanitize_segment(book.as_str()))
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.book_dir(&key.book)
            .join(key.scope.path_segment())
            .join(format!(
                "{}@{}.json",
                sanitize_segment(&key.stage),
                sanitize_segment(&key.version)
            ))
    }

    fn read_envelope(path: &Path) -> Result<FileEnvelope> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn entry_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let listing = match fs::read_dir(&current) {
                Ok(listing) => listing,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            for item in listing {
                let path = item?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

impl CacheStore for FileStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let envelope = match Self::read_envelope(&path) {
            Ok(envelope) => envelope,
            Err(CardsError::Io(err)) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if &envelope.key != key {
            return Err(CardsError::Cache(format!(
                "entry at {} belongs to {}",
                path.display(),
                envelope.key
            )));
        }
        let value = general_purpose::STANDARD
            .decode(envelope.payload.as_bytes())
            .map_err(|e| CardsError::Cache(format!("corrupt payload in {}: {e}", path.display())))?;
        Ok(Some(CacheEntry {
            value,
            created_at: envelope.created_at,
            ttl: Duration::from_millis(envelope.ttl_ms),
        }))
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .ok_or_else(|| CardsError::Cache(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;
        let envelope = FileEnvelope {
            key: key.clone(),
            created_at: entry.created_at,
            ttl_ms: u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX),
            payload: general_purpose::STANDARD.encode(&entry.value),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, &envelope)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| CardsError::Io(e.error))?;
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_book(&self, book: &BookId) -> Result<usize> {
        let dir = self.book_dir(book);
        let removed = self.entry_files(&dir)?.len();
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(removed),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Result<Vec<CacheKey>> {
        let mut keys = Vec::new();
        for path in self.entry_files(&self.root)? {
            match Self::read_envelope(&path) {
                Ok(envelope) => keys.push(envelope.key),
                Err(err) => warn!("skipping unreadable cache file {}: {err}", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A cacheable pipeline stage. Bumping `revision` orphans every entry the
/// stage wrote before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub name: &'static str,
    pub revision: u32,
}

impl Stage {
    pub const fn new(name: &'static str, revision: u32) -> Self {
        Self { name, revision }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub errors: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
}

/// TTL-bound, content-addressed stage results. Failures of the underlying
/// store never propagate: they are logged and read as misses, so the worst
/// case is recomputation.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    stage_version: String,
    counters: Arc<Counters>,
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("stage_version", &self.stage_version)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ResultCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        stage_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            stage_version: stage_version.into(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock), ttl, "1")
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledStore), Arc::new(SystemClock), DEFAULT_TTL, "1")
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Builds the key of a stage result. `params` are the stage's tunables;
    /// their digest joins the version so that changing configuration never
    /// serves results computed under other settings.
    pub fn key<P: Serialize>(
        &self,
        stage: &Stage,
        book: &BookId,
        scope: CacheScope,
        params: &P,
    ) -> CacheKey {
        let digest = serde_json::to_vec(params)
            .map(|bytes| blake3::hash(&bytes).to_hex().to_string())
            .unwrap_or_default();
        let fingerprint = digest.get(..8).unwrap_or(digest.as_str());
        CacheKey {
            book: book.clone(),
            scope,
            stage: stage.name.to_string(),
            version: format!("{}.r{}.{}", self.stage_version, stage.revision, fingerprint),
        }
    }

    /// Expired entries read as absent and are deleted on the spot.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        match self.store.get(key) {
            Ok(Some(entry)) if entry.is_fresh(self.clock.now()) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            Ok(Some(_)) => {
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "cache entry expired");
                if let Err(err) = self.store.remove(key) {
                    debug!(%key, "failed to drop expired entry: {err}");
                }
                None
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, "cache read failed, recomputing: {err}");
                None
            }
        }
    }

    pub fn put(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) {
        let entry = CacheEntry {
            value,
            created_at: self.clock.now(),
            ttl,
        };
        match self.store.put(key, &entry) {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, "cache write failed: {err}");
            }
        }
    }

    pub fn invalidate(&self, book: &BookId) -> usize {
        match self.store.remove_book(book) {
            Ok(removed) => {
                debug!(book = %book.short(), removed, "invalidated cached results");
                removed
            }
            Err(err) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(book = %book.short(), "cache invalidation failed: {err}");
                0
            }
        }
    }

    /// Explicit sweep of expired entries; never run implicitly.
    pub fn prune_expired(&self) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!("cannot list cache entries: {err}");
                return 0;
            }
        };
        let now = self.clock.now();
        keys.iter()
            .filter(|key| match self.store.get(key) {
                Ok(Some(entry)) => !entry.is_fresh(now),
                Ok(None) => false,
                Err(_) => true,
            })
            .filter(|key| self.store.remove(key).unwrap_or(false))
            .count()
    }

    /// Wraps a pure stage: returns the cached result when a fresh, decodable
    /// entry exists, otherwise computes, stores and returns.
    pub fn cached<T, P, F>(
        &self,
        stage: &Stage,
        book: &BookId,
        scope: CacheScope,
        params: &P,
        compute: F,
    ) -> T
    where
        T: Serialize + DeserializeOwned,
        P: Serialize,
        F: FnOnce() -> T,
    {
        let key = self.key(stage, book, scope, params);
        if let Some(bytes) = self.get(&key) {
            match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => return value,
                Err(err) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(%key, "discarding undecodable cache entry: {err}");
                }
            }
        }
        let value = compute();
        match serde_json::to_vec(&value) {
            Ok(bytes) => self.put(&key, bytes, self.ttl),
            Err(err) => warn!(%key, "stage result not serializable: {err}"),
        }
        value
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }
}
