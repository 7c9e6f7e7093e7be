use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use conceptcards_core::{
    Analyzer, Book, BookId, BookSource, CacheEntry, CacheKey, CacheScope, CacheStore, CardsError,
    ChapterSource, EngineConfig, FileStore, Interchange, ManualClock, Result, ResultCache, Stage,
    SystemClock, TextUnit, CONCEPTS_STAGE, DEFAULT_TTL,
};

fn book() -> Book {
    let chapter = |texts: &[&str]| ChapterSource {
        title: None,
        units: texts
            .iter()
            .enumerate()
            .map(|(i, text)| TextUnit::new(1, i as u32 + 1, i as u32 + 1, *text))
            .collect(),
    };
    Book::ingest(BookSource {
        title: Some("Iteration".to_string()),
        chapters: vec![
            chapter(&["Iterators produce values.", "An iterator is lazy."]),
            chapter(&["Generators are iterators.", "A generator suspends."]),
            chapter(&["Coroutines extend generators."]),
        ],
    })
    .unwrap()
}

fn file_cache(root: &Path) -> ResultCache {
    ResultCache::new(
        Arc::new(FileStore::open(root).unwrap()),
        Arc::new(SystemClock),
        DEFAULT_TTL,
        "1",
    )
}

fn json_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(json_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}

fn render(analyzer: &Analyzer, book: &Book) -> String {
    Interchange::from_analysis(&analyzer.analyze(book).unwrap())
        .to_json()
        .unwrap()
}

#[test]
fn file_store_survives_process_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let book = book();

    let cold = Analyzer::new(EngineConfig::default(), file_cache(dir.path()));
    let first = render(&cold, &book);
    assert!(cold.cache().stats().writes > 0);

    let warm = Analyzer::new(EngineConfig::default(), file_cache(dir.path()));
    let second = render(&warm, &book);
    let stats = warm.cache().stats();
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.writes, 0);
    assert!(stats.hits > 0);
    assert_eq!(first, second);

    let uncached = Analyzer::new(EngineConfig::default(), ResultCache::disabled());
    assert_eq!(render(&uncached, &book), first);
}

#[test]
fn entries_are_laid_out_per_book_and_scope() {
    let dir = tempfile::tempdir().unwrap();
    let book = book();
    Analyzer::new(EngineConfig::default(), file_cache(dir.path()))
        .analyze(&book)
        .unwrap();
    let book_dir = dir.path().join(book.id.as_str());
    assert!(book_dir.join("book").is_dir());
    assert!(book_dir.join("chapter-0002").is_dir());
    let store = FileStore::open(dir.path()).unwrap();
    let keys = store.keys().unwrap();
    assert_eq!(keys.len(), 3 * 2 + 2);
    assert!(keys.iter().all(|key| key.book == book.id));
}

#[test]
fn corrupt_entries_degrade_to_recompute() {
    let dir = tempfile::tempdir().unwrap();
    let book = book();
    let first = render(
        &Analyzer::new(EngineConfig::default(), file_cache(dir.path())),
        &book,
    );
    for path in json_files(dir.path()) {
        fs::write(path, b"{ not json").unwrap();
    }
    let analyzer = Analyzer::new(EngineConfig::default(), file_cache(dir.path()));
    assert_eq!(render(&analyzer, &book), first);
    let stats = analyzer.cache().stats();
    assert!(stats.errors > 0);
    assert_eq!(stats.hits, 0);
    // the recomputed results replaced the corrupt files
    let repaired = Analyzer::new(EngineConfig::default(), file_cache(dir.path()));
    assert_eq!(render(&repaired, &book), first);
    assert_eq!(repaired.cache().stats().errors, 0);
}

#[test]
fn invalidation_forces_recomputation() {
    let dir = tempfile::tempdir().unwrap();
    let book = book();
    let analyzer = Analyzer::new(EngineConfig::default(), file_cache(dir.path()));
    analyzer.analyze(&book).unwrap();
    assert_eq!(analyzer.cache().invalidate(&book.id), 8);
    assert!(!dir.path().join(book.id.as_str()).exists());
    assert_eq!(analyzer.cache().invalidate(&book.id), 0);

    let fresh = Analyzer::new(EngineConfig::default(), file_cache(dir.path()));
    fresh.analyze(&book).unwrap();
    assert_eq!(fresh.cache().stats().hits, 0);
}

#[test]
fn config_changes_do_not_reuse_results() {
    let dir = tempfile::tempdir().unwrap();
    let book = book();
    Analyzer::new(EngineConfig::default(), file_cache(dir.path()))
        .analyze(&book)
        .unwrap();

    let mut config = EngineConfig::default();
    config.cross_reference.top_n = 1;
    let narrowed = Analyzer::new(config, file_cache(dir.path()));
    let analysis = narrowed.analyze(&book).unwrap();
    assert!(analysis.cross_references.iter().all(|r| r.shared.len() <= 1));
    // only the cross-reference stage depends on top_n
    assert_eq!(narrowed.cache().stats().misses, 1);

    let bumped = ResultCache::new(
        Arc::new(FileStore::open(dir.path()).unwrap()),
        Arc::new(SystemClock),
        DEFAULT_TTL,
        "2",
    );
    let analyzer = Analyzer::new(EngineConfig::default(), bumped);
    analyzer.analyze(&book).unwrap();
    assert_eq!(analyzer.cache().stats().hits, 0);
}

#[test]
fn ttl_expiry_and_pruning_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let cache = ResultCache::new(
        Arc::new(FileStore::open(dir.path()).unwrap()),
        clock.clone(),
        Duration::from_secs(3600),
        "1",
    );
    let stage = Stage::new("probe", 1);
    let book = book();
    let key = cache.key(&stage, &book.id, CacheScope::chapter(0), &());
    cache.put(&key, b"42".to_vec(), Duration::from_secs(3600));

    clock.advance(Duration::from_secs(3599));
    assert_eq!(cache.get(&key), Some(b"42".to_vec()));
    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.get(&key), None);

    cache.put(&key, b"43".to_vec(), Duration::from_secs(60));
    let other = cache.key(&stage, &book.id, CacheScope::chapter(1), &());
    cache.put(&other, b"44".to_vec(), Duration::from_secs(7200));
    clock.advance(Duration::from_secs(120));
    assert_eq!(cache.prune_expired(), 1);
    assert_eq!(cache.get(&other), Some(b"44".to_vec()));
}

#[test]
fn cancel_before_start_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let book = book();
    let analyzer = Analyzer::new(EngineConfig::default(), file_cache(dir.path()));
    let err = analyzer
        .analyze_with_cancel(&book, &AtomicBool::new(true))
        .unwrap_err();
    assert!(matches!(err, CardsError::Cancelled));
    assert_eq!(analyzer.cache().stats().writes, 0);

    analyzer.analyze(&book).unwrap();
    let resumed = Analyzer::new(EngineConfig::default(), file_cache(dir.path()));
    resumed.analyze(&book).unwrap();
    assert_eq!(resumed.cache().stats().misses, 0);
}

/// Raises the cancel flag as soon as the first entry is written.
struct CancelAfterWrite {
    inner: FileStore,
    cancel: Arc<AtomicBool>,
}

impl CacheStore for CancelAfterWrite {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        self.inner.get(key)
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        self.inner.put(key, entry)?;
        self.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.inner.remove(key)
    }

    fn remove_book(&self, book: &BookId) -> Result<usize> {
        self.inner.remove_book(book)
    }

    fn keys(&self) -> Result<Vec<CacheKey>> {
        self.inner.keys()
    }
}

#[test]
fn chapters_finished_before_cancel_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    let book = book();
    let cancel = Arc::new(AtomicBool::new(false));
    let store = CancelAfterWrite {
        inner: FileStore::open(dir.path()).unwrap(),
        cancel: cancel.clone(),
    };
    // one worker runs the chapter tasks in book order
    let config = EngineConfig {
        workers: 1,
        ..EngineConfig::default()
    };
    let interrupted = Analyzer::new(
        config.clone(),
        ResultCache::new(Arc::new(store), Arc::new(SystemClock), DEFAULT_TTL, "1"),
    );
    let err = interrupted.analyze_with_cancel(&book, &cancel).unwrap_err();
    assert!(matches!(err, CardsError::Cancelled));
    assert_eq!(interrupted.cache().stats().writes, 1);

    let keys = FileStore::open(dir.path()).unwrap().keys().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].stage, CONCEPTS_STAGE.name);
    assert_eq!(keys[0].scope, CacheScope::chapter(0));

    let resumed = Analyzer::new(config, file_cache(dir.path()));
    let analysis = resumed.analyze(&book).unwrap();
    let stats = resumed.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 3 * 2 + 2 - 1);

    let uncached = Analyzer::new(EngineConfig::default(), ResultCache::disabled());
    assert_eq!(analysis, uncached.analyze(&book).unwrap());
}
