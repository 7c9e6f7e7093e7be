use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{FileStore, ResultCache, SystemClock};
use crate::error::{CardsError, Result};
use crate::keywords::KeywordConfig;
use crate::ranker::RankerConfig;
use crate::xref::CrossReferenceConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub ttl_secs: u64,
    /// Folded into every cache key; changing it orphans all stored results.
    pub stage_version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".concept-cards/cache"),
            ttl_secs: 7 * 24 * 60 * 60,
            stage_version: "1".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Opens the configured store. A directory that cannot be created leaves
    /// the run uncached instead of failing it.
    pub fn open(&self) -> ResultCache {
        if !self.enabled {
            return ResultCache::disabled();
        }
        match FileStore::open(&self.dir) {
            Ok(store) => ResultCache::new(
                Arc::new(store),
                Arc::new(SystemClock),
                self.ttl(),
                self.stage_version.clone(),
            ),
            Err(err) => {
                warn!(
                    "cache directory {} unavailable, continuing without cache: {err}",
                    self.dir.display()
                );
                ResultCache::disabled()
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads for per-chapter stages; 0 uses the global rayon pool.
    pub workers: usize,
    pub keywords: KeywordConfig,
    pub ranker: RankerConfig,
    pub cross_reference: CrossReferenceConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.keywords.top_k == 0 {
            return Err(invalid("keywords.top_k must be at least 1"));
        }
        if !(1..=3).contains(&self.keywords.max_ngram) {
            return Err(invalid("keywords.max_ngram must be between 1 and 3"));
        }
        if self.cross_reference.top_n == 0 {
            return Err(invalid("cross_reference.top_n must be at least 1"));
        }
        if self.ranker.k1 < 0.0 || !(0.0..=1.0).contains(&self.ranker.b) {
            return Err(invalid("ranker.k1 must be >= 0 and ranker.b within [0, 1]"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs must be positive"));
        }
        if self.cache.stage_version.trim().is_empty() {
            return Err(invalid("cache.stage_version must not be empty"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> CardsError {
    CardsError::InvalidConfig(message.to_string())
}
