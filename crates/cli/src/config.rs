use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use conceptcards_core::EngineConfig;

pub const DEFAULT_CONFIG: &str = "concept-cards.toml";

pub const ENV_TOP_K: &str = "CONCEPT_CARDS_TOP_K";
pub const ENV_TOP_N: &str = "CONCEPT_CARDS_TOP_N";
pub const ENV_TTL_SECS: &str = "CONCEPT_CARDS_TTL_SECS";
pub const ENV_STAGE_VERSION: &str = "CONCEPT_CARDS_STAGE_VERSION";
pub const ENV_CACHE_DIR: &str = "CONCEPT_CARDS_CACHE_DIR";

/// File settings, then environment overrides, then validation. A missing
/// file means defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let mut config = read_config_file(path)?;
    apply_overrides(&mut config, |name| env::var(name).ok());
    config
        .validate()
        .map_err(|e| anyhow!("{}: {e}", path.display()))?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))
}

/// Unparseable numeric values are ignored and the file value kept.
pub fn apply_overrides<F>(config: &mut EngineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(top_k) = lookup(ENV_TOP_K).and_then(|v| v.trim().parse().ok()) {
        config.keywords.top_k = top_k;
    }
    if let Some(top_n) = lookup(ENV_TOP_N).and_then(|v| v.trim().parse().ok()) {
        config.cross_reference.top_n = top_n;
    }
    if let Some(ttl) = lookup(ENV_TTL_SECS).and_then(|v| v.trim().parse().ok()) {
        config.cache.ttl_secs = ttl;
    }
    if let Some(version) = lookup(ENV_STAGE_VERSION).filter(|v| !v.trim().is_empty()) {
        config.cache.stage_version = version.trim().to_string();
    }
    if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
        config.cache.dir = PathBuf::from(dir);
    }
}
