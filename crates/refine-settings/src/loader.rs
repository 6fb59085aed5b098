//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RefineSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `REFINE_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{refine_home, EmbeddingBackend, RefineSettings};

/// Resolve the default settings file path (`~/.refine/settings.json`).
pub fn settings_path() -> PathBuf {
    refine_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RefineSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RefineSettings> {
    let defaults = serde_json::to_value(RefineSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RefineSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides.
pub fn apply_env_overrides(settings: &mut RefineSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Invalid values are logged and
/// ignored so a bad variable never masks the file/default value.
pub fn apply_overrides_from<F>(settings: &mut RefineSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("REFINE_MAX_REVISIONS", 1, 20) {
        settings.engine.max_revisions = v as u32;
    }
    if let Some(v) = env.u64_in("REFINE_MAX_LOOKUP_ROUNDS", 0, 10) {
        settings.engine.max_lookup_rounds = v as u32;
    }
    if let Some(v) = env.u64_in("REFINE_MINIMUM_SCORE", 1, 10) {
        settings.engine.minimum_score = v as u8;
    }
    if let Some(v) = env.u64_in("REFINE_STEP_TIMEOUT_SECS", 1, 3600) {
        settings.engine.step_timeout_secs = v;
    }

    // ── Retrieval ───────────────────────────────────────────────────
    if let Some(v) = env.u64_in("REFINE_TOP_K", 1, 50) {
        settings.retrieval.top_k = v as usize;
    }
    if let Some(v) = env.u64_in("REFINE_CHUNK_SIZE", 100, 10_000) {
        settings.retrieval.chunk_size = v as usize;
    }
    if let Some(v) = env.u64_in("REFINE_CHUNK_OVERLAP", 0, 5_000) {
        settings.retrieval.chunk_overlap = v as usize;
    }
    if let Some(v) = env.string("REFINE_EMBEDDING") {
        match v.as_str() {
            "hashed" => settings.retrieval.embedding = EmbeddingBackend::Hashed,
            "openai" => settings.retrieval.embedding = EmbeddingBackend::Openai,
            other => warn!(key = "REFINE_EMBEDDING", value = %other, "unknown embedding backend, ignoring"),
        }
    }

    // ── LLM / store / logging ───────────────────────────────────────
    if let Some(v) = env.string("REFINE_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = env.string("REFINE_DB_PATH") {
        settings.store.database_path = PathBuf::from(v);
    }
    if let Some(v) = env.string("REFINE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("REFINE_LOG_JSON") {
        settings.logging.json = v;
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = val.trim().parse::<u64>().ok().filter(|v| (min..=max).contains(v));
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
