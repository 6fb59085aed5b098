//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial and missing fields keep their compiled default.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "engine": { "maxRevisions": 4 },
///   "retrieval": { "topK": 8 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefineSettings {
    /// Settings schema version.
    pub version: String,
    /// Pipeline bounds and thresholds.
    pub engine: EngineSettings,
    /// Chunking, embedding and evidence retrieval.
    pub retrieval: RetrievalSettings,
    /// Retry and circuit breaker configuration for generation calls.
    pub retry: RetrySettings,
    /// Generation model parameters.
    pub llm: LlmSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Durable storage.
    pub store: StoreSettings,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            engine: EngineSettings::default(),
            retrieval: RetrievalSettings::default(),
            retry: RetrySettings::default(),
            llm: LlmSettings::default(),
            logging: LoggingSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl RefineSettings {
    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let retrieval = &self.retrieval;
        if retrieval.chunk_size == 0 {
            return Err(SettingsError::invalid("chunkSize", "must be positive"));
        }
        if retrieval.chunk_overlap >= retrieval.chunk_size {
            return Err(SettingsError::invalid(
                "chunkOverlap",
                format!("{} must be below chunkSize {}", retrieval.chunk_overlap, retrieval.chunk_size),
            ));
        }
        if retrieval.top_k == 0 {
            return Err(SettingsError::invalid("topK", "must be positive"));
        }
        if !(1..=10).contains(&self.engine.minimum_score) {
            return Err(SettingsError::invalid(
                "minimumScore",
                format!("{} is outside 1..=10", self.engine.minimum_score),
            ));
        }
        if self.engine.max_judgment_attempts == 0 {
            return Err(SettingsError::invalid("maxJudgmentAttempts", "must be positive"));
        }
        Ok(())
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Revisions allowed per subsection before it is escalated.
    pub max_revisions: u32,
    /// Evidence lookup rounds allowed per drafting or verification call.
    pub max_lookup_rounds: u32,
    /// Attempts for a structured judgment before the step fails.
    pub max_judgment_attempts: u32,
    /// Content review pass threshold (1-10).
    pub minimum_score: u8,
    /// Wall-clock bound on each external call.
    pub step_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_revisions: 3,
            max_lookup_rounds: 5,
            max_judgment_attempts: 3,
            minimum_score: 7,
            step_timeout_secs: 300,
        }
    }
}

// ── Retrieval ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local feature-hashing embedder. Needs no network access, so tests and
    /// offline runs use it; its rankings only track shared vocabulary.
    Hashed,
    /// `OpenAI`-compatible `/v1/embeddings` endpoint. The default.
    Openai,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievalSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embedding: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_endpoint: String,
    pub fetch_timeout_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 200,
            top_k: 5,
            embedding: EmbeddingBackend::Openai,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 384,
            embedding_endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            fetch_timeout_secs: 60,
        }
    }
}

// ── Retry ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) applied to retry delays.
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown_secs: 60,
        }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Messages endpoint override, e.g. for a proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 8192,
            temperature: None,
            api_url: None,
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"refine_retrieval": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub database_path: PathBuf,
    /// Keep per-document vector collections after the session completes.
    pub retain_vector_indices: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_path: refine_home().join("refine.db"),
            retain_vector_indices: true,
        }
    }
}

/// `~/.refine`, falling back to `/tmp/.refine` without a home directory.
pub fn refine_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".refine")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
