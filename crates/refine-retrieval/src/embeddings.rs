//! Embedding services: an `OpenAI`-compatible HTTP client, used by default,
//! and a local feature-hashing embedder for tests and offline runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use refine_settings::{EmbeddingBackend, RetrievalSettings};

use crate::errors::{Result, RetrievalError};
use crate::normalize::l2_normalize;

/// Embeds text into L2-normalised vectors of a fixed dimension.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::EmbeddingRejected("empty result".into()))
    }

    fn dimensions(&self) -> usize;

    fn name(&self) -> &str;
}

/// Bag-of-words feature hashing: each lowercased token (and each adjacent
/// token pair) is hashed with SHA-256 to a bucket and a sign. Texts that
/// share vocabulary land close together, which is enough for ranking
/// segments of a single document.
pub struct HashedEmbeddingService {
    dims: usize,
}

impl HashedEmbeddingService {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn bump(&self, v: &mut [f32], feature: &str, weight: f32) {
        let hash = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&hash[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
        let sign = if hash[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        for token in &tokens {
            self.bump(&mut v, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.bump(&mut v, &format!("{} {}", pair[0], pair[1]), 0.5);
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingService for HashedEmbeddingService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "hashed"
    }
}

const EMBED_BATCH: usize = 64;

/// Client for an `OpenAI`-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbeddingService {
    client: Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    dims: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingService {
    pub fn new(
        api_key: SecretString,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dims: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.into(),
            model: model.into(),
            dims,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
            "dimensions": self.dims,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = format!("status {status}: {text}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                RetrievalError::Embedding(message)
            } else {
                RetrievalError::EmbeddingRejected(message)
            });
        }
        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| RetrievalError::EmbeddingRejected(format!("bad response: {e}")))?;
        if parsed.data.len() != batch.len() {
            return Err(RetrievalError::EmbeddingRejected(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed
            .data
            .into_iter()
            .map(|d| {
                let mut v = d.embedding;
                l2_normalize(&mut v);
                v
            })
            .collect())
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            out.extend(self.embed_batch(batch).await?);
        }
        debug!(count = out.len(), model = %self.model, "texts embedded");
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Build the configured embedding service. The HTTP backend needs a key.
pub fn embedding_service(
    settings: &RetrievalSettings,
    api_key: Option<SecretString>,
) -> Result<Arc<dyn EmbeddingService>> {
    match settings.embedding {
        EmbeddingBackend::Hashed => {
            Ok(Arc::new(HashedEmbeddingService::new(settings.embedding_dimensions)))
        }
        EmbeddingBackend::Openai => {
            let key = api_key.ok_or_else(|| {
                RetrievalError::InvalidConfig("the openai embedding backend needs an API key".into())
            })?;
            Ok(Arc::new(OpenAiEmbeddingService::new(
                key,
                settings.embedding_endpoint.clone(),
                settings.embedding_model.clone(),
                settings.embedding_dimensions,
                Duration::from_secs(settings.fetch_timeout_secs),
            )?))
        }
    }
}
