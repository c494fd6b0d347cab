//! Embedding backends.
//!
//! All embedding traffic goes through the [`Embedder`] trait so the
//! pipeline can swap the deterministic local mode for the remote
//! service without touching retrieval logic. Vectors are
//! unit-normalized on the way out, so cosine similarity downstream
//! reduces to a dot product.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{OrchestratorError, Result};

/// Embedding vector type (matches the knowledge-store dimension).
pub type Embedding = Vec<f32>;

/// Dimension of every vector produced or consumed by this crate.
pub const EMBEDDING_DIM: usize = 384;

/// Trait for text embedding services.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts: one unit-normalized vector per input,
    /// order preserved.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Model identifier, for logging and storage.
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

/// Shared embedder handle used across concurrent requests.
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Scale a vector to unit length. Zero vectors are returned as-is so
/// a degenerate input cannot poison a whole batch.
pub fn normalize(mut vec: Embedding) -> Embedding {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vec {
            *x /= norm;
        }
    }
    vec
}

/// Deterministic local embedder.
///
/// Derives a vector from the SHA-256 of the text, expanded over
/// counter blocks. Carries no semantic meaning; it exists so SIM mode
/// and tests get referentially stable vectors (same text, same
/// vector) without a network dependency.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|text| normalize(hash_vector(text, self.dimension)))
            .collect())
    }

    fn model_name(&self) -> &str {
        "hash-sim"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn hash_vector(text: &str, dimension: usize) -> Embedding {
    let mut out = Vec::with_capacity(dimension);
    let mut block: u32 = 0;
    while out.len() < dimension {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(block.to_le_bytes());
        let digest = hasher.finalize();
        for byte in digest.iter() {
            if out.len() == dimension {
                break;
            }
            // Map each byte into [-1.0, 1.0].
            out.push(*byte as f32 / 127.5 - 1.0);
        }
        block += 1;
    }
    out
}

/// Remote embedding service client (OpenAI-compatible wire format).
pub struct RemoteEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

const EMBED_MAX_ATTEMPTS: u32 = 3;
const EMBED_BACKOFF: Duration = Duration::from_millis(250);

impl RemoteEmbedder {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| OrchestratorError::UpstreamUnavailable {
                service: "embedding",
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: settings.emb_url.clone(),
            model: settings.emb_model.clone(),
            timeout: settings.request_timeout,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|e| OrchestratorError::from_reqwest("embedding", self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::UpstreamUnavailable {
                service: "embedding",
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::UpstreamUnavailable {
                service: "embedding",
                reason: format!("malformed response: {e}"),
            })?;

        if parsed.data.len() != texts.len() {
            return Err(OrchestratorError::UpstreamUnavailable {
                service: "embedding",
                reason: format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        // Re-sort by index so output order matches input order.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| normalize(d.embedding)).collect())
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Embedding reads are idempotent, so a bounded retry with
        // backoff is safe here; the generation call never retries.
        let mut attempt = 1;
        loop {
            match self.request(texts).await {
                Ok(vectors) => {
                    debug!(count = vectors.len(), model = %self.model, "embedded batch");
                    return Ok(vectors);
                }
                Err(err) if err.is_retriable() && attempt < EMBED_MAX_ATTEMPTS => {
                    warn!(attempt, %err, "embedding request failed, retrying");
                    tokio::time::sleep(EMBED_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new();
        let texts = vec!["groceries cash back".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hash_embedder_output_is_unit_normalized() {
        let embedder = HashEmbedder::new();
        let texts = vec!["travel rewards".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), EMBEDDING_DIM);
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn hash_embedder_preserves_batch_order() {
        let embedder = HashEmbedder::new();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed(&texts).await.unwrap();
        let alpha = embedder.embed(&texts[..1].to_vec()).await.unwrap();
        assert_eq!(batch[0], alpha[0]);
        assert_ne!(batch[0], batch[1]);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let zeros = vec![0.0f32; 4];
        assert_eq!(normalize(zeros.clone()), zeros);
    }
}
