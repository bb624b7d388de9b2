//! Gateway embeddings implementation of [`Embedder`].
//!
//! Posts `{model, input}` to `{base}/v1/embeddings` and reads
//! `{data: [{embedding: [...]}]}`. A zero vector is treated as a failure.
//! Results are cached by a hash of (model, text) so repeated tool-index and
//! query embeds do not re-hit the endpoint.
//!
//! **Interaction**: Implements [`Embedder`]; used by
//! [`MemoryHandle`](crate::memory::MemoryHandle) and the tool index.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::InMemoryCache;
use crate::memory::embedder::Embedder;
use crate::memory::store::StoreError;

const EMBEDDING_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Embeddings client bound to one gateway base URL and model.
pub struct GatewayEmbedder {
    http: reqwest::Client,
    base: String,
    model: String,
    dimension: usize,
    cache: InMemoryCache<String, Vec<f32>>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl GatewayEmbedder {
    /// Builds an embedder with a declared dimension. Use
    /// [`probe`](GatewayEmbedder::probe) to discover the real dimension at
    /// startup and catch store/schema mismatches early.
    pub fn new(
        base: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimension,
            cache: InMemoryCache::with_limits(10_000, Some(EMBEDDING_CACHE_TTL)),
        })
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    async fn fetch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        let body = json!({ "model": self.model, "input": texts });
        let resp = self
            .http
            .post(format!("{}/v1/embeddings", self.base))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::EmbeddingError(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::EmbeddingError(format!(
                "embeddings http {status}: {text}"
            )));
        }
        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::EmbeddingError(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(StoreError::EmbeddingError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for v in &vectors {
            if v.is_empty() || v.iter().all(|x| *x == 0.0) {
                return Err(StoreError::EmbeddingError("zero vector returned".into()));
            }
        }
        Ok(vectors)
    }

    /// Embeds a probe string and records the model's actual dimension.
    /// Call once at startup; the result feeds the store schema guard.
    pub async fn probe(&mut self) -> Result<usize, StoreError> {
        let vectors = self.fetch(&["dimension probe"]).await?;
        let dim = vectors[0].len();
        debug!(model = %self.model, dimension = dim, "embedding model probed");
        self.dimension = dim;
        Ok(dim)
    }
}

#[async_trait]
impl Embedder for GatewayEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        // Serve cached texts; fetch only the misses, preserving input order.
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<(usize, &str)> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.cache.get_sync(&self.cache_key(text)) {
                Some(v) => out.push(Some(v)),
                None => {
                    out.push(None);
                    misses.push((i, text));
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<&str> = misses.iter().map(|(_, t)| *t).collect();
            let fetched = self.fetch(&miss_texts).await?;
            for ((i, text), vector) in misses.into_iter().zip(fetched) {
                self.cache
                    .set_sync(self.cache_key(text), vector.clone(), None);
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
