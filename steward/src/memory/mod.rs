//! Vector-assisted memory: embeddings, vector store contract, tool index.
//!
//! The memory subsystem is shared (consulted by tool selection, the agent
//! loop, and the background indexer) but only this module mutates it. The
//! external vector database sits behind the [`VectorStore`] trait;
//! [`InMemoryVectorStore`] implements the same contract in-process.
//!
//! # Initialization barrier
//!
//! Components that depend on memory wait on a one-shot "initialized" signal
//! ([`MemoryHandle::wait_initialized`]); if it does not fire within the
//! configured timeout they skip indexing and continue degraded.
//!
//! # Main types
//!
//! - [`MemoryHandle`]: shared entry point: embedding with zero-vector
//!   rejection, the initialization barrier, and store access.
//! - [`Embedder`] / [`GatewayEmbedder`]: text → fixed-dimension vectors.
//! - [`VectorStore`] / [`InMemoryVectorStore`]: deterministic-id upsert and
//!   cosine top-k queries.
//! - [`ToolIndex`]: delete-then-upsert descriptor index + semantic search.

pub mod embedder;
pub mod gateway_embedder;
pub mod in_memory_store;
pub mod store;
pub mod tool_index;

pub use embedder::Embedder;
pub use gateway_embedder::GatewayEmbedder;
pub use in_memory_store::InMemoryVectorStore;
pub use store::{cosine_similarity, ScoredRecord, StoreError, VectorStore};
pub use tool_index::{ToolHit, ToolIndex, DEFAULT_SEARCH_LIMIT, SIMILARITY_FLOOR};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// Shared handle over the embedder and vector store with the one-shot
/// initialization barrier.
pub struct MemoryHandle {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    initialized_tx: watch::Sender<bool>,
    initialized_rx: watch::Receiver<bool>,
    barrier_timeout: Duration,
}

impl MemoryHandle {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        barrier_timeout: Duration,
    ) -> Self {
        let (initialized_tx, initialized_rx) = watch::channel(false);
        Self {
            store,
            embedder,
            initialized_tx,
            initialized_rx,
            barrier_timeout,
        }
    }

    /// Marks memory ready after verifying the embedder dimension against the
    /// store schema. A mismatch is a hard error: indexing into a store with
    /// a different dimension silently corrupts search results.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        if let Some(expected) = self.store.dimension() {
            let actual = self.embedder.dimension();
            if expected != actual {
                return Err(StoreError::DimensionMismatch { expected, actual });
            }
        }
        let _ = self.initialized_tx.send(true);
        info!(dimension = self.embedder.dimension(), "memory initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized_rx.borrow()
    }

    /// Waits for the initialized signal up to the barrier timeout. Returns
    /// false on timeout so callers can continue degraded.
    pub async fn wait_initialized(&self) -> bool {
        if self.is_initialized() {
            return true;
        }
        let mut rx = self.initialized_rx.clone();
        tokio::time::timeout(self.barrier_timeout, async {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    return false;
                }
            }
            true
        })
        .await
        .unwrap_or(false)
    }

    /// Embeds one text. A zero vector or an empty result is a failure.
    pub async fn embedding(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let mut vectors = self.embedder.embed(&[text]).await?;
        let vector = if vectors.is_empty() {
            return Err(StoreError::EmbeddingError("no vector returned".into()));
        } else {
            vectors.swap_remove(0)
        };
        if vector.is_empty() || vector.iter().all(|v| *v == 0.0) {
            return Err(StoreError::EmbeddingError("zero vector returned".into()));
        }
        Ok(vector)
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;

    use super::embedder::Embedder;
    use super::store::StoreError;

    /// Deterministic embedder: token-bucket vectors, so texts sharing words
    /// score high cosine similarity.
    pub struct KeywordEmbedder {
        dimension: usize,
    }

    impl KeywordEmbedder {
        pub fn new(dimension: usize) -> Self {
            Self { dimension }
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0f32; self.dimension];
                    for word in t.to_lowercase().split_whitespace() {
                        let mut slot: usize = 0;
                        for b in word.bytes() {
                            slot = (slot * 31 + b as usize) % self.dimension;
                        }
                        v[slot] += 1.0;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::KeywordEmbedder;
    use super::*;

    fn handle(timeout: Duration) -> MemoryHandle {
        MemoryHandle::new(
            Arc::new(InMemoryVectorStore::new(None)),
            Arc::new(KeywordEmbedder::new(16)),
            timeout,
        )
    }

    /// **Scenario**: The barrier resolves immediately once initialized.
    #[tokio::test]
    async fn barrier_resolves_after_initialize() {
        let m = handle(Duration::from_millis(50));
        assert!(!m.is_initialized());
        m.initialize().await.unwrap();
        assert!(m.wait_initialized().await);
    }

    /// **Scenario**: The barrier times out when initialize never fires.
    #[tokio::test]
    async fn barrier_times_out() {
        let m = handle(Duration::from_millis(20));
        assert!(!m.wait_initialized().await);
    }

    /// **Scenario**: A waiter parked on the barrier is released by initialize.
    #[tokio::test]
    async fn barrier_releases_parked_waiter() {
        let m = Arc::new(handle(Duration::from_secs(5)));
        let waiter = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.wait_initialized().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        m.initialize().await.unwrap();
        assert!(waiter.await.unwrap());
    }

    /// **Scenario**: Dimension mismatch between store schema and embedder is
    /// a hard initialization error.
    #[tokio::test]
    async fn dimension_mismatch_fails_initialize() {
        let m = MemoryHandle::new(
            Arc::new(InMemoryVectorStore::new(Some(1024))),
            Arc::new(KeywordEmbedder::new(16)),
            Duration::from_millis(10),
        );
        let err = m.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 1024, actual: 16 }
        ));
        assert!(!m.is_initialized());
    }

    /// **Scenario**: Embedding empty text yields a zero vector and fails.
    #[tokio::test]
    async fn zero_vector_is_failure() {
        let m = handle(Duration::from_millis(10));
        assert!(m.embedding("").await.is_err());
        assert!(m.embedding("hello world").await.is_ok());
    }
}
