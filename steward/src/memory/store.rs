//! Vector store contract and errors.
//!
//! The real vector database is an external authority; the core only assumes
//! deterministic-id upsert, delete by table, and bounded top-k cosine
//! queries with parameter binding. [`InMemoryVectorStore`](crate::memory::InMemoryVectorStore)
//! implements the same contract in-process for tests and standalone runs.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from embedding or store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding error: {0}")]
    EmbeddingError(String),
    #[error("store backend: {0}")]
    Backend(String),
    #[error("store not initialized")]
    NotInitialized,
    #[error("dimension mismatch: store expects {expected}, embedder produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// One scored record from a similarity query.
#[derive(Clone, Debug)]
pub struct ScoredRecord {
    pub id: String,
    pub fields: Value,
    pub score: f32,
}

/// Vector-capable store: deterministic-id upsert plus cosine top-k search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces the record with this id (delete-then-upsert
    /// semantics: equal ids never collide).
    async fn upsert(
        &self,
        table: &str,
        id: &str,
        fields: Value,
        embedding: Vec<f32>,
    ) -> Result<(), StoreError>;

    /// Removes every record in the table.
    async fn clear_table(&self, table: &str) -> Result<(), StoreError>;

    /// Top-k records by cosine similarity above `floor`, best first.
    async fn search(
        &self,
        table: &str,
        embedding: &[f32],
        floor: f32,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, StoreError>;

    /// Schema vector dimension, when the backend enforces one.
    fn dimension(&self) -> Option<usize>;
}

/// Computes cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Cosine similarity returns 0.0 for zero vectors.
    #[test]
    fn cosine_zero_vectors() {
        let a: Vec<f32> = vec![0.0, 0.0, 0.0];
        let b: Vec<f32> = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&b, &a), 0.0);
    }

    /// **Scenario**: Cosine similarity returns 1.0 for identical vectors.
    #[test]
    fn cosine_identical_vectors() {
        let a: Vec<f32> = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-6, "expected ~1.0, got {}", sim);
    }
}
