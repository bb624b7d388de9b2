//! In-memory vector store for semantic search. Not persistent.

use dashmap::DashMap;
use serde_json::Value;

use async_trait::async_trait;

use crate::memory::store::{cosine_similarity, ScoredRecord, StoreError, VectorStore};

/// Pure in-memory [`VectorStore`].
///
/// **Interaction**: Used as `Arc<dyn VectorStore>` by the tool index when no
/// external store is configured, and by tests.
///
/// **In-Memory**: All data stored in memory, lost when the store is dropped.
pub struct InMemoryVectorStore {
    records: DashMap<String, StoredRecord>,
    dimension: Option<usize>,
}

struct StoredRecord {
    table: String,
    id: String,
    fields: Value,
    embedding: Vec<f32>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: Option<usize>) -> Self {
        Self {
            records: DashMap::new(),
            dimension,
        }
    }

    fn key(table: &str, id: &str) -> String {
        format!("{table}:{id}")
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        table: &str,
        id: &str,
        fields: Value,
        embedding: Vec<f32>,
    ) -> Result<(), StoreError> {
        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
        self.records.insert(
            Self::key(table, id),
            StoredRecord {
                table: table.to_string(),
                id: id.to_string(),
                fields,
                embedding,
            },
        );
        Ok(())
    }

    async fn clear_table(&self, table: &str) -> Result<(), StoreError> {
        self.records.retain(|_, r| r.table != table);
        Ok(())
    }

    async fn search(
        &self,
        table: &str,
        embedding: &[f32],
        floor: f32,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        let mut hits: Vec<ScoredRecord> = self
            .records
            .iter()
            .filter(|r| r.table == table)
            .filter_map(|r| {
                let score = cosine_similarity(embedding, &r.embedding);
                if score > floor {
                    Some(ScoredRecord {
                        id: r.id.clone(),
                        fields: r.fields.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vector(seed: &str, dim: usize) -> Vec<f32> {
        let mut v = vec![0f32; dim];
        for (i, b) in seed.bytes().enumerate() {
            v[i % dim] += b as f32 / 256.0;
        }
        v
    }

    /// **Scenario**: Upsert with the same id replaces, never duplicates.
    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let store = InMemoryVectorStore::new(None);
        store
            .upsert("tools", "read_text", json!({"v": 1}), vector("a", 8))
            .await
            .unwrap();
        store
            .upsert("tools", "read_text", json!({"v": 2}), vector("a", 8))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let hits = store.search("tools", &vector("a", 8), 0.0, 10).await.unwrap();
        assert_eq!(hits[0].fields, json!({"v": 2}));
    }

    /// **Scenario**: Search returns results above the floor, best first,
    /// bounded by limit, scoped to the table.
    #[tokio::test]
    async fn search_ranks_and_scopes() {
        let store = InMemoryVectorStore::new(None);
        store
            .upsert("tools", "match", json!({}), vector("hello world", 16))
            .await
            .unwrap();
        store
            .upsert("tools", "other", json!({}), vector("zzzzzz", 16))
            .await
            .unwrap();
        store
            .upsert("facts", "noise", json!({}), vector("hello world", 16))
            .await
            .unwrap();

        let hits = store
            .search("tools", &vector("hello world", 16), 0.9, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "match");
    }

    /// **Scenario**: clear_table removes one table's records only.
    #[tokio::test]
    async fn clear_table_scoped() {
        let store = InMemoryVectorStore::new(None);
        store.upsert("tools", "a", json!({}), vector("a", 4)).await.unwrap();
        store.upsert("facts", "b", json!({}), vector("b", 4)).await.unwrap();
        store.clear_table("tools").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    /// **Scenario**: A store with a fixed schema dimension rejects
    /// mismatched vectors.
    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new(Some(8));
        let err = store
            .upsert("tools", "a", json!({}), vector("a", 4))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 8, actual: 4 }));
    }
}
