//! Semantic index of tool descriptors.
//!
//! Each descriptor is embedded as `"{name}: {description}"` and stored under
//! a deterministic id (the tool name) in the `tool_definition` table. Before
//! re-indexing, the table is cleared to prevent id collisions between old and
//! new discoveries. Search embeds the query and returns the top tools by
//! cosine similarity above a floor.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use crate::memory::MemoryHandle;
use crate::tool::ToolDescriptor;

/// Table holding tool definitions in the vector store.
const TOOL_TABLE: &str = "tool_definition";
/// Minimum cosine similarity for a search hit.
pub const SIMILARITY_FLOOR: f32 = 0.4;
/// Default number of semantic hits fed to the classifier.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// One semantic search hit.
#[derive(Clone, Debug)]
pub struct ToolHit {
    pub name: String,
    pub description: String,
    pub score: f32,
}

/// Tool descriptor index over the shared [`MemoryHandle`].
pub struct ToolIndex {
    memory: Arc<MemoryHandle>,
}

impl ToolIndex {
    pub fn new(memory: Arc<MemoryHandle>) -> Self {
        Self { memory }
    }

    /// Embeds and upserts tool definitions. Waits for the memory
    /// initialization barrier; on timeout, skips indexing and continues
    /// degraded. Returns how many tools were indexed.
    pub async fn index_tools(&self, tools: &[ToolDescriptor]) -> usize {
        if tools.is_empty() {
            return 0;
        }
        if !self.memory.wait_initialized().await {
            warn!("timed out waiting for memory initialization; skipping tool indexing");
            return 0;
        }

        info!(count = tools.len(), "indexing tools into vector store");

        // Clear first: ids are deterministic by name, so stale discoveries
        // must not survive a re-index.
        if let Err(e) = self.memory.store().clear_table(TOOL_TABLE).await {
            warn!(error = %e, "failed to clear tool definitions");
        }

        let results = join_all(tools.iter().map(|tool| self.upsert_tool(tool))).await;
        let indexed = results.iter().filter(|ok| **ok).count();
        info!(indexed, total = tools.len(), "vector store indexing complete");
        indexed
    }

    async fn upsert_tool(&self, tool: &ToolDescriptor) -> bool {
        // Combine name and description for semantic richness.
        let text = format!("{}: {}", tool.name, tool.description);
        let vector = match self.memory.embedding(&text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "skipping index: embedding failed");
                return false;
            }
        };
        let fields = json!({
            "name": tool.name,
            "description": tool.description,
            "server": tool.server,
        });
        match self
            .memory
            .store()
            .upsert(TOOL_TABLE, &tool.name, fields, vector)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "failed to upsert tool");
                false
            }
        }
    }

    /// Semantic search for tools relevant to the query. Degraded mode (memory
    /// not initialized, embedding failure) returns an empty list.
    pub async fn search_tools(&self, query: &str, limit: usize) -> Vec<ToolHit> {
        if !self.memory.is_initialized() {
            return Vec::new();
        }
        let vector = match self.memory.embedding(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "tool search embedding failed");
                return Vec::new();
            }
        };
        match self
            .memory
            .store()
            .search(TOOL_TABLE, &vector, SIMILARITY_FLOOR, limit)
            .await
        {
            Ok(records) => records
                .into_iter()
                .map(|r| ToolHit {
                    name: r
                        .fields
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or(&r.id)
                        .to_string(),
                    description: r
                        .fields
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    score: r.score,
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "vector tool search failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::in_memory_store::InMemoryVectorStore;
    use crate::memory::test_support::KeywordEmbedder;
    use std::time::Duration;

    fn descriptor(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: description.into(),
            input_schema: json!({"type": "object"}),
            server: "test".into(),
            cacheable: false,
            side_effect: false,
        }
    }

    async fn ready_index() -> ToolIndex {
        let memory = Arc::new(MemoryHandle::new(
            Arc::new(InMemoryVectorStore::new(None)),
            Arc::new(KeywordEmbedder::new(32)),
            Duration::from_millis(100),
        ));
        memory.initialize().await.unwrap();
        ToolIndex::new(memory)
    }

    /// **Scenario**: Indexing stores every tool; search finds the relevant one.
    #[tokio::test]
    async fn index_then_search() {
        let index = ready_index().await;
        let tools = vec![
            descriptor("web_search", "search the web for current events"),
            descriptor("read_text", "read a text file from the workspace"),
        ];
        assert_eq!(index.index_tools(&tools).await, 2);

        let hits = index.search_tools("search the web for current events", 5).await;
        assert!(!hits.is_empty());
        assert_eq!(hits[0].name, "web_search");
    }

    /// **Scenario**: Re-indexing replaces old definitions instead of piling up.
    #[tokio::test]
    async fn reindex_replaces() {
        let index = ready_index().await;
        index.index_tools(&[descriptor("old_tool", "obsolete")]).await;
        index
            .index_tools(&[descriptor("new_tool", "replacement tool entry")])
            .await;

        let hits = index.search_tools("replacement tool entry", 5).await;
        assert!(hits.iter().all(|h| h.name != "old_tool"));
    }

    /// **Scenario**: Search before initialization returns empty (degraded).
    #[tokio::test]
    async fn uninitialized_search_is_empty() {
        let memory = Arc::new(MemoryHandle::new(
            Arc::new(InMemoryVectorStore::new(None)),
            Arc::new(KeywordEmbedder::new(32)),
            Duration::from_millis(10),
        ));
        let index = ToolIndex::new(memory);
        assert!(index.search_tools("anything", 5).await.is_empty());
    }

    /// **Scenario**: Indexing without initialization times out on the barrier
    /// and indexes nothing.
    #[tokio::test]
    async fn index_without_initialization_skips() {
        let memory = Arc::new(MemoryHandle::new(
            Arc::new(InMemoryVectorStore::new(None)),
            Arc::new(KeywordEmbedder::new(32)),
            Duration::from_millis(10),
        ));
        let index = ToolIndex::new(memory);
        assert_eq!(index.index_tools(&[descriptor("t", "d")]).await, 0);
    }
}
