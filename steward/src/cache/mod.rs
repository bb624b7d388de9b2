//! Cache system for tool results, embeddings, and other expensive operations.
//!
//! Provides a generic key-value [`Cache`] trait with an LRU + TTL in-memory
//! implementation, and a [`ToolCache`] policy layer that decides which tool
//! calls may be memoized at all.

mod error;
mod in_memory;
mod tool_cache;

pub use error::CacheError;
pub use in_memory::{CacheStats, InMemoryCache};
pub use tool_cache::{canonical_json, is_cacheable, is_side_effect, ToolCache};

use async_trait::async_trait;
use std::time::Duration;

/// Cache trait for key-value storage with optional TTL.
#[async_trait]
pub trait Cache<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Clone + Send + Sync,
{
    /// Get a value from the cache by key.
    ///
    /// Returns `None` if the key is not found or has expired.
    async fn get(&self, key: &K) -> Option<V>;

    /// Set a value in the cache with an optional TTL.
    ///
    /// If `ttl` is `None`, the value will not expire.
    async fn set(&self, key: K, value: V, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Delete a value from the cache.
    async fn delete(&self, key: &K) -> Result<(), CacheError>;

    /// Clear all entries from the cache.
    async fn clear(&self) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_trait_object() {
        let cache: Box<dyn Cache<String, String>> = Box::new(InMemoryCache::new());
        cache
            .set("key".to_string(), "value".to_string(), None)
            .await
            .unwrap();
        assert_eq!(
            cache.get(&"key".to_string()).await,
            Some("value".to_string())
        );
    }
}
