//! Per-tool cacheability policy and the memoization layer for tool results.
//!
//! Two classifications drive the engine:
//!
//! - **Cacheable**: read-only, deterministic calls (filesystem reads,
//!   list/metadata queries, memory lookups). Results are memoized under
//!   `(tool_name, canonical_json(arguments))`.
//! - **Side-effect**: calls that mutate state. Never cached, and they force
//!   sequential execution inside a batch (see `exec::resolver`).
//!
//! Names outside both static sets fall back to namespace heuristics:
//! read-only namespaces are cacheable, everything else is not.

use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{CacheStats, InMemoryCache};

/// Tools that are safe to cache (deterministic operations).
const CACHEABLE_TOOLS: &[&str] = &[
    "list_dir",
    "path_info",
    "read_text",
    "find_files",
    "filesystem_read_file",
    "filesystem_list_directory",
    "filesystem_get_file_info",
    "memory_get_fact",
    "memory_search_facts",
];

/// Tools that must never be cached (time- or world-dependent).
const UNCACHEABLE_TOOLS: &[&str] = &[
    "current_time",
    "time_current_time",
    "web_search",
    "web_fetch",
];

/// Name prefixes of read-only namespaces; the cacheable default.
const READ_ONLY_PREFIXES: &[&str] = &["filesystem_", "memory_", "list_", "read_", "get_", "find_"];

/// Tools that mutate state and must execute sequentially.
const SIDE_EFFECT_TOOLS: &[&str] = &[
    "write_text",
    "append_text",
    "make_dir",
    "remove_file",
    "move_path",
    "copy_path",
    "filesystem_write_file",
    "filesystem_create_directory",
    "filesystem_move_file",
    "memory_store_fact",
    "memory_update_fact",
];

/// Name prefixes that imply a state change.
const SIDE_EFFECT_PREFIXES: &[&str] = &[
    "write_", "append_", "create_", "make_", "remove_", "delete_", "move_", "copy_", "store_",
    "update_", "install_", "add_",
];

/// Whether results of this tool may be memoized.
pub fn is_cacheable(tool_name: &str) -> bool {
    if UNCACHEABLE_TOOLS.contains(&tool_name) || is_side_effect(tool_name) {
        return false;
    }
    if CACHEABLE_TOOLS.contains(&tool_name) {
        return true;
    }
    READ_ONLY_PREFIXES.iter().any(|p| tool_name.starts_with(p))
}

/// Whether this tool mutates state.
pub fn is_side_effect(tool_name: &str) -> bool {
    SIDE_EFFECT_TOOLS.contains(&tool_name)
        || SIDE_EFFECT_PREFIXES.iter().any(|p| tool_name.starts_with(p))
}

/// Canonical compact JSON with recursively sorted object keys, so equal
/// argument maps produce equal cache keys regardless of field order.
pub fn canonical_json(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: std::collections::BTreeMap<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

/// Memoization layer for successful tool results.
///
/// **Interaction**: `mcp::McpRegistry` consults this before dispatching a
/// cacheable call and fills it after a success. Failures are never stored.
pub struct ToolCache {
    inner: InMemoryCache<String, Value>,
    enabled: bool,
    ttl: Duration,
}

const NAMESPACE: &str = "mcp_tools";

impl ToolCache {
    pub fn new(enabled: bool, ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: InMemoryCache::with_limits(max_entries, Some(ttl)),
            enabled,
            ttl,
        }
    }

    fn key(tool_name: &str, arguments: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tool_name.as_bytes());
        hasher.update(b":");
        hasher.update(canonical_json(arguments).as_bytes());
        let digest = hasher.finalize();
        format!("{NAMESPACE}:{tool_name}:{digest:x}")
    }

    /// Cached result for this call, when present and fresh.
    pub fn get(&self, tool_name: &str, arguments: &Value) -> Option<Value> {
        if !self.enabled || !is_cacheable(tool_name) {
            return None;
        }
        self.inner.get_sync(&Self::key(tool_name, arguments))
    }

    /// Stores a successful result. No-op for uncacheable tools.
    pub fn put(&self, tool_name: &str, arguments: &Value, result: Value) {
        if !self.enabled || !is_cacheable(tool_name) {
            return;
        }
        self.inner
            .set_sync(Self::key(tool_name, arguments), result, Some(self.ttl));
    }

    /// Removes entries for one tool, or for a single call when `arguments`
    /// is given.
    pub fn invalidate(&self, tool_name: &str, arguments: Option<&Value>) -> usize {
        match arguments {
            Some(args) => self.inner.remove_prefix(&Self::key(tool_name, args)),
            None => self.inner.remove_prefix(&format!("{NAMESPACE}:{tool_name}:")),
        }
    }

    /// Drops expired entries; called by the background maintenance task.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
