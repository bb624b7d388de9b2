//! Persistent cache for intent classifications.
//!
//! Keyed by a hash of (normalized query, classifier model); entries expire
//! after 24 hours and the file is capped at 10 000 entries (oldest dropped).
//! The file is JSON keyed by hash, written atomically; a malformed file
//! loads as empty.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const CACHE_FILE: &str = "maitre_d_cache.json";
/// Entry TTL: 24 hours.
pub const INTENT_TTL_SECS: f64 = 86_400.0;
/// Size cap; oldest entries are dropped past this.
pub const MAX_ENTRIES: usize = 10_000;

/// Classifier output: target servers, complexity, optional auto-execute
/// suggestions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IntentClassification {
    #[serde(default)]
    pub target_servers: Vec<String>,
    #[serde(default = "default_complexity")]
    pub complexity: String,
    #[serde(default)]
    pub auto_execute: Option<Vec<AutoExecute>>,
}

fn default_complexity() -> String {
    "low".to_string()
}

impl IntentClassification {
    /// The safe fallback: no narrowing, the agent loop uses the full menu.
    pub fn empty() -> Self {
        Self {
            target_servers: Vec::new(),
            complexity: default_complexity(),
            auto_execute: None,
        }
    }
}

/// One auto-execute suggestion: a tool name plus free-form arguments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutoExecute {
    pub tool: String,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredEntry {
    timestamp: f64,
    result: IntentClassification,
    query_hash: String,
}

/// Cache key: hash of `"{normalized_query}::{model}"`.
pub fn cache_key(normalized_query: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_query.as_bytes());
    hasher.update(b"::");
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Statistics for the stats endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct IntentCacheStats {
    pub total_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// File-backed classification cache.
pub struct IntentCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, StoredEntry>>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl IntentCache {
    /// Cache under `<dir>/maitre_d_cache.json`, loading any existing file.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let path = dir.into().join(CACHE_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!(error = %e, "intent cache malformed; starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
            hits: Default::default(),
            misses: Default::default(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached classification, when present and inside the 24 h TTL. Expired
    /// entries are removed on access.
    pub fn get(&self, key: &str) -> Option<IntentClassification> {
        let now = now_secs();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if now - entry.timestamp < INTENT_TTL_SECS => {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                debug!(key = %&key[..16.min(key.len())], "intent cache hit");
                Some(entry.result.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a classification and persists the file.
    pub fn put(&self, key: &str, result: IntentClassification) {
        {
            let mut entries = self.lock();
            entries.insert(
                key.to_string(),
                StoredEntry {
                    timestamp: now_secs(),
                    result,
                    query_hash: key.to_string(),
                },
            );
            Self::enforce_cap(&mut entries);
        }
        self.persist();
    }

    /// Drops expired entries; returns how many were removed. Called by the
    /// background pruning task.
    pub fn prune_expired(&self) -> usize {
        let now = now_secs();
        let removed = {
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|_, e| now - e.timestamp < INTENT_TTL_SECS);
            before - entries.len()
        };
        if removed > 0 {
            self.persist();
        }
        removed
    }

    fn enforce_cap(entries: &mut HashMap<String, StoredEntry>) {
        if entries.len() <= MAX_ENTRIES {
            return;
        }
        let mut by_age: Vec<(String, f64)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.timestamp))
            .collect();
        by_age.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let excess = entries.len() - MAX_ENTRIES;
        for (key, _) in by_age.into_iter().take(excess) {
            entries.remove(&key);
        }
    }

    fn persist(&self) {
        let snapshot = self.lock().clone();
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = match serde_json::to_vec(&snapshot) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "intent cache serialization failed");
                return;
            }
        };
        if let Err(e) = std::fs::write(&tmp, body).and_then(|_| std::fs::rename(&tmp, &self.path)) {
            warn!(error = %e, "failed to persist intent cache");
        }
    }

    pub fn stats(&self) -> IntentCacheStats {
        let hits = self.hits.load(std::sync::atomic::Ordering::Relaxed);
        let misses = self.misses.load(std::sync::atomic::Ordering::Relaxed);
        let total = hits + misses;
        IntentCacheStats {
            total_entries: self.lock().len(),
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Put-then-get within TTL returns the classification.
    #[test]
    fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntentCache::open(dir.path());
        let key = cache_key("list files in", "intent-model");
        cache.put(
            &key,
            IntentClassification {
                target_servers: vec!["filesystem".into()],
                complexity: "low".into(),
                auto_execute: None,
            },
        );
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.target_servers, vec!["filesystem"]);
        assert_eq!(cache.stats().hits, 1);
    }

    /// **Scenario**: The cache file survives a reopen.
    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = cache_key("hello", "m");
        {
            let cache = IntentCache::open(dir.path());
            cache.put(&key, IntentClassification::empty());
        }
        let reopened = IntentCache::open(dir.path());
        assert!(reopened.get(&key).is_some());
    }

    /// **Scenario**: Different models produce different cache keys.
    #[test]
    fn key_varies_by_model() {
        assert_ne!(cache_key("q", "model-a"), cache_key("q", "model-b"));
    }

    /// **Scenario**: Expired entries are pruned.
    #[test]
    fn prune_drops_expired() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IntentCache::open(dir.path());
        cache.put("fresh", IntentClassification::empty());
        {
            let mut entries = cache.lock();
            entries.insert(
                "stale".into(),
                StoredEntry {
                    timestamp: now_secs() - INTENT_TTL_SECS - 1.0,
                    result: IntentClassification::empty(),
                    query_hash: "stale".into(),
                },
            );
        }
        assert_eq!(cache.prune_expired(), 1);
        assert!(cache.get("fresh").is_some());
    }

    /// **Scenario**: The cap drops the oldest entries first.
    #[test]
    fn cap_drops_oldest() {
        let mut entries: HashMap<String, StoredEntry> = HashMap::new();
        for i in 0..(MAX_ENTRIES + 5) {
            entries.insert(
                format!("k{i}"),
                StoredEntry {
                    timestamp: i as f64,
                    result: IntentClassification::empty(),
                    query_hash: format!("k{i}"),
                },
            );
        }
        IntentCache::enforce_cap(&mut entries);
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert!(!entries.contains_key("k0"));
        assert!(entries.contains_key(&format!("k{}", MAX_ENTRIES + 4)));
    }

    /// **Scenario**: A corrupt cache file loads as empty.
    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE), "{broken").unwrap();
        let cache = IntentCache::open(dir.path());
        assert_eq!(cache.stats().total_entries, 0);
    }
}
