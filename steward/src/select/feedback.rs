//! Feedback store: the learning loop behind tool selection.
//!
//! Every successful tool call records (normalized query, server). Later
//! queries score past records by keyword overlap, coverage, and fuzzy
//! similarity, weighted by exponential recency decay, and the top servers
//! are fed to the classifier as hints, never as the final answer.
//!
//! Persistence is a single JSON array file. The read-modify-write cycle is
//! serialized by an async mutex; the write goes to a temp file, is fsynced,
//! and renamed into place so readers never observe a partial file. Malformed
//! content falls back to an empty record set.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const FEEDBACK_FILE: &str = "maitre_d_feedback.json";
/// Hard cap on stored records; on overflow the most recent 80% are kept.
pub const MAX_RECORDS: usize = 10_000;
/// Weight of the fuzzy similarity term in the hybrid score.
const FUZZY_WEIGHT: f64 = 0.4;
/// Recency decay half-life.
const RECENCY_HALF_LIFE_DAYS: f64 = 3.0;
/// Core servers are always available; recording them teaches nothing.
const CORE_SERVERS: &[&str] = &["project-memory", "location", "thinking", "system-control"];

/// One recorded success.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub query: String,
    pub server: String,
    /// Wall-clock seconds for cross-process comparability.
    pub timestamp: f64,
    pub query_hash: String,
}

/// File-backed feedback store.
pub struct FeedbackStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FeedbackStore {
    /// Store under `<dir>/maitre_d_feedback.json`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(FEEDBACK_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Loads all records; malformed or missing files are an empty set.
    pub async fn load(&self) -> Vec<FeedbackRecord> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, "feedback file malformed; starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    /// Records a successful (query, server) pair. Short queries and core
    /// servers are skipped; duplicates (same query hash and server) are not
    /// re-appended.
    pub async fn record_success(&self, query: &str, server: &str) {
        if query.is_empty() || server.is_empty() || CORE_SERVERS.contains(&server) {
            return;
        }
        let normalized = query.to_lowercase().trim().to_string();
        if normalized.len() < 3 {
            return;
        }

        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await;

        if records.len() >= MAX_RECORDS {
            let keep_from = records.len() - (MAX_RECORDS * 8 / 10);
            records.drain(..keep_from);
            debug!(kept = records.len(), "trimmed feedback records");
        }

        let record = FeedbackRecord {
            query_hash: query_hash(&normalized),
            query: normalized.clone(),
            server: server.to_string(),
            timestamp: now_secs(),
        };

        let duplicate = records
            .iter()
            .any(|r| r.query_hash == record.query_hash && r.server == record.server);
        if duplicate {
            debug!(query = %normalized, server, "skipped duplicate feedback");
            return;
        }

        records.push(record);
        if let Err(e) = self.write_atomic(&records).await {
            warn!(error = %e, "failed to persist feedback");
        } else {
            info!(
                query = %truncate(&normalized, 30),
                server,
                total = records.len(),
                "feedback recorded"
            );
        }
    }

    /// Servers that worked for similar queries, best first. Hybrid score per
    /// record: `(overlap + coverage + 0.4 × fuzzy) × 0.5^(age / half-life)`,
    /// summed per server.
    pub async fn suggest(&self, query: &str, max_suggestions: usize) -> Vec<String> {
        let records = self.load().await;
        if records.is_empty() {
            return Vec::new();
        }

        let normalized = query.to_lowercase().trim().to_string();
        let query_words: std::collections::HashSet<&str> =
            normalized.split_whitespace().collect();
        // Require minimal signal to avoid noisy matches.
        if query_words.len() < 2 {
            return Vec::new();
        }

        let now = now_secs();
        let half_life_secs = RECENCY_HALF_LIFE_DAYS * 86_400.0;

        let mut scores: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for record in &records {
            if record.query.is_empty() || CORE_SERVERS.contains(&record.server.as_str()) {
                continue;
            }
            let record_words: std::collections::HashSet<&str> =
                record.query.split_whitespace().collect();
            let overlap = query_words.intersection(&record_words).count() as f64;
            let fuzzy = similar::TextDiff::from_chars(normalized.as_str(), record.query.as_str())
                .ratio() as f64;
            if overlap == 0.0 && fuzzy < 0.2 {
                continue;
            }

            let age = (now - record.timestamp).max(0.0);
            let recency = 0.5_f64.powf(age / half_life_secs);
            let coverage = overlap / query_words.len().max(1) as f64;
            let hybrid = (overlap + coverage + FUZZY_WEIGHT * fuzzy) * recency;

            *scores.entry(record.server.clone()).or_default() += hybrid;
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .take(max_suggestions)
            .map(|(server, _)| server)
            .collect()
    }

    async fn write_atomic(&self, records: &[FeedbackRecord]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec(records)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&tmp, &body).await?;
        let file = tokio::fs::OpenOptions::new().read(true).open(&tmp).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

fn query_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..8].to_string()
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FeedbackStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path());
        (dir, store)
    }

    /// **Scenario**: After recording server S for query Q, an identical query
    /// suggests S.
    #[tokio::test]
    async fn recorded_server_is_suggested() {
        let (_dir, store) = store();
        store.record_success("search the web for rust", "tavily-search").await;

        let suggestions = store.suggest("search the web for rust", 5).await;
        assert_eq!(suggestions, vec!["tavily-search".to_string()]);
    }

    /// **Scenario**: Recording raises a server's rank: with equal single
    /// records, the server matching the query keywords outranks the other.
    #[tokio::test]
    async fn relevant_server_ranks_higher() {
        let (_dir, store) = store();
        store.record_success("read the config file", "filesystem").await;
        store.record_success("play some jazz music", "sonos").await;

        let suggestions = store.suggest("read the other file", 5).await;
        assert_eq!(suggestions.first().map(String::as_str), Some("filesystem"));
    }

    /// **Scenario**: Duplicate (query, server) pairs are stored once.
    #[tokio::test]
    async fn duplicates_not_reappended() {
        let (_dir, store) = store();
        store.record_success("list my files", "filesystem").await;
        store.record_success("list my files", "filesystem").await;
        assert_eq!(store.load().await.len(), 1);
    }

    /// **Scenario**: Core servers and too-short queries are not recorded.
    #[tokio::test]
    async fn core_servers_and_short_queries_skipped() {
        let (_dir, store) = store();
        store.record_success("remember this for me", "project-memory").await;
        store.record_success("ls", "filesystem").await;
        assert!(store.load().await.is_empty());
    }

    /// **Scenario**: Single-word queries return no suggestions (noise guard).
    #[tokio::test]
    async fn single_word_query_no_suggestions() {
        let (_dir, store) = store();
        store.record_success("search the web", "tavily-search").await;
        assert!(store.suggest("search", 5).await.is_empty());
    }

    /// **Scenario**: A malformed feedback file reads as empty, and the next
    /// record rewrites it cleanly.
    #[tokio::test]
    async fn malformed_file_falls_back_to_empty() {
        let (_dir, store) = store();
        tokio::fs::create_dir_all(store.path().parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(store.path(), "{corrupt").await.unwrap();

        assert!(store.load().await.is_empty());
        store.record_success("list the files", "filesystem").await;
        assert_eq!(store.load().await.len(), 1);
    }

    /// **Scenario**: Overflow keeps the most recent 80% of the cap.
    #[tokio::test]
    async fn overflow_trims_to_recent() {
        let (_dir, store) = store();
        let mut records: Vec<FeedbackRecord> = (0..MAX_RECORDS)
            .map(|i| FeedbackRecord {
                query: format!("query number {i}"),
                server: format!("server-{i}"),
                timestamp: i as f64,
                query_hash: format!("{i:08}"),
            })
            .collect();
        records.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap());
        store.write_atomic(&records).await.unwrap();

        store.record_success("the newest query", "fresh-server").await;
        let after = store.load().await;
        assert_eq!(after.len(), MAX_RECORDS * 8 / 10 + 1);
        // Oldest entries were dropped, newest retained.
        assert!(after.iter().any(|r| r.server == "fresh-server"));
        assert!(!after.iter().any(|r| r.server == "server-0"));
    }
}
