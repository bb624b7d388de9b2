//! Tool-selection pipeline ("maître d'").
//!
//! Turns the latest user message into a bounded subset of tool descriptors
//! plus optional auto-execute suggestions, combining a persistent
//! classification cache, the feedback learning loop, a domain heuristic,
//! semantic retrieval, and an LLM classifier.

pub mod classifier;
pub mod domain;
pub mod feedback;
pub mod intent_cache;
pub mod normalize;
pub mod pipeline;

pub use classifier::{parse_classification, sanitize, IntentClassifier};
pub use domain::{build_micro_menu, detect_domain, menu_summary, Domain};
pub use feedback::{FeedbackRecord, FeedbackStore, MAX_RECORDS};
pub use intent_cache::{
    cache_key, AutoExecute, IntentCache, IntentCacheStats, IntentClassification, INTENT_TTL_SECS,
    MAX_ENTRIES,
};
pub use normalize::normalize_query;
pub use pipeline::{Selection, ToolSelector, COMMON_INTENT_PATTERNS};
