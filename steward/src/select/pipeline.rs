//! The tool-selection pipeline: free-form message in, bounded tool subset out.
//!
//! Stage order (short-circuiting where a stage suffices):
//! normalize → classification cache → feedback hints → domain micro-menu →
//! semantic retrieval → classifier call → sanitize → cache store. Feedback
//! and semantic hits are *inputs to* the classifier, never substitutes for
//! it. A failing classifier yields the full menu so the agent loop keeps
//! working degraded.

use std::sync::Arc;

use tracing::{debug, info};

use crate::llm::{ChatOptions, LlmClient};
use crate::memory::{ToolHit, ToolIndex, DEFAULT_SEARCH_LIMIT};
use crate::message::{Message, Role};
use crate::tool::ToolDescriptor;

use super::classifier::IntentClassifier;
use super::domain::{build_micro_menu, detect_domain, menu_summary};
use super::feedback::FeedbackStore;
use super::intent_cache::{cache_key, AutoExecute, IntentCache, IntentClassification};
use super::normalize::normalize_query;

/// Query patterns pre-classified at startup when intent warm-up is enabled.
pub const COMMON_INTENT_PATTERNS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "how are you",
    "what's up",
    "thank you",
    "thanks",
    "ok",
    "got it",
    "what time is it",
    "current time",
    "where am i",
    "current location",
    "system status",
    "are you working",
    "what can you do",
    "what tools do you have",
    "help",
    "search for",
    "look up",
    "list files",
    "read file",
    "write file",
    "create file",
];

/// Outcome of the pipeline for one request.
#[derive(Clone, Debug)]
pub struct Selection {
    /// Active tool subset for the agent loop.
    pub tools: Vec<ToolDescriptor>,
    pub complexity: String,
    pub target_servers: Vec<String>,
    /// Sanitized auto-execute suggestions; surfaced to callers, never
    /// dispatched without the model asking for the tool itself.
    pub auto_execute: Vec<AutoExecute>,
    pub from_cache: bool,
}

impl Selection {
    fn full_menu(menu: &[ToolDescriptor]) -> Self {
        Self {
            tools: menu.to_vec(),
            complexity: "low".into(),
            target_servers: Vec::new(),
            auto_execute: Vec::new(),
            from_cache: false,
        }
    }
}

/// The maître d': narrows the tool menu per request.
pub struct ToolSelector {
    classifier: IntentClassifier,
    classifier_model: String,
    intent_cache: Arc<IntentCache>,
    feedback: Arc<FeedbackStore>,
    tool_index: Arc<ToolIndex>,
    selection_cap: usize,
    /// Rewrite the last user message into a standalone query before
    /// selection. Wired but off by default.
    query_refinement: bool,
    refiner: Arc<dyn LlmClient>,
}

impl ToolSelector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier_llm: Arc<dyn LlmClient>,
        classifier_model: impl Into<String>,
        breaker: Arc<crate::mcp::CircuitBreaker>,
        intent_cache: Arc<IntentCache>,
        feedback: Arc<FeedbackStore>,
        tool_index: Arc<ToolIndex>,
        selection_cap: usize,
        query_refinement: bool,
    ) -> Self {
        let classifier_model = classifier_model.into();
        Self {
            classifier: IntentClassifier::new(
                Arc::clone(&classifier_llm),
                classifier_model.clone(),
                breaker,
            ),
            classifier_model,
            intent_cache,
            feedback,
            tool_index,
            selection_cap,
            query_refinement,
            refiner: classifier_llm,
        }
    }

    /// Resolves the active tool subset for a query against the full menu.
    pub async fn select(&self, query: &str, menu: &[ToolDescriptor]) -> Selection {
        if menu.is_empty() {
            return Selection::full_menu(menu);
        }

        let normalized = normalize_query(query);
        let key = cache_key(&normalized, &self.classifier_model);

        if let Some(cached) = self.intent_cache.get(&key) {
            let mut selection = self.subset(menu, &cached, &[]);
            selection.from_cache = true;
            return selection;
        }

        let feedback_hint = {
            let suggested = self.feedback.suggest(&normalized, 3).await;
            if suggested.is_empty() {
                String::new()
            } else {
                format!(
                    "Recall: usage history suggests these servers are relevant: {}",
                    suggested.join(", ")
                )
            }
        };

        let semantic_hits = self.tool_index.search_tools(query, DEFAULT_SEARCH_LIMIT).await;
        let vector_context = if semantic_hits.is_empty() {
            String::new()
        } else {
            let mut s = String::from("Relevant Tools Found via Search:\n");
            for hit in &semantic_hits {
                s.push_str(&format!("- {}: {}\n", hit.name, hit.description));
            }
            s
        };

        let domain = detect_domain(&normalized);
        let menu_section = build_micro_menu(domain, &semantic_hits, menu)
            .unwrap_or_else(|| menu_summary(menu));

        let env_context = format!(
            "Current Time: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M %Z")
        );

        let classification = self
            .classifier
            .classify(query, &menu_section, &vector_context, &feedback_hint, &env_context)
            .await;

        match classification {
            Some(classification) => {
                self.intent_cache.put(&key, classification.clone());
                self.subset(menu, &classification, &semantic_hits)
            }
            // Breaker open or gateway down: nothing cached, full menu.
            None => Selection::full_menu(menu),
        }
    }

    /// Maps a classification onto the discovered menu: tools owned by the
    /// target servers plus sanitized auto-execute tools, in menu order,
    /// capped. An empty narrowing falls back to the full menu.
    fn subset(
        &self,
        menu: &[ToolDescriptor],
        classification: &IntentClassification,
        semantic_hits: &[ToolHit],
    ) -> Selection {
        if classification.target_servers.is_empty() {
            let mut selection = Selection::full_menu(menu);
            selection.complexity = classification.complexity.clone();
            return selection;
        }

        let auto_tools: std::collections::HashSet<&str> = classification
            .auto_execute
            .iter()
            .flatten()
            .map(|e| e.tool.as_str())
            .collect();
        let hit_names: std::collections::HashSet<&str> =
            semantic_hits.iter().map(|h| h.name.as_str()).collect();

        let mut tools: Vec<ToolDescriptor> = menu
            .iter()
            .filter(|d| {
                classification.target_servers.iter().any(|s| s == &d.server)
                    || auto_tools.contains(d.name.as_str())
                    || hit_names.contains(d.name.as_str())
            })
            .cloned()
            .collect();
        tools.truncate(self.selection_cap);

        if tools.is_empty() {
            debug!("classification matched no discovered tools; using full menu");
            let mut selection = Selection::full_menu(menu);
            selection.complexity = classification.complexity.clone();
            return selection;
        }

        Selection {
            tools,
            complexity: classification.complexity.clone(),
            target_servers: classification.target_servers.clone(),
            auto_execute: classification.auto_execute.clone().unwrap_or_default(),
            from_cache: false,
        }
    }

    /// Rewrites the conversation's last user message into a standalone
    /// search query. With refinement disabled (the default) this returns the
    /// raw text untouched.
    pub async fn refine_query(&self, messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::text)
            .unwrap_or_default();

        if !self.query_refinement {
            return last_user;
        }

        let context: Vec<String> = messages
            .iter()
            .rev()
            .take(2)
            .map(|m| format!("{:?}: {}", m.role, m.text()))
            .collect();
        let prompt_msgs = [
            Message::system(
                "You are a search query generator. Convert the LAST user message into a \
                 specific keyword search query for a vector database. Resolve pronouns based \
                 on context. Do NOT answer the question. Output ONLY the query string.",
            ),
            Message::user(format!(
                "Context:\n{}\n\nGenerate the search query for the last user message:",
                context.join("\n")
            )),
        ];

        match self.refiner.invoke(&prompt_msgs, &ChatOptions::default()).await {
            Ok(response) => {
                let rewritten = response.content.trim().trim_matches('"').to_string();
                if rewritten.is_empty() {
                    last_user
                } else {
                    debug!(original = %last_user, %rewritten, "query refined");
                    rewritten
                }
            }
            Err(e) => {
                debug!(error = %e, "query refinement failed; using raw content");
                last_user
            }
        }
    }

    /// Pre-populates the classification cache for common query patterns.
    /// Returns how many patterns were freshly classified.
    pub async fn precompute_common_intents(&self, menu: &[ToolDescriptor]) -> usize {
        let mut computed = 0;
        for pattern in COMMON_INTENT_PATTERNS {
            let normalized = normalize_query(pattern);
            let key = cache_key(&normalized, &self.classifier_model);
            if self.intent_cache.get(&key).is_some() {
                continue;
            }
            let selection = self.select(pattern, menu).await;
            if !selection.from_cache {
                computed += 1;
            }
        }
        info!(computed, "pre-computed common intents");
        computed
    }
}
