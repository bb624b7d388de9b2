//! Intent classifier: the pipeline's LLM stage.
//!
//! Sends the menu (micro or full), semantic hits, feedback hints, and time
//! context to the classifier model, demanding a JSON object reply. The reply
//! is parsed in two phases (strict JSON, then the first `{...}` block by
//! regex) because local models wrap JSON in prose. Malformed tool names are
//! dropped by the sanitizer. Repeated failures trip the classifier's circuit
//! breaker and short-circuit future calls for the cool-down window.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::{ChatOptions, LlmClient};
use crate::mcp::CircuitBreaker;
use crate::message::Message;

use super::intent_cache::{AutoExecute, IntentClassification};

static JSON_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)(\{.*"target_servers".*\})"#).expect("static regex compiles"));

/// LLM-backed classifier with its own circuit breaker key.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    model_label: String,
    breaker: Arc<CircuitBreaker>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, model_label: impl Into<String>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            llm,
            model_label: model_label.into(),
            breaker,
        }
    }

    fn breaker_key(&self) -> String {
        format!("classifier:{}", self.model_label)
    }

    /// Classifies one query. Returns `None` when the call could not run
    /// (breaker open, gateway down), which the caller must not cache, and
    /// `Some` for every produced classification, including the safe empty
    /// fallback for garbage replies.
    pub async fn classify(
        &self,
        query: &str,
        menu_section: &str,
        vector_context: &str,
        feedback_hint: &str,
        env_context: &str,
    ) -> Option<IntentClassification> {
        let key = self.breaker_key();
        if !self.breaker.is_allowed(&key) {
            warn!(model = %self.model_label, "classifier short-circuited: breaker open");
            return None;
        }

        let prompt = build_prompt(query, menu_section, vector_context, feedback_hint, env_context);
        let opts = ChatOptions {
            tools: Vec::new(),
            tool_choice: Default::default(),
            json_object: true,
        };

        match self.llm.invoke(&[Message::user(prompt)], &opts).await {
            Ok(response) => {
                self.breaker.record_success(&key);
                debug!(model = %self.model_label, reply = %response.content, "classifier decision");
                match parse_classification(&response.content) {
                    Some(c) => Some(sanitize(c)),
                    None => {
                        // The model answered but with garbage; that counts as
                        // a failure for the breaker and yields the fallback.
                        warn!(model = %self.model_label, "classifier reply had no parseable JSON");
                        self.breaker.record_failure(&key);
                        Some(IntentClassification::empty())
                    }
                }
            }
            Err(e) => {
                warn!(model = %self.model_label, error = %e, "classifier call failed");
                self.breaker.record_failure(&key);
                None
            }
        }
    }
}

fn build_prompt(
    query: &str,
    menu_section: &str,
    vector_context: &str,
    feedback_hint: &str,
    env_context: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Menu (Available Tools):\n");
    prompt.push_str(menu_section);
    prompt.push_str("\n\n");
    if !vector_context.is_empty() {
        prompt.push_str(vector_context);
        prompt.push_str("\n\n");
    }
    if !feedback_hint.is_empty() {
        prompt.push_str(feedback_hint);
        prompt.push_str("\n\n");
    }
    prompt.push_str(env_context);
    prompt.push_str("\n\n");
    prompt.push_str(
        "Task: Analyze the query and select tools from the Menu. Return valid JSON only.\n\
         Example Output:\n\
         {\"target_servers\": [], \"complexity\": \"low\", \"auto_execute\": null}\n\
         {\"target_servers\": [\"tavily-search\"], \"complexity\": \"high\", \"auto_execute\": null}\n\n",
    );
    prompt.push_str(&format!("User Query: '{query}'\n"));
    prompt.push_str("YOUR RESPONSE (JSON ONLY):");
    prompt
}

/// Two-phase tolerant parse: strict JSON first, then the first JSON block
/// containing `target_servers` extracted by regex.
pub fn parse_classification(content: &str) -> Option<IntentClassification> {
    if let Ok(value) = serde_json::from_str::<Value>(content.trim()) {
        return normalize_classification(value);
    }
    let captured = JSON_BLOCK.captures(content)?;
    let value: Value = serde_json::from_str(captured.get(1)?.as_str()).ok()?;
    normalize_classification(value)
}

/// Maps the raw JSON value into a classification, tolerating model quirks:
/// server entries as `{name: ...}` objects, auto_execute as a bare string
/// or a list of strings.
fn normalize_classification(value: Value) -> Option<IntentClassification> {
    let obj = value.as_object()?;

    let target_servers = obj
        .get("target_servers")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => {
                        map.get("name").and_then(Value::as_str).map(str::to_string)
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let complexity = obj
        .get("complexity")
        .and_then(Value::as_str)
        .filter(|c| matches!(*c, "low" | "medium" | "high"))
        .unwrap_or("low")
        .to_string();

    let auto_execute = match obj.get("auto_execute") {
        None | Some(Value::Null) => None,
        Some(Value::String(tool)) => Some(vec![AutoExecute {
            tool: tool.clone(),
            extra: serde_json::Map::new(),
        }]),
        Some(Value::Array(items)) => {
            let entries: Vec<AutoExecute> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(tool) => Some(AutoExecute {
                        tool: tool.clone(),
                        extra: serde_json::Map::new(),
                    }),
                    Value::Object(_) => serde_json::from_value(item.clone()).ok(),
                    _ => None,
                })
                .collect();
            Some(entries)
        }
        Some(_) => None,
    };

    Some(IntentClassification {
        target_servers,
        complexity,
        auto_execute,
    })
}

/// Drops malformed tool names (spaces, quotes, colons) from auto_execute and
/// empty server names from target_servers.
pub fn sanitize(mut classification: IntentClassification) -> IntentClassification {
    classification.target_servers.retain(|s| !s.trim().is_empty());

    if let Some(entries) = classification.auto_execute.take() {
        let cleaned: Vec<AutoExecute> = entries
            .into_iter()
            .filter(|e| {
                let name = e.tool.as_str();
                let valid = !name.is_empty() && valid_tool_name(name);
                if !valid {
                    info!(tool = %name, "sanitizer dropped malformed tool name");
                }
                valid
            })
            .collect();
        classification.auto_execute = if cleaned.is_empty() { None } else { Some(cleaned) };
    }

    classification
}

/// Tool names are snake_case or kebab-case: no spaces, quotes, or colons.
fn valid_tool_name(name: &str) -> bool {
    !name.contains(' ') && !name.contains('\'') && !name.contains('"') && !name.contains(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use std::time::Duration;

    /// **Scenario**: Strict JSON replies parse directly.
    #[test]
    fn strict_json_parses() {
        let c = parse_classification(
            r#"{"target_servers": ["filesystem"], "complexity": "medium", "auto_execute": null}"#,
        )
        .unwrap();
        assert_eq!(c.target_servers, vec!["filesystem"]);
        assert_eq!(c.complexity, "medium");
        assert!(c.auto_execute.is_none());
    }

    /// **Scenario**: JSON wrapped in prose is recovered by the regex phase.
    #[test]
    fn prose_wrapped_json_recovered() {
        let c = parse_classification(
            "Here is the JSON you asked for:\n{\"target_servers\": [\"web\"], \"complexity\": \"low\"}\nHope that helps!",
        )
        .unwrap();
        assert_eq!(c.target_servers, vec!["web"]);
    }

    /// **Scenario**: Total garbage yields None (caller falls back to empty).
    #[test]
    fn garbage_yields_none() {
        assert!(parse_classification("I cannot answer that.").is_none());
    }

    /// **Scenario**: Server entries as objects normalize to their names.
    #[test]
    fn object_servers_normalized() {
        let c = parse_classification(
            r#"{"target_servers": [{"name": "sonos"}, "filesystem", 42]}"#,
        )
        .unwrap();
        assert_eq!(c.target_servers, vec!["sonos", "filesystem"]);
    }

    /// **Scenario**: auto_execute as a bare string becomes a one-entry list.
    #[test]
    fn bare_string_auto_execute() {
        let c = parse_classification(
            r#"{"target_servers": [], "auto_execute": "current_time"}"#,
        )
        .unwrap();
        assert_eq!(c.auto_execute.unwrap()[0].tool, "current_time");
    }

    /// **Scenario**: Malformed tool names are dropped by the sanitizer.
    #[test]
    fn sanitizer_drops_malformed_names() {
        let c = parse_classification(
            r#"{"target_servers": [], "auto_execute": ["Server 'time' tool", "current_time"]}"#,
        )
        .unwrap();
        let sanitized = sanitize(c);
        let entries = sanitized.auto_execute.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool, "current_time");
    }

    /// **Scenario**: Unknown complexity labels fall back to "low".
    #[test]
    fn unknown_complexity_defaults() {
        let c = parse_classification(r#"{"target_servers": [], "complexity": "extreme"}"#).unwrap();
        assert_eq!(c.complexity, "low");
    }

    /// **Scenario**: After repeated failures, classification calls are
    /// short-circuited without invoking the gateway; the breaker admits a
    /// probe after cool-down.
    #[tokio::test]
    async fn repeated_failures_short_circuit() {
        let llm = Arc::new(MockLlm::new());
        // Script six garbage replies: each counts as a classifier failure.
        for _ in 0..6 {
            llm.push_text("not json at all");
        }
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(60)));
        let classifier = IntentClassifier::new(llm.clone(), "intent-model", breaker);

        for _ in 0..6 {
            let result = classifier.classify("query", "- t: d", "", "", "").await;
            // Garbage replies produce the safe empty classification...
            if let Some(c) = result {
                assert!(c.target_servers.is_empty());
            }
        }
        let invocations_after_trip = llm.invocations();
        // ...and the 7th call does not reach the LLM at all.
        let short_circuited = classifier.classify("query", "- t: d", "", "", "").await;
        assert!(short_circuited.is_none());
        assert_eq!(llm.invocations(), invocations_after_trip);
    }

    /// **Scenario**: A healthy reply closes the loop: parse, sanitize, success.
    #[tokio::test]
    async fn healthy_reply_classifies() {
        let llm = Arc::new(MockLlm::new());
        llm.push_text(r#"{"target_servers": ["filesystem"], "complexity": "low", "auto_execute": null}"#);
        let breaker = Arc::new(CircuitBreaker::new(5, Duration::from_secs(60)));
        let classifier = IntentClassifier::new(llm, "intent-model", breaker);

        let c = classifier
            .classify("list files", "- list_dir: list", "", "", "")
            .await
            .unwrap();
        assert_eq!(c.target_servers, vec!["filesystem"]);
    }
}
