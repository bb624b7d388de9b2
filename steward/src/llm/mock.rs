//! Scripted LLM for tests: pops queued responses, records invocations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::message::Message;
use crate::tool::ToolCall;

use super::{ChatOptions, GatewayError, LlmClient, LlmResponse};

/// Mock [`LlmClient`] returning pre-scripted responses in order.
///
/// When the script runs out, returns a fixed fallback text with no tool
/// calls, so loops always terminate. Tracks the number of invocations for
/// step-budget assertions.
#[derive(Default)]
pub struct MockLlm {
    responses: Mutex<Vec<LlmResponse>>,
    calls: AtomicUsize,
    /// Message counts seen per invocation, for conversation-shape assertions.
    seen_message_counts: Mutex<Vec<usize>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a plain text response.
    pub fn push_text(&self, content: impl Into<String>) {
        self.push(LlmResponse {
            content: content.into(),
            tool_calls: vec![],
            usage: None,
        });
    }

    /// Queues a response that requests the given tool calls.
    pub fn push_tool_calls(&self, content: impl Into<String>, calls: Vec<ToolCall>) {
        self.push(LlmResponse {
            content: content.into(),
            tool_calls: calls,
            usage: None,
        });
    }

    pub fn push(&self, response: LlmResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(response);
    }

    /// Number of invoke calls made so far.
    pub fn invocations(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_message_counts(&self) -> Vec<usize> {
        self.seen_message_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(
        &self,
        messages: &[Message],
        _opts: &ChatOptions,
    ) -> Result<LlmResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_message_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.len());
        let mut queue = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        if queue.is_empty() {
            return Ok(LlmResponse {
                content: "mock response".to_string(),
                tool_calls: vec![],
                usage: None,
            });
        }
        Ok(queue.remove(0))
    }
}
