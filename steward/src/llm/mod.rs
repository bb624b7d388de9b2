//! LLM client abstraction for the agent loop and the intent classifier.
//!
//! The agent loop depends on a callable that takes messages plus tool
//! definitions and returns assistant text with optional tool_calls; this
//! module defines the trait, the options struct, and a mock implementation.
//!
//! # Streaming support
//!
//! The [`LlmClient`] trait supports streaming via `invoke_stream()`, which
//! accepts an optional `Sender<MessageChunk>` for emitting tokens as they
//! arrive. Implementations that support streaming (like [`ChatGateway`]) send
//! chunks through the channel; others can use the default implementation
//! that calls `invoke()` and sends the full content as one chunk.

mod gateway;
mod mock;

pub use gateway::ChatGateway;
pub use mock::MockLlm;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::tool::{ToolCall, ToolDescriptor};

/// Tool choice mode for chat completions: when tools are present, controls whether
/// the model may choose (auto), must not use (none), or must use (required).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolChoiceMode {
    /// Model can pick between message or tool calls. Default when tools are present.
    #[default]
    Auto,
    /// Model will not call any tool.
    None,
    /// Model must call one or more tools.
    Required,
}

impl ToolChoiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoiceMode::Auto => "auto",
            ToolChoiceMode::None => "none",
            ToolChoiceMode::Required => "required",
        }
    }
}

impl std::str::FromStr for ToolChoiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "required" => Ok(Self::Required),
            _ => Err(format!(
                "unknown tool_choice: {} (use auto, none, or required)",
                s
            )),
        }
    }
}

/// Per-call options: active tool definitions and response formatting.
#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: ToolChoiceMode,
    /// Request `response_format = {type: "json_object"}` (classifier calls).
    pub json_object: bool,
}

/// Token usage for one LLM call (prompt + completion).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One incremental content token from a streaming completion.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    pub content: String,
}

/// Response from an LLM completion: assistant text and optional tool calls.
#[derive(Debug)]
pub struct LlmResponse {
    pub content: String,
    /// Tool calls from this turn; empty means the turn is final.
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// Errors from gateway chat calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway timeout: {0}")]
    Timeout(String),
    #[error("gateway http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("gateway transport: {0}")]
    Transport(String),
    #[error("gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Transient failures are retried once before aborting the request.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout(_) | GatewayError::Transport(_) => true,
            GatewayError::Http { status, .. } => *status >= 500,
            GatewayError::InvalidResponse(_) => false,
        }
    }
}

/// LLM client: given messages and options, returns assistant text and
/// optional tool_calls.
///
/// **Interaction**: Used by the agent loop for reasoning steps and by the
/// intent classifier (with `json_object` set). [`MockLlm`] scripts responses
/// for tests; [`ChatGateway`] talks to the configured gateway.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Invoke one turn: read messages, return assistant content and optional tool_calls.
    async fn invoke(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
    ) -> Result<LlmResponse, GatewayError>;

    /// Streaming variant: invoke with optional chunk sender for token streaming.
    ///
    /// Default implementation calls `invoke()` and sends the full content as
    /// one chunk, which keeps the concatenated stream identical to the
    /// non-streaming content.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, GatewayError> {
        let response = self.invoke(messages, opts).await?;
        if let Some(tx) = chunk_tx {
            if !response.content.is_empty() {
                let _ = tx
                    .send(MessageChunk {
                        content: response.content.clone(),
                    })
                    .await;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubLlm {
        content: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn invoke(
            &self,
            _messages: &[Message],
            _opts: &ChatOptions,
        ) -> Result<LlmResponse, GatewayError> {
            Ok(LlmResponse {
                content: self.content.clone(),
                tool_calls: vec![],
                usage: None,
            })
        }
    }

    #[test]
    fn tool_choice_mode_from_str_parses_known_values() {
        assert_eq!(
            "auto".parse::<ToolChoiceMode>().unwrap(),
            ToolChoiceMode::Auto
        );
        assert_eq!(
            "none".parse::<ToolChoiceMode>().unwrap(),
            ToolChoiceMode::None
        );
        assert_eq!(
            "required".parse::<ToolChoiceMode>().unwrap(),
            ToolChoiceMode::Required
        );
    }

    #[test]
    fn tool_choice_mode_from_str_rejects_unknown_value() {
        let err = "unexpected".parse::<ToolChoiceMode>().unwrap_err();
        assert!(err.contains("unknown tool_choice"));
    }

    /// **Scenario**: 5xx and transport errors are transient; 4xx is not.
    #[test]
    fn transient_classification() {
        assert!(GatewayError::Timeout("t".into()).is_transient());
        assert!(GatewayError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!GatewayError::Http { status: 400, body: String::new() }.is_transient());
        assert!(!GatewayError::InvalidResponse("bad".into()).is_transient());
    }

    #[tokio::test]
    async fn default_invoke_stream_sends_single_chunk_when_enabled() {
        let llm = StubLlm {
            content: "hello".to_string(),
        };
        let (tx, mut rx) = mpsc::channel(2);
        let resp = llm
            .invoke_stream(&[], &ChatOptions::default(), Some(tx))
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");
        let chunk = rx.recv().await.expect("one chunk");
        assert_eq!(chunk.content, "hello");
    }

    #[tokio::test]
    async fn default_invoke_stream_skips_chunk_for_empty_content() {
        let llm = StubLlm {
            content: String::new(),
        };
        let (tx, mut rx) = mpsc::channel(2);
        let resp = llm
            .invoke_stream(&[], &ChatOptions::default(), Some(tx))
            .await
            .unwrap();
        assert!(resp.content.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
