//! OpenAI-compatible chat completion request DTOs.
//!
//! Used to parse the POST body for `/v1/chat/completions`. Field names match
//! the OpenAI Chat Completions API. Message `content` can be a string or an
//! array of parts (multimodal); both are accepted. Incoming `tools` and
//! `tool_choice` are accepted for compatibility but the orchestrator resolves
//! its own tool set per request.

use serde::Deserialize;
use serde_json::Value;

use crate::message::Content;
use crate::tool::ToolCallPayload;

/// Chat completion request body (OpenAI-compatible).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    /// Ordered conversation. The last user message drives tool selection.
    pub messages: Vec<IncomingMessage>,
    /// Echoed in the response id line only; the reasoning model is
    /// server-configured and the outward model id is always stable.
    #[serde(default)]
    pub model: Option<String>,
    /// When true, the response is streamed as SSE chunks.
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    /// Accepted and ignored: tool routing is the orchestrator's job.
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
}

/// A single message in the chat request. Entries without a role are dropped
/// during normalization rather than rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallPayload>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Stream options for chat completion (OpenAI `stream_options`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StreamOptions {
    /// If true, include usage in the final stream chunk.
    #[serde(default)]
    pub include_usage: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Minimal body parses with stream defaulting to false.
    #[test]
    fn minimal_body_parses() {
        let req: ChatCompletionRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hello"}]}"#).unwrap();
        assert!(!req.stream);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role.as_deref(), Some("user"));
    }

    /// **Scenario**: Block-array content and stream_options are accepted.
    #[test]
    fn block_content_and_stream_options() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":[{"type":"text","text":"hi"}]}],
                "model":"anything","stream":true,"stream_options":{"include_usage":true}}"#,
        )
        .unwrap();
        assert!(req.stream);
        assert!(req.stream_options.unwrap().include_usage);
        let content = req.messages[0].content.as_ref().unwrap();
        assert_eq!(content.as_text(), "hi");
    }

    /// **Scenario**: Client-sent tools are parsed but carried as opaque values.
    #[test]
    fn client_tools_accepted() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"x"}],
                "tools":[{"type":"function","function":{"name":"t"}}],"tool_choice":"auto"}"#,
        )
        .unwrap();
        assert_eq!(req.tools.unwrap().len(), 1);
    }
}
