//! Chat completion chunk DTOs (streaming responses).
//!
//! Serialized by the SSE adapter for outbound streams and deserialized by
//! the gateway client when reading the upstream stream.

use serde::{Deserialize, Serialize};

use crate::llm::LlmUsage;

/// One streaming chunk in the OpenAI delta shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
}

impl ChatCompletionChunk {
    pub const OBJECT: &'static str = "chat.completion.chunk";
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message delta.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<DeltaToolCall>>,
}

/// Delta for one tool call, accumulated by index across chunks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaToolCall {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<DeltaToolCallFunction>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeltaToolCallFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: A content delta chunk round-trips through serde.
    #[test]
    fn content_chunk_round_trip() {
        let chunk = ChatCompletionChunk {
            id: "chatcmpl-1".into(),
            object: ChatCompletionChunk::OBJECT.into(),
            created: 1,
            model: "agent".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: Some("hi".into()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let s = serde_json::to_string(&chunk).unwrap();
        let back: ChatCompletionChunk = serde_json::from_str(&s).unwrap();
        assert_eq!(back.choices[0].delta.content.as_deref(), Some("hi"));
        assert!(!s.contains("usage"));
    }

    /// **Scenario**: Upstream tool-call deltas with partial fields deserialize.
    #[test]
    fn partial_tool_call_delta_deserializes() {
        let s = r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m",
                    "choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"pa"}}]},"finish_reason":null}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(s).unwrap();
        let tc = &chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert!(tc.id.is_none());
        assert_eq!(tc.function.as_ref().unwrap().arguments.as_deref(), Some("{\"pa"));
    }
}
