//! Conversation messages in OpenAI chat shape.
//!
//! A [`Message`] is immutable once appended to a conversation. Assistant
//! messages may carry [`ToolCallPayload`]s; tool messages carry the
//! `tool_call_id` and tool `name` they answer. Message `content` can be a
//! plain string or an array of typed blocks (multimodal clients send both);
//! [`Content::as_text`] projects either to plain text.
//!
//! **Interaction**: Built by `openai_sse::parse` from inbound requests,
//! appended by the agent loop, and serialized verbatim into gateway requests.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCallPayload;

/// Message role. Serialized lowercase on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One part of a block-array message content (e.g. `{"type":"text","text":"hi"}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Message content: plain string or array of blocks.
///
/// Deserializes from `"hello"` or `[{"type":"text","text":"hello"}, ...]` so
/// that clients can send either format without a type error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// Returns the text of this content: the string variant as-is, or the
    /// concatenation of all `text` fields from `type: "text"` blocks.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.block_type.as_deref().unwrap_or("text") == "text")
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

/// One conversation message (OpenAI wire shape).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Tool calls requested by the model. Assistant messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallPayload>>,
    /// Id of the tool call this message answers. Tool messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name. Tool messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(Content::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Assistant message carrying the model's tool calls verbatim.
    pub fn assistant_with_tool_calls(
        content: Option<Content>,
        tool_calls: Vec<ToolCallPayload>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// Tool message answering one tool call with a JSON-encoded result body.
    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, body: String) -> Self {
        Self {
            role: Role::Tool,
            content: Some(Content::Text(body)),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    /// Plain-text projection of this message's content (empty when absent).
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::as_text).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: String content round-trips and projects to itself.
    #[test]
    fn text_content_as_text() {
        let c: Content = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(c.as_text(), "hello");
    }

    /// **Scenario**: Block-array content concatenates text blocks and skips others.
    #[test]
    fn block_content_as_text() {
        let c: Content = serde_json::from_str(
            r#"[{"type":"text","text":"hello"},{"type":"image_url"},{"type":"text","text":"world"}]"#,
        )
        .unwrap();
        assert_eq!(c.as_text(), "hello world");
    }

    /// **Scenario**: Role serializes lowercase as OpenAI expects.
    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    /// **Scenario**: Tool message serializes with tool_call_id and name, no tool_calls key.
    #[test]
    fn tool_message_wire_shape() {
        let m = Message::tool("call_1", "list_dir", "{\"ok\":true}".to_string());
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_1");
        assert_eq!(v["name"], "list_dir");
        assert!(v.get("tool_calls").is_none());
    }

    /// **Scenario**: Messages with null content deserialize (assistant tool-call turns).
    #[test]
    fn null_content_deserializes() {
        let m: Message =
            serde_json::from_str(r#"{"role":"assistant","content":null,"tool_calls":[]}"#).unwrap();
        assert!(m.content.is_none());
        assert_eq!(m.text(), "");
    }
}
