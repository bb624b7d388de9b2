//! Non-streaming chat completion DTO.
//!
//! One shape serves both directions: the gateway client deserializes upstream
//! completions, and the external interface serializes the orchestrator's
//! final answer, overriding `model` with the stable logical id and filling
//! `id`, `created`, `object` when missing.

use serde::{Deserialize, Serialize};

use crate::llm::LlmUsage;
use crate::message::Message;

/// Stable outward model id: downstream clients always see this name
/// regardless of which underlying model did the reasoning.
pub const LOGICAL_MODEL_ID: &str = "agent";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl ChatCompletion {
    /// Builds the outward completion for a final assistant message, with the
    /// logical model id and generated id/created/object.
    pub fn outward(message: Message, usage: Option<LlmUsage>) -> Self {
        Self {
            id: Some(new_completion_id()),
            object: Some("chat.completion".to_string()),
            created: Some(now_unix_secs()),
            model: Some(LOGICAL_MODEL_ID.to_string()),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: Some("stop".to_string()),
            }],
            usage,
        }
    }
}

/// New completion id in the `chatcmpl-` namespace.
pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub fn now_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
