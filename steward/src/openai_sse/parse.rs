//! Request validation and normalization to internal messages.
//!
//! Entries without a role are dropped; an empty result or a conversation
//! with no user message is a validation error (every request must carry at
//! least one user message).

use crate::message::{Message, Role};

use super::request::ChatCompletionRequest;

/// Validation failures for inbound chat requests. Surfaced as 4xx.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("messages must be a non-empty list")]
    EmptyMessages,
    #[error("conversation contains no user message")]
    NoUserMessage,
}

/// Normalized request, ready for the agent loop.
#[derive(Debug, Clone)]
pub struct ParsedChatRequest {
    pub messages: Vec<Message>,
    pub stream: bool,
    pub include_usage: bool,
}

/// Validates and normalizes an inbound request.
pub fn parse_chat_request(req: &ChatCompletionRequest) -> Result<ParsedChatRequest, ParseError> {
    if req.messages.is_empty() {
        return Err(ParseError::EmptyMessages);
    }

    let mut messages = Vec::with_capacity(req.messages.len());
    for m in &req.messages {
        let role = match m.role.as_deref() {
            Some("system") => Role::System,
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            Some("tool") => Role::Tool,
            // Entries without a recognizable role are skipped, not fatal.
            _ => continue,
        };
        messages.push(Message {
            role,
            content: m.content.clone(),
            tool_calls: m.tool_calls.clone(),
            tool_call_id: m.tool_call_id.clone(),
            name: m.name.clone(),
        });
    }

    if messages.is_empty() {
        return Err(ParseError::EmptyMessages);
    }
    if !messages.iter().any(|m| m.role == Role::User) {
        return Err(ParseError::NoUserMessage);
    }

    Ok(ParsedChatRequest {
        messages,
        stream: req.stream,
        include_usage: req
            .stream_options
            .as_ref()
            .map(|o| o.include_usage)
            .unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(json: &str) -> ChatCompletionRequest {
        serde_json::from_str(json).unwrap()
    }

    /// **Scenario**: A valid single user message parses.
    #[test]
    fn valid_request_parses() {
        let parsed =
            parse_chat_request(&req(r#"{"messages":[{"role":"user","content":"hello"}]}"#))
                .unwrap();
        assert_eq!(parsed.messages.len(), 1);
        assert!(!parsed.stream);
    }

    /// **Scenario**: Empty message list is a validation error.
    #[test]
    fn empty_messages_rejected() {
        let err = parse_chat_request(&req(r#"{"messages":[]}"#)).unwrap_err();
        assert!(matches!(err, ParseError::EmptyMessages));
    }

    /// **Scenario**: Role-less entries are dropped; all-dropped is an error.
    #[test]
    fn roleless_entries_dropped() {
        let err = parse_chat_request(&req(r#"{"messages":[{"content":"no role"}]}"#)).unwrap_err();
        assert!(matches!(err, ParseError::EmptyMessages));

        let parsed = parse_chat_request(&req(
            r#"{"messages":[{"content":"no role"},{"role":"user","content":"hi"}]}"#,
        ))
        .unwrap();
        assert_eq!(parsed.messages.len(), 1);
    }

    /// **Scenario**: A system-only conversation has no user message and is rejected.
    #[test]
    fn no_user_message_rejected() {
        let err = parse_chat_request(&req(
            r#"{"messages":[{"role":"system","content":"policy"}]}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ParseError::NoUserMessage));
    }

    /// **Scenario**: include_usage flows through from stream_options.
    #[test]
    fn include_usage_flows_through() {
        let parsed = parse_chat_request(&req(
            r#"{"messages":[{"role":"user","content":"x"}],"stream":true,
                "stream_options":{"include_usage":true}}"#,
        ))
        .unwrap();
        assert!(parsed.stream);
        assert!(parsed.include_usage);
    }
}
