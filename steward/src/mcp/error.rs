//! MCP transport errors and their mapping to tool result error kinds.

use std::time::Duration;

use thiserror::Error;

use crate::tool::ToolErrorKind;

/// Errors from MCP sessions and the registry.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("server {server} unavailable: {message}")]
    ServerUnavailable { server: String, message: String },
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool call timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    #[error("tool execution failed: {remote_message}")]
    ToolExecutionFailed { remote_message: String },
}

impl McpError {
    pub fn unavailable(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServerUnavailable {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Error kind carried into the tool result.
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            McpError::ServerUnavailable { .. } => ToolErrorKind::ServerUnavailable,
            McpError::ToolNotFound(_) => ToolErrorKind::ToolNotFound,
            McpError::Timeout { .. } => ToolErrorKind::Timeout,
            McpError::ProtocolError(_) => ToolErrorKind::ProtocolError,
            McpError::CircuitOpen(_) => ToolErrorKind::CircuitOpen,
            McpError::ToolExecutionFailed { .. } => ToolErrorKind::ToolExecutionFailed,
        }
    }

    /// Whether this failure advances the circuit breaker. Routing misses and
    /// fail-fast rejections do not.
    pub fn counts_for_breaker(&self) -> bool {
        !matches!(self, McpError::ToolNotFound(_) | McpError::CircuitOpen(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Kind mapping covers the full taxonomy.
    #[test]
    fn kind_mapping() {
        assert_eq!(
            McpError::unavailable("web", "stopped").kind(),
            ToolErrorKind::ServerUnavailable
        );
        assert_eq!(
            McpError::Timeout { timeout: Duration::from_secs(30) }.kind(),
            ToolErrorKind::Timeout
        );
        assert_eq!(
            McpError::CircuitOpen("web:search".into()).kind(),
            ToolErrorKind::CircuitOpen
        );
    }

    /// **Scenario**: ToolNotFound and CircuitOpen never advance the breaker.
    #[test]
    fn breaker_accounting() {
        assert!(!McpError::ToolNotFound("x".into()).counts_for_breaker());
        assert!(!McpError::CircuitOpen("k".into()).counts_for_breaker());
        assert!(McpError::Timeout { timeout: Duration::from_secs(1) }.counts_for_breaker());
        assert!(McpError::unavailable("s", "m").counts_for_breaker());
    }
}
