//! Structured error responses with actionable suggestions.
//!
//! Every user-visible failure is shaped as
//! `{error: {code, category, message, details, suggestions, timestamp}}` so
//! callers can branch on the code and show the suggestions verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes for structured error responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    McpServerUnavailable,
    McpServerNotFound,
    McpToolCallFailed,
    McpToolNotFound,
    MemoryConnectionFailed,
    MemoryQueryFailed,
    GatewayTimeout,
    GatewayError,
    ValidationError,
    ConfigError,
    Timeout,
    AuthError,
    UnknownError,
}

/// Inner error object of a structured response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub timestamp: String,
}

impl ErrorBody {
    /// Builds an error body with suggestions derived from the code.
    pub fn new(code: ErrorCode, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            category: category.into(),
            message: message.into(),
            details: Value::Object(serde_json::Map::new()),
            suggestions: suggestions_for(code),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Full response shape: `{ok: false, error: {...}}`.
    pub fn to_response(&self) -> Value {
        serde_json::json!({ "ok": false, "error": self })
    }
}

/// Actionable suggestions per error code.
pub fn suggestions_for(code: ErrorCode) -> Vec<String> {
    let list: &[&str] = match code {
        ErrorCode::McpServerUnavailable => &[
            "Check if the MCP server process is running",
            "Verify the server entry in the MCP servers file",
            "Check orchestrator logs for connection errors",
        ],
        ErrorCode::McpServerNotFound => &[
            "Verify the server is configured in the MCP servers file",
            "Ensure the server name matches exactly (case-sensitive)",
        ],
        ErrorCode::McpToolCallFailed => &[
            "Verify the tool exists on its server",
            "Check the MCP server logs for execution errors",
            "Verify the tool arguments are correct",
        ],
        ErrorCode::McpToolNotFound => &[
            "List available tools via the health endpoint",
            "The tool may belong to a server that is not ready",
        ],
        ErrorCode::MemoryConnectionFailed => &[
            "Verify the vector store is reachable",
            "Check the embedding model configuration",
        ],
        ErrorCode::MemoryQueryFailed => &[
            "Check if the vector store connection is healthy",
            "Verify the store schema is initialized",
        ],
        ErrorCode::GatewayTimeout => &[
            "Check the gateway service status",
            "Verify the GATEWAY_BASE configuration",
            "Check network connectivity",
        ],
        ErrorCode::GatewayError => &[
            "Check the gateway service is running",
            "Verify the GATEWAY_BASE URL is correct",
            "Check gateway logs for detailed error information",
        ],
        ErrorCode::ValidationError => &[
            "Verify all required fields are present in the request",
            "Check field types match the expected format",
        ],
        ErrorCode::ConfigError => &[
            "Check all required configuration variables are set",
            "Review the environment variable defaults in the docs",
        ],
        ErrorCode::Timeout => &[
            "Retry the request",
            "Increase the per-tool timeout if this tool is slow",
        ],
        ErrorCode::AuthError => &[
            "Verify the bearer token is correct",
            "Review the ROUTER_AUTH_TOKEN configuration",
        ],
        ErrorCode::UnknownError => &["Check logs for more details"],
    };
    list.iter().map(|s| s.to_string()).collect()
}
