//! Tool types: descriptors, calls, results, and the [`ToolSource`] seam.
//!
//! A [`ToolDescriptor`] is discovered from an MCP server at connect time and
//! is immutable until the next discovery. The orchestrator keeps one
//! descriptor type everywhere and converts to the OpenAI function shape only
//! at the gateway boundary.
//!
//! **Interaction**: `mcp::McpRegistry` produces descriptors and implements
//! [`ToolSource`]; the parallel executor and agent loop consume the trait so
//! tests can substitute mock sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn function_type() -> String {
    "function".to_string()
}

/// Wire shape of one tool call on an assistant message (OpenAI format).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// Function name and raw JSON argument string inside a tool call payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// One tool invocation extracted from an assistant message. Request-scoped:
/// created from LLM output, destroyed once its result message is appended.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON object string as emitted by the model.
    pub arguments: String,
}

impl ToolCall {
    pub fn from_payload(p: &ToolCallPayload) -> Self {
        Self {
            id: p.id.clone(),
            name: p.function.name.clone(),
            arguments: p.function.arguments.clone(),
        }
    }

    pub fn to_payload(&self) -> ToolCallPayload {
        ToolCallPayload {
            id: self.id.clone(),
            call_type: function_type(),
            function: FunctionCall {
                name: self.name.clone(),
                arguments: self.arguments.clone(),
            },
        }
    }

    /// Parses the argument string into a JSON object. Empty string is `{}`.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// Error kind attached to a failed [`ToolResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolErrorKind {
    ServerUnavailable,
    ToolNotFound,
    Timeout,
    ProtocolError,
    CircuitOpen,
    ToolExecutionFailed,
    InvalidArguments,
    Cancelled,
}

/// Error half of a tool result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// Result of one tool execution. Always produced, even on failure; the agent
/// loop JSON-encodes it into the tool-role message so the model can recover.
#[derive(Clone, Debug, Serialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    pub duration_ms: f64,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, result: Value, duration_ms: f64) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            ok: true,
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        kind: ToolErrorKind,
        message: impl Into<String>,
        duration_ms: f64,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            ok: false,
            result: None,
            error: Some(ToolError {
                kind,
                message: message.into(),
            }),
            duration_ms,
        }
    }

    /// Body placed into the tool-role message: `{ok, result}` or `{ok, error}`.
    pub fn to_body(&self) -> Value {
        match (&self.result, &self.error) {
            (Some(r), _) if self.ok => serde_json::json!({ "ok": true, "result": r }),
            (_, Some(e)) => serde_json::json!({ "ok": false, "error": e }),
            _ => serde_json::json!({ "ok": self.ok }),
        }
    }
}

/// Metadata for one callable tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub input_schema: Value,
    /// Name of the owning MCP server.
    pub server: String,
    /// Results may be memoized (read-only, deterministic).
    pub cacheable: bool,
    /// Mutates state; forces sequential execution within a batch.
    pub side_effect: bool,
}

impl ToolDescriptor {
    /// OpenAI function-tool shape for the gateway request body.
    pub fn to_openai_function(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// Source of callable tools: lists descriptors and executes calls.
///
/// `call_tool` never returns `Err`; failures are encoded in the
/// [`ToolResult`] so one failed tool cannot abort the surrounding request.
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn list_tools(&self) -> Vec<ToolDescriptor>;
    async fn call_tool(&self, call: &ToolCall) -> ToolResult;
}
