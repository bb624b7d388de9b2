//! Line-delimited JSON-RPC 2.0 frames for the MCP stdio transport.
//!
//! Incoming frames are parsed tolerantly: a frame with an `id` resolves a
//! pending call (result or error); a frame with only a `method` is a
//! notification. Ids are numbers on the wire but numeric strings from older
//! servers are accepted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// MCP protocol version sent in the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// Client identity reported to servers.
pub const CLIENT_NAME: &str = "steward";

/// One parsed JSON-RPC frame from a server.
#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcFrame {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcFrame {
    /// Numeric id of this frame, accepting numbers and numeric strings.
    pub fn id_u64(&self) -> Option<u64> {
        match &self.id {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Error member of a JSON-RPC response.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Serialized request line (newline-terminated).
pub fn request_line(id: u64, method: &str, params: &Value) -> String {
    let frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    let mut line = frame.to_string();
    line.push('\n');
    line
}

/// Serialized notification line (no id, newline-terminated).
pub fn notification_line(method: &str, params: &Value) -> String {
    let frame = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    });
    let mut line = frame.to_string();
    line.push('\n');
    line
}

/// `initialize` request params.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// `initialize` result body.
#[derive(Clone, Debug, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// `tools/list` result body.
#[derive(Clone, Debug, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<RemoteTool>,
}

/// One tool as advertised by a server.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Result frames parse with numeric ids.
    #[test]
    fn result_frame_parses() {
        let frame: JsonRpcFrame =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        assert_eq!(frame.id_u64(), Some(3));
        assert!(frame.error.is_none());
        assert_eq!(frame.result.unwrap()["ok"], true);
    }

    /// **Scenario**: String ids from older servers are accepted.
    #[test]
    fn string_id_accepted() {
        let frame: JsonRpcFrame =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"17","result":{}}"#).unwrap();
        assert_eq!(frame.id_u64(), Some(17));
    }

    /// **Scenario**: Notifications have a method and no id.
    #[test]
    fn notification_frame() {
        let frame: JsonRpcFrame =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
        assert_eq!(frame.id_u64(), None);
        assert_eq!(frame.method.as_deref(), Some("notifications/progress"));
    }

    /// **Scenario**: Request lines are single-line JSON ending in newline.
    #[test]
    fn request_line_shape() {
        let line = request_line(7, "tools/call", &json!({"name":"t","arguments":{}}));
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["method"], "tools/call");
    }

    /// **Scenario**: Initialize result parses the camelCase wire shape.
    #[test]
    fn initialize_result_parses() {
        let r: InitializeResult = serde_json::from_str(
            r#"{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},
                "serverInfo":{"name":"ollama-server","version":"1.0.0"}}"#,
        )
        .unwrap();
        assert_eq!(r.server_info.name, "ollama-server");
        assert_eq!(r.protocol_version.as_deref(), Some("2024-11-05"));
    }

    /// **Scenario**: tools/list result parses inputSchema.
    #[test]
    fn tools_list_parses() {
        let r: ToolsListResult = serde_json::from_str(
            r#"{"tools":[{"name":"list_models","description":"List models",
                "inputSchema":{"type":"object","properties":{}}}]}"#,
        )
        .unwrap();
        assert_eq!(r.tools.len(), 1);
        assert_eq!(r.tools[0].name, "list_models");
        assert!(r.tools[0].input_schema.is_some());
    }
}
