//! Per-server lifecycle: state machine and crash supervision.
//!
//! Lifecycle: `Unstarted → Starting → Ready`; a crash moves the server to
//! `Stopped` and the supervisor schedules a restart with exponential backoff
//! (1 s initial, 60 s cap). While restart attempts keep failing the server
//! reads as `Degraded`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{is_cacheable, is_side_effect};
use crate::settings::McpServerConfig;
use crate::tool::ToolDescriptor;

use super::error::McpError;
use super::protocol::RemoteTool;
use super::session::McpSession;

const RESTART_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Unstarted,
    Starting,
    Ready,
    Degraded,
    Stopped,
}

/// One configured MCP server: spawn config, live session, discovered tools.
pub struct McpServerHandle {
    config: McpServerConfig,
    state: Mutex<ServerState>,
    session: tokio::sync::RwLock<Option<Arc<McpSession>>>,
    descriptors: Mutex<Vec<ToolDescriptor>>,
    tool_timeout: Duration,
}

impl McpServerHandle {
    pub fn new(config: McpServerConfig, default_tool_timeout: Duration) -> Self {
        let tool_timeout = config
            .tool_timeout_s
            .map(Duration::from_secs_f64)
            .unwrap_or(default_tool_timeout);
        Self {
            config,
            state: Mutex::new(ServerState::Unstarted),
            session: tokio::sync::RwLock::new(None),
            descriptors: Mutex::new(Vec::new()),
            tool_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Discovered tool descriptors; empty unless the server reached Ready.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Spawns the subprocess and runs the handshake. On success the server
    /// is Ready and its tools are discovered; on failure it is Stopped.
    pub async fn start(&self) -> Result<(), McpError> {
        self.set_state(ServerState::Starting);
        match McpSession::spawn(&self.config).await {
            Ok((session, server_info, remote_tools)) => {
                let descriptors = remote_tools
                    .iter()
                    .map(|t| self.to_descriptor(t))
                    .collect::<Vec<_>>();
                info!(
                    server = %self.config.name,
                    remote = %server_info.name,
                    tools = descriptors.len(),
                    "mcp server ready"
                );
                *self.descriptors.lock().unwrap_or_else(|e| e.into_inner()) = descriptors;
                *self.session.write().await = Some(Arc::new(session));
                self.set_state(ServerState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(ServerState::Stopped);
                Err(e)
            }
        }
    }

    fn to_descriptor(&self, tool: &RemoteTool) -> ToolDescriptor {
        ToolDescriptor {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            input_schema: tool
                .input_schema
                .clone()
                .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            server: self.config.name.clone(),
            cacheable: is_cacheable(&tool.name),
            side_effect: is_side_effect(&tool.name),
        }
    }

    /// Calls one tool on the live session.
    pub async fn call(&self, tool_name: &str, arguments: serde_json::Value) -> Result<serde_json::Value, McpError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| McpError::unavailable(&self.config.name, "not connected"))?;
        session.call_tool(tool_name, arguments, self.tool_timeout).await
    }

    /// Supervises the session: waits for a crash, then restarts with
    /// exponential backoff until cancelled.
    pub async fn run_supervisor(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let session = self.session.read().await.clone();
            if let Some(session) = session {
                let mut stopped = session.stopped_watch();
                if !*stopped.borrow() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = async {
                            while stopped.changed().await.is_ok() {
                                if *stopped.borrow() {
                                    break;
                                }
                            }
                        } => {}
                    }
                }
                if cancel.is_cancelled() {
                    return;
                }
                warn!(server = %self.config.name, "mcp server stopped; scheduling restart");
                self.set_state(ServerState::Stopped);
                *self.session.write().await = None;
            }

            let mut backoff = RESTART_BACKOFF_INITIAL;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                match self.start().await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(
                            server = %self.config.name,
                            error = %e,
                            backoff_s = backoff.as_secs(),
                            "mcp restart failed"
                        );
                        self.set_state(ServerState::Degraded);
                        backoff = (backoff * 2).min(RESTART_BACKOFF_CAP);
                    }
                }
            }
        }
    }

    /// Kills the session (shutdown path).
    pub async fn stop(&self) {
        if let Some(session) = self.session.write().await.take() {
            session.shutdown();
        }
        self.set_state(ServerState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn handle(command: &str) -> McpServerHandle {
        McpServerHandle::new(
            McpServerConfig {
                name: "t".into(),
                command: command.into(),
                args: vec![],
                env: HashMap::new(),
                enabled: true,
                tool_timeout_s: Some(2.0),
            },
            Duration::from_secs(30),
        )
    }

    /// **Scenario**: Per-server timeout override wins over the default.
    #[test]
    fn timeout_override() {
        let h = handle("x");
        assert_eq!(h.tool_timeout(), Duration::from_secs(2));
    }

    /// **Scenario**: A failed start leaves the server Stopped with no tools.
    #[tokio::test]
    async fn failed_start_is_stopped() {
        let h = handle("/usr/bin/steward_test_binary_does_not_exist");
        assert_eq!(h.state(), ServerState::Unstarted);
        assert!(h.start().await.is_err());
        assert_eq!(h.state(), ServerState::Stopped);
        assert!(h.descriptors().is_empty());
    }

    /// **Scenario**: Calling a tool on an unconnected server is
    /// ServerUnavailable, not a panic.
    #[tokio::test]
    async fn call_without_session_unavailable() {
        let h = handle("x");
        let err = h.call("tool", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ServerUnavailable { .. }));
    }
}
