//! MCP session: one stdio subprocess speaking line-delimited JSON-RPC.
//!
//! The child is spawned with piped stdio; a reader task parses stdout frames
//! and resolves the matching entry in the pending-call map, a stderr task
//! forwards diagnostics into tracing (never mixed with protocol frames), and
//! writes go through a mutex-serialized stdin handle. EOF on stdout means
//! the server stopped; every pending call then fails with
//! `ServerUnavailable` and the supervisor schedules a restart.
//!
//! **Interaction**: Created by `McpServerHandle::start`; calls arrive via
//! `call_tool` from the registry. Request/response multiplexing uses a
//! monotonically increasing id and a mutex-guarded `id → oneshot` map: the
//! call site inserts, the read loop resolves.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

use crate::settings::McpServerConfig;

use super::error::McpError;
use super::protocol::{
    self, InitializeResult, JsonRpcFrame, RemoteTool, ServerInfo, ToolsListResult,
};

/// Deadline for the initialize handshake and tools/list.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcFrame>>>>;

/// Live stdio session with one MCP server process.
pub struct McpSession {
    server_name: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    stopped_rx: watch::Receiver<bool>,
    child: Mutex<Option<Child>>,
}

impl McpSession {
    /// Spawns the server process and completes the protocol handshake:
    /// `initialize` → `notifications/initialized` → `tools/list`. No other
    /// request is issued before the handshake finishes.
    pub async fn spawn(
        config: &McpServerConfig,
    ) -> Result<(Self, ServerInfo, Vec<RemoteTool>), McpError> {
        let mut child = tokio::process::Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::unavailable(&config.name, format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::unavailable(&config.name, "no stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::unavailable(&config.name, "no stdout pipe"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::unavailable(&config.name, "no stderr pipe"))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (stopped_tx, stopped_rx) = watch::channel(false);

        tokio::spawn(read_loop(
            config.name.clone(),
            stdout,
            Arc::clone(&pending),
            stopped_tx,
        ));
        tokio::spawn(stderr_loop(config.name.clone(), stderr));

        let session = Self {
            server_name: config.name.clone(),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            stopped_rx,
            child: Mutex::new(Some(child)),
        };

        let (info, tools) = session.handshake().await?;
        Ok((session, info, tools))
    }

    async fn handshake(&self) -> Result<(ServerInfo, Vec<RemoteTool>), McpError> {
        let frame = self
            .request("initialize", protocol::initialize_params(), HANDSHAKE_TIMEOUT)
            .await?;
        if let Some(err) = frame.error {
            return Err(McpError::ProtocolError(format!(
                "initialize rejected: {}",
                err.message
            )));
        }
        let result = frame
            .result
            .ok_or_else(|| McpError::ProtocolError("initialize returned no result".into()))?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::ProtocolError(format!("initialize result: {e}")))?;

        self.notify("notifications/initialized", json!({})).await?;

        let frame = self
            .request("tools/list", json!({}), HANDSHAKE_TIMEOUT)
            .await?;
        if let Some(err) = frame.error {
            return Err(McpError::ProtocolError(format!(
                "tools/list rejected: {}",
                err.message
            )));
        }
        let result = frame
            .result
            .ok_or_else(|| McpError::ProtocolError("tools/list returned no result".into()))?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| McpError::ProtocolError(format!("tools/list result: {e}")))?;

        debug!(
            server = %self.server_name,
            remote = %init.server_info.name,
            tools = list.tools.len(),
            "mcp session ready"
        );
        Ok((init.server_info, list.tools))
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped_rx.borrow()
    }

    /// Watch that flips to true when the read loop observes EOF.
    pub fn stopped_watch(&self) -> watch::Receiver<bool> {
        self.stopped_rx.clone()
    }

    /// Issues one request and waits for its response up to `timeout`.
    ///
    /// On deadline: the pending entry is cancelled, a best-effort
    /// `notifications/cancelled` is sent, and the call returns `Timeout`
    /// without killing the process; the child's late reply is discarded by
    /// the read loop.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<JsonRpcFrame, McpError> {
        if self.is_stopped() {
            return Err(McpError::unavailable(&self.server_name, "session stopped"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);

        let line = protocol::request_line(id, method, &params);
        if let Err(e) = self.write_line(&line).await {
            self.lock_pending().remove(&id);
            return Err(McpError::unavailable(
                &self.server_name,
                format!("write failed: {e}"),
            ));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(McpError::unavailable(
                &self.server_name,
                "session closed while waiting",
            )),
            Err(_) => {
                self.lock_pending().remove(&id);
                let _ = self
                    .notify("notifications/cancelled", json!({ "requestId": id }))
                    .await;
                Err(McpError::Timeout { timeout })
            }
        }
    }

    /// Sends a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let line = protocol::notification_line(method, &params);
        self.write_line(&line)
            .await
            .map_err(|e| McpError::unavailable(&self.server_name, format!("write failed: {e}")))
    }

    /// `tools/call {name, arguments}`; returns the raw result value.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let frame = self
            .request(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
                timeout,
            )
            .await?;
        if let Some(err) = frame.error {
            return Err(McpError::ToolExecutionFailed {
                remote_message: err.message,
            });
        }
        Ok(frame.result.unwrap_or(Value::Null))
    }

    /// Kills the child process. Pending calls fail via the read loop EOF.
    pub fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = child.start_kill();
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<JsonRpcFrame>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Parses stdout frames and resolves pending calls. Frames without an id are
/// notifications (logged, otherwise ignored). EOF flips the stopped watch
/// and drops every pending sender, failing in-flight calls.
async fn read_loop(
    server: String,
    stdout: ChildStdout,
    pending: PendingMap,
    stopped_tx: watch::Sender<bool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcFrame>(line) {
                    Ok(frame) => match frame.id_u64() {
                        Some(id) => {
                            let sender = pending
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .remove(&id);
                            match sender {
                                Some(tx) => {
                                    let _ = tx.send(frame);
                                }
                                // Cancelled or unknown id: discard the late reply.
                                None => trace!(%server, id, "discarding reply for unknown id"),
                            }
                        }
                        None => {
                            if let Some(method) = &frame.method {
                                debug!(%server, %method, "mcp notification");
                            } else {
                                trace!(%server, "frame without id or method");
                            }
                        }
                    },
                    Err(e) => warn!(%server, error = %e, "unparseable protocol frame"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%server, error = %e, "mcp stdout read error");
                break;
            }
        }
    }
    debug!(%server, "mcp stdout closed");
    let _ = stopped_tx.send(true);
    pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
}

/// Captures child stderr into the diagnostic log.
async fn stderr_loop(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%server, "{line}");
    }
}
