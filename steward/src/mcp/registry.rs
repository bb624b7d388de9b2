//! Registry over all configured MCP servers.
//!
//! Exposes the union of discovered tools (first-wins dedup across servers,
//! with a warning) and routes calls: circuit breaker check, then tool cache,
//! then the owning server's session. Implements [`ToolSource`] so the
//! executor and agent loop stay independent of the transport.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::cache::ToolCache;
use crate::settings::McpServerConfig;
use crate::tool::{ToolCall, ToolDescriptor, ToolErrorKind, ToolResult, ToolSource};

use super::breaker::CircuitBreaker;
use super::error::McpError;
use super::server::{McpServerHandle, ServerState};

/// Registry owning every server handle plus breaker and cache state.
pub struct McpRegistry {
    handles: Vec<Arc<McpServerHandle>>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<ToolCache>,
}

impl McpRegistry {
    /// Starts every enabled server (failures are logged and non-fatal; the
    /// supervisor keeps retrying with backoff) and spawns one supervisor
    /// task per server.
    pub async fn connect(
        configs: Vec<McpServerConfig>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<ToolCache>,
        default_tool_timeout: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Arc<Self> {
        let handles: Vec<Arc<McpServerHandle>> = configs
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| Arc::new(McpServerHandle::new(c, default_tool_timeout)))
            .collect();

        let start_results = join_all(handles.iter().map(|h| h.start())).await;
        for (handle, result) in handles.iter().zip(start_results) {
            if let Err(e) = result {
                error!(server = %handle.name(), error = %e, "failed to start mcp server");
            }
        }

        for handle in &handles {
            tokio::spawn(Arc::clone(handle).run_supervisor(cancel.clone()));
        }

        Arc::new(Self {
            handles,
            breaker,
            cache,
        })
    }

    /// Registry without any servers, for setups running tool-free.
    pub fn empty(breaker: Arc<CircuitBreaker>, cache: Arc<ToolCache>) -> Arc<Self> {
        Arc::new(Self {
            handles: Vec::new(),
            breaker,
            cache,
        })
    }

    /// Union of ToolDescriptors across all ready servers. Duplicate names
    /// keep the first discovery and warn about the rest.
    pub fn union_tools(&self) -> Vec<ToolDescriptor> {
        let mut seen = std::collections::HashSet::new();
        let mut tools = Vec::new();
        for handle in &self.handles {
            for descriptor in handle.descriptors() {
                if seen.insert(descriptor.name.clone()) {
                    tools.push(descriptor);
                } else {
                    warn!(
                        tool = %descriptor.name,
                        server = %descriptor.server,
                        "duplicate tool name; keeping first discovery"
                    );
                }
            }
        }
        tools
    }

    fn find_route(&self, tool_name: &str) -> Option<(&Arc<McpServerHandle>, ToolDescriptor)> {
        for handle in &self.handles {
            if let Some(d) = handle.descriptors().into_iter().find(|d| d.name == tool_name) {
                return Some((handle, d));
            }
        }
        None
    }

    async fn dispatch(&self, tool_name: &str, arguments: &Value) -> Result<Value, McpError> {
        let (handle, descriptor) = self
            .find_route(tool_name)
            .ok_or_else(|| McpError::ToolNotFound(tool_name.to_string()))?;

        let breaker_key = format!("{}:{}", descriptor.server, tool_name);
        if !self.breaker.is_allowed(&breaker_key) {
            return Err(McpError::CircuitOpen(breaker_key));
        }

        if descriptor.cacheable {
            if let Some(hit) = self.cache.get(tool_name, arguments) {
                return Ok(hit);
            }
        }

        match handle.call(tool_name, arguments.clone()).await {
            Ok(result) => {
                self.breaker.record_success(&breaker_key);
                if descriptor.cacheable {
                    self.cache.put(tool_name, arguments, result.clone());
                }
                Ok(result)
            }
            Err(e) => {
                if e.counts_for_breaker() {
                    self.breaker.record_failure(&breaker_key);
                }
                Err(e)
            }
        }
    }

    /// Per-server lifecycle states, for the health and stats endpoints.
    pub fn server_states(&self) -> Vec<(String, ServerState)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.state()))
            .collect()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &Arc<ToolCache> {
        &self.cache
    }

    /// Stops every server session.
    pub async fn shutdown(&self) {
        for handle in &self.handles {
            handle.stop().await;
        }
    }
}

#[async_trait]
impl ToolSource for McpRegistry {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.union_tools()
    }

    async fn call_tool(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let arguments = match call.parsed_arguments() {
            Ok(args) if args.is_object() => args,
            Ok(_) => {
                return ToolResult::failure(
                    &call.id,
                    ToolErrorKind::InvalidArguments,
                    "tool arguments must be a JSON object",
                    elapsed_ms(start),
                )
            }
            Err(e) => {
                return ToolResult::failure(
                    &call.id,
                    ToolErrorKind::InvalidArguments,
                    format!("failed to parse arguments JSON: {e}"),
                    elapsed_ms(start),
                )
            }
        };

        match self.dispatch(&call.name, &arguments).await {
            Ok(result) => ToolResult::success(&call.id, result, elapsed_ms(start)),
            Err(e) => ToolResult::failure(&call.id, e.kind(), e.to_string(), elapsed_ms(start)),
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
