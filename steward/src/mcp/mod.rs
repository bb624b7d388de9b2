//! MCP transport layer: stdio subprocesses speaking JSON-RPC 2.0.
//!
//! Each configured server is a long-lived child process. The layer is
//! structured as the design notes prescribe: a supervisor per server
//! ([`McpServerHandle`]) owning a session ([`McpSession`]) with a writer
//! handle and a line-reader task, a pending-call map for request/response
//! multiplexing, per-call deadlines, and a per-(server, tool)
//! [`CircuitBreaker`]. The [`McpRegistry`] aggregates discovery and routes
//! calls through breaker and cache.

pub mod breaker;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use error::McpError;
pub use protocol::{JsonRpcFrame, RemoteTool, ServerInfo, PROTOCOL_VERSION};
pub use registry::McpRegistry;
pub use server::{McpServerHandle, ServerState};
pub use session::McpSession;
