//! # Steward
//!
//! A local LLM **agent orchestrator**: a personal AI gateway that accepts
//! OpenAI-compatible chat requests, decides which tools and sub-models to
//! involve, executes tool calls against a fleet of MCP (Model Context
//! Protocol) servers, and streams a merged response back.
//!
//! ## Subsystems
//!
//! - **Tool selection** ([`select`]): a staged pipeline (query
//!   normalization, a persistent classification cache, the feedback learning
//!   loop, a domain micro-menu heuristic, semantic retrieval over the tool
//!   index, and an LLM classifier with tolerant JSON parsing) that narrows
//!   the tool menu per request.
//! - **Agent loop** ([`agent`]): the bounded reasoning/tool-execution loop
//!   that calls the gateway, dispatches tool calls, feeds results back, and
//!   streams the final assistant message.
//! - **MCP transport** ([`mcp`]): long-lived stdio subprocesses speaking
//!   JSON-RPC, with lifecycle supervision, per-call deadlines, circuit
//!   breaking, and restart backoff.
//! - **Memory** ([`memory`]): embeddings, the vector store contract, and the
//!   semantic tool index with its initialization barrier.
//! - **Execution** ([`exec`]): dependency-resolved parallel tool execution
//!   under a bounded semaphore.
//! - **Caching** ([`cache`]): LRU + TTL caches and the per-tool
//!   cacheability policy.
//! - **Wire types** ([`openai_sse`]): OpenAI-compatible request/response
//!   DTOs and the SSE chunk adapter.
//!
//! The [`engine::Engine`] wires everything together from [`settings::Settings`];
//! the `serve` crate exposes it over HTTP.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use steward::llm::MockLlm;
//! use steward::agent::AgentLoop;
//! use steward::message::Message;
//! # use steward::tool::{ToolDescriptor, ToolCall, ToolResult, ToolSource};
//! # use async_trait::async_trait;
//! # struct NoTools;
//! # #[async_trait]
//! # impl ToolSource for NoTools {
//! #     async fn list_tools(&self) -> Vec<ToolDescriptor> { vec![] }
//! #     async fn call_tool(&self, call: &ToolCall) -> ToolResult {
//! #         ToolResult::success(&call.id, serde_json::json!({}), 0.0)
//! #     }
//! # }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let llm = Arc::new(MockLlm::new());
//! llm.push_text("hello!");
//! let agent = AgentLoop::new(llm, None, Arc::new(NoTools), 5, None, 8);
//! let outcome = agent
//!     .run(vec![Message::user("hi")], None, Default::default())
//!     .await
//!     .unwrap();
//! println!("{}", outcome.message.text());
//! # }
//! ```

pub mod agent;
pub mod cache;
pub mod engine;
pub mod error;
pub mod exec;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod message;
pub mod openai_sse;
pub mod select;
pub mod settings;
pub mod tool;

pub use agent::{AgentError, AgentEvent, AgentLoop, AgentOutcome};
pub use cache::{canonical_json, Cache, CacheError, CacheStats, InMemoryCache, ToolCache};
pub use engine::Engine;
pub use error::{ErrorBody, ErrorCode};
pub use exec::{execution_levels, ParallelExecutor};
pub use llm::{
    ChatGateway, ChatOptions, GatewayError, LlmClient, LlmResponse, LlmUsage, MessageChunk,
    MockLlm, ToolChoiceMode,
};
pub use mcp::{CircuitBreaker, McpError, McpRegistry, McpServerHandle, McpSession, ServerState};
pub use memory::{
    Embedder, GatewayEmbedder, InMemoryVectorStore, MemoryHandle, StoreError, ToolIndex,
    VectorStore,
};
pub use message::{Content, ContentBlock, Message, Role};
pub use openai_sse::{
    parse_chat_request, write_sse_line, ChatCompletion, ChatCompletionChunk, ChatCompletionRequest,
    ChunkMeta, ParseError, ParsedChatRequest, StreamToSse, LOGICAL_MODEL_ID,
};
pub use select::{
    normalize_query, FeedbackStore, IntentCache, IntentClassification, Selection, ToolSelector,
};
pub use settings::{ConfigError, McpServerConfig, Settings, SettingsSources};
pub use tool::{
    ToolCall, ToolCallPayload, ToolDescriptor, ToolError, ToolErrorKind, ToolResult, ToolSource,
};
