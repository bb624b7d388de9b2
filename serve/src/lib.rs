//! HTTP surface for the Steward orchestrator.
//!
//! Routes:
//! - `POST /v1/chat/completions`: OpenAI-compatible body; JSON response or
//!   an SSE stream of chat-completion chunks terminated by `data: [DONE]`.
//! - `GET /`: identity/health snapshot.
//! - `GET /stats`: cache, classification, and circuit-breaker statistics.
//!
//! Optional Bearer auth on the chat route when `ROUTER_AUTH_TOKEN` is set.

mod app;
mod chat;
mod error;

pub use app::{router, AppState};
