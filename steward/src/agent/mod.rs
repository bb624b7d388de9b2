//! Agent loop: the bounded LLM ↔ tool dialogue driving a single request.

pub mod runner;

pub use runner::{AgentError, AgentLoop, AgentOutcome, AGENT_SYSTEM_PROMPT};

use crate::llm::{LlmUsage, MessageChunk};

/// Events emitted while a request runs. Content chunks carry the final
/// assistant message token-by-token; status events surface component
/// boundaries ("invoking tool X") without leaking intermediate reasoning.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    Status(String),
    Chunk(MessageChunk),
    Usage(LlmUsage),
}
