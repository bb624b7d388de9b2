//! OpenAI-compatible Chat Completions wire types and SSE adapter.
//!
//! Converts [`AgentEvent`](crate::agent::AgentEvent)s into SSE lines in the
//! OpenAI streaming format. No HTTP dependency: callers feed events and
//! consume SSE lines (or hand a sink channel to stream them as produced).
//!
//! # Types
//!
//! - **[`ChatCompletionRequest`]**: Inbound request body DTO.
//! - **[`ChatCompletion`]**: Non-streaming completion (both directions).
//! - **[`ChatCompletionChunk`]**: Streaming chunk DTO (both directions).
//! - **[`StreamToSse`]**: Stateful adapter turning agent events into SSE lines.
//! - **[`parse_chat_request`]**: Validation + normalization to internal messages.

mod chunk;
mod completion;
mod parse;
mod request;

pub use chunk::{ChatCompletionChunk, ChunkChoice, Delta, DeltaToolCall, DeltaToolCallFunction};
pub use completion::{
    new_completion_id, now_unix_secs, ChatChoice, ChatCompletion, LOGICAL_MODEL_ID,
};
pub use parse::{parse_chat_request, ParseError, ParsedChatRequest};
pub use request::{ChatCompletionRequest, IncomingMessage, StreamOptions};

use tokio::sync::mpsc;

use crate::agent::AgentEvent;
use crate::llm::LlmUsage;

/// Metadata shared by all chunks in one stream (same id, created, model).
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    /// Completion id (e.g. "chatcmpl-xxx").
    pub id: String,
    /// Model name to echo in chunks; the stable logical id.
    pub model: String,
    /// Unix timestamp (seconds). If None, uses current time at first chunk.
    pub created: Option<u64>,
}

impl ChunkMeta {
    pub fn resolve_created(&mut self) -> u64 {
        match self.created {
            Some(c) => c,
            None => {
                let secs = now_unix_secs();
                self.created = Some(secs);
                secs
            }
        }
    }
}

/// Converts [`AgentEvent`]s into OpenAI SSE lines.
///
/// Feed events via [`feed`](StreamToSse::feed); call
/// [`finish`](StreamToSse::finish) once after the run ends, then
/// [`take_lines`](StreamToSse::take_lines) to get `data: <JSON>\n\n` strings.
/// When constructed with [`new_with_sink`](StreamToSse::new_with_sink), each
/// line is also sent to the channel as it is produced (for HTTP streaming).
pub struct StreamToSse {
    meta: ChunkMeta,
    include_usage: bool,
    usage: Option<LlmUsage>,
    lines: Vec<String>,
    sent_initial: bool,
    sink: Option<mpsc::Sender<String>>,
}

impl StreamToSse {
    pub fn new(meta: ChunkMeta, include_usage: bool) -> Self {
        Self {
            meta,
            include_usage,
            usage: None,
            lines: Vec::new(),
            sent_initial: false,
            sink: None,
        }
    }

    /// Builds an adapter that also sends each SSE line to `sink` as it is
    /// produced. Use for HTTP streaming: the response body reads the receiver.
    pub fn new_with_sink(meta: ChunkMeta, include_usage: bool, sink: mpsc::Sender<String>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::new(meta, include_usage)
        }
    }

    fn push_line(&mut self, line: String) {
        if let Some(ref tx) = self.sink {
            let _ = tx.try_send(line.clone());
        }
        self.lines.push(line);
    }

    fn chunk(&mut self, delta: Delta, finish_reason: Option<String>) -> ChatCompletionChunk {
        let created = self.meta.resolve_created();
        ChatCompletionChunk {
            id: self.meta.id.clone(),
            object: ChatCompletionChunk::OBJECT.to_string(),
            created,
            model: self.meta.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    /// Feeds one agent event, possibly pushing SSE lines into the buffer.
    pub fn feed(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Chunk(chunk) => {
                if !self.sent_initial {
                    self.sent_initial = true;
                    let initial = self.chunk(
                        Delta {
                            role: Some("assistant".to_string()),
                            content: Some(String::new()),
                            tool_calls: None,
                        },
                        None,
                    );
                    self.push_line(write_sse_line(&initial));
                }
                let c = self.chunk(
                    Delta {
                        role: None,
                        content: Some(chunk.content),
                        tool_calls: None,
                    },
                    None,
                );
                self.push_line(write_sse_line(&c));
            }
            AgentEvent::Status(message) => {
                // Discrete system status event between completion chunks.
                let line = format!(
                    "data: {}\n\n",
                    serde_json::to_string(&serde_json::json!({
                        "type": "status",
                        "message": message,
                    }))
                    .expect("status serialization is infallible")
                );
                self.push_line(line);
            }
            AgentEvent::Usage(usage) => {
                self.usage = Some(usage);
            }
        }
    }

    /// Emits the final chunk (`delta: {}`, `finish_reason: "stop"`, optional
    /// usage) followed by the `[DONE]` sentinel. Call once after the run ends.
    pub fn finish(&mut self) {
        let created = self.meta.resolve_created();
        let final_chunk = ChatCompletionChunk {
            id: self.meta.id.clone(),
            object: ChatCompletionChunk::OBJECT.to_string(),
            created,
            model: self.meta.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta::default(),
                finish_reason: Some("stop".to_string()),
            }],
            usage: if self.include_usage {
                self.usage.clone()
            } else {
                None
            },
        };
        self.push_line(write_sse_line(&final_chunk));
        self.push_line("data: [DONE]\n\n".to_string());
    }

    /// Returns and clears the collected SSE lines.
    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

/// Serializes a chunk to a single SSE line: `data: <JSON>\n\n`.
pub fn write_sse_line(chunk: &ChatCompletionChunk) -> String {
    let json = serde_json::to_string(chunk).expect("chunk serialization is infallible");
    format!("data: {json}\n\n")
}
