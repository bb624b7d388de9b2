//! Gateway Chat Completions client implementing [`LlmClient`].
//!
//! Talks to the configured OpenAI-compatible gateway (`GATEWAY_BASE`) over
//! HTTP. The request body is built from the orchestrator's own wire DTOs so
//! the outbound shape matches what the inbound interface accepts: messages
//! are serialized verbatim (including assistant tool_calls and tool-role
//! replay), tools are converted from [`ToolDescriptor`]s at this boundary,
//! and the classifier can demand `response_format = {type:"json_object"}`.
//!
//! Transient failures (timeouts, connect errors, 5xx) are retried once
//! before the error is surfaced.
//!
//! **Interaction**: Implements [`LlmClient`]; used by the agent loop (agent
//! model) and the intent classifier (intent model) with separate instances
//! sharing one HTTP connection pool.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::message::Message;
use crate::openai_sse::{ChatCompletion, ChatCompletionChunk};
use crate::tool::ToolCall;

use super::{ChatOptions, GatewayError, LlmClient, LlmResponse, LlmUsage, MessageChunk};

/// Chat client bound to one gateway base URL and one model name.
#[derive(Clone)]
pub struct ChatGateway {
    http: reqwest::Client,
    base: String,
    model: String,
}

impl ChatGateway {
    /// Builds a client for `{base}/v1/chat/completions` with the given
    /// per-request timeout.
    pub fn new(
        base: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Same gateway and pool, different model (e.g. the classifier model).
    pub fn for_model(&self, model: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base: self.base.clone(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base)
    }

    fn build_body(&self, messages: &[Message], opts: &ChatOptions, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !opts.tools.is_empty() {
            body["tools"] = Value::Array(
                opts.tools.iter().map(|t| t.to_openai_function()).collect(),
            );
            body["tool_choice"] = Value::String(opts.tool_choice.as_str().to_string());
        }
        if opts.json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    fn map_send_error(e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }

    async fn post_once(&self, body: &Value) -> Result<reqwest::Response, GatewayError> {
        let resp = self
            .http
            .post(self.url())
            .json(body)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(resp)
    }

    /// POSTs the body, retrying once on transient failures.
    async fn post_with_retry(&self, body: &Value) -> Result<reqwest::Response, GatewayError> {
        match self.post_once(body).await {
            Ok(resp) => Ok(resp),
            Err(e) if e.is_transient() => {
                warn!(model = %self.model, error = %e, "gateway call failed, retrying once");
                self.post_once(body).await
            }
            Err(e) => Err(e),
        }
    }

    fn response_to_llm(completion: ChatCompletion) -> Result<LlmResponse, GatewayError> {
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::InvalidResponse("no choices in completion".into()))?;
        let msg = choice.message;
        let tool_calls = msg
            .tool_calls
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(ToolCall::from_payload)
            .collect();
        Ok(LlmResponse {
            content: msg.text(),
            tool_calls,
            usage: completion.usage,
        })
    }
}

#[async_trait]
impl LlmClient for ChatGateway {
    async fn invoke(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
    ) -> Result<LlmResponse, GatewayError> {
        let body = self.build_body(messages, opts, false);
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = opts.tools.len(),
            json_object = opts.json_object,
            "gateway chat create"
        );
        let resp = self.post_with_retry(&body).await?;
        let completion: ChatCompletion = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        Self::response_to_llm(completion)
    }

    /// Streaming variant: reads the upstream SSE stream, forwards content
    /// deltas through `chunk_tx`, and accumulates tool calls by index.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
        chunk_tx: Option<mpsc::Sender<MessageChunk>>,
    ) -> Result<LlmResponse, GatewayError> {
        let Some(chunk_tx) = chunk_tx else {
            return self.invoke(messages, opts).await;
        };

        let body = self.build_body(messages, opts, true);
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = opts.tools.len(),
            "gateway chat create_stream"
        );
        let resp = self.post_with_retry(&body).await?;

        let mut full_content = String::new();
        // index -> (id, name, arguments), ordered by index.
        let mut tool_call_map: BTreeMap<u32, (String, String, String)> = BTreeMap::new();
        let mut usage: Option<LlmUsage> = None;

        // Byte-accurate buffering: a chunk boundary may split a UTF-8
        // character, so decoding happens per complete SSE event only.
        let mut buffer: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();
        'outer: while let Some(piece) = stream.next().await {
            let piece = piece.map_err(Self::map_send_error)?;
            buffer.extend_from_slice(&piece);

            while let Some(split) = find_event_boundary(&buffer) {
                let event_bytes: Vec<u8> = buffer.drain(..split + 2).collect();
                let event = String::from_utf8_lossy(&event_bytes);
                for line in event.lines() {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
                        Ok(c) => c,
                        Err(e) => {
                            trace!(error = %e, "skipping unparseable stream chunk");
                            continue;
                        }
                    };
                    if let Some(u) = chunk.usage {
                        usage = Some(u);
                    }
                    for choice in chunk.choices {
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                full_content.push_str(&content);
                                let _ = chunk_tx
                                    .send(MessageChunk {
                                        content,
                                    })
                                    .await;
                            }
                        }
                        for tc in choice.delta.tool_calls.unwrap_or_default() {
                            let entry = tool_call_map
                                .entry(tc.index)
                                .or_insert_with(|| (String::new(), String::new(), String::new()));
                            if let Some(id) = tc.id {
                                if !id.is_empty() {
                                    entry.0 = id;
                                }
                            }
                            if let Some(func) = tc.function {
                                if let Some(name) = func.name {
                                    entry.1.push_str(&name);
                                }
                                if let Some(args) = func.arguments {
                                    entry.2.push_str(&args);
                                }
                            }
                        }
                    }
                }
            }
        }

        let tool_calls = tool_call_map
            .into_values()
            .map(|(id, name, arguments)| ToolCall {
                id,
                name,
                arguments,
            })
            .collect();

        Ok(LlmResponse {
            content: full_content,
            tool_calls,
            usage,
        })
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}
