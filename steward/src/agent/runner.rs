//! The agent loop runner.
//!
//! One run: prepend the tool-policy system message, resolve the active tool
//! subset via the selection pipeline, then loop (gateway call with
//! `tool_choice = auto`, dispatch any tool calls through the parallel
//! executor, append one tool message per call in input order) under a hard
//! step cap. On hitting the cap, one final summarization call is made with
//! tools disabled; tool calls it still emits are refused.
//!
//! A failed tool never aborts the request: the failure rides back to the
//! model inside the tool message. A gateway failure (after its single
//! retry) ends the run with a final assistant message explaining the
//! problem, so the outer request still completes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::ParallelExecutor;
use crate::llm::{ChatOptions, GatewayError, LlmClient, LlmUsage, MessageChunk, ToolChoiceMode};
use crate::message::{Message, Role};
use crate::select::{Selection, ToolSelector};
use crate::tool::{ToolDescriptor, ToolSource};

use super::AgentEvent;

/// Fixed system message describing tool-use policy.
pub const AGENT_SYSTEM_PROMPT: &str = "\
You are a local automation agent with access to tools provided by connected servers.

Tool usage:
- When the user asks for something a tool can do (files, search, system state,
  memory), you MUST use the available tools rather than answering from memory
  or giving generic advice. Carry out the operations, then describe what you did.
- Inspect before you act: use listing and info tools to understand state
  before modifying anything.
- If a tool call fails, report the error and suggest a reasonable next step.

Conversation style:
- Keep answers concise and focused on results.
- Only show raw tool output when explicitly requested or when it is small and
  directly relevant.";

/// Appended when the model keeps requesting tools after the step budget.
const BUDGET_NOTE: &str = "[exceeded-tool-step-budget: further tool calls were not executed]";

/// Result of one agent run.
#[derive(Debug)]
pub struct AgentOutcome {
    /// Final assistant message.
    pub message: Message,
    /// Accumulated token usage across all gateway calls.
    pub usage: Option<LlmUsage>,
    pub gateway_calls: u32,
    pub tool_calls_executed: u32,
    /// True when the step cap was hit and the run ended via summarization.
    pub budget_exhausted: bool,
}

/// Terminal agent-loop failures. Everything else degrades into an
/// explanatory final message.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("request cancelled")]
    Cancelled,
}

/// Orchestrates one request.
pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    selector: Option<Arc<ToolSelector>>,
    source: Arc<dyn ToolSource>,
    executor: ParallelExecutor,
    feedback: Option<Arc<crate::select::FeedbackStore>>,
    max_steps: u32,
}

impl AgentLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        selector: Option<Arc<ToolSelector>>,
        source: Arc<dyn ToolSource>,
        max_parallel_tools: usize,
        feedback: Option<Arc<crate::select::FeedbackStore>>,
        max_steps: u32,
    ) -> Self {
        Self {
            llm,
            selector,
            executor: ParallelExecutor::new(Arc::clone(&source), max_parallel_tools),
            source,
            feedback,
            max_steps: max_steps.max(1),
        }
    }

    /// Runs the loop over an already-validated conversation. When `events`
    /// is set, the final assistant message is streamed as chunks and tool
    /// dispatches surface as status events.
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        events: Option<mpsc::Sender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        if !messages.iter().any(|m| m.role == Role::System) {
            messages.insert(0, Message::system(AGENT_SYSTEM_PROMPT));
        }

        // The selector derives the selection query from the conversation:
        // the raw last user message, or its standalone rewrite when query
        // refinement is enabled.
        let query = match &self.selector {
            Some(selector) => selector.refine_query(&messages).await,
            None => messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(Message::text)
                .unwrap_or_default(),
        };

        let menu = self.source.list_tools().await;
        let selection = match (&self.selector, menu.is_empty()) {
            (Some(selector), false) => selector.select(&query, &menu).await,
            _ => Selection {
                tools: menu.clone(),
                complexity: "low".into(),
                target_servers: Vec::new(),
                auto_execute: Vec::new(),
                from_cache: false,
            },
        };
        debug!(
            active_tools = selection.tools.len(),
            menu = menu.len(),
            complexity = %selection.complexity,
            "tool subset resolved"
        );

        let descriptors: HashMap<String, ToolDescriptor> = selection
            .tools
            .iter()
            .map(|d| (d.name.clone(), d.clone()))
            .collect();
        let opts = ChatOptions {
            tools: selection.tools.clone(),
            tool_choice: ToolChoiceMode::Auto,
            json_object: false,
        };

        let want_stream = events.is_some();
        let mut usage_total: Option<LlmUsage> = None;
        let mut gateway_calls = 0u32;
        let mut tool_calls_executed = 0u32;
        let mut recorded_servers: HashSet<String> = HashSet::new();

        for step in 0..self.max_steps {
            let response = tokio::select! {
                r = self.step(&messages, &opts, want_stream) => r,
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            };
            let (response, chunks) = match response {
                Ok(r) => r,
                Err(e) => {
                    return Ok(self.gateway_failure(e, &events, gateway_calls, tool_calls_executed).await)
                }
            };
            gateway_calls += 1;
            accumulate_usage(&mut usage_total, response.usage.as_ref());

            if response.tool_calls.is_empty() {
                self.emit_final(&events, chunks, &response.content, usage_total.as_ref())
                    .await;
                return Ok(AgentOutcome {
                    message: Message::assistant(response.content),
                    usage: usage_total,
                    gateway_calls,
                    tool_calls_executed,
                    budget_exhausted: false,
                });
            }

            debug!(step, tool_calls = response.tool_calls.len(), "dispatching tool batch");
            let payloads = response.tool_calls.iter().map(|c| c.to_payload()).collect();
            let content = if response.content.is_empty() {
                None
            } else {
                Some(response.content.clone().into())
            };
            messages.push(Message::assistant_with_tool_calls(content, payloads));

            if let Some(events) = &events {
                for call in &response.tool_calls {
                    let _ = events
                        .send(AgentEvent::Status(format!("invoking tool {}", call.name)))
                        .await;
                }
            }

            let results = self
                .executor
                .execute_batch(&response.tool_calls, &descriptors, &cancel)
                .await;
            for (call, result) in response.tool_calls.iter().zip(&results) {
                if result.ok {
                    if let (Some(feedback), Some(descriptor)) =
                        (&self.feedback, descriptors.get(&call.name))
                    {
                        if recorded_servers.insert(descriptor.server.clone()) {
                            feedback.record_success(&query, &descriptor.server).await;
                        }
                    }
                }
                messages.push(Message::tool(
                    &call.id,
                    &call.name,
                    result.to_body().to_string(),
                ));
                tool_calls_executed += 1;
            }

            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
        }

        // Step cap hit: one final call to let the model summarize, with
        // tool use turned off.
        info!(max_steps = self.max_steps, "tool step budget exhausted; summarizing");
        let summary_opts = ChatOptions {
            tools: selection.tools.clone(),
            tool_choice: ToolChoiceMode::None,
            json_object: false,
        };
        let response = tokio::select! {
            r = self.step(&messages, &summary_opts, want_stream) => r,
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
        };
        let (response, chunks) = match response {
            Ok(r) => r,
            Err(e) => {
                return Ok(self.gateway_failure(e, &events, gateway_calls, tool_calls_executed).await)
            }
        };
        gateway_calls += 1;
        accumulate_usage(&mut usage_total, response.usage.as_ref());

        let mut content = response.content;
        if !response.tool_calls.is_empty() {
            warn!(
                refused = response.tool_calls.len(),
                "model kept requesting tools past the budget"
            );
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(BUDGET_NOTE);
        }

        self.emit_final(&events, chunks, &content, usage_total.as_ref()).await;
        Ok(AgentOutcome {
            message: Message::assistant(content),
            usage: usage_total,
            gateway_calls,
            tool_calls_executed,
            budget_exhausted: true,
        })
    }

    /// One gateway call. Streaming requests collect chunks so they can be
    /// relayed only if this step turns out to be the final message;
    /// intermediate reasoning is never leaked.
    async fn step(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
        want_stream: bool,
    ) -> Result<(crate::llm::LlmResponse, Vec<MessageChunk>), GatewayError> {
        if !want_stream {
            return Ok((self.llm.invoke(messages, opts).await?, Vec::new()));
        }
        let (tx, mut rx) = mpsc::channel(64);
        let collector =
            tokio::spawn(async move {
                let mut chunks = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    chunks.push(chunk);
                }
                chunks
            });
        let response = self.llm.invoke_stream(messages, opts, Some(tx)).await?;
        let chunks = collector.await.unwrap_or_default();
        Ok((response, chunks))
    }

    async fn emit_final(
        &self,
        events: &Option<mpsc::Sender<AgentEvent>>,
        chunks: Vec<MessageChunk>,
        content: &str,
        usage: Option<&LlmUsage>,
    ) {
        let Some(events) = events else { return };
        let streamed: String = chunks.iter().map(|c| c.content.as_str()).collect();
        if chunks.is_empty() || streamed != content {
            // No token stream (or post-processed content): send the full
            // message as one chunk so the stream still matches the
            // non-streaming body.
            if !content.is_empty() {
                let _ = events
                    .send(AgentEvent::Chunk(MessageChunk {
                        content: content.to_string(),
                    }))
                    .await;
            }
        } else {
            for chunk in chunks {
                let _ = events.send(AgentEvent::Chunk(chunk)).await;
            }
        }
        if let Some(usage) = usage {
            let _ = events.send(AgentEvent::Usage(usage.clone())).await;
        }
    }

    async fn gateway_failure(
        &self,
        error: GatewayError,
        events: &Option<mpsc::Sender<AgentEvent>>,
        gateway_calls: u32,
        tool_calls_executed: u32,
    ) -> AgentOutcome {
        warn!(error = %error, "gateway failed; ending run with explanation");
        let content = format!(
            "I could not reach the language model gateway ({error}). \
             Please check that the gateway is running and try again."
        );
        self.emit_final(events, Vec::new(), &content, None).await;
        AgentOutcome {
            message: Message::assistant(content),
            usage: None,
            gateway_calls,
            tool_calls_executed,
            budget_exhausted: false,
        }
    }
}

fn accumulate_usage(total: &mut Option<LlmUsage>, step: Option<&LlmUsage>) {
    let Some(step) = step else { return };
    match total {
        Some(t) => {
            t.prompt_tokens += step.prompt_tokens;
            t.completion_tokens += step.completion_tokens;
            t.total_tokens += step.total_tokens;
        }
        None => *total = Some(step.clone()),
    }
}
