//! Parallel executor: runs one tool-call batch in dependency levels.
//!
//! Calls inside a level run concurrently under a bounded semaphore; levels
//! run strictly in order. Results mirror input order regardless of
//! completion order, and a failure in one call never cancels its peers:
//! the failure is encoded in that call's [`ToolResult`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tool::{ToolCall, ToolDescriptor, ToolErrorKind, ToolResult, ToolSource};

use super::resolver::execution_levels;

/// Bounded-concurrency executor over a [`ToolSource`].
pub struct ParallelExecutor {
    source: Arc<dyn ToolSource>,
    semaphore: Arc<Semaphore>,
}

impl ParallelExecutor {
    pub fn new(source: Arc<dyn ToolSource>, max_parallel: usize) -> Self {
        Self {
            source,
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// Executes a batch from one LLM step. The output vector has exactly one
    /// result per call, in input order.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        descriptors: &HashMap<String, ToolDescriptor>,
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        let levels = execution_levels(calls, descriptors);
        debug!(
            calls = calls.len(),
            levels = levels.len(),
            "executing tool batch"
        );

        let mut slots: Vec<Option<ToolResult>> = (0..calls.len()).map(|_| None).collect();
        for level in levels {
            let level_results = join_all(level.iter().map(|&i| {
                let call = &calls[i];
                async move {
                    let _permit = self
                        .semaphore
                        .acquire()
                        .await
                        .expect("executor semaphore never closed");
                    if cancel.is_cancelled() {
                        return (i, cancelled_result(call));
                    }
                    tokio::select! {
                        result = self.source.call_tool(call) => (i, result),
                        _ = cancel.cancelled() => (i, cancelled_result(call)),
                    }
                }
            }))
            .await;
            for (i, result) in level_results {
                slots[i] = Some(result);
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.unwrap_or_else(|| cancelled_result(&calls[i])))
            .collect()
    }
}

fn cancelled_result(call: &ToolCall) -> ToolResult {
    ToolResult::failure(
        &call.id,
        ToolErrorKind::Cancelled,
        "request cancelled before tool completed",
        0.0,
    )
}
