//! The chat-completions handler: JSON body in, completion or SSE stream out.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use futures::Stream;
use steward::agent::AgentEvent;
use steward::openai_sse::{
    new_completion_id, parse_chat_request, ChatCompletion, ChatCompletionRequest, ChunkMeta,
    StreamToSse, LOGICAL_MODEL_ID,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::app::AppState;
use crate::error::{internal_error, validation_error};

/// SSE line buffer; sized generously so a fast final flush never drops
/// chunks on a slow client.
const SSE_CHANNEL_CAPACITY: usize = 1024;

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<ChatCompletionRequest>,
) -> Response {
    let parsed = match parse_chat_request(&body) {
        Ok(p) => p,
        Err(e) => return validation_error(&e),
    };
    debug!(messages = parsed.messages.len(), stream = parsed.stream, "chat request");

    if parsed.stream {
        stream_chat(state, parsed).await
    } else {
        match state
            .engine
            .chat(parsed.messages, None, CancellationToken::new())
            .await
        {
            Ok(outcome) => Json(ChatCompletion::outward(outcome.message, outcome.usage))
                .into_response(),
            Err(e) => internal_error(e.to_string()),
        }
    }
}

async fn stream_chat(state: AppState, parsed: steward::ParsedChatRequest) -> Response {
    let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(SSE_CHANNEL_CAPACITY);
    let (line_tx, line_rx) = mpsc::channel::<String>(SSE_CHANNEL_CAPACITY);

    // Dropping the response body (client disconnect) cancels the run;
    // in-flight tool calls stay bounded by their own deadlines.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let meta = ChunkMeta {
        id: new_completion_id(),
        model: LOGICAL_MODEL_ID.to_string(),
        created: None,
    };
    let include_usage = parsed.include_usage;
    let engine = state.engine.clone();
    let messages = parsed.messages;

    tokio::spawn(async move {
        let mut sse = StreamToSse::new_with_sink(meta, include_usage, line_tx);
        // The run owns the event sender; when its task finishes the sender
        // drops and the pump below drains out.
        let run = tokio::spawn(async move {
            engine.chat(messages, Some(event_tx), cancel.clone()).await
        });
        while let Some(event) = event_rx.recv().await {
            sse.feed(event);
        }
        match run.await {
            Ok(Ok(_)) => sse.finish(),
            Ok(Err(e)) => debug!(error = %e, "stream run ended early"),
            Err(e) => debug!(error = %e, "stream run task failed"),
        }
    });

    let body = SseBody {
        inner: ReceiverStream::new(line_rx),
        _guard: guard,
    };
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| internal_error("failed to build stream response"))
}

/// SSE line stream that cancels the agent run when dropped.
struct SseBody {
    inner: ReceiverStream<String>,
    _guard: DropGuard,
}

impl Stream for SseBody {
    type Item = Result<String, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|opt| opt.map(Ok))
    }
}
