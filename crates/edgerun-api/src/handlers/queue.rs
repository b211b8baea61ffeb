//! Queue admission, status, and trace-streaming handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use edgerun_core::{AppError, EnqueueRequest, EnqueueResponse, QueueEntry, SubscribeRequest};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[tracing::instrument(skip(state, body))]
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    ValidatedJson(body): ValidatedJson<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, HttpAppError> {
    if body.task_id.trim().is_empty() {
        return Err(AppError::InvalidInput("taskId must not be empty".to_string()).into());
    }
    let params = serde_json::to_string(&body.params)?;
    let queue_id = state.queue.enqueue(&state.metadata, &body.task_id, &params).await?;
    Ok(Json(EnqueueResponse { queue_id }))
}

#[tracing::instrument(skip(state))]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(queue_id): Path<String>,
) -> Result<Json<QueueEntry>, HttpAppError> {
    let entry = state.queue.get_entry(&queue_id).await?;
    Ok(Json(entry))
}

/// Streams Trace Records for a Queue Entry as Server-Sent Events. The stream
/// ends with a `data: [DONE]` frame once the entry reaches a terminal
/// status; a client disconnect drops the underlying stream (and with it the
/// `CancellationToken`), stopping the tailer.
#[tracing::instrument(skip(state, body))]
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    ValidatedJson(body): ValidatedJson<SubscribeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpAppError> {
    // Fail fast if the queue entry does not exist, rather than opening a
    // stream that would otherwise sit idle forever.
    state.queue.get_entry(&body.queue_id).await?;

    let cancel = CancellationToken::new();
    let trace_stream = edgerun_worker::subscribe(state.queue.clone(), body.queue_id, cancel);

    let events = trace_stream.map(|record| {
        let data = serde_json::to_string(&record).unwrap_or_else(|_| "null".to_string());
        Ok(Event::default().data(data))
    });
    let done = futures_util::stream::once(async { Ok(Event::default().data("[DONE]")) });

    Ok(Sse::new(events.chain(done)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
