//! The Scheduler: a single polling loop that drives queued entries to a
//! terminal state, dispatching each to the sandbox executor on a bounded
//! worker pool and applying the flat-delay retry policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use edgerun_core::{AppError, AppResult, Permissions, QueueEntry, QueueStatus, TraceStatus};
use edgerun_db::{MetadataStore, QueueStore};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

#[derive(Clone)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub default_timeout_ms: u64,
    pub sandbox_runtime_command: String,
    /// Grace period before a `running` entry left over from a crash is
    /// reaped back to `queued` at scheduler startup.
    pub stale_reap_grace_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 200,
            default_timeout_ms: 30_000,
            sandbox_runtime_command: "node".to_string(),
            stale_reap_grace_secs: 300,
        }
    }
}

/// Handle to the running scheduler loop. Dropping it does not stop the
/// loop; call [`Scheduler::shutdown`] to signal a clean stop.
pub struct Scheduler {
    shutdown_tx: mpsc::Sender<()>,
}

impl Scheduler {
    /// Spawns the scheduler loop on the current Tokio runtime and returns a
    /// handle to it.
    pub fn spawn(metadata: MetadataStore, queue: QueueStore, config: SchedulerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(run(metadata, queue, config, shutdown_rx));
        Self { shutdown_tx }
    }

    /// Signals the loop to stop after its current tick. Does not wait for
    /// in-flight handler invocations to finish; they are cancelled
    /// cooperatively when the process itself is torn down.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn run(
    metadata: MetadataStore,
    queue: QueueStore,
    config: SchedulerConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    if let Err(e) = queue
        .reap_stale_running(ChronoDuration::seconds(config.stale_reap_grace_secs))
        .await
    {
        tracing::error!(error = %e, "stale-running reap failed at scheduler startup");
    }

    let semaphore = Arc::new(Semaphore::new(config.max_workers));
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    tracing::info!(
        max_workers = config.max_workers,
        poll_interval_ms = config.poll_interval_ms,
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("scheduler shutting down");
                break;
            }
            _ = sleep(poll_interval) => {
                poll_once(&metadata, &queue, &config, &semaphore).await;
            }
        }
    }

    tracing::info!("scheduler stopped");
}

async fn poll_once(
    metadata: &MetadataStore,
    queue: &QueueStore,
    config: &SchedulerConfig,
    semaphore: &Arc<Semaphore>,
) {
    let entries = match queue.list_queued().await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "failed to list queued entries");
            return;
        }
    };

    for entry in entries {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("worker pool saturated, deferring remaining entries to next tick");
                break;
            }
        };

        match queue.try_claim(&entry.id).await {
            Ok(true) => {}
            Ok(false) => {
                drop(permit);
                continue;
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, queue_id = %entry.id, "failed to claim queue entry");
                continue;
            }
        }

        let metadata = metadata.clone();
        let queue = queue.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let _permit = permit;
            dispatch_one(entry, metadata, queue, config).await;
        });
    }
}

#[tracing::instrument(skip(metadata, queue, config, entry), fields(queue_id = %entry.id, task_id = %entry.task_id))]
async fn dispatch_one(
    entry: QueueEntry,
    metadata: MetadataStore,
    queue: QueueStore,
    config: SchedulerConfig,
) {
    if let Err(e) = queue
        .emit_trace(&entry.id, &entry.task_id, TraceStatus::Start, "{}")
        .await
    {
        tracing::error!(error = %e, "failed to emit start trace");
    }

    match run_handler(&entry, &metadata, &queue, &config).await {
        Ok(value) => {
            let data = serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string());
            if let Err(e) = queue
                .emit_trace(&entry.id, &entry.task_id, TraceStatus::End, &data)
                .await
            {
                tracing::error!(error = %e, "failed to emit end trace");
            }
            if let Err(e) = queue.set_status(&entry.id, QueueStatus::Completed).await {
                tracing::error!(error = %e, "failed to mark queue entry completed");
            }
            tracing::info!("queue entry completed");
        }
        Err(err) => handle_failure(&entry, &queue, err).await,
    }
}

async fn handle_failure(entry: &QueueEntry, queue: &QueueStore, err: AppError) {
    let can_retry = queue
        .available_retries(&entry.id)
        .await
        .map(|available| available > 0)
        .unwrap_or(false);

    if can_retry {
        if let Err(e) = queue.decrement_retry_budget(&entry.id).await {
            tracing::error!(error = %e, "failed to decrement retry budget");
        }
        tracing::warn!(error = %err, "handler failed, requeued for retry");
        return;
    }

    let data = serde_json::json!({ "message": err.to_string() }).to_string();
    if let Err(e) = queue
        .emit_trace(&entry.id, &entry.task_id, TraceStatus::Failed, &data)
        .await
    {
        tracing::error!(error = %e, "failed to emit failed trace");
    }
    if let Err(e) = queue.set_status(&entry.id, QueueStatus::Failed).await {
        tracing::error!(error = %e, "failed to mark queue entry failed");
    }
    tracing::error!(error = %err, "handler failed, retries exhausted");
}

async fn run_handler(
    entry: &QueueEntry,
    metadata: &MetadataStore,
    queue: &QueueStore,
    config: &SchedulerConfig,
) -> AppResult<Value> {
    let task = metadata
        .get_task_by_id(&entry.task_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task '{}' not found", entry.task_id)))?;
    let function = metadata
        .get_function_by_name(&task.function_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("function '{}' not found", task.function_name)))?;

    if !function.enabled {
        return Err(AppError::HandlerError(format!(
            "function '{}' is disabled",
            function.name
        )));
    }

    let input: Value = serde_json::from_str(&entry.params)?;
    let timeout = Duration::from_millis(config.default_timeout_ms);

    let (stream_tx, mut stream_rx) = mpsc::unbounded_channel::<Value>();
    let queue_for_stream = queue.clone();
    let queue_id = entry.id.clone();
    let task_id = entry.task_id.clone();

    let stream_writer = tokio::spawn(async move {
        while let Some(value) = stream_rx.recv().await {
            let data = serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string());
            if let Err(e) = queue_for_stream
                .emit_trace(&queue_id, &task_id, TraceStatus::Stream, &data)
                .await
            {
                tracing::error!(error = %e, "failed to emit stream trace");
            }
        }
    });

    let permissions: Permissions = function.permissions;
    let result = edgerun_sandbox::execute(
        &config.sandbox_runtime_command,
        &function.code,
        input,
        &permissions,
        timeout,
        stream_tx,
    )
    .await;

    let _ = stream_writer.await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgerun_db::{init_metadata_pool, init_queue_pool};

    async fn test_stores() -> (MetadataStore, QueueStore) {
        let metadata_pool = init_metadata_pool("sqlite::memory:").await.unwrap();
        let queue_pool = init_queue_pool("sqlite::memory:").await.unwrap();
        (
            MetadataStore::new(metadata_pool),
            QueueStore::new(queue_pool),
        )
    }

    #[tokio::test]
    async fn handle_failure_requeues_when_retries_remain() {
        let (metadata, queue) = test_stores().await;
        let task = metadata
            .create_task("retryable", None, Some("x"), None, 2, 50)
            .await
            .unwrap();
        let queue_id = queue.enqueue(&metadata, &task.id, "{}").await.unwrap();
        queue.try_claim(&queue_id).await.unwrap();

        handle_failure(
            &queue.get_entry(&queue_id).await.unwrap(),
            &queue,
            AppError::HandlerError("boom".to_string()),
        )
        .await;

        let entry = queue.get_entry(&queue_id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Queued);
        assert_eq!(entry.retries, 1);
    }

    #[tokio::test]
    async fn handle_failure_marks_failed_once_retries_exhausted() {
        let (metadata, queue) = test_stores().await;
        let task = metadata
            .create_task("no_retries", None, Some("x"), None, 0, 50)
            .await
            .unwrap();
        let queue_id = queue.enqueue(&metadata, &task.id, "{}").await.unwrap();
        queue.try_claim(&queue_id).await.unwrap();

        handle_failure(
            &queue.get_entry(&queue_id).await.unwrap(),
            &queue,
            AppError::HandlerError("boom".to_string()),
        )
        .await;

        let entry = queue.get_entry(&queue_id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Failed);

        let traces = queue.tail_traces(&queue_id, 0).await.unwrap();
        let failed = traces
            .iter()
            .find(|t| t.status == TraceStatus::Failed)
            .unwrap();
        assert!(failed.data.contains("boom"));
    }

    #[tokio::test]
    async fn poll_once_claims_only_eligible_entries_up_to_worker_capacity() {
        let (metadata, queue) = test_stores().await;
        let task = metadata
            .create_task("capacity", None, Some("x"), None, 0, 1000)
            .await
            .unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(queue.enqueue(&metadata, &task.id, "{}").await.unwrap());
        }

        let semaphore = Arc::new(Semaphore::new(2));
        let config = SchedulerConfig::default();
        poll_once(&metadata, &queue, &config, &semaphore).await;

        // give the spawned dispatch tasks a moment to run to completion (a
        // disabled function fails fast without a handler timeout)
        tokio::time::sleep(Duration::from_millis(50)).await;

        let claimed = futures_util::future::join_all(ids.iter().map(|id| queue.get_entry(id)))
            .await
            .into_iter()
            .filter(|e| !matches!(e.as_ref().map(|e| e.status), Ok(QueueStatus::Queued)))
            .count();
        assert!(claimed >= 1, "at least the permitted workers should have claimed an entry");
    }
}
