//! Queue Store: queue entries and the append-only trace log.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use edgerun_core::{AppError, AppResult, QueueEntry, QueueStatus, TraceRecord, TraceStatus};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::metadata::MetadataStore;

#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Looks up the Task via `metadata`, snapshots its retry policy, and
    /// inserts a new `queued` entry.
    #[tracing::instrument(skip(self, metadata, params))]
    pub async fn enqueue(
        &self,
        metadata: &MetadataStore,
        task_id: &str,
        params: &str,
    ) -> AppResult<String> {
        let task = metadata
            .get_task_by_id(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task '{task_id}' not found")))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO queue (id, task_id, params, status, retries, max_retries, retry_delay, created_at, updated_at)
               VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(task_id)
        .bind(params)
        .bind(QueueStatus::Queued.to_string())
        .bind(task.retry_count)
        .bind(task.retry_delay)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(queue_id = %id, task_id, "queue entry enqueued");
        Ok(id)
    }

    /// All `queued` entries eligible for dispatch right now: fresh entries
    /// (retries == 0) plus retried entries whose `retry_delay` has elapsed
    /// since their last update.
    pub async fn list_queued(&self) -> AppResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM queue WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(QueueStatus::Queued.to_string())
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .filter(|entry| {
                entry.retries == 0
                    || entry.updated_at + ChronoDuration::milliseconds(entry.retry_delay) <= now
            })
            .collect())
    }

    /// Atomically transitions one entry from `queued` to `running`. Returns
    /// `false` if another caller already claimed it (or it is no longer
    /// `queued`), matching the compare-and-swap semantics needed when the
    /// scheduler dispatches to a bounded worker pool.
    #[tracing::instrument(skip(self))]
    pub async fn try_claim(&self, queue_id: &str) -> AppResult<bool> {
        let result = sqlx::query("UPDATE queue SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(QueueStatus::Running.to_string())
            .bind(Utc::now())
            .bind(queue_id)
            .bind(QueueStatus::Queued.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_status(&self, queue_id: &str, status: QueueStatus) -> AppResult<()> {
        sqlx::query("UPDATE queue SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(Utc::now())
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_entry(&self, queue_id: &str) -> AppResult<QueueEntry> {
        sqlx::query_as::<_, QueueEntry>("SELECT * FROM queue WHERE id = ?")
            .bind(queue_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queue entry '{queue_id}' not found")))
    }

    pub async fn list_entries(&self, task_id: &str) -> AppResult<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM queue WHERE task_id = ? ORDER BY created_at DESC LIMIT 200",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn available_retries(&self, queue_id: &str) -> AppResult<i64> {
        Ok(self.get_entry(queue_id).await?.available_retries())
    }

    /// Consumes one attempt from the retry budget and re-queues the entry.
    #[tracing::instrument(skip(self))]
    pub async fn decrement_retry_budget(&self, queue_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE queue SET retries = retries + 1, status = ?, updated_at = ? WHERE id = ?")
            .bind(QueueStatus::Queued.to_string())
            .bind(Utc::now())
            .bind(queue_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, data))]
    pub async fn emit_trace(
        &self,
        queue_id: &str,
        task_id: &str,
        status: TraceStatus,
        data: &str,
    ) -> AppResult<i64> {
        let id = sqlx::query(
            "INSERT INTO trace (ts, task_id, queue_id, status, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Utc::now())
        .bind(task_id)
        .bind(queue_id)
        .bind(status.to_string())
        .bind(data)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    pub async fn tail_traces(&self, queue_id: &str, since_id: i64) -> AppResult<Vec<TraceRecord>> {
        let rows = sqlx::query_as::<_, TraceRecord>(
            "SELECT * FROM trace WHERE queue_id = ? AND id > ? ORDER BY id ASC",
        )
        .bind(queue_id)
        .bind(since_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Moves any entry stuck in `running` for longer than `grace_period`
    /// back to `queued` without consuming its retry budget, recovering from
    /// a crash that left the scheduler mid-dispatch.
    #[tracing::instrument(skip(self))]
    pub async fn reap_stale_running(&self, grace_period: chrono::Duration) -> AppResult<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - grace_period;
        let result = sqlx::query(
            "UPDATE queue SET status = ?, updated_at = ? WHERE status = ? AND updated_at <= ?",
        )
        .bind(QueueStatus::Queued.to_string())
        .bind(Utc::now())
        .bind(QueueStatus::Running.to_string())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::warn!(
                count = result.rows_affected(),
                "reaped stale running queue entries on startup"
            );
        }
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{init_metadata_pool, init_queue_pool};

    async fn stores() -> (MetadataStore, QueueStore) {
        let metadata_pool = init_metadata_pool("sqlite::memory:").await.unwrap();
        let queue_pool = init_queue_pool("sqlite::memory:").await.unwrap();
        (
            MetadataStore::new(metadata_pool),
            QueueStore::new(queue_pool),
        )
    }

    #[tokio::test]
    async fn enqueue_snapshots_retry_policy_from_task() {
        let (metadata, queue) = stores().await;
        let task = metadata
            .create_task("t", None, Some("x"), None, 3, 500)
            .await
            .unwrap();

        let queue_id = queue.enqueue(&metadata, &task.id, "{}").await.unwrap();
        let entry = queue.get_entry(&queue_id).await.unwrap();

        assert_eq!(entry.max_retries, 3);
        assert_eq!(entry.retry_delay, 500);
        assert_eq!(entry.status, QueueStatus::Queued);
    }

    #[tokio::test]
    async fn try_claim_is_exclusive() {
        let (metadata, queue) = stores().await;
        let task = metadata
            .create_task("t2", None, Some("x"), None, 0, 100)
            .await
            .unwrap();
        let queue_id = queue.enqueue(&metadata, &task.id, "{}").await.unwrap();

        assert!(queue.try_claim(&queue_id).await.unwrap());
        assert!(!queue.try_claim(&queue_id).await.unwrap());
    }

    #[tokio::test]
    async fn trace_ids_increase_monotonically_per_queue_entry() {
        let (metadata, queue) = stores().await;
        let task = metadata
            .create_task("t3", None, Some("x"), None, 0, 100)
            .await
            .unwrap();
        let queue_id = queue.enqueue(&metadata, &task.id, "{}").await.unwrap();

        let id1 = queue
            .emit_trace(&queue_id, &task.id, TraceStatus::Start, "{}")
            .await
            .unwrap();
        let id2 = queue
            .emit_trace(&queue_id, &task.id, TraceStatus::End, "{}")
            .await
            .unwrap();
        assert!(id2 > id1);

        let traces = queue.tail_traces(&queue_id, 0).await.unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].status, TraceStatus::Start);
        assert_eq!(traces[1].status, TraceStatus::End);
    }

    #[tokio::test]
    async fn fresh_retry_is_immediately_eligible_but_delayed_one_is_not() {
        let (metadata, queue) = stores().await;
        let task = metadata
            .create_task("t4", None, Some("x"), None, 2, 60_000)
            .await
            .unwrap();
        let queue_id = queue.enqueue(&metadata, &task.id, "{}").await.unwrap();

        assert_eq!(queue.list_queued().await.unwrap().len(), 1);

        queue.try_claim(&queue_id).await.unwrap();
        queue.decrement_retry_budget(&queue_id).await.unwrap();

        // retry_delay is 60s, so immediately after requeue it is not yet eligible
        assert!(queue.list_queued().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reap_stale_running_requeues_without_consuming_retries() {
        let (metadata, queue) = stores().await;
        let task = metadata
            .create_task("t5", None, Some("x"), None, 1, 100)
            .await
            .unwrap();
        let queue_id = queue.enqueue(&metadata, &task.id, "{}").await.unwrap();
        queue.try_claim(&queue_id).await.unwrap();

        let reaped = queue
            .reap_stale_running(chrono::Duration::seconds(-1))
            .await
            .unwrap();
        assert_eq!(reaped, 1);

        let entry = queue.get_entry(&queue_id).await.unwrap();
        assert_eq!(entry.status, QueueStatus::Queued);
        assert_eq!(entry.retries, 0);
    }
}
