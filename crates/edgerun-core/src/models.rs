//! Core data model: Function, Task, QueueEntry, TraceRecord, and their
//! JSON-facing DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// A named, addressable unit of executable source code plus a bounded
/// permission set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub enabled: bool,
    pub permissions: Permissions,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for Function {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let permissions_json: String = row.get("permissions");
        Ok(Function {
            id: row.get("id"),
            name: row.get("name"),
            code: row.get("code"),
            enabled: row.get("enabled"),
            permissions: serde_json::from_str(&permissions_json)
                .map_err(|e| sqlx::Error::Decode(format!("invalid permissions JSON: {e}").into()))?,
            description: row.get("description"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Deny-by-default permission set granted to a Function's sandboxed
/// execution context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub run: Vec<String>,
}

/// A named invocation target binding a Function to a retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub function_name: String,
    pub retry_count: i64,
    pub retry_delay: i64,
}

/// The merged view `getTaskById` returns: a Task's own fields plus its
/// backing Function's fields flattened in, so a client never has to make a
/// second call to see what code/permissions a Task actually runs.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub id: String,
    pub name: String,
    pub function_name: String,
    pub retry_count: i64,
    pub retry_delay: i64,
    pub code: String,
    pub enabled: bool,
    pub permissions: Permissions,
    pub description: Option<String>,
}

impl TaskDetail {
    pub fn from_task_and_function(task: Task, function: Function) -> Self {
        TaskDetail {
            id: task.id,
            name: task.name,
            function_name: task.function_name,
            retry_count: task.retry_count,
            retry_delay: task.retry_delay,
            code: function.code,
            enabled: function.enabled,
            permissions: function.permissions,
            description: function.description,
        }
    }
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for Task {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            id: row.get("id"),
            name: row.get("name"),
            function_name: row.get("function_name"),
            retry_count: row.get("retry_count"),
            retry_delay: row.get("retry_delay"),
        })
    }
}

/// Status of a Queue Entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl Display for QueueStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            QueueStatus::Queued => write!(f, "queued"),
            QueueStatus::Running => write!(f, "running"),
            QueueStatus::Completed => write!(f, "completed"),
            QueueStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "running" => Ok(QueueStatus::Running),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            _ => Err(anyhow::anyhow!("invalid queue status: {s}")),
        }
    }
}

/// A single pending/in-flight/completed invocation of a Task with concrete
/// parameters. `max_retries`/`retry_delay` are snapshotted from the Task at
/// enqueue time so later Task edits never alter an in-flight job's policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub task_id: String,
    pub params: String,
    pub status: QueueStatus,
    pub retries: i64,
    pub max_retries: i64,
    pub retry_delay: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn available_retries(&self) -> i64 {
        self.max_retries - self.retries
    }

    pub fn can_retry(&self) -> bool {
        self.available_retries() > 0
    }
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for QueueEntry {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(QueueEntry {
            id: row.get("id"),
            task_id: row.get("task_id"),
            params: row.get("params"),
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(|e| sqlx::Error::Decode(format!("invalid queue status: {e}").into()))?,
            retries: row.get("retries"),
            max_retries: row.get("max_retries"),
            retry_delay: row.get("retry_delay"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

/// Status a Trace Record represents within a Queue Entry's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Start,
    Stream,
    End,
    Failed,
}

impl Display for TraceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TraceStatus::Start => write!(f, "start"),
            TraceStatus::Stream => write!(f, "stream"),
            TraceStatus::End => write!(f, "end"),
            TraceStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TraceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(TraceStatus::Start),
            "stream" => Ok(TraceStatus::Stream),
            "end" => Ok(TraceStatus::End),
            "failed" => Ok(TraceStatus::Failed),
            _ => Err(anyhow::anyhow!("invalid trace status: {s}")),
        }
    }
}

/// An append-only event emitted during a Queue Entry's lifecycle; the sole
/// observable history of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub task_id: String,
    pub queue_id: String,
    pub status: TraceStatus,
    pub data: String,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for TraceRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(TraceRecord {
            id: row.get("id"),
            ts: row.get("ts"),
            task_id: row.get("task_id"),
            queue_id: row.get("queue_id"),
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(|e| sqlx::Error::Decode(format!("invalid trace status: {e}").into()))?,
            data: row.get("data"),
        })
    }
}

/// Request body for `POST /api/queue/enqueue`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    #[serde(rename = "taskId", alias = "task_id")]
    pub task_id: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResponse {
    pub queue_id: String,
}

/// Request body for `POST /api/queue/subscribe`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub queue_id: String,
}

/// Request body for creating a Task. If `code` is present, a backing
/// Function is auto-created; otherwise `function_name` must reference an
/// existing Function.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub function_name: Option<String>,
    pub code: Option<String>,
    pub permissions: Option<Permissions>,
    #[serde(default = "default_retry_count")]
    pub retry_count: i64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: i64,
}

fn default_retry_count() -> i64 {
    0
}

fn default_retry_delay() -> i64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTaskRequest {
    pub retry_count: Option<i64>,
    pub retry_delay: Option<i64>,
    pub code: Option<String>,
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFunctionRequest {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub permissions: Permissions,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateFunctionRequest {
    pub code: Option<String>,
    pub enabled: Option<bool>,
    pub permissions: Option<Permissions>,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_status_round_trips_through_display_and_fromstr() {
        for s in [
            QueueStatus::Queued,
            QueueStatus::Running,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ] {
            let parsed: QueueStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn trace_status_round_trips() {
        for s in [
            TraceStatus::Start,
            TraceStatus::Stream,
            TraceStatus::End,
            TraceStatus::Failed,
        ] {
            let parsed: TraceStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn queue_entry_retry_budget_math() {
        let mut entry = QueueEntry {
            id: "q1".to_string(),
            task_id: "t1".to_string(),
            params: "{}".to_string(),
            status: QueueStatus::Running,
            retries: 0,
            max_retries: 2,
            retry_delay: 100,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(entry.available_retries(), 2);
        assert!(entry.can_retry());
        entry.retries = 2;
        assert_eq!(entry.available_retries(), 0);
        assert!(!entry.can_retry());
    }

    #[test]
    fn queue_status_is_terminal() {
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
        assert!(!QueueStatus::Queued.is_terminal());
        assert!(!QueueStatus::Running.is_terminal());
    }
}
