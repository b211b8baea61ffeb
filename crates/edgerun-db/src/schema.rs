//! SQLite pool setup and schema initialization for both databases.
//!
//! Both the metadata store and the queue store are plain SQLite files (or
//! `sqlite::memory:` in tests); there is no migration framework, just
//! idempotent `CREATE TABLE IF NOT EXISTS` statements run once at startup.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

const METADATA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS functions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    code TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    permissions TEXT NOT NULL DEFAULT '{}',
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    function_name TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    retry_delay INTEGER NOT NULL DEFAULT 1000,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    params TEXT NOT NULL,
    status TEXT NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 0,
    retry_delay INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);
CREATE INDEX IF NOT EXISTS idx_queue_task_id ON queue(task_id);

CREATE TABLE IF NOT EXISTS trace (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    task_id TEXT NOT NULL,
    queue_id TEXT NOT NULL,
    status TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trace_queue_id ON trace(queue_id, id);
"#;

async fn open_pool(url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        // SQLite serializes writers regardless; a small pool avoids "database
        // is locked" errors under concurrent readers+writer.
        .max_connections(8)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn run_schema(pool: &SqlitePool, schema: &str) -> anyhow::Result<()> {
    for statement in schema.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn init_metadata_pool(url: &str) -> anyhow::Result<SqlitePool> {
    let pool = open_pool(url).await?;
    run_schema(&pool, METADATA_SCHEMA).await?;
    tracing::info!(url, "metadata store initialized");
    Ok(pool)
}

pub async fn init_queue_pool(url: &str) -> anyhow::Result<SqlitePool> {
    let pool = open_pool(url).await?;
    run_schema(&pool, QUEUE_SCHEMA).await?;
    tracing::info!(url, "queue store initialized");
    Ok(pool)
}
