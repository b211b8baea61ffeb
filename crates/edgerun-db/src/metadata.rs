//! Metadata Store: Function, Task, and global Config CRUD.

use chrono::Utc;
use edgerun_core::{AppError, AppResult, Function, Permissions, Task, TaskDetail};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, code, permissions))]
    pub async fn create_function(
        &self,
        name: &str,
        code: &str,
        enabled: bool,
        permissions: &Permissions,
        description: Option<&str>,
    ) -> AppResult<Function> {
        if self.get_function_by_name(name).await?.is_some() {
            return Err(AppError::NameConflict(format!(
                "function '{name}' already exists"
            )));
        }

        let now = Utc::now();
        let permissions_json = serde_json::to_string(permissions)?;

        let id = sqlx::query(
            r#"INSERT INTO functions (name, code, enabled, permissions, description, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(name)
        .bind(code)
        .bind(enabled)
        .bind(&permissions_json)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        tracing::info!(function_id = id, name, "function created");

        self.get_function_by_id(id)
            .await?
            .ok_or_else(|| AppError::Internal("function vanished after insert".to_string()))
    }

    pub async fn get_function_by_id(&self, id: i64) -> AppResult<Option<Function>> {
        let row = sqlx::query_as::<_, Function>("SELECT * FROM functions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_function_by_name(&self, name: &str) -> AppResult<Option<Function>> {
        let row = sqlx::query_as::<_, Function>("SELECT * FROM functions WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_functions(&self) -> AppResult<Vec<Function>> {
        let rows = sqlx::query_as::<_, Function>("SELECT * FROM functions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip(self, code, permissions))]
    pub async fn update_function(
        &self,
        name: &str,
        code: Option<&str>,
        enabled: Option<bool>,
        permissions: Option<&Permissions>,
        description: Option<&str>,
    ) -> AppResult<Function> {
        let existing = self
            .get_function_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("function '{name}' not found")))?;

        let code = code.unwrap_or(&existing.code);
        let enabled = enabled.unwrap_or(existing.enabled);
        let permissions_json = match permissions {
            Some(p) => serde_json::to_string(p)?,
            None => serde_json::to_string(&existing.permissions)?,
        };
        let description = description.or(existing.description.as_deref());

        sqlx::query(
            "UPDATE functions SET code = ?, enabled = ?, permissions = ?, description = ?, updated_at = ? WHERE name = ?",
        )
        .bind(code)
        .bind(enabled)
        .bind(&permissions_json)
        .bind(description)
        .bind(Utc::now())
        .bind(name)
        .execute(&self.pool)
        .await?;

        self.get_function_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("function '{name}' not found")))
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_function(&self, name: &str) -> AppResult<()> {
        let referencing: i64 = sqlx::query("SELECT COUNT(*) AS c FROM tasks WHERE function_name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?
            .get("c");

        if referencing > 0 {
            return Err(AppError::InvalidInput(format!(
                "function '{name}' is still referenced by {referencing} task(s)"
            )));
        }

        let result = sqlx::query("DELETE FROM functions WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("function '{name}' not found")));
        }
        Ok(())
    }

    /// Creates a Task. If `code` is provided, an exclusive backing Function
    /// named `task_<name>_<id>` is created and the Task is linked to it;
    /// otherwise `function_name` must reference an existing Function.
    #[tracing::instrument(skip(self, code, permissions))]
    pub async fn create_task(
        &self,
        name: &str,
        function_name: Option<&str>,
        code: Option<&str>,
        permissions: Option<&Permissions>,
        retry_count: i64,
        retry_delay: i64,
    ) -> AppResult<Task> {
        if self.get_task_by_name(name).await?.is_some() {
            return Err(AppError::NameConflict(format!("task '{name}' already exists")));
        }

        let id = Uuid::new_v4().to_string();

        let function_name = match (code, function_name) {
            (Some(code), _) => {
                let backing_name = format!("task_{name}_{id}");
                self.create_function(
                    &backing_name,
                    code,
                    true,
                    permissions.unwrap_or(&Permissions::default()),
                    None,
                )
                .await?;
                backing_name
            }
            (None, Some(existing)) => {
                self.get_function_by_name(existing)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("function '{existing}' not found")))?;
                existing.to_string()
            }
            (None, None) => {
                return Err(AppError::InvalidInput(
                    "task requires either inline `code` or an existing `function_name`".to_string(),
                ))
            }
        };

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO tasks (id, name, function_name, retry_count, retry_delay, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(&function_name)
        .bind(retry_count)
        .bind(retry_delay)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(task_id = %id, name, function_name, "task created");

        self.get_task_by_id(&id)
            .await?
            .ok_or_else(|| AppError::Internal("task vanished after insert".to_string()))
    }

    pub async fn get_task_by_id(&self, id: &str) -> AppResult<Option<Task>> {
        let row = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// The merged view `GET /api/tasks/:id` serves: the Task's own fields
    /// plus its backing Function's `code`/`enabled`/`permissions`/
    /// `description` flattened in.
    pub async fn get_task_detail(&self, id: &str) -> AppResult<Option<TaskDetail>> {
        let Some(task) = self.get_task_by_id(id).await? else {
            return Ok(None);
        };
        let function = self
            .get_function_by_name(&task.function_name)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "task '{id}' references missing function '{}'",
                    task.function_name
                ))
            })?;
        Ok(Some(TaskDetail::from_task_and_function(task, function)))
    }

    pub async fn get_task_by_name(&self, name: &str) -> AppResult<Option<Task>> {
        let row = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_tasks(&self) -> AppResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip(self, code, permissions))]
    pub async fn update_task(
        &self,
        id: &str,
        retry_count: Option<i64>,
        retry_delay: Option<i64>,
        code: Option<&str>,
        permissions: Option<&Permissions>,
    ) -> AppResult<Task> {
        let existing = self
            .get_task_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task '{id}' not found")))?;

        let retry_count = retry_count.unwrap_or(existing.retry_count);
        let retry_delay = retry_delay.unwrap_or(existing.retry_delay);

        if code.is_some() || permissions.is_some() {
            if !Self::owns_backing_function(&existing) {
                return Err(AppError::InvalidInput(format!(
                    "task '{id}' references a shared function ('{}') and cannot have its code or permissions changed this way; update the function directly",
                    existing.function_name
                )));
            }
            self.update_function(&existing.function_name, code, None, permissions, None)
                .await?;
        }

        sqlx::query("UPDATE tasks SET retry_count = ?, retry_delay = ?, updated_at = ? WHERE id = ?")
            .bind(retry_count)
            .bind(retry_delay)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_task_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task '{id}' not found")))
    }

    /// Deletes the Task row, then deletes its backing Function if that
    /// Function's name follows the auto-created `task_<name>_<id>` pattern
    /// (Functions referenced by name from elsewhere are left alone).
    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, id: &str) -> AppResult<()> {
        let task = self
            .get_task_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task '{id}' not found")))?;

        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if Self::owns_backing_function(&task) {
            // best effort: ignore NotFound/conflict, the Task row is already gone
            let _ = self.delete_function(&task.function_name).await;
        }

        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Whether `task`'s backing Function was auto-created exclusively for
    /// it (the `task_<name>_<id>` naming convention `create_task` uses for
    /// inline `code`), as opposed to referencing a Function shared with
    /// other Tasks via `function_name`. Only an exclusively-owned Function
    /// may be mutated or deleted as a side effect of a Task operation.
    fn owns_backing_function(task: &Task) -> bool {
        task.function_name == format!("task_{}_{}", task.name, task.id)
    }

    pub async fn get_config(&self, key: &str) -> AppResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    #[tracing::instrument(skip(self, value))]
    pub async fn put_config(&self, key: &str, value: &str) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO config (key, value, created_at, updated_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_config(&self) -> AppResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_metadata_pool;

    async fn test_store() -> MetadataStore {
        let pool = init_metadata_pool("sqlite::memory:").await.unwrap();
        MetadataStore::new(pool)
    }

    #[tokio::test]
    async fn create_task_with_inline_code_creates_backing_function() {
        let store = test_store().await;
        let task = store
            .create_task(
                "hello_world",
                None,
                Some("export default async (req) => req;"),
                None,
                0,
                1000,
            )
            .await
            .unwrap();

        assert_eq!(task.name, "hello_world");
        let function = store
            .get_function_by_name(&task.function_name)
            .await
            .unwrap();
        assert!(function.is_some());
    }

    #[tokio::test]
    async fn duplicate_task_name_is_name_conflict() {
        let store = test_store().await;
        store
            .create_task("dup", None, Some("x"), None, 0, 1000)
            .await
            .unwrap();

        let err = store
            .create_task("dup", None, Some("y"), None, 0, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NameConflict(_)));
    }

    #[tokio::test]
    async fn delete_task_cascades_to_backing_function() {
        let store = test_store().await;
        let task = store
            .create_task("cascade", None, Some("x"), None, 0, 1000)
            .await
            .unwrap();
        let function_name = task.function_name.clone();

        store.delete_task(&task.id).await.unwrap();

        assert!(store.get_task_by_id(&task.id).await.unwrap().is_none());
        assert!(store
            .get_function_by_name(&function_name)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_function_fails_while_task_references_it() {
        let store = test_store().await;
        store
            .create_function("shared_fn", "x", true, &Permissions::default(), None)
            .await
            .unwrap();
        store
            .create_task("uses_shared", Some("shared_fn"), None, None, 0, 1000)
            .await
            .unwrap();

        let err = store.delete_function("shared_fn").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn get_task_detail_merges_task_and_function_fields() {
        let store = test_store().await;
        let task = store
            .create_task(
                "detailed",
                None,
                Some("export default async (req) => req;"),
                Some(&Permissions {
                    read: vec!["/tmp".to_string()],
                    ..Default::default()
                }),
                2,
                500,
            )
            .await
            .unwrap();

        let detail = store.get_task_detail(&task.id).await.unwrap().unwrap();
        assert_eq!(detail.id, task.id);
        assert_eq!(detail.name, "detailed");
        assert_eq!(detail.retry_count, 2);
        assert_eq!(detail.code, "export default async (req) => req;");
        assert!(detail.enabled);
        assert_eq!(detail.permissions.read, vec!["/tmp".to_string()]);
    }

    #[tokio::test]
    async fn update_task_rejects_code_change_on_shared_function() {
        let store = test_store().await;
        store
            .create_function("shared_fn", "x", true, &Permissions::default(), None)
            .await
            .unwrap();
        let task = store
            .create_task("uses_shared", Some("shared_fn"), None, None, 0, 1000)
            .await
            .unwrap();

        let err = store
            .update_task(&task.id, None, None, Some("y"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let function = store
            .get_function_by_name("shared_fn")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(function.code, "x");
    }

    #[tokio::test]
    async fn update_task_allows_code_change_on_exclusive_function() {
        let store = test_store().await;
        let task = store
            .create_task("exclusive", None, Some("x"), None, 0, 1000)
            .await
            .unwrap();

        store
            .update_task(&task.id, None, None, Some("y"), None)
            .await
            .unwrap();

        let function = store
            .get_function_by_name(&task.function_name)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(function.code, "y");
    }

    #[tokio::test]
    async fn config_put_then_get_round_trips() {
        let store = test_store().await;
        store.put_config("main_port", "9090").await.unwrap();
        assert_eq!(
            store.get_config("main_port").await.unwrap(),
            Some("9090".to_string())
        );
        store.put_config("main_port", "9091").await.unwrap();
        assert_eq!(
            store.get_config("main_port").await.unwrap(),
            Some("9091".to_string())
        );
    }
}
