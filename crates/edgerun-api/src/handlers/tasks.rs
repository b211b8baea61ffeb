//! Task CRUD handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use edgerun_core::{AppError, CreateTaskRequest, Task, TaskDetail, UpdateTaskRequest};

use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Task>>, HttpAppError> {
    Ok(Json(state.metadata.list_tasks().await?))
}

#[tracing::instrument(skip(state, body))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    ValidatedJson(body): ValidatedJson<CreateTaskRequest>,
) -> Result<Json<Task>, HttpAppError> {
    let task = state
        .metadata
        .create_task(
            &body.name,
            body.function_name.as_deref(),
            body.code.as_deref(),
            body.permissions.as_ref(),
            body.retry_count,
            body.retry_delay,
        )
        .await?;
    Ok(Json(task))
}

/// Returns the merged view of a Task and its backing Function, so a client
/// never has to make a second call to see what code/permissions it runs.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>, HttpAppError> {
    let detail = state
        .metadata
        .get_task_detail(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("task '{id}' not found")))?;
    Ok(Json(detail))
}

#[tracing::instrument(skip(state, body))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<UpdateTaskRequest>,
) -> Result<Json<Task>, HttpAppError> {
    let task = state
        .metadata
        .update_task(
            &id,
            body.retry_count,
            body.retry_delay,
            body.code.as_deref(),
            body.permissions.as_ref(),
        )
        .await?;
    Ok(Json(task))
}

#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(), HttpAppError> {
    state.metadata.delete_task(&id).await?;
    Ok(())
}
