//! Function CRUD handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use edgerun_core::{CreateFunctionRequest, Function, UpdateFunctionRequest};

use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Function>>, HttpAppError> {
    Ok(Json(state.metadata.list_functions().await?))
}

#[tracing::instrument(skip(state, body))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    ValidatedJson(body): ValidatedJson<CreateFunctionRequest>,
) -> Result<Json<Function>, HttpAppError> {
    let function = state
        .metadata
        .create_function(
            &body.name,
            &body.code,
            body.enabled,
            &body.permissions,
            body.description.as_deref(),
        )
        .await?;
    Ok(Json(function))
}

#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Function>, HttpAppError> {
    let function = state
        .metadata
        .get_function_by_name(&name)
        .await?
        .ok_or_else(|| edgerun_core::AppError::NotFound(format!("function '{name}' not found")))?;
    Ok(Json(function))
}

#[tracing::instrument(skip(state, body))]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    ValidatedJson(body): ValidatedJson<UpdateFunctionRequest>,
) -> Result<Json<Function>, HttpAppError> {
    let function = state
        .metadata
        .update_function(
            &name,
            body.code.as_deref(),
            body.enabled,
            body.permissions.as_ref(),
            body.description.as_deref(),
        )
        .await?;
    Ok(Json(function))
}

#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<(), HttpAppError> {
    state.metadata.delete_function(&name).await?;
    Ok(())
}
