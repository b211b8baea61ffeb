//! Config get/put handlers over the recognized runtime keys.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use edgerun_core::AppError;
use serde::{Deserialize, Serialize};

use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConfigValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct PutConfigRequest {
    pub key: String,
    pub value: String,
}

#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ConfigValue>, HttpAppError> {
    let value = state
        .metadata
        .get_config(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("config key '{key}' not set")))?;
    Ok(Json(ConfigValue { key, value }))
}

#[tracing::instrument(skip(state, body))]
pub async fn put(
    State(state): State<Arc<AppState>>,
    ValidatedJson(body): ValidatedJson<PutConfigRequest>,
) -> Result<Json<ConfigValue>, HttpAppError> {
    state.metadata.put_config(&body.key, &body.value).await?;
    Ok(Json(ConfigValue {
        key: body.key,
        value: body.value,
    }))
}
