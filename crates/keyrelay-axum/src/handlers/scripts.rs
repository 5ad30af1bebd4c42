//! Channel-script catalogue endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use keyrelay_core::{NewChannelScript, ScriptMetadata, ScriptUpdate};

use crate::error::HttpError;
use crate::response::{message, success};
use crate::state::AppState;

/// List all catalogue entries.
pub async fn list(State(state): State<AppState>) -> Result<Json<Value>, HttpError> {
    Ok(success(state.scripts.list().await?))
}

/// Fetch one entry.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, HttpError> {
    Ok(success(state.scripts.get(id).await?))
}

/// Create a new entry. Validated first; defaults to disabled.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<NewChannelScript>,
) -> Result<Json<Value>, HttpError> {
    Ok(success(state.scripts.create(req).await?))
}

/// Patch an entry; source changes re-validate before persisting.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ScriptUpdate>,
) -> Result<Json<Value>, HttpError> {
    Ok(success(state.scripts.update(id, req).await?))
}

/// Delete an entry (forced disable first).
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, HttpError> {
    state.scripts.delete(id).await?;
    Ok(message("Script deleted successfully"))
}

/// Enable an entry; failing validation moves it to error.
pub async fn enable(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, HttpError> {
    state.scripts.enable(id).await?;
    Ok(message("Script enabled successfully"))
}

/// Disable an entry unconditionally.
pub async fn disable(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, HttpError> {
    state.scripts.disable(id).await?;
    Ok(message("Script disabled successfully"))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub script: String,
    pub metadata: ScriptMetadata,
}

/// Run security validation without persisting.
pub async fn validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<Value>, HttpError> {
    Ok(success(
        state.scripts.validate(req.script, req.metadata).await,
    ))
}

/// Validation plus an `exports()` smoke call in a throwaway sandbox.
pub async fn test(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<Value>, HttpError> {
    Ok(success(state.scripts.test(req.script, req.metadata).await))
}

/// Recent adapter log records for one entry.
pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, HttpError> {
    Ok(success(state.scripts.logs(id).await?))
}

/// Reload one entry now instead of waiting for the next tick.
pub async fn reload(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, HttpError> {
    state.reloader.reload_one(id).await?;
    Ok(message("Script reloaded successfully"))
}

/// Force a full reconciliation pass.
pub async fn reload_all(State(state): State<AppState>) -> Result<Json<Value>, HttpError> {
    state.reloader.reload_all().await?;
    Ok(message("All scripts reloaded successfully"))
}

/// Channel types currently served by loaded scripts.
pub async fn active(State(state): State<AppState>) -> Result<Json<Value>, HttpError> {
    let active_scripts = state.reloader.active_scripts();
    let count = active_scripts.len();
    Ok(success(serde_json::json!({
        "active_scripts": active_scripts,
        "count": count,
    })))
}
