//! Finished run lookup handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::RunSummary;
use crate::state::AppState;

fn parse_run_id(run_id: &str) -> AppResult<Uuid> {
    Uuid::parse_str(run_id).map_err(|_| AppError::BadRequest(format!("invalid run id: {}", run_id)))
}

/// Get a finished run.
///
/// GET /api/runs/{run_id}
pub async fn get(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> AppResult<Json<RunSummary>> {
    let id = parse_run_id(&run_id)?;
    let summary = state
        .runs
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Run not found: {}", run_id)))?;
    Ok(Json((*summary).clone()))
}

/// Drop a finished run before it expires.
///
/// DELETE /api/runs/{run_id}
pub async fn delete(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_run_id(&run_id)?;
    if state.runs.evict(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Run not found: {}", run_id)))
    }
}
