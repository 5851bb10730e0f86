//! Health check endpoints for the ThreatFlow Control Plane API.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Health status ("ok")
    pub status: String,
}

/// Detailed health check response for the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealthResponse {
    pub status: String,

    /// Server name from configuration
    pub server_name: String,

    /// Analyzers known to the schema registry
    pub analyzers: usize,

    /// Runs currently held in the run store
    pub stored_runs: usize,

    pub uptime_seconds: u64,

    pub version: String,
}

/// Analysis service connectivity.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalysisHealthResponse {
    /// "connected"
    pub status: String,

    pub analyzers_available: usize,
}

/// Basic health check endpoint.
///
/// `GET /health`
///
/// Suitable for load balancer checks; returns immediately.
pub async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
    })
}

/// Detailed API health check endpoint.
///
/// `GET /api/health`
pub async fn api_health(State(state): State<AppState>) -> Json<ApiHealthResponse> {
    Json(ApiHealthResponse {
        status: "ok".to_string(),
        server_name: state.config.server_name.clone(),
        analyzers: state.registry().analyzer_names().count(),
        stored_runs: state.runs.len().await,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// IntelOwl connectivity check.
///
/// `GET /health/intelowl`
///
/// Lists the service's analyzers; 503 when it cannot be reached.
pub async fn intelowl_health(State(state): State<AppState>) -> AppResult<Json<AnalysisHealthResponse>> {
    let analyzers = state
        .workflows
        .list_analyzers(None)
        .await
        .map_err(|e| AppError::ServiceUnavailable(format!("IntelOwl unreachable: {}", e)))?;
    Ok(Json(AnalysisHealthResponse {
        status: "connected".to_string(),
        analyzers_available: analyzers.len(),
    }))
}
