//! HTTP handlers for the ThreatFlow Control Plane API.
//!
//! This module contains all route handlers organized by domain.

pub mod analyzers;
pub mod execute;
pub mod health;
pub mod runs;
pub mod schema;
pub mod workflow;

use axum::{
    routing::{get, post},
    Router,
};

pub use execute::execute;
pub use health::{api_health, health_check, intelowl_health};

use crate::state::AppState;

/// All API routes. Middleware layers are added by the binary.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/intelowl", get(intelowl_health))
        .route("/api/health", get(api_health))
        .route("/api/analyzers", get(analyzers::list_analyzers))
        .route("/api/workflow/compile", post(workflow::compile))
        .route("/api/workflow/validate", post(workflow::validate))
        .route("/api/execute", post(execute))
        .route("/api/runs/{run_id}", get(runs::get).delete(runs::delete))
        .route("/api/schema/analyzers", get(schema::list_analyzers))
        .route("/api/schema/analyzers/{name}", get(schema::get_analyzer))
        .route("/api/schema/analyzers/{name}/fields", get(schema::get_fields))
        .route(
            "/api/schema/analyzers/{name}/templates",
            get(schema::get_templates),
        )
        .route(
            "/api/schema/field-suggestions/{name}",
            get(schema::field_suggestions),
        )
        .route("/api/schema/detect-fields", post(schema::detect_fields))
        .route(
            "/api/schema/validate-condition",
            post(schema::validate_condition),
        )
        .route(
            "/api/schema/validate-field-path",
            post(schema::validate_field_path),
        )
        .with_state(state)
}
