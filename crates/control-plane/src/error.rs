//! Error types for the ThreatFlow Control Plane.
//!
//! Three layers of errors live here:
//!
//! - [`StructuralError`]: a malformed analysis graph, raised by the compiler
//!   before any analyzer is submitted.
//! - [`AnalysisError`]: a failure talking to the external analysis service.
//!   It is captured per stage and never aborts a run.
//! - [`AppError`]: application-level errors that implement `IntoResponse`
//!   for Axum handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// A graph that cannot be compiled into a stage plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// The graph has no source node.
    #[error("workflow must contain a source node")]
    NoSource,

    /// More than one source node was submitted.
    #[error("workflow must contain exactly one source node, found {0}")]
    MultipleSources(usize),

    /// No analyzer is reachable from the source.
    #[error("no analyzers are reachable from source node '{0}'")]
    NoAnalyzers(String),

    /// A conditional node is not fed by any analyzer.
    #[error("conditional node '{0}' has no upstream analyzer")]
    MissingProducer(String),

    /// A conditional node is fed by more than one analyzer.
    #[error("conditional node '{node}' has {count} upstream analyzers, expected exactly one")]
    AmbiguousProducer { node: String, count: usize },

    /// The node graph contains a cycle.
    #[error("workflow graph contains a cycle: {}", .0.join(" -> "))]
    GraphCycle(Vec<String>),

    /// A conditional was reached again through its own branches.
    #[error("circular conditional dependency: {}", .0.join(" -> "))]
    ConditionalCycle(Vec<String>),

    /// Stage dependencies could not be ordered.
    #[error("stage dependencies form a cycle through analyzer '{0}'")]
    StageCycle(String),
}

/// Failure of a call to the external analysis service.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("analysis service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The service answered with a payload we could not interpret.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The job reached a terminal failure status.
    #[error("job {job_id} failed with status '{status}'")]
    JobFailed { job_id: String, status: String },

    /// The job did not reach a terminal status in time.
    #[error("job {job_id} did not complete within {seconds}s")]
    Timeout { job_id: String, seconds: u64 },

    /// The run was cancelled while waiting on the job.
    #[error("cancelled while waiting on job {0}")]
    Cancelled(String),

    /// The service cannot be called with the current configuration.
    #[error("analysis service is not configured: {0}")]
    NotConfigured(String),
}

/// Application-level errors for the control plane.
#[derive(Error, Debug)]
pub enum AppError {
    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Graph could not be compiled
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Bad request error
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External service error
    #[error("External service error: {0}")]
    ExternalService(String),

    /// External service not configured or unreachable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Parse error (YAML, JSON, etc.)
    #[error("Parse error: {0}")]
    Parse(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Structural(e) => {
                tracing::warn!(error = %e, "Rejected workflow graph");
                (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::Serialization(e) => {
                tracing::error!(error = %e, "Serialization error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::ExternalService(msg) => {
                tracing::warn!(error = %msg, "External service error");
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!(error = %msg, "Service unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }
            AppError::Parse(msg) => {
                tracing::error!(error = %msg, "Parse error");
                (StatusCode::BAD_REQUEST, msg.clone())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::NotConfigured(_) => AppError::ServiceUnavailable(err.to_string()),
            other => AppError::ExternalService(other.to_string()),
        }
    }
}
