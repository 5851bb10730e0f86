//! Run start handler.

use std::path::PathBuf;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::AnalysisFile;
use crate::error::{AppError, AppResult};
use crate::services::RunSummary;
use crate::state::AppState;
use crate::workflow::{WorkflowGraph, WorkflowSubmission};

/// Request to run a file through a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub workflow: WorkflowSubmission,
    /// File already present on the server's disk.
    #[serde(alias = "file_path")]
    pub file_path: String,
    #[serde(default, alias = "file_name", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl ExecuteRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.file_path.trim().is_empty() {
            return Err("'filePath' must not be empty".to_string());
        }
        Ok(())
    }
}

/// Run a file through a workflow and return the routed result.
///
/// POST /api/execute
///
/// The run completes before the response is sent; the summary stays
/// readable under `/api/runs/{id}` until it expires.
pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> AppResult<Json<RunSummary>> {
    request.validate().map_err(AppError::BadRequest)?;

    let path = PathBuf::from(&request.file_path);
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| AppError::BadRequest(format!("file '{}' is not readable: {}", path.display(), e)))?;
    if !metadata.is_file() {
        return Err(AppError::BadRequest(format!("'{}' is not a file", path.display())));
    }

    let mut file = AnalysisFile::from_path(path);
    if let Some(name) = request.file_name.filter(|n| !n.trim().is_empty()) {
        file.name = name;
    }

    let graph = WorkflowGraph::from_submission(request.workflow)?;
    debug!(
        nodes = graph.nodes().len(),
        edges = graph.edges().len(),
        file = %file.name,
        "Execute request"
    );

    let cancel = state.shutdown.child_token();
    let summary = state.workflows.run(&graph, &file, &cancel).await?;
    info!(run_id = %summary.run_id, sinks = summary.sinks.len(), "Run stored");

    let stored = state.runs.insert(summary).await;
    Ok(Json((*stored).clone()))
}
