//! Workflow compile and validate handlers.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::engine::CompiledPlan;
use crate::error::AppResult;
use crate::state::AppState;
use crate::workflow::{ValidationReport, WorkflowGraph, WorkflowSubmission};

/// Response for a compile request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub plan: CompiledPlan,
    pub analyzers: Vec<String>,
}

/// Compile a workflow into its stage plan.
///
/// POST /api/workflow/compile
pub async fn compile(
    State(state): State<AppState>,
    Json(submission): Json<WorkflowSubmission>,
) -> AppResult<Json<CompileResponse>> {
    let graph = WorkflowGraph::from_submission(submission)?;
    let plan = state.workflows.compile(&graph)?;
    Ok(Json(CompileResponse {
        analyzers: plan.analyzers(),
        plan,
    }))
}

/// Validate a workflow without compiling it.
///
/// POST /api/workflow/validate
pub async fn validate(
    State(state): State<AppState>,
    Json(submission): Json<WorkflowSubmission>,
) -> AppResult<Json<ValidationReport>> {
    let graph = WorkflowGraph::from_submission(submission)?;
    Ok(Json(state.workflows.validate(&graph)))
}
