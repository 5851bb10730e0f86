//! Workflow document parser.
//!
//! Accepts the editor's JSON export or a hand-written YAML document with the
//! same shape.

use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::workflow::types::{WorkflowGraph, WorkflowSubmission};

/// Parse a JSON or YAML document into an indexed graph.
///
/// JSON is tried first because every JSON document is also YAML and the JSON
/// parser gives better error positions.
pub fn parse_workflow(content: &str) -> AppResult<WorkflowGraph> {
    let submission = parse_submission(content)?;
    WorkflowGraph::from_submission(submission)
}

pub fn parse_submission(content: &str) -> AppResult<WorkflowSubmission> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .map_err(|e| AppError::Parse(format!("invalid workflow JSON: {}", e)));
    }
    serde_yaml::from_str(content)
        .map_err(|e| AppError::Parse(format!("invalid workflow YAML: {}", e)))
}

/// Read and parse a workflow file.
pub fn load_workflow(path: impl AsRef<Path>) -> AppResult<WorkflowGraph> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::BadRequest(format!("cannot read workflow {}: {}", path.display(), e))
    })?;
    parse_workflow(&content)
}
