//! Analyzers offered by the analysis service.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::analysis::AnalyzerInfo;
use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzerQuery {
    /// Only analyzers of this type (`file`, `observable`)
    #[serde(rename = "type")]
    pub analyzer_type: Option<String>,
}

/// List enabled analyzers from the analysis service.
///
/// GET /api/analyzers?type=file
pub async fn list_analyzers(
    State(state): State<AppState>,
    Query(query): Query<AnalyzerQuery>,
) -> AppResult<Json<Vec<AnalyzerInfo>>> {
    let analyzers = state
        .workflows
        .list_analyzers(query.analyzer_type.as_deref())
        .await?;
    tracing::debug!(count = analyzers.len(), analyzer_type = ?query.analyzer_type, "Listed analyzers");
    Ok(Json(analyzers))
}
