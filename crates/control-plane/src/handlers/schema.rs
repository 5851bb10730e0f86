//! Analyzer schema handlers backing the editor's condition builder.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::Condition;
use crate::error::{AppError, AppResult};
use crate::schema::{
    AnalyzerSchema, AnalyzerSchemaRegistry, ConditionTemplate, DetectedField, FieldPathCheck,
    SchemaField,
};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerSummary {
    pub name: String,
    pub description: String,
    pub field_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerDetail {
    pub name: String,
    #[serde(flatten)]
    pub schema: AnalyzerSchema,
}

#[derive(Debug, Serialize)]
pub struct ConditionCheck {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPathRequest {
    pub analyzer: String,
    #[serde(alias = "field_path")]
    pub field_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldList {
    pub analyzer: String,
    pub fields: Vec<SchemaField>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateList {
    pub analyzer: String,
    pub templates: Vec<ConditionTemplate>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct FieldSuggestions {
    pub analyzer: String,
    pub partial: String,
    pub suggestions: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFields {
    pub fields: Vec<DetectedField>,
    pub total_count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct FieldQuery {
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuggestionQuery {
    #[serde(default)]
    pub partial: String,
}

fn known<'a>(registry: &'a AnalyzerSchemaRegistry, name: &str) -> AppResult<&'a AnalyzerSchema> {
    registry
        .get(name)
        .ok_or_else(|| AppError::NotFound(format!("Unknown analyzer: {}", name)))
}

/// GET /api/schema/analyzers
pub async fn list_analyzers(State(state): State<AppState>) -> Json<Vec<AnalyzerSummary>> {
    let registry = state.registry();
    let analyzers = registry
        .analyzer_names()
        .filter_map(|name| registry.get(name).map(|s| (name, s)))
        .map(|(name, schema)| AnalyzerSummary {
            name: name.to_string(),
            description: schema.description.clone(),
            field_count: schema.output_fields.len(),
        })
        .collect();
    Json(analyzers)
}

/// GET /api/schema/analyzers/{name}
pub async fn get_analyzer(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<AnalyzerDetail>> {
    let schema = state
        .registry()
        .get(&name)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Unknown analyzer: {}", name)))?;
    Ok(Json(AnalyzerDetail { name, schema }))
}

/// Output fields of one analyzer, optionally filtered by a
/// case-insensitive substring of the path.
///
/// GET /api/schema/analyzers/{name}/fields?search=
pub async fn get_fields(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FieldQuery>,
) -> AppResult<Json<FieldList>> {
    known(state.registry(), &name)?;
    let needle = query.search.map(|s| s.to_lowercase());
    let fields: Vec<SchemaField> = state
        .registry()
        .output_fields(&name)
        .iter()
        .filter(|f| {
            needle
                .as_deref()
                .map_or(true, |n| f.path.to_lowercase().contains(n))
        })
        .cloned()
        .collect();
    Ok(Json(FieldList {
        analyzer: name,
        total_count: fields.len(),
        fields,
    }))
}

/// GET /api/schema/analyzers/{name}/templates
pub async fn get_templates(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<TemplateList>> {
    known(state.registry(), &name)?;
    let templates = state.registry().condition_templates(&name).to_vec();
    Ok(Json(TemplateList {
        analyzer: name,
        total_count: templates.len(),
        templates,
    }))
}

/// Field path autocomplete for the condition editor.
///
/// GET /api/schema/field-suggestions/{name}?partial=
pub async fn field_suggestions(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SuggestionQuery>,
) -> Json<FieldSuggestions> {
    let suggestions = state.registry().suggest_field_paths(&name, &query.partial);
    Json(FieldSuggestions {
        analyzer: name,
        partial: query.partial,
        count: suggestions.len(),
        suggestions,
    })
}

/// Infer the fields of a sample analyzer report.
///
/// POST /api/schema/detect-fields
pub async fn detect_fields(Json(sample): Json<Value>) -> Json<DetectedFields> {
    let fields = AnalyzerSchemaRegistry::detect_fields(&sample);
    Json(DetectedFields {
        total_count: fields.len(),
        fields,
    })
}

/// POST /api/schema/validate-condition
pub async fn validate_condition(
    State(state): State<AppState>,
    Json(condition): Json<Condition>,
) -> Json<ConditionCheck> {
    let errors = state.registry().validate_condition(&condition);
    Json(ConditionCheck {
        valid: errors.is_empty(),
        errors,
    })
}

/// POST /api/schema/validate-field-path
pub async fn validate_field_path(
    State(state): State<AppState>,
    Json(request): Json<FieldPathRequest>,
) -> Json<FieldPathCheck> {
    Json(
        state
            .registry()
            .validate_field_path(&request.analyzer, &request.field_path),
    )
}
