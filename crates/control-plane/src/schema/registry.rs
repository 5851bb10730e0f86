//! Analyzer output schema registry.
//!
//! Loaded once at startup and shared read-only between runs. The evaluator
//! uses it for its schema fallback, the validator for field-path checks and
//! suggestions.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::condition::{Condition, ConditionKind};
use crate::error::{AppError, AppResult};

const BUNDLED_SCHEMAS: &str = include_str!("../../data/analyzer_schemas.yaml");

/// Maximum number of field suggestions returned.
pub const MAX_SUGGESTIONS: usize = 10;

/// JSON type of a report field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
            Value::Null => Self::Any,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
}

/// Pre-built condition offered by the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub condition_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<Value>,
    #[serde(default)]
    pub use_case: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSchema {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub output_fields: Vec<SchemaField>,
    #[serde(default)]
    pub condition_templates: Vec<ConditionTemplate>,
    /// Report-relative paths whose presence indicates a threat.
    #[serde(default)]
    pub malware_indicators: Vec<String>,
    #[serde(default)]
    pub success_patterns: Vec<String>,
}

impl AnalyzerSchema {
    pub fn field_paths(&self) -> impl Iterator<Item = &str> {
        self.output_fields.iter().map(|f| f.path.as_str())
    }
}

/// Outcome of a field path check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPathCheck {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// A field discovered in a sample report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedField {
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    #[serde(default = "default_version")]
    version: u32,
    analyzers: BTreeMap<String, AnalyzerSchema>,
}

fn default_version() -> u32 {
    1
}

/// Read-only registry of analyzer schemas.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerSchemaRegistry {
    version: u32,
    analyzers: BTreeMap<String, AnalyzerSchema>,
}

impl AnalyzerSchemaRegistry {
    /// Schemas shipped with the control plane.
    pub fn bundled() -> AppResult<Self> {
        Self::from_yaml_str(BUNDLED_SCHEMAS)
    }

    pub fn from_yaml_str(content: &str) -> AppResult<Self> {
        let doc: SchemaDocument = serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("invalid analyzer schema file: {}", e)))?;
        tracing::debug!(
            version = doc.version,
            analyzers = doc.analyzers.len(),
            "Loaded analyzer schemas"
        );
        Ok(Self {
            version: doc.version,
            analyzers: doc.analyzers,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read schema file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Bundled schemas unless an override path is configured.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        match path {
            Some(p) => Self::from_path(p),
            None => Self::bundled(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, analyzer: &str) -> Option<&AnalyzerSchema> {
        self.analyzers.get(analyzer)
    }

    pub fn contains(&self, analyzer: &str) -> bool {
        self.analyzers.contains_key(analyzer)
    }

    pub fn analyzer_names(&self) -> impl Iterator<Item = &str> {
        self.analyzers.keys().map(String::as_str)
    }

    pub fn output_fields(&self, analyzer: &str) -> &[SchemaField] {
        self.get(analyzer)
            .map(|s| s.output_fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn condition_templates(&self, analyzer: &str) -> &[ConditionTemplate] {
        self.get(analyzer)
            .map(|s| s.condition_templates.as_slice())
            .unwrap_or(&[])
    }

    pub fn malware_indicators(&self, analyzer: &str) -> &[String] {
        self.get(analyzer)
            .map(|s| s.malware_indicators.as_slice())
            .unwrap_or(&[])
    }

    /// Exact match, or a prefix relation in either direction
    /// (`report.pe_info` matches `report.pe_info.signature.valid`).
    pub fn validate_field_path(&self, analyzer: &str, field_path: &str) -> FieldPathCheck {
        let Some(schema) = self.get(analyzer) else {
            return FieldPathCheck {
                valid: false,
                message: format!("Unknown analyzer: {}", analyzer),
                suggestions: Vec::new(),
            };
        };

        if schema.field_paths().any(|p| p == field_path) {
            return FieldPathCheck {
                valid: true,
                message: "Valid field path".to_string(),
                suggestions: Vec::new(),
            };
        }

        let related: Vec<String> = schema
            .field_paths()
            .filter(|p| p.starts_with(field_path) || field_path.starts_with(p))
            .map(str::to_string)
            .collect();
        if !related.is_empty() {
            return FieldPathCheck {
                valid: true,
                message: format!(
                    "Field path matches: {}",
                    related.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                ),
                suggestions: related,
            };
        }

        FieldPathCheck {
            valid: false,
            message: format!(
                "Field path not found in {} schema. Available fields: {}",
                analyzer,
                schema.field_paths().take(5).collect::<Vec<_>>().join(", ")
            ),
            suggestions: self.suggest_field_paths(analyzer, field_path),
        }
    }

    /// Autocomplete suggestions: prefix matches first, then
    /// case-insensitive substring matches on the path or its last segment.
    pub fn suggest_field_paths(&self, analyzer: &str, partial: &str) -> Vec<String> {
        let fields = self.output_fields(analyzer);
        if partial.is_empty() {
            return fields
                .iter()
                .take(MAX_SUGGESTIONS)
                .map(|f| f.path.clone())
                .collect();
        }

        let prefixed: Vec<String> = fields
            .iter()
            .filter(|f| f.path.starts_with(partial))
            .map(|f| f.path.clone())
            .collect();
        if !prefixed.is_empty() {
            return prefixed.into_iter().take(MAX_SUGGESTIONS).collect();
        }

        let needle = partial.to_lowercase();
        let leaf = needle.rsplit('.').next().unwrap_or(&needle).to_string();
        fields
            .iter()
            .filter(|f| {
                let path = f.path.to_lowercase();
                path.contains(&needle) || (!leaf.is_empty() && path.contains(&leaf))
            })
            .take(MAX_SUGGESTIONS)
            .map(|f| f.path.clone())
            .collect()
    }

    /// Structural checks on a condition descriptor. Empty means valid.
    pub fn validate_condition(&self, condition: &Condition) -> Vec<String> {
        let mut errors = Vec::new();

        if let ConditionKind::Not = condition.kind {
            return match &condition.inner {
                Some(inner) => self.validate_condition(inner),
                None => vec!["NOT condition requires an 'inner' condition".to_string()],
            };
        }
        if let ConditionKind::Unknown(name) = &condition.kind {
            errors.push(format!("Unknown condition type: {}", name));
        }
        if condition.source_analyzer.trim().is_empty() {
            errors.push("Condition must have a source analyzer".to_string());
            return errors;
        }

        let analyzer = condition.source_analyzer.as_str();
        let known = self.contains(analyzer);
        if !known {
            errors.push(format!("Unknown analyzer: {}", analyzer));
        }

        if condition.kind.is_field_comparison() {
            match condition.field_path.as_deref() {
                None => errors.push(format!(
                    "Condition type '{}' requires a field path",
                    condition.kind
                )),
                Some(path) if known => {
                    let check = self.validate_field_path(analyzer, path);
                    if !check.valid {
                        errors.push(check.message);
                    }
                }
                Some(_) => {}
            }
        }

        if condition.kind.requires_expected_value() && condition.expected_value.is_none() {
            let what = if condition.kind == ConditionKind::CapabilityDetected {
                "an expected value (capability name)"
            } else {
                "an expected value"
            };
            errors.push(format!("Condition type '{}' requires {}", condition.kind, what));
        }

        errors
    }

    /// Infer a field list from a sample report. Arrays are described by
    /// their first element.
    pub fn detect_fields(sample: &Value) -> Vec<DetectedField> {
        fn walk(value: &Value, path: &str, out: &mut Vec<DetectedField>) {
            match value {
                Value::Object(map) => {
                    for (key, child) in map {
                        let child_path = if path.is_empty() {
                            key.clone()
                        } else {
                            format!("{}.{}", path, key)
                        };
                        let scalar = !matches!(child, Value::Object(_) | Value::Array(_));
                        out.push(DetectedField {
                            path: child_path.clone(),
                            field_type: FieldType::infer(child),
                            sample_value: scalar.then(|| child.clone()),
                        });
                        walk(child, &child_path, out);
                    }
                }
                Value::Array(items) => {
                    if let Some(first) = items.first() {
                        walk(first, path, out);
                    }
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        match sample.get("report") {
            Some(report) => walk(report, "report", &mut out),
            None => walk(sample, "", &mut out),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> AnalyzerSchemaRegistry {
        AnalyzerSchemaRegistry::bundled().unwrap()
    }

    #[test]
    fn test_bundled_schemas_load() {
        let reg = registry();
        assert_eq!(reg.version(), 1);
        assert!(reg.contains("ClamAV"));
        assert!(reg.contains("Quark_Engine"));
        assert_eq!(reg.malware_indicators("ClamAV"), ["detections".to_string()]);
        assert!(reg.malware_indicators("File_Info").is_empty());
        assert!(reg.malware_indicators("Nope").is_empty());
    }

    #[test]
    fn test_validate_field_path() {
        let reg = registry();
        assert!(reg.validate_field_path("ClamAV", "report.detections").valid);
        let partial = reg.validate_field_path("PE_Info", "report.pe_info.signature");
        assert!(partial.valid);
        assert_eq!(partial.suggestions.len(), 2);
        let missing = reg.validate_field_path("ClamAV", "report.verdict");
        assert!(!missing.valid);
        assert!(missing.message.contains("report.detections"));
        assert!(!reg.validate_field_path("Nope", "x").valid);
    }

    #[test]
    fn test_suggest_field_paths() {
        let reg = registry();
        assert_eq!(
            reg.suggest_field_paths("Quark_Engine", "report.t"),
            vec!["report.threat_level", "report.total_score"]
        );
        assert_eq!(
            reg.suggest_field_paths("Quark_Engine", "score"),
            vec!["report.total_score"]
        );
        assert_eq!(
            reg.suggest_field_paths("ClamAV", "results.detections"),
            vec!["report.detections"]
        );
        assert!(reg.suggest_field_paths("Yara", "").len() <= MAX_SUGGESTIONS);
    }

    #[test]
    fn test_validate_condition() {
        let reg = registry();
        let ok = Condition::new("field_equals", "File_Info")
            .with_field("report.filetype", json!("PE"));
        assert!(reg.validate_condition(&ok).is_empty());

        let no_path = Condition::new("field_equals", "File_Info");
        let errors = reg.validate_condition(&no_path);
        assert_eq!(errors.len(), 2);

        let capability = Condition::new("capability_detected", "Capa_Info");
        assert_eq!(reg.validate_condition(&capability).len(), 1);

        let unknown = Condition::new("verdict_malicious", "Mystery");
        assert_eq!(
            reg.validate_condition(&unknown),
            vec!["Unknown analyzer: Mystery".to_string()]
        );
    }

    #[test]
    fn test_detect_fields() {
        let sample = json!({"report": {"detections": ["Eicar"], "stats": {"malicious": 3}}});
        let fields = AnalyzerSchemaRegistry::detect_fields(&sample);
        let paths: Vec<&str> = fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["report.detections", "report.stats", "report.stats.malicious"]
        );
        assert_eq!(fields[2].field_type, FieldType::Number);
        assert_eq!(fields[2].sample_value, Some(json!(3)));
    }
}
