//! Condition descriptors attached to conditional stages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::ConditionConfig;

/// Predicate kinds understood by the evaluator.
///
/// Unrecognised names survive as [`ConditionKind::Unknown`] so a plan can
/// still be compiled and the evaluator falls through to its safe default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionKind {
    VerdictMalicious,
    VerdictSuspicious,
    VerdictClean,
    AnalyzerSuccess,
    AnalyzerFailed,
    FieldEquals,
    FieldContains,
    FieldGreaterThan,
    FieldLessThan,
    RuleMatch,
    CapabilityDetected,
    HasDetections,
    HasErrors,
    /// Legacy `{type: NOT, inner}` wrapper.
    Not,
    Unknown(String),
}

impl ConditionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::VerdictMalicious => "verdict_malicious",
            Self::VerdictSuspicious => "verdict_suspicious",
            Self::VerdictClean => "verdict_clean",
            Self::AnalyzerSuccess => "analyzer_success",
            Self::AnalyzerFailed => "analyzer_failed",
            Self::FieldEquals => "field_equals",
            Self::FieldContains => "field_contains",
            Self::FieldGreaterThan => "field_greater_than",
            Self::FieldLessThan => "field_less_than",
            Self::RuleMatch => "rule_match",
            Self::CapabilityDetected => "capability_detected",
            Self::HasDetections => "has_detections",
            Self::HasErrors => "has_errors",
            Self::Not => "NOT",
            Self::Unknown(name) => name,
        }
    }

    /// Comparisons that need a field path and an expected value.
    pub fn is_field_comparison(&self) -> bool {
        matches!(
            self,
            Self::FieldEquals | Self::FieldContains | Self::FieldGreaterThan | Self::FieldLessThan
        )
    }

    pub fn requires_expected_value(&self) -> bool {
        self.is_field_comparison() || matches!(self, Self::CapabilityDetected)
    }
}

impl From<String> for ConditionKind {
    fn from(name: String) -> Self {
        match name.trim() {
            "verdict_malicious" => Self::VerdictMalicious,
            "verdict_suspicious" => Self::VerdictSuspicious,
            "verdict_clean" => Self::VerdictClean,
            "analyzer_success" => Self::AnalyzerSuccess,
            "analyzer_failed" => Self::AnalyzerFailed,
            "field_equals" | "custom_field" => Self::FieldEquals,
            "field_contains" => Self::FieldContains,
            "field_greater_than" => Self::FieldGreaterThan,
            "field_less_than" => Self::FieldLessThan,
            "rule_match" | "yara_rule_match" => Self::RuleMatch,
            "capability_detected" => Self::CapabilityDetected,
            "has_detections" => Self::HasDetections,
            "has_errors" => Self::HasErrors,
            "NOT" | "not" => Self::Not,
            _ => Self::Unknown(name),
        }
    }
}

impl From<&str> for ConditionKind {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<ConditionKind> for String {
    fn from(kind: ConditionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A typed predicate over one analyzer's report.
///
/// A FALSE branch carries the same descriptor as its TRUE sibling with
/// `negate` flipped, so both stay attributed to the same source analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default, alias = "source_analyzer")]
    pub source_analyzer: String,
    #[serde(default, alias = "field_path", skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(default, alias = "expected_value", skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub negate: bool,
    /// Wrapped condition for the legacy `NOT` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Box<Condition>>,
}

impl Condition {
    pub fn new(kind: impl Into<ConditionKind>, source_analyzer: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source_analyzer: source_analyzer.into(),
            field_path: None,
            expected_value: None,
            negate: false,
            inner: None,
        }
    }

    pub fn with_field(mut self, path: impl Into<String>, expected: Value) -> Self {
        self.field_path = Some(path.into());
        self.expected_value = Some(expected);
        self
    }

    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected_value = Some(expected);
        self
    }

    /// Legacy `NOT{inner}` wrapper.
    pub fn not(inner: Condition) -> Self {
        Self {
            kind: ConditionKind::Not,
            source_analyzer: inner.source_analyzer.clone(),
            field_path: None,
            expected_value: None,
            negate: false,
            inner: Some(Box::new(inner)),
        }
    }

    /// The opposite branch's descriptor.
    pub fn negated(&self) -> Self {
        Self {
            negate: !self.negate,
            ..self.clone()
        }
    }

    /// Build the descriptor for a conditional node.
    ///
    /// Explicit `conditionType` settings win over the legacy nested object;
    /// with neither present the node means "producer says malicious".
    /// `sourceAnalyzer` falls back to the node's producer.
    pub fn from_config(config: Option<&ConditionConfig>, producer: &str) -> Self {
        let Some(config) = config else {
            return Self::new(ConditionKind::VerdictMalicious, producer);
        };

        if let Some(kind) = &config.condition_type {
            return Self {
                kind: ConditionKind::from(kind.as_str()),
                source_analyzer: config
                    .source_analyzer
                    .clone()
                    .unwrap_or_else(|| producer.to_string()),
                field_path: config.field_path.clone(),
                expected_value: config.expected_value.clone(),
                negate: false,
                inner: None,
            };
        }

        if let Some(legacy) = &config.legacy {
            if let Ok(mut parsed) = serde_json::from_value::<Condition>(legacy.clone()) {
                parsed.fill_source(producer);
                return parsed;
            }
            tracing::warn!(
                producer = %producer,
                "Legacy condition object could not be read, defaulting to verdict_malicious"
            );
        }

        Self::new(ConditionKind::VerdictMalicious, producer)
    }

    fn fill_source(&mut self, producer: &str) {
        if self.source_analyzer.trim().is_empty() {
            self.source_analyzer = producer.to_string();
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.fill_source(producer);
        }
    }

    /// Short human form used in stage descriptions and logs.
    pub fn describe(&self) -> String {
        let body = match (&self.kind, &self.inner) {
            (ConditionKind::Not, Some(inner)) => format!("NOT({})", inner.describe()),
            (kind, _) => match (&self.field_path, &self.expected_value) {
                (Some(path), Some(expected)) => {
                    format!("{}({}.{} {})", kind, self.source_analyzer, path, expected)
                }
                (None, Some(expected)) => format!("{}({} {})", kind, self.source_analyzer, expected),
                _ => format!("{}({})", kind, self.source_analyzer),
            },
        };
        if self.negate {
            format!("!{}", body)
        } else {
            body
        }
    }
}
