//! Versioned per-analyzer verdict rule table.
//!
//! The table maps `analyzer -> condition kind -> rule set`. Supporting a new
//! analyzer is a data change in `verdict_rules.yaml`, never a code change.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::engine::condition::ConditionKind;
use crate::engine::field_path::{self, as_number, contains, is_populated, loosely_equal};
use crate::error::{AppError, AppResult};

const BUNDLED_RULES: &str = include_str!("../../data/verdict_rules.yaml");

/// Rule table format understood by this build.
pub const SUPPORTED_RULES_VERSION: u32 = 1;

/// Why the primary strategy could not decide.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("no verdict rule for {kind} on analyzer {analyzer}")]
    NoRule { analyzer: String, kind: String },

    #[error("none of the fields referenced by {kind} rules exist in the {analyzer} report")]
    FieldsMissing { analyzer: String, kind: String },

    #[error("condition type '{0}' requires a field path")]
    MissingFieldPath(String),

    #[error("condition type '{0}' requires an expected value")]
    MissingExpected(String),

    #[error("field path '{0}' not found in report")]
    FieldNotFound(String),

    #[error("cannot compare {actual} with {expected}")]
    NotComparable { actual: String, expected: String },

    #[error("unsupported condition type '{0}'")]
    Unsupported(String),
}

/// Test applied to a report field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTest {
    NonEmpty,
    Empty,
    Equals,
    OneOf,
    Contains,
    GreaterThan,
    LessThan,
    IsTrue,
    /// Field contains the condition's own expected value.
    ContainsExpected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    pub test: FieldTest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

impl FieldRule {
    /// `Ok(None)` when the field is absent from the report.
    fn check(&self, report: &Value, expected: Option<&Value>) -> Result<Option<bool>, RuleError> {
        let Some(actual) = field_path::navigate(report, &self.field) else {
            return Ok(None);
        };
        let hit = match self.test {
            FieldTest::NonEmpty => is_populated(actual),
            FieldTest::Empty => !is_populated(actual),
            FieldTest::IsTrue => actual.as_bool().unwrap_or(false),
            FieldTest::Equals => self
                .value
                .as_ref()
                .map(|v| loosely_equal(actual, v))
                .unwrap_or(false),
            FieldTest::OneOf => self.values.iter().any(|v| loosely_equal(actual, v)),
            FieldTest::Contains => self
                .value
                .as_ref()
                .map(|v| contains(actual, v))
                .unwrap_or(false),
            FieldTest::GreaterThan | FieldTest::LessThan => {
                let threshold = self.value.as_ref().and_then(as_number);
                match (as_number(actual), threshold) {
                    (Some(a), Some(t)) if self.test == FieldTest::GreaterThan => a > t,
                    (Some(a), Some(t)) => a < t,
                    _ => return Ok(None),
                }
            }
            FieldTest::ContainsExpected => {
                let expected =
                    expected.ok_or_else(|| RuleError::MissingExpected(self.field.clone()))?;
                contains(actual, expected)
            }
        };
        Ok(Some(hit))
    }
}

/// Rules for one analyzer and condition kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<FieldRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<FieldRule>,
    /// Like `all`, but rules whose field is absent are ignored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub each_present: Vec<FieldRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<bool>,
}

impl RuleSet {
    /// Apply the set to a report. `None` when no referenced field resolved.
    pub fn apply(&self, report: &Value, expected: Option<&Value>) -> Option<bool> {
        if let Some(answer) = self.constant {
            return Some(answer);
        }

        let mut resolved = 0usize;
        let mut any_hit = self.any.is_empty();
        for rule in &self.any {
            if let Some(hit) = rule.check(report, expected).ok()? {
                resolved += 1;
                any_hit |= hit;
            }
        }

        let mut all_hold = true;
        for rule in &self.all {
            match rule.check(report, expected).ok()? {
                Some(hit) => {
                    resolved += 1;
                    all_hold &= hit;
                }
                None => all_hold = false,
            }
        }
        for rule in &self.each_present {
            if let Some(hit) = rule.check(report, expected).ok()? {
                resolved += 1;
                all_hold &= hit;
            }
        }

        if resolved == 0 {
            return None;
        }
        Some(any_hit && all_hold)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictRuleTable {
    pub version: u32,
    #[serde(default)]
    pub defaults: BTreeMap<String, RuleSet>,
    #[serde(default)]
    pub analyzers: BTreeMap<String, BTreeMap<String, RuleSet>>,
}

impl VerdictRuleTable {
    /// Rule table shipped with the control plane.
    pub fn bundled() -> AppResult<Self> {
        Self::from_yaml_str(BUNDLED_RULES)
    }

    pub fn from_yaml_str(content: &str) -> AppResult<Self> {
        let table: Self = serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("invalid verdict rule table: {}", e)))?;
        if table.version != SUPPORTED_RULES_VERSION {
            return Err(AppError::Config(format!(
                "verdict rule table version {} is not supported (expected {})",
                table.version, SUPPORTED_RULES_VERSION
            )));
        }
        tracing::debug!(
            version = table.version,
            analyzers = table.analyzers.len(),
            "Loaded verdict rule table"
        );
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read rule table {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Bundled table unless an override path is configured.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        match path {
            Some(p) => Self::from_path(p),
            None => Self::bundled(),
        }
    }

    /// Analyzer-specific rules first, then the analyzer-agnostic defaults.
    pub fn lookup(&self, analyzer: &str, kind: &ConditionKind) -> Option<&RuleSet> {
        self.analyzers
            .get(analyzer)
            .and_then(|rules| rules.get(kind.as_str()))
            .or_else(|| self.defaults.get(kind.as_str()))
    }

    /// Decide a table-driven condition kind for one report.
    pub fn decide(
        &self,
        analyzer: &str,
        kind: &ConditionKind,
        report: &Value,
        expected: Option<&Value>,
    ) -> Result<bool, RuleError> {
        let rules = self.lookup(analyzer, kind).ok_or_else(|| RuleError::NoRule {
            analyzer: analyzer.to_string(),
            kind: kind.to_string(),
        })?;
        if *kind == ConditionKind::CapabilityDetected && expected.is_none() {
            return Err(RuleError::MissingExpected(kind.to_string()));
        }
        rules
            .apply(report, expected)
            .ok_or_else(|| RuleError::FieldsMissing {
                analyzer: analyzer.to_string(),
                kind: kind.to_string(),
            })
    }
}
