//! Condition evaluation for conditional stages.
//!
//! [`LadderEvaluator`] tries four strategies in order and returns the first
//! answer it gets:
//!
//! 1. **Primary** (confidence 1.0): the versioned verdict rule table, plus
//!    status checks and direct field comparisons.
//! 2. **Schema fallback** (0.8): the analyzer's registered schema, either its
//!    malware indicator fields or a similarly named field.
//! 3. **Generic fallback** (0.5): keyword search over the serialized report.
//! 4. **Safe default** (0.0): a fixed conservative answer per kind.
//!
//! Evaluation is pure. The same condition over the same results always
//! produces the same outcome, and unknown input never raises.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::AnalyzerReport;
use crate::engine::condition::{Condition, ConditionKind};
use crate::engine::field_path::{self, as_number, contains, is_populated, loosely_equal};
use crate::engine::rules::{RuleError, VerdictRuleTable};
use crate::engine::state::{find_report, ResultsByStage};
use crate::schema::AnalyzerSchemaRegistry;

/// Which rung of the ladder produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStrategy {
    Primary,
    SchemaFallback,
    GenericFallback,
    SafeDefault,
}

impl EvaluationStrategy {
    pub fn confidence(self) -> f64 {
        match self {
            Self::Primary => 1.0,
            Self::SchemaFallback => 0.8,
            Self::GenericFallback => 0.5,
            Self::SafeDefault => 0.0,
        }
    }
}

impl std::fmt::Display for EvaluationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::SchemaFallback => write!(f, "schema_fallback"),
            Self::GenericFallback => write!(f, "generic_fallback"),
            Self::SafeDefault => write!(f, "safe_default"),
        }
    }
}

/// Result of evaluating one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub result: bool,
    pub confidence: f64,
    pub strategy: EvaluationStrategy,
    /// Why earlier strategies gave up, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trail: Vec<String>,
}

impl EvaluationOutcome {
    fn new(result: bool, strategy: EvaluationStrategy, trail: Vec<String>) -> Self {
        Self {
            result,
            confidence: strategy.confidence(),
            strategy,
            trail,
        }
    }

    /// Fallback strategy was needed.
    pub fn is_degraded(&self) -> bool {
        self.strategy != EvaluationStrategy::Primary
    }
}

/// Decides whether a conditional stage runs.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, condition: &Condition, results: &ResultsByStage) -> EvaluationOutcome;
}

const MALICIOUS_KEYWORDS: &[&str] = &[
    "malicious", "malware", "virus", "trojan", "ransomware", "infected", "exploit", "backdoor",
];
const SUSPICIOUS_KEYWORDS: &[&str] = &["suspicious", "potentially unwanted", "heuristic", "threat"];
const DETECTION_KEYWORDS: &[&str] = &["detection", "alert", "match", "finding", "signature"];
const RULE_KEYWORDS: &[&str] = &["match", "rule"];

/// Rule table first, then schema, keywords and the safe default.
#[derive(Clone)]
pub struct LadderEvaluator {
    rules: Arc<VerdictRuleTable>,
    schemas: Arc<AnalyzerSchemaRegistry>,
}

impl LadderEvaluator {
    pub fn new(rules: Arc<VerdictRuleTable>, schemas: Arc<AnalyzerSchemaRegistry>) -> Self {
        Self { rules, schemas }
    }

    fn evaluate_inner(&self, condition: &Condition, results: &ResultsByStage) -> EvaluationOutcome {
        let mut outcome = match (&condition.kind, &condition.inner) {
            (ConditionKind::Not, Some(inner)) => {
                let mut inner_outcome = self.evaluate_inner(inner, results);
                inner_outcome.result = !inner_outcome.result;
                inner_outcome
            }
            (ConditionKind::Not, None) => {
                let trail = vec!["NOT condition has no inner condition".to_string()];
                EvaluationOutcome::new(false, EvaluationStrategy::SafeDefault, trail)
            }
            _ => self.ladder(condition, results),
        };
        if condition.negate {
            outcome.result = !outcome.result;
        }
        outcome
    }

    fn ladder(&self, condition: &Condition, results: &ResultsByStage) -> EvaluationOutcome {
        let mut trail = Vec::new();

        let Some(report) = find_report(results, &condition.source_analyzer) else {
            trail.push(format!(
                "no report from analyzer '{}' in accumulated results",
                condition.source_analyzer
            ));
            return EvaluationOutcome::new(
                safe_default(&condition.kind),
                EvaluationStrategy::SafeDefault,
                trail,
            );
        };

        match self.primary(condition, report) {
            Ok(result) => return EvaluationOutcome::new(result, EvaluationStrategy::Primary, trail),
            Err(e) => trail.push(format!("primary: {}", e)),
        }

        match self.schema_fallback(condition, report) {
            Ok(result) => {
                return EvaluationOutcome::new(result, EvaluationStrategy::SchemaFallback, trail)
            }
            Err(e) => trail.push(format!("schema: {}", e)),
        }

        match generic_fallback(&condition.kind, &report.report) {
            Ok(result) => {
                return EvaluationOutcome::new(result, EvaluationStrategy::GenericFallback, trail)
            }
            Err(e) => trail.push(format!("generic: {}", e)),
        }

        EvaluationOutcome::new(
            safe_default(&condition.kind),
            EvaluationStrategy::SafeDefault,
            trail,
        )
    }

    fn primary(&self, condition: &Condition, report: &AnalyzerReport) -> Result<bool, RuleError> {
        let kind = &condition.kind;
        match kind {
            ConditionKind::AnalyzerSuccess => Ok(report.is_success()),
            ConditionKind::AnalyzerFailed => Ok(!report.is_success()),
            k if k.is_field_comparison() => {
                let path = condition
                    .field_path
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| RuleError::MissingFieldPath(kind.to_string()))?;
                let expected = condition
                    .expected_value
                    .as_ref()
                    .ok_or_else(|| RuleError::MissingExpected(kind.to_string()))?;
                let actual = field_path::navigate(&report.report, path)
                    .ok_or_else(|| RuleError::FieldNotFound(path.to_string()))?;
                compare(kind, actual, expected)
            }
            ConditionKind::Not | ConditionKind::Unknown(_) => {
                Err(RuleError::Unsupported(kind.to_string()))
            }
            _ => self.rules.decide(
                &condition.source_analyzer,
                kind,
                &report.report,
                condition.expected_value.as_ref(),
            ),
        }
    }

    fn schema_fallback(&self, condition: &Condition, report: &AnalyzerReport) -> Result<bool, String> {
        let analyzer = condition.source_analyzer.as_str();
        if !self.schemas.contains(analyzer) {
            return Err(format!("no schema registered for '{}'", analyzer));
        }
        let kind = &condition.kind;

        match kind {
            ConditionKind::VerdictMalicious
            | ConditionKind::VerdictSuspicious
            | ConditionKind::VerdictClean
            | ConditionKind::HasDetections
            | ConditionKind::RuleMatch => {
                let mut resolved = 0usize;
                let mut hit = false;
                for indicator in self.schemas.malware_indicators(analyzer) {
                    if let Some(value) = field_path::navigate(&report.report, indicator) {
                        resolved += 1;
                        hit |= indicator_fires(value);
                    }
                }
                if resolved == 0 {
                    return Err(format!("no malware indicator field of '{}' present", analyzer));
                }
                Ok(if *kind == ConditionKind::VerdictClean {
                    !hit
                } else {
                    hit
                })
            }
            k if k.is_field_comparison() => {
                let path = condition.field_path.as_deref().unwrap_or_default();
                let expected = condition
                    .expected_value
                    .as_ref()
                    .ok_or_else(|| format!("'{}' has no expected value", kind))?;
                for candidate in self.schemas.suggest_field_paths(analyzer, path) {
                    let Some(actual) = field_path::navigate(&report.report, &candidate) else {
                        continue;
                    };
                    if let Ok(result) = compare(kind, actual, expected) {
                        tracing::debug!(
                            requested = %path,
                            used = %candidate,
                            "Schema fallback resolved similar field"
                        );
                        return Ok(result);
                    }
                }
                Err(format!("no schema field similar to '{}' present", path))
            }
            _ => Err(format!("no schema strategy for '{}'", kind)),
        }
    }
}

impl ConditionEvaluator for LadderEvaluator {
    fn evaluate(&self, condition: &Condition, results: &ResultsByStage) -> EvaluationOutcome {
        let outcome = self.evaluate_inner(condition, results);
        if outcome.is_degraded() {
            tracing::warn!(
                condition = %condition.describe(),
                strategy = %outcome.strategy,
                confidence = outcome.confidence,
                trail = ?outcome.trail,
                "Condition evaluated with degraded confidence"
            );
        } else {
            tracing::debug!(
                condition = %condition.describe(),
                result = outcome.result,
                "Condition evaluated"
            );
        }
        outcome
    }
}

fn compare(kind: &ConditionKind, actual: &Value, expected: &Value) -> Result<bool, RuleError> {
    let not_comparable = || RuleError::NotComparable {
        actual: actual.to_string(),
        expected: expected.to_string(),
    };
    match kind {
        ConditionKind::FieldEquals => Ok(loosely_equal(actual, expected)),
        ConditionKind::FieldContains => Ok(contains(actual, expected)),
        ConditionKind::FieldGreaterThan => {
            let (a, e) = as_number(actual).zip(as_number(expected)).ok_or_else(not_comparable)?;
            Ok(a > e)
        }
        ConditionKind::FieldLessThan => {
            let (a, e) = as_number(actual).zip(as_number(expected)).ok_or_else(not_comparable)?;
            Ok(a < e)
        }
        other => Err(RuleError::Unsupported(other.to_string())),
    }
}

/// An indicator field "fires" when it carries evidence.
fn indicator_fires(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            let s = s.to_lowercase();
            ["malicious", "suspicious", "high risk", "critical"]
                .iter()
                .any(|k| s.contains(k))
        }
        Value::Number(_) => as_number(value).map(|n| n > 0.0).unwrap_or(false),
        other => is_populated(other),
    }
}

fn generic_fallback(kind: &ConditionKind, report: &Value) -> Result<bool, String> {
    let keywords = match kind {
        ConditionKind::VerdictMalicious => MALICIOUS_KEYWORDS,
        ConditionKind::VerdictSuspicious => SUSPICIOUS_KEYWORDS,
        ConditionKind::HasDetections => DETECTION_KEYWORDS,
        ConditionKind::RuleMatch => RULE_KEYWORDS,
        other => return Err(format!("no keyword strategy for '{}'", other)),
    };
    if !is_populated(report) {
        return Err("report is empty".to_string());
    }
    let text = report.to_string().to_lowercase();
    Ok(keywords
        .iter()
        .any(|k| text.contains(k) && !text.contains(&format!("no {}", k))))
}

/// Conservative answer when nothing else could decide.
pub fn safe_default(kind: &ConditionKind) -> bool {
    matches!(kind, ConditionKind::AnalyzerFailed)
}
