//! Per-run stage state.
//!
//! Everything in here is owned by a single run. Concurrent runs build their
//! own [`ResultsByStage`] and routing records and share nothing mutable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::AnalyzerReport;

/// Lifecycle of one stage inside a run.
///
/// `Pending -> Evaluating -> {Executing, Skipped} -> {Done, Failed}`; any
/// stage not reached before cancellation ends as `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Evaluating,
    Executing,
    Skipped,
    Done,
    Failed,
    Cancelled,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Skipped | Self::Done | Self::Failed | Self::Cancelled
        )
    }

    /// The stage ran to completion. A failed stage does not count when
    /// routing results.
    pub fn was_executed(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::Executing => write!(f, "executing"),
            Self::Skipped => write!(f, "skipped"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The stage's own condition evaluated to false.
    ConditionFalse,
    /// Every stage producing the condition's source analyzer was skipped.
    UpstreamSkipped,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConditionFalse => write!(f, "condition_false"),
            Self::UpstreamSkipped => write!(f, "upstream_skipped"),
        }
    }
}

/// What one stage contributed to the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub analyzer_reports: Vec<AnalyzerReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    pub fn completed(job_id: impl Into<String>, analyzer_reports: Vec<AnalyzerReport>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            analyzer_reports,
            error: None,
        }
    }

    pub fn failed(job_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            job_id,
            analyzer_reports: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Accumulated results keyed by stage id, iterated in stage order.
pub type ResultsByStage = BTreeMap<usize, StageResult>;

/// First report with the given analyzer name, scanning stages in order.
pub fn find_report<'a>(results: &'a ResultsByStage, analyzer: &str) -> Option<&'a AnalyzerReport> {
    results
        .values()
        .flat_map(|stage| stage.analyzer_reports.iter())
        .find(|report| report.name == analyzer)
}

/// Timeline entry for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage_id: usize,
    pub state: StageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn new(stage_id: usize) -> Self {
        Self {
            stage_id,
            state: StageState::Pending,
            skip_reason: None,
            condition_result: None,
            confidence: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn transition(&mut self, state: StageState) {
        tracing::debug!(stage = self.stage_id, from = %self.state, to = %state, "Stage transition");
        // skipped without evaluation and cancelled stages never start
        if self.started_at.is_none() && matches!(state, StageState::Evaluating | StageState::Executing) {
            self.started_at = Some(Utc::now());
        }
        if state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state = state;
    }
}

/// Which sinks a stage feeds and whether it ran. This is the record the
/// result router trusts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRoutingRecord {
    pub stage_id: usize,
    pub target_sinks: Vec<String>,
    pub executed: bool,
    pub analyzers: Vec<String>,
    /// Stage carried a condition (it belongs to a branch).
    #[serde(default)]
    pub gated: bool,
    /// Execution was attempted but the analysis call failed.
    #[serde(default)]
    pub failed: bool,
    /// Conditional nesting depth of the stage.
    #[serde(default)]
    pub depth: usize,
    /// Stage whose analyzers feed this stage's conditional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_stage: Option<usize>,
}
