//! Stage execution engine.
//!
//! Walks a compiled plan strictly in order. Conditional stages are evaluated
//! against everything accumulated so far; stages that should run are
//! submitted to the analysis service and awaited under a per-stage timeout.
//! A failing stage is recorded and the run carries on. Cancellation is
//! checked between stages and aborts an in-flight wait.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis::{wait_for_completion, AnalysisFile, AnalysisService, AnalyzerReport};
use crate::config::IntelOwlConfig;
use crate::engine::compiler::{CompiledPlan, Stage};
use crate::engine::evaluator::{ConditionEvaluator, EvaluationOutcome};
use crate::engine::state::{
    ResultsByStage, SkipReason, StageRecord, StageResult, StageRoutingRecord, StageState,
};
use crate::error::AnalysisError;

/// Timing knobs for one run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub stage_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl From<&IntelOwlConfig> for ExecutorConfig {
    fn from(config: &IntelOwlConfig) -> Self {
        Self {
            stage_timeout: config.stage_timeout(),
            poll_interval: config.poll_every(),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub total_stages: usize,
    pub job_ids: Vec<String>,
    pub executed_stages: Vec<usize>,
    pub skipped_stages: Vec<usize>,
    pub failed_stages: Vec<usize>,
    pub cancelled: bool,
    pub results_by_stage: ResultsByStage,
    pub stage_records: Vec<StageRecord>,
    pub stage_routing: Vec<StageRoutingRecord>,
    /// Condition outcomes keyed by stage id.
    pub evaluations: BTreeMap<usize, EvaluationOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Reports of executed stages in stage order, first occurrence of each
    /// analyzer name wins.
    pub fn report_pool(&self) -> Vec<&AnalyzerReport> {
        let mut seen = std::collections::HashSet::new();
        self.results_by_stage
            .values()
            .flat_map(|r| r.analyzer_reports.iter())
            .filter(|r| seen.insert(r.name.as_str()))
            .collect()
    }
}

/// Drives a plan against an analysis service.
#[derive(Clone)]
pub struct StageExecutor {
    service: Arc<dyn AnalysisService>,
    evaluator: Arc<dyn ConditionEvaluator>,
    config: ExecutorConfig,
}

enum Gate {
    Run,
    Skip(SkipReason),
}

impl StageExecutor {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        evaluator: Arc<dyn ConditionEvaluator>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            service,
            evaluator,
            config,
        }
    }

    pub async fn execute(
        &self,
        plan: &CompiledPlan,
        file: &AnalysisFile,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(run_id = %run_id, stages = plan.stages.len(), file = %file.name, "Starting analysis run");

        let mut results = ResultsByStage::new();
        let mut records: Vec<StageRecord> = plan.stages.iter().map(|s| StageRecord::new(s.id)).collect();
        let mut evaluations = BTreeMap::new();
        let mut job_ids = Vec::new();
        let mut cancelled = false;

        for (index, stage) in plan.stages.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                for record in records[index..].iter_mut() {
                    record.transition(StageState::Cancelled);
                }
                tracing::warn!(run_id = %run_id, stage = stage.id, "Run cancelled, remaining stages not started");
                break;
            }

            match self.gate(stage, index, &mut records, &results, &mut evaluations) {
                Gate::Skip(reason) => {
                    let record = &mut records[index];
                    record.skip_reason = Some(reason);
                    record.transition(StageState::Skipped);
                    tracing::info!(run_id = %run_id, stage = stage.id, reason = %reason, "Stage skipped");
                    continue;
                }
                Gate::Run => {}
            }
            if let Some(outcome) = evaluations.get(&stage.id) {
                records[index].condition_result = Some(outcome.result);
                records[index].confidence = Some(outcome.confidence);
            }

            records[index].transition(StageState::Executing);

            if stage.is_routing_only() {
                records[index].transition(StageState::Done);
                tracing::info!(run_id = %run_id, stage = stage.id, "Routing-only stage done");
                continue;
            }

            match self.run_stage(stage, file, cancel).await {
                Ok((job_id, reports)) => {
                    tracing::info!(
                        run_id = %run_id,
                        stage = stage.id,
                        job_id = %job_id,
                        reports = reports.len(),
                        "Stage completed"
                    );
                    job_ids.push(job_id.clone());
                    results.insert(stage.id, StageResult::completed(job_id, reports));
                    records[index].transition(StageState::Done);
                }
                Err((job_id, error)) => {
                    let message = error.to_string();
                    tracing::error!(run_id = %run_id, stage = stage.id, error = %message, "Stage failed");
                    if let Some(id) = &job_id {
                        job_ids.push(id.clone());
                    }
                    if matches!(error, AnalysisError::Cancelled(_)) {
                        cancelled = true;
                    }
                    results.insert(stage.id, StageResult::failed(job_id, message.clone()));
                    records[index].error = Some(message);
                    records[index].transition(StageState::Failed);
                }
            }
        }

        let routing = plan
            .stages
            .iter()
            .zip(&records)
            .map(|(stage, record)| StageRoutingRecord {
                stage_id: stage.id,
                target_sinks: stage.target_sinks.clone(),
                executed: record.state.was_executed(),
                analyzers: stage.analyzers.clone(),
                gated: stage.condition.is_some(),
                failed: record.state == StageState::Failed,
                depth: stage.depth,
                parent_stage: stage.producer_stage,
            })
            .collect();

        let by_state = |state: StageState| -> Vec<usize> {
            records
                .iter()
                .filter(|r| r.state == state)
                .map(|r| r.stage_id)
                .collect()
        };
        let report = ExecutionReport {
            run_id,
            total_stages: plan.stages.len(),
            job_ids,
            executed_stages: by_state(StageState::Done),
            skipped_stages: by_state(StageState::Skipped),
            failed_stages: by_state(StageState::Failed),
            cancelled,
            results_by_stage: results,
            stage_routing: routing,
            evaluations,
            stage_records: records,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            run_id = %run_id,
            executed = report.executed_stages.len(),
            skipped = report.skipped_stages.len(),
            failed = report.failed_stages.len(),
            cancelled = report.cancelled,
            "Analysis run finished"
        );
        report
    }

    /// Decide whether a stage runs. `index` is the stage's slot in `records`.
    fn gate(
        &self,
        stage: &Stage,
        index: usize,
        records: &mut [StageRecord],
        results: &ResultsByStage,
        evaluations: &mut BTreeMap<usize, EvaluationOutcome>,
    ) -> Gate {
        if stage.is_unconditional() {
            return Gate::Run;
        }

        // a nested branch only fires when the branch holding its producer ran
        if let Some(producer) = stage.producer_stage {
            let upstream = records
                .iter()
                .find(|r| r.stage_id == producer)
                .map(|r| r.state);
            if matches!(upstream, Some(StageState::Skipped | StageState::Cancelled)) {
                return Gate::Skip(SkipReason::UpstreamSkipped);
            }
        }

        let Some(condition) = &stage.condition else {
            return Gate::Run;
        };
        records[index].transition(StageState::Evaluating);
        let outcome = self.evaluator.evaluate(condition, results);
        let fire = outcome.result;
        tracing::debug!(
            stage = stage.id,
            condition = %condition.describe(),
            result = fire,
            confidence = outcome.confidence,
            "Evaluated stage condition"
        );
        evaluations.insert(stage.id, outcome);
        if fire {
            Gate::Run
        } else {
            Gate::Skip(SkipReason::ConditionFalse)
        }
    }

    /// Submit and await one stage. On failure the job id is returned when
    /// the submission got that far.
    async fn run_stage(
        &self,
        stage: &Stage,
        file: &AnalysisFile,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<AnalyzerReport>), (Option<String>, AnalysisError)> {
        let timeout = self.config.stage_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        let submit = self.service.submit(file, &stage.analyzers);
        let job_id = tokio::select! {
            _ = cancel.cancelled() => {
                return Err((None, AnalysisError::Cancelled(format!("stage {}", stage.id))));
            }
            submitted = tokio::time::timeout_at(deadline, submit) => match submitted {
                Ok(Ok(id)) => id,
                Ok(Err(e)) => return Err((None, e)),
                Err(_) => {
                    return Err((None, AnalysisError::Timeout {
                        job_id: format!("stage {}", stage.id),
                        seconds: timeout.as_secs(),
                    }))
                }
            },
        };

        let wait = wait_for_completion(self.service.as_ref(), &job_id, self.config.poll_interval, cancel);
        match tokio::time::timeout_at(deadline, wait).await {
            Ok(Ok(reports)) => Ok((job_id, reports)),
            Ok(Err(e)) => Err((Some(job_id), e)),
            Err(_) => Err((
                Some(job_id.clone()),
                AnalysisError::Timeout {
                    job_id,
                    seconds: timeout.as_secs(),
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::replay::{success_report, ReplayAnalysisService};
    use crate::analysis::JobPoll;
    use crate::engine::compiler::GraphCompiler;
    use crate::engine::evaluator::LadderEvaluator;
    use crate::engine::rules::VerdictRuleTable;
    use crate::schema::AnalyzerSchemaRegistry;
    use crate::workflow::{testing, WorkflowGraph};
    use async_trait::async_trait;
    use serde_json::json;

    fn evaluator() -> Arc<dyn ConditionEvaluator> {
        Arc::new(LadderEvaluator::new(
            Arc::new(VerdictRuleTable::bundled().unwrap()),
            Arc::new(AnalyzerSchemaRegistry::bundled().unwrap()),
        ))
    }

    fn fast() -> ExecutorConfig {
        ExecutorConfig {
            stage_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn plan(graph: &WorkflowGraph) -> CompiledPlan {
        GraphCompiler::new().compile(graph).unwrap()
    }

    fn file() -> AnalysisFile {
        AnalysisFile::from_path("/tmp/eicar.com")
    }

    async fn run(
        graph: &WorkflowGraph,
        service: Arc<ReplayAnalysisService>,
    ) -> ExecutionReport {
        StageExecutor::new(service, evaluator(), fast())
            .execute(&plan(graph), &file(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_linear_run() {
        let service = Arc::new(ReplayAnalysisService::new(vec![success_report(
            "ClamAV",
            json!({"detections": []}),
        )]));
        let report = run(&testing::linear(), service).await;
        assert_eq!(report.total_stages, 1);
        assert_eq!(report.executed_stages, vec![0]);
        assert!(report.skipped_stages.is_empty());
        assert_eq!(report.job_ids, vec!["1"]);
        assert_eq!(report.results_by_stage[&0].analyzer_reports.len(), 1);
        assert!(report.stage_routing[0].executed);
    }

    #[tokio::test]
    async fn test_true_branch_runs_false_branch_skipped() {
        let service = Arc::new(ReplayAnalysisService::new(vec![success_report(
            "ClamAV",
            json!({"detections": ["Eicar-Signature"]}),
        )]));
        let report = run(&testing::single_branch(), service.clone()).await;

        assert_eq!(report.executed_stages, vec![0, 1]);
        assert_eq!(report.skipped_stages, vec![2]);
        let routing: Vec<(Vec<String>, bool)> = report
            .stage_routing
            .iter()
            .map(|r| (r.target_sinks.clone(), r.executed))
            .collect();
        assert_eq!(routing[1], (vec!["result-true".to_string()], true));
        assert_eq!(routing[2], (vec!["result-false".to_string()], false));
        // the routing-only TRUE stage made no external call
        assert_eq!(service.submissions().await.len(), 1);
        assert_eq!(report.stage_records[2].skip_reason, Some(SkipReason::ConditionFalse));
        assert_eq!(report.evaluations[&1].confidence, 1.0);
    }

    #[tokio::test]
    async fn test_chained_true_then_false() {
        let service = Arc::new(ReplayAnalysisService::new(vec![
            success_report("ClamAV", json!({"detections": ["Eicar-Signature"]})),
            success_report("Doc_Info", json!({"mraptor": "ok"})),
        ]));
        let report = run(&testing::chained(), service.clone()).await;

        // 0: ClamAV, 1: Doc_Info (cond1 TRUE), 2: Capa_Info (cond2 TRUE),
        // 3: -> result-y (cond2 FALSE), 4: -> result-z (cond1 FALSE)
        assert_eq!(report.executed_stages, vec![0, 1, 3]);
        assert_eq!(report.skipped_stages, vec![2, 4]);
        assert_eq!(
            service.submissions().await,
            vec![vec!["ClamAV"], vec!["Doc_Info"]]
        );
    }

    #[tokio::test]
    async fn test_skipped_producer_gates_nested_branches() {
        let service = Arc::new(ReplayAnalysisService::new(vec![success_report(
            "ClamAV",
            json!({"detections": []}),
        )]));
        let report = run(&testing::chained(), service).await;

        // cond1 FALSE: Doc_Info never runs, so neither nested branch may fire
        assert_eq!(report.executed_stages, vec![0, 4]);
        assert_eq!(report.skipped_stages, vec![1, 2, 3]);
        assert_eq!(report.stage_records[3].skip_reason, Some(SkipReason::UpstreamSkipped));
        assert!(!report.evaluations.contains_key(&3));
    }

    #[tokio::test]
    async fn test_same_analyzer_on_both_branches_gates_on_own_branch() {
        let service = Arc::new(ReplayAnalysisService::new(vec![
            success_report("ClamAV", json!({"detections": ["Eicar-Signature"]})),
            success_report("Doc_Info", json!({"mraptor": "suspicious"})),
        ]));
        let report = run(&testing::twin_branches(), service.clone()).await;

        // 0: ClamAV, 1: Doc_Info (cond1 TRUE), 2: Doc_Info (cond1 FALSE),
        // 3/4: cond2 branches hanging off stage 2
        assert_eq!(report.executed_stages, vec![0, 1]);
        assert_eq!(report.skipped_stages, vec![2, 3, 4]);
        for id in [3, 4] {
            assert_eq!(report.stage_records[id].skip_reason, Some(SkipReason::UpstreamSkipped));
            assert!(!report.evaluations.contains_key(&id));
        }
        assert_eq!(report.stage_routing[3].parent_stage, Some(2));
        assert_eq!(service.submissions().await, vec![vec!["ClamAV"], vec!["Doc_Info"]]);
    }

    #[tokio::test]
    async fn test_condition_evaluation_starts_stage() {
        let service = Arc::new(ReplayAnalysisService::new(vec![success_report(
            "ClamAV",
            json!({"detections": []}),
        )]));
        let report = run(&testing::chained(), service).await;

        // stage 1 was evaluated and rejected, stage 3 never got that far
        assert_eq!(report.stage_records[1].skip_reason, Some(SkipReason::ConditionFalse));
        assert!(report.stage_records[1].started_at.is_some());
        assert!(report.stage_records[3].started_at.is_none());
        assert!(report.stage_records[3].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_abort_run() {
        let service = Arc::new(
            ReplayAnalysisService::new(vec![success_report("ClamAV", json!({"detections": ["x"]}))])
                .rejecting("Doc_Info"),
        );
        let report = run(&testing::chained(), service).await;

        assert_eq!(report.failed_stages, vec![1]);
        let failed = &report.results_by_stage[&1];
        assert!(failed.error.as_deref().unwrap().contains("Doc_Info"));
        assert!(report.stage_routing[1].failed);
        assert!(!report.stage_routing[1].executed);
        // run continued past the failure
        assert!(report.stage_records.iter().all(|r| r.state.is_terminal()));
    }

    #[tokio::test]
    async fn test_stage_timeout_marks_failed() {
        let service = Arc::new(
            ReplayAnalysisService::new(vec![success_report("ClamAV", json!({}))])
                .with_delay(Duration::from_millis(200)),
        );
        let config = ExecutorConfig {
            stage_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
        };
        let report = StageExecutor::new(service, evaluator(), config)
            .execute(&plan(&testing::linear()), &file(), &CancellationToken::new())
            .await;

        assert_eq!(report.failed_stages, vec![0]);
        assert!(report.results_by_stage[&0]
            .error
            .as_deref()
            .unwrap()
            .contains("did not complete"));
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let service = Arc::new(ReplayAnalysisService::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = StageExecutor::new(service.clone(), evaluator(), fast())
            .execute(&plan(&testing::chained()), &file(), &cancel)
            .await;

        assert!(report.cancelled);
        assert!(report.executed_stages.is_empty());
        assert!(report
            .stage_records
            .iter()
            .all(|r| r.state == StageState::Cancelled));
        assert!(service.submissions().await.is_empty());
    }

    struct CancelAfterFirst {
        inner: ReplayAnalysisService,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl AnalysisService for CancelAfterFirst {
        async fn submit(&self, file: &AnalysisFile, analyzers: &[String]) -> Result<String, AnalysisError> {
            self.inner.submit(file, analyzers).await
        }

        async fn poll(&self, job_id: &str) -> Result<JobPoll, AnalysisError> {
            let poll = self.inner.poll(job_id).await;
            self.cancel.cancel();
            poll
        }
    }

    #[tokio::test]
    async fn test_cancel_between_stages_keeps_results() {
        let cancel = CancellationToken::new();
        let service = Arc::new(CancelAfterFirst {
            inner: ReplayAnalysisService::new(vec![success_report(
                "ClamAV",
                json!({"detections": ["Eicar-Signature"]}),
            )]),
            cancel: cancel.clone(),
        });
        let report = StageExecutor::new(service, evaluator(), fast())
            .execute(&plan(&testing::chained()), &file(), &cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.executed_stages, vec![0]);
        assert_eq!(report.results_by_stage[&0].analyzer_reports.len(), 1);
        assert!(report.stage_records[1..]
            .iter()
            .all(|r| r.state == StageState::Cancelled));
    }

    #[tokio::test]
    async fn test_report_pool_dedupes_by_name() {
        let mut report = run(
            &testing::linear(),
            Arc::new(ReplayAnalysisService::new(vec![success_report("ClamAV", json!({}))])),
        )
        .await;
        report.results_by_stage.insert(
            1,
            StageResult::completed("2", vec![success_report("ClamAV", json!({"late": true}))]),
        );
        let pool = report.report_pool();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].report, json!({}));
    }
}
