//! Workflow run service.
//!
//! One call takes a graph from compilation through execution to routed
//! sink views. Every run builds its own state; only the rule table, the
//! schema registry and the analysis service handle are shared.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis::{filter_analyzers, AnalysisFile, AnalysisService, AnalyzerInfo};
use crate::engine::{
    CompiledPlan, ConditionEvaluator, ExecutionReport, ExecutorConfig, GraphCompiler,
    LadderEvaluator, ResultRouter, RoutingMismatch, SinkView, StageExecutor, VerdictRuleTable,
};
use crate::error::AppResult;
use crate::schema::AnalyzerSchemaRegistry;
use crate::workflow::{validate, ValidationReport, WorkflowGraph};

/// Everything a caller needs to render a finished run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub plan: CompiledPlan,
    pub execution: ExecutionReport,
    pub sinks: Vec<SinkView>,
    /// Sinks where record routing and graph traversal disagree. Only
    /// computed for graphs without conditionals.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routing_mismatches: Vec<RoutingMismatch>,
}

#[derive(Clone)]
pub struct WorkflowService {
    compiler: GraphCompiler,
    executor: StageExecutor,
    service: Arc<dyn AnalysisService>,
    registry: Arc<AnalyzerSchemaRegistry>,
}

impl WorkflowService {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        rules: Arc<VerdictRuleTable>,
        registry: Arc<AnalyzerSchemaRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        let evaluator: Arc<dyn ConditionEvaluator> =
            Arc::new(LadderEvaluator::new(rules, registry.clone()));
        Self {
            compiler: GraphCompiler::new(),
            executor: StageExecutor::new(service.clone(), evaluator, config),
            service,
            registry,
        }
    }

    pub fn registry(&self) -> &AnalyzerSchemaRegistry {
        &self.registry
    }

    pub fn compile(&self, graph: &WorkflowGraph) -> AppResult<CompiledPlan> {
        let plan = self.compiler.compile(graph)?;
        tracing::info!(
            stages = plan.stages.len(),
            conditionals = plan.has_conditionals,
            warnings = plan.warnings.len(),
            "Workflow compiled"
        );
        Ok(plan)
    }

    pub fn validate(&self, graph: &WorkflowGraph) -> ValidationReport {
        validate(graph, &self.registry)
    }

    /// Enabled analyzers offered by the analysis service.
    pub async fn list_analyzers(&self, analyzer_type: Option<&str>) -> AppResult<Vec<AnalyzerInfo>> {
        let analyzers = self.service.list_analyzers().await?;
        Ok(filter_analyzers(analyzers, analyzer_type))
    }

    /// Compile, execute and route one file through a graph.
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        file: &AnalysisFile,
        cancel: &CancellationToken,
    ) -> AppResult<RunSummary> {
        let plan = self.compile(graph)?;
        let execution = self.executor.execute(&plan, file, cancel).await;

        let router = ResultRouter::new(graph);
        let pool = execution.report_pool();
        let sinks = router.route(&pool, Some(&execution.stage_routing));

        let routing_mismatches = if plan.has_conditionals {
            Vec::new()
        } else {
            router.cross_check(&execution.stage_routing)
        };
        for mismatch in &routing_mismatches {
            tracing::warn!(
                sink = %mismatch.sink_id,
                by_records = ?mismatch.by_records,
                by_traversal = ?mismatch.by_traversal,
                "Routing strategies disagree"
            );
        }

        tracing::info!(
            run_id = %execution.run_id,
            executed = execution.executed_stages.len(),
            skipped = execution.skipped_stages.len(),
            failed = execution.failed_stages.len(),
            cancelled = execution.cancelled,
            "Run finished"
        );

        Ok(RunSummary {
            run_id: execution.run_id,
            plan,
            sinks,
            routing_mismatches,
            execution,
        })
    }
}
