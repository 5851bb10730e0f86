//! Result router.
//!
//! Reports from every executed stage land in one pool. Each sink should only
//! show the reports of the branch that actually fed it, so routing works per
//! sink:
//!
//! - **Stage records** (authoritative): a branch feeds a sink when it ran
//!   and, if nested branches also target the sink, one of those fed it too.
//!   The sink shows the analyzers of the baseline and of every feeding
//!   branch.
//! - **Graph traversal** (fallback and cross-check): every analyzer on any
//!   path from the source to the sink, passing through conditionals.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::analysis::AnalyzerReport;
use crate::engine::state::StageRoutingRecord;
use crate::workflow::{NodeKind, WorkflowGraph};

/// What a sink displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkState {
    Populated,
    /// The branch feeding the sink was skipped. Not an error.
    BranchNotExecuted,
    /// The branch feeding the sink ran but its analysis call failed.
    StageFailed,
    /// No graph path leads from the source to the sink.
    NoPath,
}

impl std::fmt::Display for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Populated => write!(f, "populated"),
            Self::BranchNotExecuted => write!(f, "branch-not-executed"),
            Self::StageFailed => write!(f, "stage-failed"),
            Self::NoPath => write!(f, "no-path"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    StageRecords,
    GraphTraversal,
}

/// Per-sink view handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkView {
    pub sink_id: String,
    pub label: String,
    pub state: SinkState,
    pub analyzers: Vec<String>,
    pub reports: Vec<AnalyzerReport>,
    pub strategy: RoutingStrategy,
}

/// A sink on which both strategies disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMismatch {
    pub sink_id: String,
    pub by_records: BTreeSet<String>,
    pub by_traversal: BTreeSet<String>,
}

pub struct ResultRouter<'g> {
    graph: &'g WorkflowGraph,
    reachable: HashSet<String>,
    forward_order: Vec<String>,
}

impl<'g> ResultRouter<'g> {
    pub fn new(graph: &'g WorkflowGraph) -> Self {
        let forward_order = graph
            .sources()
            .first()
            .map(|s| graph.reachable_from(&s.id))
            .unwrap_or_default();
        Self {
            graph,
            reachable: forward_order.iter().cloned().collect(),
            forward_order,
        }
    }

    /// Route with the stage records when available, by traversal otherwise.
    pub fn route(
        &self,
        pool: &[&AnalyzerReport],
        records: Option<&[StageRoutingRecord]>,
    ) -> Vec<SinkView> {
        match records {
            Some(records) => self.route_by_records(pool, records),
            None => {
                tracing::debug!("No stage routing records, routing by graph traversal");
                self.route_by_traversal(pool)
            }
        }
    }

    pub fn route_by_records(
        &self,
        pool: &[&AnalyzerReport],
        records: &[StageRoutingRecord],
    ) -> Vec<SinkView> {
        self.graph
            .nodes_of(NodeKind::Sink)
            .map(|sink| {
                let (state, analyzers) = self.resolve_by_records(&sink.id, records);
                tracing::debug!(sink = %sink.id, state = %state, analyzers = ?analyzers, "Routed sink");
                SinkView {
                    sink_id: sink.id.clone(),
                    label: sink.display_name().to_string(),
                    state,
                    reports: select(pool, &analyzers),
                    analyzers,
                    strategy: RoutingStrategy::StageRecords,
                }
            })
            .collect()
    }

    pub fn route_by_traversal(&self, pool: &[&AnalyzerReport]) -> Vec<SinkView> {
        self.graph
            .nodes_of(NodeKind::Sink)
            .map(|sink| {
                let (state, analyzers) = match self.analyzers_on_paths_to(&sink.id) {
                    Some(analyzers) => (SinkState::Populated, analyzers),
                    None => (SinkState::NoPath, Vec::new()),
                };
                SinkView {
                    sink_id: sink.id.clone(),
                    label: sink.display_name().to_string(),
                    state,
                    reports: select(pool, &analyzers),
                    analyzers,
                    strategy: RoutingStrategy::GraphTraversal,
                }
            })
            .collect()
    }

    /// Analyzer names on any source-to-sink path, in forward DFS order.
    /// `None` when the sink is unreachable.
    pub fn analyzers_on_paths_to(&self, sink_id: &str) -> Option<Vec<String>> {
        if !self.reachable.contains(sink_id) {
            return None;
        }
        let upstream = self.graph.reaching(sink_id);
        let mut seen = HashSet::new();
        Some(
            self.forward_order
                .iter()
                .filter(|id| upstream.contains(*id))
                .filter_map(|id| self.graph.node(id))
                .filter(|n| n.kind == NodeKind::Analyzer)
                .filter_map(|n| n.analyzer.clone())
                .filter(|name| seen.insert(name.clone()))
                .collect(),
        )
    }

    /// Sinks where both strategies disagree on the analyzer set. The two
    /// agree on graphs without conditionals whenever every analyzer reaches
    /// every sink.
    pub fn cross_check(&self, records: &[StageRoutingRecord]) -> Vec<RoutingMismatch> {
        self.graph
            .nodes_of(NodeKind::Sink)
            .filter_map(|sink| {
                let (_, by_records) = self.resolve_by_records(&sink.id, records);
                let by_traversal = self.analyzers_on_paths_to(&sink.id).unwrap_or_default();
                let by_records: BTreeSet<String> = by_records.into_iter().collect();
                let by_traversal: BTreeSet<String> = by_traversal.into_iter().collect();
                (by_records != by_traversal).then(|| RoutingMismatch {
                    sink_id: sink.id.clone(),
                    by_records,
                    by_traversal,
                })
            })
            .collect()
    }

    fn resolve_by_records(
        &self,
        sink_id: &str,
        records: &[StageRoutingRecord],
    ) -> (SinkState, Vec<String>) {
        if !self.reachable.contains(sink_id) {
            return (SinkState::NoPath, Vec::new());
        }

        let targeting: Vec<&StageRoutingRecord> = records
            .iter()
            .filter(|r| r.target_sinks.iter().any(|s| s == sink_id))
            .collect();
        let gated = targeting.iter().any(|r| r.gated);

        let contributing: Vec<&&StageRoutingRecord> = targeting
            .iter()
            .filter(|r| {
                if r.gated {
                    feeds(r, &targeting)
                } else {
                    r.executed
                }
            })
            .collect();
        let reached = if gated {
            contributing.iter().any(|r| r.gated)
        } else {
            !contributing.is_empty()
        };
        if !reached {
            let failed = targeting.iter().any(|r| r.failed);
            return (not_executed(failed), Vec::new());
        }

        let mut seen = HashSet::new();
        let analyzers = contributing
            .iter()
            .flat_map(|r| r.analyzers.iter())
            .filter(|a| seen.insert(a.as_str()))
            .cloned()
            .collect();
        (SinkState::Populated, analyzers)
    }
}

/// Whether a gated record delivered to the sink all of `targeting` point at.
/// A branch whose nested branches also target the sink only feeds it
/// through one of them.
fn feeds(record: &StageRoutingRecord, targeting: &[&StageRoutingRecord]) -> bool {
    if !record.executed {
        return false;
    }
    let mut nested = targeting
        .iter()
        .filter(|r| r.gated && r.parent_stage == Some(record.stage_id))
        .peekable();
    if nested.peek().is_none() {
        return true;
    }
    nested.any(|r| feeds(r, targeting))
}

fn not_executed(failed: bool) -> SinkState {
    if failed {
        SinkState::StageFailed
    } else {
        SinkState::BranchNotExecuted
    }
}

/// Reports whose analyzer is in `analyzers`, one per name, in `analyzers` order.
fn select(pool: &[&AnalyzerReport], analyzers: &[String]) -> Vec<AnalyzerReport> {
    analyzers
        .iter()
        .filter_map(|name| pool.iter().find(|r| &r.name == name))
        .map(|r| (*r).clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::replay::success_report;
    use crate::engine::compiler::GraphCompiler;
    use crate::workflow::testing::{self, GraphBuilder};
    use serde_json::json;

    fn record(id: usize, sinks: &[&str], executed: bool, analyzers: &[&str], depth: usize) -> StageRoutingRecord {
        StageRoutingRecord {
            stage_id: id,
            target_sinks: sinks.iter().map(|s| s.to_string()).collect(),
            executed,
            analyzers: analyzers.iter().map(|s| s.to_string()).collect(),
            gated: depth > 0,
            failed: false,
            depth,
            parent_stage: (depth > 0).then_some(0),
        }
    }

    fn nested(mut record: StageRoutingRecord, parent: usize) -> StageRoutingRecord {
        record.parent_stage = Some(parent);
        record
    }

    fn names(set: &[&str]) -> Vec<String> {
        set.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_branch_routing() {
        let graph = testing::single_branch();
        let router = ResultRouter::new(&graph);
        let clam = success_report("ClamAV", json!({"detections": ["Eicar-Signature"]}));
        let records = vec![
            record(0, &["result-true", "result-false"], true, &["ClamAV"], 0),
            record(1, &["result-true"], true, &[], 1),
            record(2, &["result-false"], false, &[], 1),
        ];
        let views = router.route(&[&clam], Some(&records));

        assert_eq!(views[0].sink_id, "result-true");
        assert_eq!(views[0].state, SinkState::Populated);
        assert_eq!(views[0].analyzers, names(&["ClamAV"]));
        assert_eq!(views[0].reports.len(), 1);
        assert_eq!(views[1].state, SinkState::BranchNotExecuted);
        assert!(views[1].reports.is_empty());
    }

    #[test]
    fn test_chained_routing_follows_nested_branch() {
        let graph = testing::chained();
        let router = ResultRouter::new(&graph);
        let records = vec![
            record(0, &["result-x", "result-y", "result-z"], true, &["ClamAV"], 0),
            record(1, &["result-x", "result-y"], true, &["Doc_Info"], 1),
            nested(record(2, &["result-x"], false, &["Capa_Info"], 2), 1),
            nested(record(3, &["result-y"], true, &[], 2), 1),
            record(4, &["result-z"], false, &[], 1),
        ];
        let pool = [
            success_report("ClamAV", json!({})),
            success_report("Doc_Info", json!({})),
        ];
        let pool: Vec<&AnalyzerReport> = pool.iter().collect();
        let views = router.route_by_records(&pool, &records);
        let states: Vec<(&str, SinkState)> = views.iter().map(|v| (v.sink_id.as_str(), v.state)).collect();

        assert_eq!(
            states,
            vec![
                ("result-x", SinkState::BranchNotExecuted),
                ("result-y", SinkState::Populated),
                ("result-z", SinkState::BranchNotExecuted),
            ]
        );
        assert_eq!(views[1].analyzers, names(&["ClamAV", "Doc_Info"]));
    }

    #[test]
    fn test_sink_fed_from_two_branch_depths() {
        let graph = testing::reconverging();
        let router = ResultRouter::new(&graph);
        let plan = GraphCompiler::new().compile(&graph).unwrap();
        let sinks = |id: usize| -> Vec<&str> { plan.stages[id].target_sinks.iter().map(String::as_str).collect() };

        // 0: ClamAV, 1: Doc_Info (cond1 TRUE), 2: -> shared (cond2 TRUE),
        // 3: -> other (cond2 FALSE), 4: -> shared (cond1 FALSE)
        assert_eq!(sinks(4), vec!["shared"]);
        let records = vec![
            record(0, &sinks(0), true, &["ClamAV"], 0),
            record(1, &sinks(1), false, &["Doc_Info"], 1),
            nested(record(2, &sinks(2), false, &[], 2), 1),
            nested(record(3, &sinks(3), false, &[], 2), 1),
            record(4, &sinks(4), true, &[], 1),
        ];
        let views = router.route_by_records(&[], &records);

        assert_eq!(views[0].sink_id, "shared");
        assert_eq!(views[0].state, SinkState::Populated);
        assert_eq!(views[0].analyzers, names(&["ClamAV"]));
        assert_eq!(views[1].state, SinkState::BranchNotExecuted);
    }

    #[test]
    fn test_ran_branch_with_skipped_nested_branch_does_not_feed_sink() {
        let graph = testing::reconverging();
        let router = ResultRouter::new(&graph);
        let records = vec![
            record(0, &["shared", "other"], true, &["ClamAV"], 0),
            record(1, &["shared", "other"], true, &["Doc_Info"], 1),
            nested(record(2, &["shared"], false, &[], 2), 1),
            nested(record(3, &["other"], true, &[], 2), 1),
            record(4, &["shared"], false, &[], 1),
        ];
        let views = router.route_by_records(&[], &records);

        assert_eq!(views[0].state, SinkState::BranchNotExecuted);
        assert_eq!(views[1].state, SinkState::Populated);
        assert_eq!(views[1].analyzers, names(&["ClamAV", "Doc_Info"]));
    }

    #[test]
    fn test_failed_branch_is_distinct() {
        let graph = testing::single_branch();
        let router = ResultRouter::new(&graph);
        let mut failed = record(1, &["result-true"], false, &["Yara"], 1);
        failed.failed = true;
        let records = vec![
            record(0, &["result-true", "result-false"], true, &["ClamAV"], 0),
            failed,
            record(2, &["result-false"], false, &[], 1),
        ];
        let views = router.route_by_records(&[], &records);
        assert_eq!(views[0].state, SinkState::StageFailed);
        assert_eq!(views[1].state, SinkState::BranchNotExecuted);
    }

    #[test]
    fn test_diamond_traversal() {
        let graph = testing::diamond();
        let router = ResultRouter::new(&graph);
        assert_eq!(
            router.analyzers_on_paths_to("shared"),
            Some(names(&["ClamAV", "Yara", "Strings_Info"]))
        );
    }

    #[test]
    fn test_traversal_passes_through_conditionals() {
        let graph = testing::chained();
        let router = ResultRouter::new(&graph);
        assert_eq!(
            router.analyzers_on_paths_to("result-x"),
            Some(names(&["ClamAV", "Doc_Info", "Capa_Info"]))
        );
        assert_eq!(router.analyzers_on_paths_to("result-z"), Some(names(&["ClamAV"])));
    }

    #[test]
    fn test_unreachable_sink_is_no_path() {
        let graph = GraphBuilder::new()
            .source("file")
            .analyzer("clam", "ClamAV")
            .sink("result")
            .sink("orphan")
            .edge("file", "clam")
            .edge("clam", "result")
            .build();
        let router = ResultRouter::new(&graph);
        let plan = GraphCompiler::new().compile(&graph).unwrap();
        let records = vec![record(0, &plan.stages[0].target_sinks.iter().map(String::as_str).collect::<Vec<_>>(), true, &["ClamAV"], 0)];

        let by_records = router.route_by_records(&[], &records);
        assert_eq!(by_records[1].state, SinkState::NoPath);
        let by_traversal = router.route(&[], None);
        assert_eq!(by_traversal[1].state, SinkState::NoPath);
        assert_eq!(by_traversal[0].strategy, RoutingStrategy::GraphTraversal);
    }

    #[test]
    fn test_linear_strategies_agree() {
        for graph in [testing::linear(), testing::diamond()] {
            let plan = GraphCompiler::new().compile(&graph).unwrap();
            let records: Vec<StageRoutingRecord> = plan
                .stages
                .iter()
                .map(|s| StageRoutingRecord {
                    stage_id: s.id,
                    target_sinks: s.target_sinks.clone(),
                    executed: true,
                    analyzers: s.analyzers.clone(),
                    gated: false,
                    failed: false,
                    depth: 0,
                    parent_stage: None,
                })
                .collect();
            let router = ResultRouter::new(&graph);
            assert!(router.cross_check(&records).is_empty());
        }
    }

    #[test]
    fn test_cross_check_reports_disagreement() {
        let graph = GraphBuilder::new()
            .source("file")
            .analyzer("clam", "ClamAV")
            .analyzer("yara", "Yara")
            .sink("r1")
            .sink("r2")
            .edge("file", "clam")
            .edge("file", "yara")
            .edge("clam", "r1")
            .edge("yara", "r2")
            .build();
        let router = ResultRouter::new(&graph);
        let records = vec![record(0, &["r1", "r2"], true, &["ClamAV", "Yara"], 0)];
        let mismatches = router.cross_check(&records);
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].by_traversal, BTreeSet::from(["ClamAV".to_string()]));
    }

    #[test]
    fn test_sink_state_wire_names() {
        assert_eq!(
            serde_json::to_value(SinkState::BranchNotExecuted).unwrap(),
            json!("branch-not-executed")
        );
        assert_eq!(SinkState::NoPath.to_string(), "no-path");
    }
}
