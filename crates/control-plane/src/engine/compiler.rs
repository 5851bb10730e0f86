//! Graph compiler.
//!
//! Turns a [`WorkflowGraph`] into an ordered list of [`Stage`]s. Nothing is
//! executed here; every structural problem is reported before the first
//! analyzer is submitted.
//!
//! Graphs without conditional nodes compile to one unconditional stage.
//! Otherwise stage 0 holds every analyzer reachable from the source before
//! the first conditional, and each TRUE/FALSE branch of every reachable
//! conditional becomes a gated stage. Stages are finally ordered so that a
//! stage always comes after the stage producing its condition's analyzer.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::engine::condition::Condition;
use crate::error::StructuralError;
use crate::workflow::{Branch, Node, NodeKind, WorkflowGraph};

/// One unit of ordered, conditionally gated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: usize,
    pub analyzers: Vec<String>,
    /// Analyzer whose report the condition reads. `None` runs unconditionally.
    pub depends_on: Option<String>,
    /// Stage holding the analyzer node that feeds this stage's conditional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_stage: Option<usize>,
    pub condition: Option<Condition>,
    pub target_sinks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    /// Number of conditionals between the source and this stage.
    #[serde(default)]
    pub depth: usize,
    /// Target sinks could not be resolved and every sink was assigned.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub routing_fallback: bool,
    pub description: String,
}

impl Stage {
    pub fn is_unconditional(&self) -> bool {
        self.producer_stage.is_none() && self.condition.is_none()
    }

    /// Branch stage that only forwards to sinks.
    pub fn is_routing_only(&self) -> bool {
        self.analyzers.is_empty()
    }
}

/// Output of [`GraphCompiler::compile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledPlan {
    pub has_conditionals: bool,
    pub source_id: String,
    pub stages: Vec<Stage>,
    /// Non-fatal routing problems found while compiling.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CompiledPlan {
    pub fn stage(&self, id: usize) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Distinct analyzer names over all stages, in stage order.
    pub fn analyzers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .flat_map(|s| s.analyzers.iter())
            .filter(|a| seen.insert(a.as_str()))
            .cloned()
            .collect()
    }
}

/// Stateless graph compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCompiler;

struct Expansion<'g> {
    graph: &'g WorkflowGraph,
    all_sinks: Vec<String>,
    stages: Vec<Stage>,
    processed: HashSet<String>,
    warnings: Vec<String>,
}

impl GraphCompiler {
    pub fn new() -> Self {
        Self
    }

    pub fn compile(&self, graph: &WorkflowGraph) -> Result<CompiledPlan, StructuralError> {
        let sources = graph.sources();
        let source = match sources.as_slice() {
            [] => return Err(StructuralError::NoSource),
            [only] => *only,
            many => return Err(StructuralError::MultipleSources(many.len())),
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(StructuralError::GraphCycle(cycle));
        }

        let conditionals: Vec<&Node> = graph.nodes_of(NodeKind::Conditional).collect();
        for cond in &conditionals {
            match graph.producers_of(&cond.id).len() {
                0 => return Err(StructuralError::MissingProducer(cond.id.clone())),
                1 => {}
                count => {
                    return Err(StructuralError::AmbiguousProducer {
                        node: cond.id.clone(),
                        count,
                    })
                }
            }
        }

        let all_sinks = graph.sink_ids();
        let (baseline, baseline_nodes) = collect_analyzers(graph, &[source.id.as_str()]);
        if baseline.is_empty() {
            return Err(StructuralError::NoAnalyzers(source.id.clone()));
        }

        if conditionals.is_empty() {
            tracing::info!(
                analyzers = baseline.len(),
                sinks = all_sinks.len(),
                "Compiled linear workflow"
            );
            return Ok(CompiledPlan {
                has_conditionals: false,
                source_id: source.id.clone(),
                stages: vec![Stage {
                    id: 0,
                    analyzers: baseline,
                    depends_on: None,
                    producer_stage: None,
                    condition: None,
                    target_sinks: all_sinks,
                    conditional_id: None,
                    branch: None,
                    depth: 0,
                    routing_fallback: false,
                    description: "Linear analysis".to_string(),
                }],
                warnings: Vec::new(),
            });
        }

        let mut expansion = Expansion {
            graph,
            all_sinks: all_sinks.clone(),
            stages: vec![Stage {
                id: 0,
                analyzers: baseline,
                depends_on: None,
                producer_stage: None,
                condition: None,
                target_sinks: all_sinks,
                conditional_id: None,
                branch: None,
                depth: 0,
                routing_fallback: false,
                description: "Pre-conditional analysis".to_string(),
            }],
            processed: HashSet::new(),
            warnings: Vec::new(),
        };

        // roots: conditionals fed directly by a baseline analyzer
        for cond in &conditionals {
            let fed_by_baseline = graph
                .producers_of(&cond.id)
                .iter()
                .any(|p| baseline_nodes.contains(&p.id));
            if fed_by_baseline {
                expansion.expand(cond, 1, 0, &mut Vec::new())?;
            }
        }

        for cond in &conditionals {
            if !expansion.processed.contains(&cond.id) {
                let message = format!(
                    "conditional '{}' is not reachable from the source and was ignored",
                    cond.id
                );
                tracing::warn!(conditional = %cond.id, "Conditional not reachable from source");
                expansion.warnings.push(message);
            }
        }

        let Expansion {
            stages, warnings, ..
        } = expansion;
        let stages = order_stages(stages)?;

        tracing::info!(
            stages = stages.len(),
            conditionals = conditionals.len(),
            "Compiled conditional workflow"
        );

        Ok(CompiledPlan {
            has_conditionals: true,
            source_id: source.id.clone(),
            stages,
            warnings,
        })
    }
}

impl<'g> Expansion<'g> {
    /// Expand both branches of `cond`. `producer_stage` is the stage whose
    /// analyzer nodes include the conditional's producer.
    fn expand(
        &mut self,
        cond: &Node,
        depth: usize,
        producer_stage: usize,
        path: &mut Vec<String>,
    ) -> Result<(), StructuralError> {
        if path.contains(&cond.id) {
            let mut cycle = path.clone();
            cycle.push(cond.id.clone());
            return Err(StructuralError::ConditionalCycle(cycle));
        }
        if !self.processed.insert(cond.id.clone()) {
            return Ok(());
        }

        let graph = self.graph;
        let producer = graph
            .producers_of(&cond.id)
            .into_iter()
            .next()
            .ok_or_else(|| StructuralError::MissingProducer(cond.id.clone()))?;
        let producer_name = producer
            .analyzer
            .clone()
            .unwrap_or_else(|| producer.id.clone());
        let base = Condition::from_config(cond.condition.as_ref(), &producer_name);

        path.push(cond.id.clone());
        for branch in [Branch::True, Branch::False] {
            let mut direct_sinks = Vec::new();
            let mut starts = Vec::new();
            for (edge, target) in graph.successors(&cond.id) {
                if edge.branch != branch {
                    continue;
                }
                match target.kind {
                    NodeKind::Analyzer => starts.push(target.id.as_str()),
                    NodeKind::Sink => direct_sinks.push(target.id.clone()),
                    NodeKind::Conditional | NodeKind::Source => {}
                }
            }

            let (analyzers, analyzer_nodes) = collect_analyzers(graph, &starts);

            // each branch analyzer gets its own traversal, so sinks reached
            // through sibling paths are all counted
            let mut reached: HashSet<String> = direct_sinks.into_iter().collect();
            for node_id in &analyzer_nodes {
                reached.extend(
                    graph
                        .reachable_from(node_id)
                        .into_iter()
                        .filter(|id| graph.node(id).map(|n| n.kind) == Some(NodeKind::Sink)),
                );
            }
            let mut target_sinks: Vec<String> = self
                .all_sinks
                .iter()
                .filter(|s| reached.contains(*s))
                .cloned()
                .collect();

            let mut routing_fallback = false;
            if !analyzers.is_empty() && target_sinks.is_empty() {
                tracing::warn!(
                    conditional = %cond.id,
                    branch = %branch,
                    analyzers = ?analyzers,
                    "Branch has no reachable result node, routing to every result node"
                );
                self.warnings.push(format!(
                    "{} branch of '{}' reaches no result node; its reports go to every result node",
                    branch, cond.id
                ));
                target_sinks = self.all_sinks.clone();
                routing_fallback = true;
            }

            if analyzers.is_empty() && target_sinks.is_empty() {
                continue;
            }

            let condition = match branch {
                Branch::False => base.negated(),
                _ => base.clone(),
            };
            tracing::debug!(
                conditional = %cond.id,
                branch = %branch,
                analyzers = ?analyzers,
                target_sinks = ?target_sinks,
                "Built branch stage"
            );
            let stage_id = self.stages.len();
            self.stages.push(Stage {
                id: stage_id,
                description: format!("{} branch of {}: {}", branch, cond.id, condition.describe()),
                analyzers,
                depends_on: Some(producer_name.clone()),
                producer_stage: Some(producer_stage),
                condition: Some(condition),
                target_sinks,
                conditional_id: Some(cond.id.clone()),
                branch: Some(branch),
                depth,
                routing_fallback,
            });

            for node_id in &analyzer_nodes {
                let nested: Vec<&Node> = graph
                    .successors(node_id)
                    .filter(|(_, n)| n.kind == NodeKind::Conditional)
                    .map(|(_, n)| n)
                    .collect();
                for next in nested {
                    self.expand(next, depth + 1, stage_id, path)?;
                }
            }
        }
        path.pop();
        Ok(())
    }
}

/// Analyzers reachable from `starts` without passing a conditional or a
/// sink. Returns distinct names and the visited analyzer node ids, both in
/// discovery order.
fn collect_analyzers(graph: &WorkflowGraph, starts: &[&str]) -> (Vec<String>, Vec<String>) {
    fn visit(
        graph: &WorkflowGraph,
        id: &str,
        seen: &mut HashSet<String>,
        names: &mut Vec<String>,
        nodes: &mut Vec<String>,
    ) {
        if !seen.insert(id.to_string()) {
            return;
        }
        let Some(node) = graph.node(id) else {
            return;
        };
        match node.kind {
            NodeKind::Conditional | NodeKind::Sink => return,
            NodeKind::Analyzer => {
                nodes.push(node.id.clone());
                match &node.analyzer {
                    Some(name) if !names.contains(name) => names.push(name.clone()),
                    Some(_) => {}
                    None => tracing::warn!(node = %node.id, "Analyzer node has no analyzer name"),
                }
            }
            NodeKind::Source => {}
        }
        for (_, next) in graph.successors(id) {
            visit(graph, &next.id, seen, names, nodes);
        }
    }

    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut nodes = Vec::new();
    for start in starts {
        visit(graph, start, &mut seen, &mut names, &mut nodes);
    }
    (names, nodes)
}

/// Order stages producer-first and renumber them. Producer links are
/// rewritten to the new ids.
fn order_stages(stages: Vec<Stage>) -> Result<Vec<Stage>, StructuralError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Open,
        Done,
    }

    let position: HashMap<usize, usize> = stages.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
    let deps: Vec<Option<usize>> = stages
        .iter()
        .map(|stage| stage.producer_stage.and_then(|id| position.get(&id).copied()))
        .collect();

    fn visit(
        i: usize,
        stages: &[Stage],
        deps: &[Option<usize>],
        marks: &mut HashMap<usize, Mark>,
        order: &mut Vec<usize>,
    ) -> Result<(), StructuralError> {
        match marks.get(&i) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Open) => {
                let analyzer = stages[i].depends_on.clone().unwrap_or_default();
                return Err(StructuralError::StageCycle(analyzer));
            }
            None => {}
        }
        marks.insert(i, Mark::Open);
        if let Some(dep) = deps[i] {
            visit(dep, stages, deps, marks, order)?;
        }
        marks.insert(i, Mark::Done);
        order.push(i);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut order = Vec::with_capacity(stages.len());
    for i in 0..stages.len() {
        visit(i, &stages, &deps, &mut marks, &mut order)?;
    }

    let renumbered: HashMap<usize, usize> = order
        .iter()
        .enumerate()
        .map(|(new_id, &old)| (stages[old].id, new_id))
        .collect();
    let mut slots: Vec<Option<Stage>> = stages.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .enumerate()
        .filter_map(|(new_id, old)| {
            slots[old].take().map(|mut stage| {
                stage.id = new_id;
                stage.producer_stage = stage.producer_stage.and_then(|p| renumbered.get(&p).copied());
                stage
            })
        })
        .collect())
}
