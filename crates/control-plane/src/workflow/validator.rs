//! Pre-execution diagnostics for the editor.
//!
//! Unlike the compiler, which stops at the first structural error, the
//! validator collects everything it can find and ranks it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::engine::condition::Condition;
use crate::schema::AnalyzerSchemaRegistry;

use super::types::{NodeKind, WorkflowGraph};

/// Issue severity. Only errors block execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ValidationIssue {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            node_id: None,
            field: None,
            suggestions: Vec::new(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    fn on(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    fn field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    fn suggest<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }
}

/// Issues ranked errors first, then warnings, then info.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_issues(mut issues: Vec<ValidationIssue>) -> Self {
        issues.sort_by_key(|i| i.severity);
        let count = |s: Severity| issues.iter().filter(|i| i.severity == s).count();
        let error_count = count(Severity::Error);
        let warning_count = count(Severity::Warning);
        Self {
            valid: error_count == 0,
            error_count,
            warning_count,
            issues,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }
}

/// Validate a graph against the analyzer schema registry.
pub fn validate(graph: &WorkflowGraph, registry: &AnalyzerSchemaRegistry) -> ValidationReport {
    let mut issues = Vec::new();
    check_structure(graph, &mut issues);
    check_analyzers(graph, registry, &mut issues);
    check_conditionals(graph, registry, &mut issues);

    let report = ValidationReport::from_issues(issues);
    tracing::debug!(
        errors = report.error_count,
        warnings = report.warning_count,
        "Validated workflow"
    );
    report
}

fn check_structure(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    match graph.sources().len() {
        0 => issues.push(
            ValidationIssue::error("Workflow must have a file input node")
                .suggest(["Add a file node"]),
        ),
        1 => {}
        n => issues.push(
            ValidationIssue::error(format!("Workflow has {} file nodes, only 1 allowed", n))
                .suggest(["Remove extra file nodes, keeping only one"]),
        ),
    }

    if graph.nodes_of(NodeKind::Analyzer).next().is_none() {
        issues.push(ValidationIssue::error("Workflow must have at least one analyzer"));
    }

    for edge in graph.edges() {
        for end in [&edge.from, &edge.to] {
            if graph.node(end).is_none() {
                issues.push(ValidationIssue::error(format!(
                    "Edge {} -> {} references unknown node '{}'",
                    edge.from, edge.to, end
                )));
            }
        }
    }

    let connected: HashSet<&str> = graph
        .edges()
        .iter()
        .flat_map(|e| [e.from.as_str(), e.to.as_str()])
        .collect();
    for node in graph.nodes() {
        if node.kind != NodeKind::Source && !connected.contains(node.id.as_str()) {
            issues.push(
                ValidationIssue::warning(format!(
                    "Node '{}' is not connected to the workflow",
                    node.display_name()
                ))
                .on(&node.id)
                .suggest(["Connect this node to the workflow or remove it"]),
            );
        }
    }

    if let Some(cycle) = graph.find_cycle() {
        issues.push(
            ValidationIssue::error(format!(
                "Workflow contains a cycle: {}",
                cycle.join(" -> ")
            ))
            .suggest(["Remove edges that create cycles in the workflow"]),
        );
    }
}

fn check_analyzers(
    graph: &WorkflowGraph,
    registry: &AnalyzerSchemaRegistry,
    issues: &mut Vec<ValidationIssue>,
) {
    for node in graph.nodes_of(NodeKind::Analyzer) {
        match node.analyzer.as_deref() {
            None => issues.push(
                ValidationIssue::error(format!(
                    "Analyzer node '{}' has no analyzer selected",
                    node.display_name()
                ))
                .on(&node.id)
                .field("analyzer"),
            ),
            Some(name) if !registry.contains(name) => issues.push(
                ValidationIssue::warning(format!(
                    "Analyzer '{}' is not in the known analyzer schema",
                    name
                ))
                .on(&node.id)
                .suggest(["Analyzer may be unavailable or the schema needs updating"]),
            ),
            Some(_) => {}
        }
    }
}

fn check_conditionals(
    graph: &WorkflowGraph,
    registry: &AnalyzerSchemaRegistry,
    issues: &mut Vec<ValidationIssue>,
) {
    let workflow_analyzers: HashSet<&str> = graph
        .nodes_of(NodeKind::Analyzer)
        .filter_map(|n| n.analyzer.as_deref())
        .collect();

    for node in graph.nodes_of(NodeKind::Conditional) {
        let name = node.display_name();
        let config = node.condition.as_ref();
        let producers = graph.producers_of(&node.id);

        if config.map_or(true, |c| c.is_empty()) {
            issues.push(
                ValidationIssue::warning(format!(
                    "Conditional node '{}' has no condition type, verdict_malicious is assumed",
                    name
                ))
                .on(&node.id)
                .field("conditionType"),
            );
        }

        let configured_source = config.and_then(|c| c.source_analyzer.as_deref());
        let producer_name = match (configured_source, producers.as_slice()) {
            (Some(_), _) => None,
            (None, [single]) => single.analyzer.as_deref(),
            (None, _) => {
                issues.push(
                    ValidationIssue::error(format!(
                        "Conditional node '{}' has no source analyzer",
                        name
                    ))
                    .on(&node.id)
                    .field("sourceAnalyzer")
                    .suggest(["Select which analyzer's output to evaluate"]),
                );
                continue;
            }
        };
        if let Some(producer) = producer_name {
            issues.push(
                ValidationIssue::info(format!(
                    "Conditional node '{}' evaluates its producer '{}'",
                    name, producer
                ))
                .on(&node.id)
                .field("sourceAnalyzer"),
            );
        }

        let condition = Condition::from_config(config, producer_name.unwrap_or_default());
        let source = condition.source_analyzer.clone();
        check_condition(node.id.as_str(), &condition, registry, issues);

        if !workflow_analyzers.contains(source.as_str()) {
            issues.push(
                ValidationIssue::error(format!(
                    "Conditional node references analyzer '{}' which is not in the workflow",
                    source
                ))
                .on(&node.id)
                .suggest([
                    format!("Add {} analyzer to the workflow", source),
                    "Change sourceAnalyzer to an analyzer that exists in the workflow".to_string(),
                ]),
            );
        }

        let wired = producers
            .iter()
            .any(|p| p.analyzer.as_deref() == Some(source.as_str()));
        if !wired {
            issues.push(
                ValidationIssue::warning(format!(
                    "Conditional node is not connected to its source analyzer '{}'",
                    source
                ))
                .on(&node.id)
                .suggest([format!(
                    "Connect {} output to this conditional node input",
                    source
                )]),
            );
        }
    }
}

fn check_condition(
    node_id: &str,
    condition: &Condition,
    registry: &AnalyzerSchemaRegistry,
    issues: &mut Vec<ValidationIssue>,
) {
    let target = match condition.inner.as_deref() {
        Some(inner) => inner,
        None => condition,
    };
    let analyzer = target.source_analyzer.as_str();
    let known = registry.contains(analyzer);

    // field path problems are reported once, as a warning with suggestions
    let path_check = match (&target.field_path, known) {
        (Some(path), true) if target.kind.is_field_comparison() => {
            let check = registry.validate_field_path(analyzer, path);
            (!check.valid).then_some((path.clone(), check))
        }
        _ => None,
    };

    for message in registry.validate_condition(condition) {
        if path_check.as_ref().is_some_and(|(_, c)| c.message == message) {
            continue;
        }
        let severity = if !known && message.starts_with("Unknown analyzer") {
            Severity::Warning
        } else {
            Severity::Error
        };
        let field = if message.contains("field path") {
            Some("fieldPath")
        } else if message.contains("expected value") {
            Some("expectedValue")
        } else {
            None
        };
        let mut issue = ValidationIssue::new(severity, format!("Condition is invalid: {}", message))
            .on(node_id);
        if let Some(field) = field {
            issue = issue.field(field);
        }
        issues.push(issue);
    }

    if let Some((path, check)) = path_check {
        issues.push(
            ValidationIssue::warning(format!(
                "Field path '{}' may not exist in {} output: {}",
                path, analyzer, check.message
            ))
            .on(node_id)
            .field("fieldPath")
            .suggest(check.suggestions.iter().take(3).map(|s| format!("Try: {}", s))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::{self, GraphBuilder};
    use serde_json::json;

    fn registry() -> AnalyzerSchemaRegistry {
        AnalyzerSchemaRegistry::bundled().unwrap()
    }

    fn messages(report: &ValidationReport, severity: Severity) -> Vec<String> {
        report
            .issues
            .iter()
            .filter(|i| i.severity == severity)
            .map(|i| i.message.clone())
            .collect()
    }

    #[test]
    fn test_valid_fixtures() {
        for graph in [testing::linear(), testing::diamond(), testing::single_branch()] {
            let report = validate(&graph, &registry());
            assert!(report.valid, "{:?}", report.issues);
        }
    }

    #[test]
    fn test_missing_source_and_analyzers() {
        let graph = GraphBuilder::new()
            .sink("result")
            .build();
        let report = validate(&graph, &registry());
        assert!(!report.valid);
        assert_eq!(report.error_count, 2);
        // disconnected sink is only a warning
        assert_eq!(report.warning_count, 1);
    }

    #[test]
    fn test_issues_sorted_by_severity() {
        let graph = GraphBuilder::new()
            .source("file")
            .source("file2")
            .analyzer("x", "Mystery_Scanner")
            .sink("result")
            .edge("file", "x")
            .edge("x", "result")
            .build();
        let report = validate(&graph, &registry());
        let severities: Vec<Severity> = report.issues.iter().map(|i| i.severity).collect();
        let mut sorted = severities.clone();
        sorted.sort();
        assert_eq!(severities, sorted);
        assert_eq!(report.issues[0].severity, Severity::Error);
        assert!(messages(&report, Severity::Warning)
            .iter()
            .any(|m| m.contains("Mystery_Scanner")));
    }

    #[test]
    fn test_cycle_and_unknown_edge() {
        let graph = GraphBuilder::new()
            .source("file")
            .analyzer("a", "ClamAV")
            .analyzer("b", "Yara")
            .edge("file", "a")
            .edge("a", "b")
            .edge("b", "a")
            .edge("b", "ghost")
            .build();
        let errors = messages(&validate(&graph, &registry()), Severity::Error);
        assert!(errors.iter().any(|m| m.contains("cycle")));
        assert!(errors.iter().any(|m| m.contains("'ghost'")));
    }

    #[test]
    fn test_field_condition_suggestions() {
        let graph = GraphBuilder::new()
            .source("file")
            .analyzer("quark", "Quark_Engine")
            .conditional_with(
                "cond",
                json!({
                    "conditionType": "field_greater_than",
                    "sourceAnalyzer": "Quark_Engine",
                    "fieldPath": "scor",
                    "expectedValue": 5
                }),
            )
            .sink("t")
            .edge("file", "quark")
            .edge("quark", "cond")
            .on_true("cond", "t")
            .build();
        let report = validate(&graph, &registry());
        let issue = report
            .issues
            .iter()
            .find(|i| i.field.as_deref() == Some("fieldPath"))
            .unwrap();
        assert_eq!(issue.severity, Severity::Warning);
        assert!(issue.suggestions.iter().all(|s| s.starts_with("Try: ")));
    }

    #[test]
    fn test_missing_expected_value() {
        let graph = GraphBuilder::new()
            .source("file")
            .analyzer("capa", "Capa_Info")
            .conditional_with(
                "cond",
                json!({ "conditionType": "capability_detected", "sourceAnalyzer": "Capa_Info" }),
            )
            .sink("t")
            .edge("file", "capa")
            .edge("capa", "cond")
            .on_true("cond", "t")
            .build();
        let report = validate(&graph, &registry());
        assert!(!report.valid);
        let error = report.errors().next().unwrap();
        assert_eq!(error.field.as_deref(), Some("expectedValue"));
        assert_eq!(error.node_id.as_deref(), Some("cond"));
    }

    #[test]
    fn test_source_analyzer_not_in_workflow() {
        let graph = GraphBuilder::new()
            .source("file")
            .analyzer("clam", "ClamAV")
            .conditional_with(
                "cond",
                json!({ "conditionType": "verdict_malicious", "sourceAnalyzer": "Yara" }),
            )
            .sink("t")
            .edge("file", "clam")
            .edge("clam", "cond")
            .on_true("cond", "t")
            .build();
        let report = validate(&graph, &registry());
        assert!(messages(&report, Severity::Error)
            .iter()
            .any(|m| m.contains("'Yara' which is not in the workflow")));
        assert!(messages(&report, Severity::Warning)
            .iter()
            .any(|m| m.contains("not connected to its source analyzer 'Yara'")));
    }

    #[test]
    fn test_defaulted_condition_is_not_an_error() {
        let graph = GraphBuilder::new()
            .source("file")
            .analyzer("clam", "ClamAV")
            .conditional_with("cond", json!({}))
            .sink("t")
            .edge("file", "clam")
            .edge("clam", "cond")
            .on_true("cond", "t")
            .build();
        let report = validate(&graph, &registry());
        assert!(report.valid);
        assert_eq!(report.warning_count, 1);
        assert_eq!(messages(&report, Severity::Info).len(), 1);
    }

    #[test]
    fn test_severity_wire_names() {
        assert_eq!(serde_json::to_value(Severity::Warning).unwrap(), json!("warning"));
        assert_eq!(Severity::Info.to_string(), "info");
    }
}
