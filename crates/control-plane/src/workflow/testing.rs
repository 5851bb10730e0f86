//! Graph fixtures shared by unit tests.

use serde_json::{json, Value};

use super::types::{Branch, EdgeSpec, NodeKind, NodeSpec, WorkflowGraph, WorkflowSubmission};

#[derive(Default)]
pub struct GraphBuilder {
    submission: WorkflowSubmission,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(mut self, id: &str, kind: NodeKind, data: Value) -> Self {
        self.submission.nodes.push(NodeSpec {
            id: id.to_string(),
            kind,
            data,
        });
        self
    }

    pub fn source(self, id: &str) -> Self {
        self.node(id, NodeKind::Source, Value::Null)
    }

    pub fn analyzer(self, id: &str, name: &str) -> Self {
        self.node(id, NodeKind::Analyzer, json!({ "analyzer": name }))
    }

    /// Conditional with `conditionType` set; the source analyzer defaults
    /// to the producer.
    pub fn conditional(self, id: &str, condition_type: &str) -> Self {
        self.node(id, NodeKind::Conditional, json!({ "conditionType": condition_type }))
    }

    pub fn conditional_with(self, id: &str, data: Value) -> Self {
        self.node(id, NodeKind::Conditional, data)
    }

    pub fn sink(self, id: &str) -> Self {
        self.node(id, NodeKind::Sink, json!({ "label": id }))
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.submission.edges.push(EdgeSpec {
            from: from.to_string(),
            to: to.to_string(),
            branch: Branch::Untagged,
        });
        self
    }

    pub fn on_true(mut self, from: &str, to: &str) -> Self {
        self.submission.edges.push(EdgeSpec {
            from: from.to_string(),
            to: to.to_string(),
            branch: Branch::True,
        });
        self
    }

    pub fn on_false(mut self, from: &str, to: &str) -> Self {
        self.submission.edges.push(EdgeSpec {
            from: from.to_string(),
            to: to.to_string(),
            branch: Branch::False,
        });
        self
    }

    pub fn submission(self) -> WorkflowSubmission {
        self.submission
    }

    pub fn build(self) -> WorkflowGraph {
        WorkflowGraph::from_submission(self.submission).expect("fixture graph is valid")
    }
}

/// `File -> ClamAV -> Result`
pub fn linear() -> WorkflowGraph {
    GraphBuilder::new()
        .source("file")
        .analyzer("clam", "ClamAV")
        .sink("result")
        .edge("file", "clam")
        .edge("clam", "result")
        .build()
}

/// `File -> ClamAV -> Cond(verdict_malicious) -> [ResultTrue, ResultFalse]`
pub fn single_branch() -> WorkflowGraph {
    GraphBuilder::new()
        .source("file")
        .analyzer("clam", "ClamAV")
        .conditional("cond", "verdict_malicious")
        .sink("result-true")
        .sink("result-false")
        .edge("file", "clam")
        .edge("clam", "cond")
        .on_true("cond", "result-true")
        .on_false("cond", "result-false")
        .build()
}

/// `File -> A -> Cond1 -> [B -> Cond2 -> [C -> ResultX, ResultY], ResultZ]`
/// with `A = ClamAV`, `B = Doc_Info`, `C = Capa_Info`.
pub fn chained() -> WorkflowGraph {
    GraphBuilder::new()
        .source("file")
        .analyzer("a", "ClamAV")
        .conditional("cond1", "verdict_malicious")
        .analyzer("b", "Doc_Info")
        .conditional("cond2", "verdict_suspicious")
        .analyzer("c", "Capa_Info")
        .sink("result-x")
        .sink("result-y")
        .sink("result-z")
        .edge("file", "a")
        .edge("a", "cond1")
        .on_true("cond1", "b")
        .on_false("cond1", "result-z")
        .edge("b", "cond2")
        .on_true("cond2", "c")
        .on_false("cond2", "result-y")
        .edge("c", "result-x")
        .build()
}

/// `File -> A -> Cond1 -> [B -> ResultA, B' -> Cond2 -> [ResultB, ResultC]]`
/// with the same analyzer (`Doc_Info`) on both branches of `Cond1`.
pub fn twin_branches() -> WorkflowGraph {
    GraphBuilder::new()
        .source("file")
        .analyzer("a", "ClamAV")
        .conditional("cond1", "verdict_malicious")
        .analyzer("doc-true", "Doc_Info")
        .analyzer("doc-false", "Doc_Info")
        .conditional("cond2", "verdict_suspicious")
        .sink("result-a")
        .sink("result-b")
        .sink("result-c")
        .edge("file", "a")
        .edge("a", "cond1")
        .on_true("cond1", "doc-true")
        .on_false("cond1", "doc-false")
        .edge("doc-true", "result-a")
        .edge("doc-false", "cond2")
        .on_true("cond2", "result-b")
        .on_false("cond2", "result-c")
        .build()
}

/// `File -> A -> Cond1 -> [B -> Cond2 -> [Shared, Other], Shared]`: the
/// shared result is fed from two branch depths.
pub fn reconverging() -> WorkflowGraph {
    GraphBuilder::new()
        .source("file")
        .analyzer("a", "ClamAV")
        .conditional("cond1", "verdict_malicious")
        .analyzer("b", "Doc_Info")
        .conditional("cond2", "verdict_suspicious")
        .sink("shared")
        .sink("other")
        .edge("file", "a")
        .edge("a", "cond1")
        .on_true("cond1", "b")
        .on_false("cond1", "shared")
        .edge("b", "cond2")
        .on_true("cond2", "shared")
        .on_false("cond2", "other")
        .build()
}

/// `File -> A -> {B, C} -> SharedResult`
pub fn diamond() -> WorkflowGraph {
    GraphBuilder::new()
        .source("file")
        .analyzer("a", "ClamAV")
        .analyzer("b", "Yara")
        .analyzer("c", "Strings_Info")
        .sink("shared")
        .edge("file", "a")
        .edge("a", "b")
        .edge("a", "c")
        .edge("b", "shared")
        .edge("c", "shared")
        .build()
}
