//! Analysis graph types.
//!
//! Two layers live here. [`WorkflowSubmission`] mirrors the wire format sent
//! by the visual editor (loose, aliased field names). [`WorkflowGraph`] is the
//! immutable, indexed form the compiler, validator and router work on.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// Node kinds of an analysis graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The submitted file.
    #[serde(alias = "file")]
    Source,
    /// One named analyzer.
    Analyzer,
    /// A TRUE/FALSE branch point over an analyzer's output.
    Conditional,
    /// A result node that displays reports.
    #[serde(alias = "result")]
    Sink,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Analyzer => write!(f, "analyzer"),
            Self::Conditional => write!(f, "conditional"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// Branch tag carried by edges leaving a conditional node.
///
/// Wire form is the editor's handle name (`true-output` / `false-output`);
/// anything else, including a missing handle, is untagged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Branch {
    #[default]
    Untagged,
    True,
    False,
}

impl Branch {
    pub fn is_tagged(self) -> bool {
        !matches!(self, Self::Untagged)
    }
}

impl From<Option<String>> for Branch {
    fn from(handle: Option<String>) -> Self {
        match handle.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("true-output") | Some("true") => Self::True,
            Some("false-output") | Some("false") => Self::False,
            _ => Self::Untagged,
        }
    }
}

impl From<Branch> for Option<String> {
    fn from(branch: Branch) -> Self {
        match branch {
            Branch::Untagged => None,
            Branch::True => Some("true-output".to_string()),
            Branch::False => Some("false-output".to_string()),
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Untagged => write!(f, "untagged"),
            Self::True => write!(f, "TRUE"),
            Self::False => write!(f, "FALSE"),
        }
    }
}

/// A node as submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(alias = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub data: Value,
}

/// An edge as submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(alias = "source")]
    pub from: String,
    #[serde(alias = "target")]
    pub to: String,
    #[serde(default, alias = "sourceHandle")]
    pub branch: Branch,
}

/// The submission format: `{nodes: [...], edges: [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSubmission {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

/// Condition settings exactly as configured on a conditional node.
///
/// Kept raw so the validator can report what is missing; the compiler
/// turns it into a [`crate::engine::Condition`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_analyzer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<Value>,
    /// Legacy nested `condition` object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy: Option<Value>,
}

impl ConditionConfig {
    pub fn is_empty(&self) -> bool {
        self.condition_type.is_none() && self.legacy.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeData {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    analyzer: Option<String>,
    #[serde(default, alias = "condition_type")]
    condition_type: Option<String>,
    #[serde(default, alias = "source_analyzer")]
    source_analyzer: Option<String>,
    #[serde(default, alias = "field_path")]
    field_path: Option<String>,
    #[serde(default, alias = "expected_value")]
    expected_value: Option<Value>,
    #[serde(default)]
    condition: Option<Value>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A typed graph node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Analyzer name, for analyzer nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    /// Condition settings, for conditional nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionConfig>,
}

impl Node {
    fn from_spec(spec: NodeSpec) -> AppResult<Self> {
        let data: NodeData = match spec.data {
            Value::Null => NodeData::default(),
            other => serde_json::from_value(other).map_err(|e| {
                AppError::Parse(format!("node '{}' has malformed data: {}", spec.id, e))
            })?,
        };

        let condition = (spec.kind == NodeKind::Conditional).then(|| ConditionConfig {
            condition_type: non_blank(data.condition_type),
            source_analyzer: non_blank(data.source_analyzer),
            field_path: non_blank(data.field_path),
            expected_value: data.expected_value.filter(|v| !v.is_null()),
            legacy: data.condition.filter(|v| v.is_object()),
        });

        Ok(Self {
            id: spec.id,
            kind: spec.kind,
            label: data.label,
            analyzer: if spec.kind == NodeKind::Analyzer {
                non_blank(data.analyzer)
            } else {
                None
            },
            condition,
        })
    }

    /// Human readable name for logs and views.
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.analyzer.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A typed graph edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub branch: Branch,
}

/// Immutable, indexed analysis graph.
///
/// Adjacency lists keep edge declaration order so every traversal is
/// deterministic for a given submission.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl WorkflowGraph {
    /// Build the indexed graph from a submission.
    ///
    /// Duplicate node ids are rejected. Edges that point at unknown nodes are
    /// kept (the validator reports them) but every traversal ignores them.
    pub fn from_submission(submission: WorkflowSubmission) -> AppResult<Self> {
        let mut nodes = Vec::with_capacity(submission.nodes.len());
        let mut index = HashMap::new();

        for spec in submission.nodes {
            if index.contains_key(&spec.id) {
                return Err(AppError::Validation(format!(
                    "duplicate node id '{}'",
                    spec.id
                )));
            }
            index.insert(spec.id.clone(), nodes.len());
            nodes.push(Node::from_spec(spec)?);
        }

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        let edges: Vec<Edge> = submission
            .edges
            .into_iter()
            .map(|e| Edge {
                from: e.from,
                to: e.to,
                branch: e.branch,
            })
            .collect();

        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.from.clone()).or_default().push(i);
            incoming.entry(edge.to.clone()).or_default().push(i);
        }

        Ok(Self {
            nodes,
            index,
            edges,
            outgoing,
            incoming,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes of one kind, in declaration order.
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    pub fn sources(&self) -> Vec<&Node> {
        self.nodes_of(NodeKind::Source).collect()
    }

    /// Sink ids in declaration order.
    pub fn sink_ids(&self) -> Vec<String> {
        self.nodes_of(NodeKind::Sink).map(|n| n.id.clone()).collect()
    }

    pub fn has_conditionals(&self) -> bool {
        self.nodes_of(NodeKind::Conditional).next().is_some()
    }

    /// Outgoing edges paired with their (known) target node.
    pub fn successors<'a>(&'a self, id: &str) -> impl Iterator<Item = (&'a Edge, &'a Node)> + 'a {
        self.outgoing
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(move |&i| {
                let edge = &self.edges[i];
                self.node(&edge.to).map(|n| (edge, n))
            })
    }

    /// Incoming edges paired with their (known) origin node.
    pub fn predecessors<'a>(&'a self, id: &str) -> impl Iterator<Item = (&'a Edge, &'a Node)> + 'a {
        self.incoming
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(move |&i| {
                let edge = &self.edges[i];
                self.node(&edge.from).map(|n| (edge, n))
            })
    }

    /// Analyzer nodes feeding a conditional node.
    pub fn producers_of(&self, conditional_id: &str) -> Vec<&Node> {
        let mut seen = HashSet::new();
        self.predecessors(conditional_id)
            .map(|(_, n)| n)
            .filter(|n| n.kind == NodeKind::Analyzer && seen.insert(n.id.as_str()))
            .collect()
    }

    /// All node ids reachable from `start`, in DFS discovery order.
    pub fn reachable_from(&self, start: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![start.to_string()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let next: Vec<String> = self.successors(&id).map(|(_, n)| n.id.clone()).collect();
            order.push(id);
            // reversed so the first declared edge is explored first
            stack.extend(next.into_iter().rev());
        }
        order
    }

    /// All node ids from which `target` can be reached, including itself.
    pub fn reaching(&self, target: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![target.to_string()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            stack.extend(self.predecessors(&id).map(|(_, n)| n.id.clone()));
        }
        seen
    }

    /// Find one cycle, returned as the node path that closes it.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Open,
            Done,
        }

        fn visit(
            graph: &WorkflowGraph,
            id: &str,
            marks: &mut HashMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match marks.get(id) {
                Some(Mark::Done) => return None,
                Some(Mark::Open) => {
                    let start = path.iter().position(|p| p == id).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(id.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(id.to_string(), Mark::Open);
            path.push(id.to_string());
            for (_, next) in graph.successors(id) {
                if let Some(cycle) = visit(graph, &next.id, marks, path) {
                    return Some(cycle);
                }
            }
            path.pop();
            marks.insert(id.to_string(), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for node in &self.nodes {
            let mut path = Vec::new();
            if let Some(cycle) = visit(self, &node.id, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }
}
