//! Analysis graph model.
//!
//! - **Types**: submission wire format and the indexed [`WorkflowGraph`]
//! - **Parser**: JSON/YAML documents to graphs
//! - **Validator**: severity-ranked diagnostics for the editor

pub mod parser;
pub mod types;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use parser::{load_workflow, parse_submission, parse_workflow};
pub use types::{
    Branch, ConditionConfig, Edge, EdgeSpec, Node, NodeKind, NodeSpec, WorkflowGraph,
    WorkflowSubmission,
};
pub use validator::{validate, Severity, ValidationIssue, ValidationReport};
