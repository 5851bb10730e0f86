//! Service layer for the ThreatFlow Control Plane.
//!
//! Services sit between the HTTP handlers (or the CLI) and the engine.

pub mod run_store;
pub mod workflow;

pub use run_store::{sweep_loop, RunStore};
pub use workflow::{RunSummary, WorkflowService};
