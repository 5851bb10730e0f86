//! ThreatFlow Control Plane Library
//!
//! This crate runs files through visual malware analysis workflows:
//!
//! - **Graph Compilation**: turn an editor graph into ordered, gated stages
//! - **Condition Evaluation**: decide branches from analyzer reports with
//!   a confidence-ranked fallback ladder
//! - **Stage Execution**: submit each stage to the analysis service, one at
//!   a time, with timeouts and cancellation
//! - **Result Routing**: give every result node only the reports of the
//!   branch that fed it
//!
//! ## Modules
//!
//! - [`workflow`]: graph model, parser and validator
//! - [`engine`]: compiler, evaluator, executor and router
//! - [`analysis`]: analysis service client and the offline replay service
//! - [`schema`]: analyzer output schemas
//! - [`config`]: configuration loading from environment variables
//! - [`error`]: custom error types with Axum integration
//! - [`handlers`]: HTTP route handlers
//! - [`services`]: run service and run store
//! - [`state`]: shared application state
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use threatflow_control_plane::{
//!     analysis::{AnalysisFile, ReplayAnalysisService},
//!     engine::{ExecutorConfig, VerdictRuleTable},
//!     schema::AnalyzerSchemaRegistry,
//!     services::WorkflowService,
//!     workflow::load_workflow,
//! };
//!
//! let service = WorkflowService::new(
//!     Arc::new(ReplayAnalysisService::from_path("reports.json")?),
//!     Arc::new(VerdictRuleTable::bundled()?),
//!     Arc::new(AnalyzerSchemaRegistry::bundled()?),
//!     ExecutorConfig::default(),
//! );
//! let graph = load_workflow("workflow.json")?;
//! let summary = service
//!     .run(&graph, &AnalysisFile::from_path("sample.exe"), &Default::default())
//!     .await?;
//! ```

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod schema;
pub mod services;
pub mod state;
pub mod workflow;

pub use error::{AppError, AppResult};
