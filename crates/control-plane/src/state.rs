//! Application state for the ThreatFlow Control Plane server.
//!
//! This module defines the shared application state that is
//! passed to all handlers via Axum's state management.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::schema::AnalyzerSchemaRegistry;
use crate::services::{RunStore, WorkflowService};

/// Shared application state.
///
/// Cloned into every handler. Everything in here is either read-only or
/// internally synchronized.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Compile/execute/route entry point
    pub workflows: WorkflowService,

    /// Finished runs, readable until they expire
    pub runs: RunStore,

    /// Cancelled on shutdown; every run gets a child token
    pub shutdown: CancellationToken,

    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: AppConfig, workflows: WorkflowService) -> Self {
        let runs = RunStore::new(Duration::from_secs(config.run_ttl_seconds));
        Self {
            config: Arc::new(config),
            workflows,
            runs,
            shutdown: CancellationToken::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn registry(&self) -> &AnalyzerSchemaRegistry {
        self.workflows.registry()
    }

    /// Get the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
