//! In-memory store of finished runs.
//!
//! Entries are keyed by run id and expire after a fixed TTL. Nothing here
//! feeds back into routing: a summary is only stored once its run is done.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use super::workflow::RunSummary;

struct StoredRun {
    summary: Arc<RunSummary>,
    stored_at: Instant,
}

/// Run summaries readable by id until they expire.
#[derive(Clone)]
pub struct RunStore {
    runs: Arc<RwLock<HashMap<Uuid, StoredRun>>>,
    ttl: Duration,
}

impl RunStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn insert(&self, summary: RunSummary) -> Arc<RunSummary> {
        let run_id = summary.run_id;
        let summary = Arc::new(summary);
        self.runs.write().await.insert(
            run_id,
            StoredRun {
                summary: summary.clone(),
                stored_at: Instant::now(),
            },
        );
        tracing::debug!(run_id = %run_id, "Run stored");
        summary
    }

    /// Expired entries are treated as absent even before the next sweep.
    pub async fn get(&self, run_id: &Uuid) -> Option<Arc<RunSummary>> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .filter(|r| r.stored_at.elapsed() < self.ttl)
            .map(|r| r.summary.clone())
    }

    pub async fn evict(&self, run_id: &Uuid) -> bool {
        let removed = self.runs.write().await.remove(run_id).is_some();
        if removed {
            tracing::debug!(run_id = %run_id, "Run evicted");
        }
        removed
    }

    /// Drop expired entries and return how many went.
    pub async fn sweep_expired(&self) -> usize {
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, r| r.stored_at.elapsed() < self.ttl);
        let swept = before - runs.len();
        if swept > 0 {
            tracing::info!(swept, remaining = runs.len(), "Swept expired runs");
        }
        swept
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

/// Background sweeper loop, run until the task is dropped.
pub async fn sweep_loop(store: RunStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        store.sweep_expired().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CompiledPlan, ExecutionReport};
    use chrono::Utc;

    fn summary() -> RunSummary {
        let run_id = Uuid::new_v4();
        RunSummary {
            run_id,
            plan: CompiledPlan {
                has_conditionals: false,
                source_id: "file".to_string(),
                stages: Vec::new(),
                warnings: Vec::new(),
            },
            execution: ExecutionReport {
                run_id,
                total_stages: 0,
                job_ids: Vec::new(),
                executed_stages: Vec::new(),
                skipped_stages: Vec::new(),
                failed_stages: Vec::new(),
                cancelled: false,
                results_by_stage: Default::default(),
                stage_records: Vec::new(),
                stage_routing: Vec::new(),
                evaluations: Default::default(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
            },
            sinks: Vec::new(),
            routing_mismatches: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_get_evict() {
        let store = RunStore::new(Duration::from_secs(60));
        let stored = store.insert(summary()).await;
        let id = stored.run_id;

        assert!(store.get(&id).await.is_some());
        assert!(store.evict(&id).await);
        assert!(store.get(&id).await.is_none());
        assert!(!store.evict(&id).await);
    }

    #[tokio::test]
    async fn test_expired_runs_are_swept() {
        let store = RunStore::new(Duration::from_millis(10));
        let id = store.insert(summary()).await.run_id;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get(&id).await.is_none());
        assert_eq!(store.len().await, 1);
        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_runs_are_independent() {
        let store = RunStore::new(Duration::from_secs(60));
        let a = store.insert(summary()).await.run_id;
        let b = store.insert(summary()).await.run_id;
        assert_ne!(a, b);
        store.evict(&a).await;
        assert!(store.get(&b).await.is_some());
    }
}
