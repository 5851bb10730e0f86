//! Canned-report analysis service.
//!
//! Serves recorded analyzer reports instead of calling a live backend. Used
//! by `threatflow run --replay` and throughout the engine tests.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{AnalysisFile, AnalysisService, AnalyzerInfo, AnalyzerReport, JobPoll, JobStatus};
use crate::error::{AnalysisError, AppError, AppResult};

#[derive(Default)]
pub struct ReplayAnalysisService {
    reports: BTreeMap<String, AnalyzerReport>,
    jobs: RwLock<BTreeMap<String, Vec<String>>>,
    next_job: AtomicU64,
    delay: Duration,
    rejected: HashSet<String>,
}

impl ReplayAnalysisService {
    pub fn new(reports: impl IntoIterator<Item = AnalyzerReport>) -> Self {
        Self {
            reports: reports
                .into_iter()
                .map(|r| (r.name.clone(), r))
                .collect(),
            ..Default::default()
        }
    }

    /// Load a JSON or YAML list of `{name, status, report}` entries.
    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read replay file {}: {}", path.display(), e))
        })?;
        let reports: Vec<AnalyzerReport> = serde_yaml::from_str(&content)?;
        tracing::info!(path = %path.display(), reports = reports.len(), "Loaded replay reports");
        Ok(Self::new(reports))
    }

    /// Delay every submission, to exercise stage timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reject any submission that includes this analyzer.
    pub fn rejecting(mut self, analyzer: impl Into<String>) -> Self {
        self.rejected.insert(analyzer.into());
        self
    }

    /// Analyzer sets submitted so far, in job order.
    pub async fn submissions(&self) -> Vec<Vec<String>> {
        self.jobs.read().await.values().cloned().collect()
    }

    fn report_for(&self, analyzer: &str) -> AnalyzerReport {
        self.reports.get(analyzer).cloned().unwrap_or_else(|| {
            AnalyzerReport::new(
                analyzer,
                "FAILED",
                json!({ "errors": [format!("no recorded report for {}", analyzer)] }),
            )
        })
    }
}

#[async_trait]
impl AnalysisService for ReplayAnalysisService {
    async fn submit(&self, file: &AnalysisFile, analyzers: &[String]) -> Result<String, AnalysisError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(bad) = analyzers.iter().find(|a| self.rejected.contains(*a)) {
            return Err(AnalysisError::Status {
                status: 400,
                body: format!("analyzer {} is not available", bad),
            });
        }

        let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = n.to_string();
        // zero-padded key keeps BTreeMap iteration in submission order
        self.jobs
            .write()
            .await
            .insert(format!("{:010}", n), analyzers.to_vec());

        tracing::debug!(job_id = %job_id, file = %file.name, analyzers = ?analyzers, "Replay job submitted");
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobPoll, AnalysisError> {
        let key = job_id
            .parse::<u64>()
            .map(|n| format!("{:010}", n))
            .map_err(|_| AnalysisError::Decode(format!("invalid job id '{}'", job_id)))?;
        let jobs = self.jobs.read().await;
        let analyzers = jobs.get(&key).ok_or_else(|| AnalysisError::Status {
            status: 404,
            body: format!("job {} not found", job_id),
        })?;

        let reports: Vec<AnalyzerReport> = analyzers.iter().map(|a| self.report_for(a)).collect();
        let status = if reports.iter().all(AnalyzerReport::is_success) {
            JobStatus::ReportedWithoutFails
        } else {
            JobStatus::ReportedWithFails
        };
        Ok(JobPoll { status, reports })
    }

    /// One file analyzer per recorded report; rejected analyzers are disabled.
    async fn list_analyzers(&self) -> Result<Vec<AnalyzerInfo>, AnalysisError> {
        Ok(self
            .reports
            .keys()
            .map(|name| AnalyzerInfo {
                name: name.clone(),
                analyzer_type: "file".to_string(),
                description: "Recorded report".to_string(),
                supported_filetypes: Vec::new(),
                disabled: self.rejected.contains(name),
            })
            .collect())
    }
}

/// Successful report, for fixtures.
pub fn success_report(name: &str, report: Value) -> AnalyzerReport {
    AnalyzerReport::new(name, "SUCCESS", report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn file() -> AnalysisFile {
        AnalysisFile::from_path("/tmp/sample.exe")
    }

    #[tokio::test]
    async fn test_replay_serves_recorded_reports() {
        let service = ReplayAnalysisService::new(vec![success_report(
            "ClamAV",
            json!({"detections": ["Eicar-Signature"]}),
        )]);
        let job = service
            .submit(&file(), &["ClamAV".to_string(), "Yara".to_string()])
            .await
            .unwrap();
        let poll = service.poll(&job).await.unwrap();

        assert_eq!(poll.status, JobStatus::ReportedWithFails);
        assert_eq!(poll.reports.len(), 2);
        assert!(poll.reports[0].is_success());
        assert_eq!(poll.reports[1].status, "FAILED");
        assert_eq!(service.submissions().await, vec![vec!["ClamAV", "Yara"]]);
    }

    #[tokio::test]
    async fn test_replay_rejects_and_unknown_jobs() {
        let service = ReplayAnalysisService::default().rejecting("Yara");
        assert_err!(service.submit(&file(), &["Yara".to_string()]).await);
        assert_err!(service.poll("99").await);
        assert!(matches!(
            service.poll("abc").await,
            Err(AnalysisError::Decode(_))
        ));
        let job = assert_ok!(service.submit(&file(), &["ClamAV".to_string()]).await);
        assert_eq!(job, "1");
    }

    #[tokio::test]
    async fn test_replay_lists_recorded_analyzers() {
        let service = ReplayAnalysisService::new(vec![
            success_report("Yara", json!({})),
            success_report("ClamAV", json!({})),
        ])
        .rejecting("Yara");
        let analyzers = assert_ok!(service.list_analyzers().await);
        let names: Vec<(&str, bool)> = analyzers.iter().map(|a| (a.name.as_str(), a.disabled)).collect();
        assert_eq!(names, vec![("ClamAV", false), ("Yara", true)]);
    }

    #[test]
    fn test_replay_from_yaml_file() {
        let dir = std::env::temp_dir().join(format!("threatflow-replay-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("reports.yaml");
        std::fs::write(
            &path,
            "- name: ClamAV\n  status: SUCCESS\n  report:\n    detections: []\n",
        )
        .unwrap();

        let service = ReplayAnalysisService::from_path(&path).unwrap();
        assert!(service.reports.contains_key("ClamAV"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
