//! Analysis service boundary.
//!
//! The engine only knows "submit analyzers for a file, then poll the job".
//! [`IntelOwlClient`] talks to a live IntelOwl instance; [`ReplayAnalysisService`]
//! serves canned reports for tests and offline runs.

pub mod intelowl;
pub mod replay;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::AnalysisError;

pub use intelowl::IntelOwlClient;
pub use replay::ReplayAnalysisService;

/// File handed to the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFile {
    pub path: PathBuf,
    pub name: String,
}

impl AnalysisFile {
    /// Name defaults to the path's file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sample".to_string());
        Self { path, name }
    }
}

/// One analyzer's output inside a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerReport {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub report: Value,
}

impl AnalyzerReport {
    pub fn new(name: impl Into<String>, status: impl Into<String>, report: Value) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            report,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("SUCCESS")
    }
}

/// Job status as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Running,
    ReportedWithoutFails,
    ReportedWithFails,
    Failed,
    Killed,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ReportedWithoutFails => "reported_without_fails",
            Self::ReportedWithFails => "reported_with_fails",
            Self::Failed => "failed",
            Self::Killed => "killed",
            Self::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ReportedWithoutFails | Self::ReportedWithFails | Self::Failed | Self::Killed
        )
    }

    /// Terminal and produced reports.
    pub fn is_reported(&self) -> bool {
        matches!(self, Self::ReportedWithoutFails | Self::ReportedWithFails)
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "reported_without_fails" => Self::ReportedWithoutFails,
            "reported_with_fails" => Self::ReportedWithFails,
            "failed" => Self::Failed,
            "killed" => Self::Killed,
            _ => Self::Other(s),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An analyzer the service offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerInfo {
    pub name: String,
    #[serde(rename = "type", default = "unknown_type")]
    pub analyzer_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "supported_filetypes")]
    pub supported_filetypes: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

fn unknown_type() -> String {
    "unknown".to_string()
}

/// Enabled analyzers, optionally restricted to one type (`file`,
/// `observable`).
pub fn filter_analyzers(analyzers: Vec<AnalyzerInfo>, analyzer_type: Option<&str>) -> Vec<AnalyzerInfo> {
    analyzers
        .into_iter()
        .filter(|a| !a.disabled)
        .filter(|a| analyzer_type.map_or(true, |t| a.analyzer_type == t))
        .collect()
}

/// Snapshot returned by [`AnalysisService::poll`]. `reports` is only
/// meaningful once the status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPoll {
    pub status: JobStatus,
    #[serde(default)]
    pub reports: Vec<AnalyzerReport>,
}

/// External analysis backend.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Submit a file for the named analyzers. Returns the job id.
    async fn submit(&self, file: &AnalysisFile, analyzers: &[String]) -> Result<String, AnalysisError>;

    async fn poll(&self, job_id: &str) -> Result<JobPoll, AnalysisError>;

    /// Analyzers the service knows about. Also serves as a connectivity check.
    async fn list_analyzers(&self) -> Result<Vec<AnalyzerInfo>, AnalysisError> {
        Err(AnalysisError::NotConfigured(
            "this analysis service does not list analyzers".to_string(),
        ))
    }
}

/// Poll a job until it reaches a terminal status.
///
/// Callers bound the total wait with `tokio::time::timeout`; this loop only
/// stops on a terminal status, an error or cancellation.
pub async fn wait_for_completion(
    service: &dyn AnalysisService,
    job_id: &str,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<AnalyzerReport>, AnalysisError> {
    loop {
        let poll = service.poll(job_id).await?;
        tracing::debug!(job_id = %job_id, status = %poll.status, "Polled analysis job");

        if poll.status.is_reported() {
            return Ok(poll.reports);
        }
        if poll.status.is_terminal() {
            return Err(AnalysisError::JobFailed {
                job_id: job_id.to_string(),
                status: poll.status.to_string(),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AnalysisError::Cancelled(job_id.to_string()));
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowJob {
        polls: AtomicUsize,
        finish_after: usize,
        final_status: &'static str,
    }

    #[async_trait]
    impl AnalysisService for SlowJob {
        async fn submit(&self, _file: &AnalysisFile, _analyzers: &[String]) -> Result<String, AnalysisError> {
            Ok("7".to_string())
        }

        async fn poll(&self, _job_id: &str) -> Result<JobPoll, AnalysisError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let status = if n >= self.finish_after {
                JobStatus::from(self.final_status.to_string())
            } else {
                JobStatus::Running
            };
            Ok(JobPoll {
                status,
                reports: vec![AnalyzerReport::new("ClamAV", "SUCCESS", json!({"detections": []}))],
            })
        }
    }

    #[test]
    fn test_job_status_parsing() {
        assert_eq!(JobStatus::from("REPORTED_WITH_FAILS".to_string()), JobStatus::ReportedWithFails);
        assert!(JobStatus::Killed.is_terminal());
        assert!(!JobStatus::Killed.is_reported());
        assert!(!JobStatus::from("queued".to_string()).is_terminal());
    }

    #[test]
    fn test_filter_analyzers_by_type() {
        let analyzers: Vec<AnalyzerInfo> = serde_json::from_value(json!([
            {"name": "ClamAV", "type": "file", "supported_filetypes": ["*"]},
            {"name": "AbuseIPDB", "type": "observable"},
            {"name": "Old", "type": "file", "disabled": true},
            {"name": "Mystery"}
        ]))
        .unwrap();
        assert_eq!(analyzers[3].analyzer_type, "unknown");

        let files = filter_analyzers(analyzers.clone(), Some("file"));
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "ClamAV");
        assert_eq!(filter_analyzers(analyzers, None).len(), 3);
    }

    #[tokio::test]
    async fn test_listing_not_supported_by_default() {
        let service = SlowJob {
            polls: AtomicUsize::new(0),
            finish_after: 1,
            final_status: "killed",
        };
        let err = service.list_analyzers().await.unwrap_err();
        assert!(matches!(err, AnalysisError::NotConfigured(_)));
    }

    #[test]
    fn test_file_name_from_path() {
        let file = AnalysisFile::from_path("/tmp/samples/eicar.com");
        assert_eq!(file.name, "eicar.com");
    }

    #[tokio::test]
    async fn test_wait_for_completion_polls_until_reported() {
        let service = SlowJob {
            polls: AtomicUsize::new(0),
            finish_after: 3,
            final_status: "reported_without_fails",
        };
        let reports = wait_for_completion(&service, "7", Duration::from_millis(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(service.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_for_completion_failed_job() {
        let service = SlowJob {
            polls: AtomicUsize::new(0),
            finish_after: 1,
            final_status: "killed",
        };
        let err = wait_for_completion(&service, "7", Duration::from_millis(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::JobFailed { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_completion_cancelled() {
        let service = SlowJob {
            polls: AtomicUsize::new(0),
            finish_after: usize::MAX,
            final_status: "running",
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wait_for_completion(&service, "7", Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled(_)));
    }
}
