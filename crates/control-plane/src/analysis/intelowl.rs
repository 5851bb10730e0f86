//! HTTP client for an IntelOwl analysis service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;

use super::{AnalysisFile, AnalysisService, AnalyzerInfo, AnalyzerReport, JobPoll, JobStatus};
use crate::config::IntelOwlConfig;
use crate::error::AnalysisError;

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: Value,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    status: String,
    #[serde(default)]
    analyzer_reports: Vec<AnalyzerReport>,
}

/// IntelOwl REST client using token authentication.
///
/// A client without an API key can be built; every call then fails with
/// [`AnalysisError::NotConfigured`].
#[derive(Clone)]
pub struct IntelOwlClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    tlp: String,
    tags: Vec<String>,
}

impl IntelOwlClient {
    pub fn new(config: &IntelOwlConfig) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let api_key = config.api_key().map(str::to_string);
        if api_key.is_none() {
            tracing::warn!(url = %config.url, "INTELOWL_API_KEY is not set, analysis calls will be refused");
        } else {
            tracing::info!(url = %config.url, "IntelOwl client initialized");
        }

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
            tlp: config.tlp.clone(),
            tags: config.tag_list(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn auth_header(&self) -> Result<String, AnalysisError> {
        self.api_key
            .as_ref()
            .map(|key| format!("Token {}", key))
            .ok_or_else(|| AnalysisError::NotConfigured("INTELOWL_API_KEY is not set".to_string()))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AnalysisError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AnalysisError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl AnalysisService for IntelOwlClient {
    async fn submit(&self, file: &AnalysisFile, analyzers: &[String]) -> Result<String, AnalysisError> {
        let auth = self.auth_header()?;
        let bytes = tokio::fs::read(&file.path).await?;

        let mut form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file.name.clone()))
            .text("file_name", file.name.clone())
            .text("tlp", self.tlp.clone());
        for analyzer in analyzers {
            form = form.text("analyzers_requested", analyzer.clone());
        }
        for tag in &self.tags {
            form = form.text("tags_labels", tag.clone());
        }

        let response = self
            .client
            .post(format!("{}/api/analyze_file", self.base_url))
            .header("Authorization", auth)
            .multipart(form)
            .send()
            .await?;
        let submitted: SubmitResponse = Self::check(response).await?.json().await?;

        let job_id = match submitted.job_id {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s,
            other => {
                return Err(AnalysisError::Decode(format!(
                    "job_id has unexpected shape: {}",
                    other
                )))
            }
        };

        tracing::info!(job_id = %job_id, analyzers = ?analyzers, "Submitted file analysis");
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobPoll, AnalysisError> {
        let response = self
            .client
            .get(format!("{}/api/jobs/{}", self.base_url, job_id))
            .header("Authorization", self.auth_header()?)
            .send()
            .await?;
        let job: JobResponse = Self::check(response).await?.json().await?;

        Ok(JobPoll {
            status: JobStatus::from(job.status),
            reports: job.analyzer_reports,
        })
    }

    async fn list_analyzers(&self) -> Result<Vec<AnalyzerInfo>, AnalysisError> {
        let response = self
            .client
            .get(format!("{}/api/get_analyzer_configs", self.base_url))
            .header("Authorization", self.auth_header()?)
            .send()
            .await?;
        let analyzers: Vec<AnalyzerInfo> = Self::check(response).await?.json().await?;
        tracing::debug!(count = analyzers.len(), "Fetched IntelOwl analyzer configs");
        Ok(analyzers)
    }
}
