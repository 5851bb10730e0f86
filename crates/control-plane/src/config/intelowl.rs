//! Analysis service (IntelOwl) configuration.

use std::time::Duration;

use serde::Deserialize;

/// Connection settings for the IntelOwl analysis service.
///
/// Environment variables are prefixed with `INTELOWL_`:
/// - `INTELOWL_URL`: Base URL of the service (default: "http://localhost")
/// - `INTELOWL_API_KEY`: API token, required for live runs
/// - `INTELOWL_ANALYSIS_TIMEOUT`: Per-stage timeout in seconds (default: 300)
/// - `INTELOWL_POLL_INTERVAL`: Seconds between job status polls (default: 5)
/// - `INTELOWL_TLP`: Traffic light protocol tag for submissions (default: "CLEAR")
/// - `INTELOWL_TAGS`: Comma separated labels attached to submissions
#[derive(Debug, Clone, Deserialize)]
pub struct IntelOwlConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-stage timeout in seconds
    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout: u64,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "default_tlp")]
    pub tlp: String,

    #[serde(default = "default_tags")]
    pub tags: String,
}

fn default_url() -> String {
    "http://localhost".to_string()
}

fn default_analysis_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    5
}

fn default_tlp() -> String {
    "CLEAR".to_string()
}

fn default_tags() -> String {
    "threatflow".to_string()
}

impl IntelOwlConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("INTELOWL_").from_env::<IntelOwlConfig>()
    }

    /// API token, if one is set and not blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout)
    }

    pub fn poll_every(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }

    /// Submission labels, split on commas with blanks dropped.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for IntelOwlConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: None,
            analysis_timeout: default_analysis_timeout(),
            poll_interval: default_poll_interval(),
            tlp: default_tlp(),
            tags: default_tags(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IntelOwlConfig::default();
        assert_eq!(config.stage_timeout(), Duration::from_secs(300));
        assert_eq!(config.poll_every(), Duration::from_secs(5));
        assert_eq!(config.tlp, "CLEAR");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = IntelOwlConfig {
            poll_interval: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_every(), Duration::from_secs(1));
    }

    #[test]
    fn test_tag_list() {
        let config = IntelOwlConfig {
            tags: "threatflow, triage,,".to_string(),
            ..Default::default()
        };
        assert_eq!(config.tag_list(), vec!["threatflow", "triage"]);
    }
}
