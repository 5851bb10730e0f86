//! Application configuration for the ThreatFlow Control Plane server.

use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// Environment variables are prefixed with `THREATFLOW_`:
/// - `THREATFLOW_HOST`: Server bind address (default: "0.0.0.0")
/// - `THREATFLOW_PORT`: Server port (default: 8030)
/// - `THREATFLOW_DEBUG`: Enable debug mode (default: false)
/// - `THREATFLOW_SERVER_NAME`: Server name for identification
/// - `THREATFLOW_RUN_TTL_SECONDS`: How long finished runs stay readable (default: 3600)
/// - `THREATFLOW_RUN_SWEEP_INTERVAL`: Seconds between expiry sweeps (default: 60)
/// - `THREATFLOW_SCHEMA_PATH`: Analyzer schema file overriding the bundled one
/// - `THREATFLOW_RULES_PATH`: Verdict rule table overriding the bundled one
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// Server name for identification
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Seconds a run summary is kept before eviction
    #[serde(default = "default_run_ttl")]
    pub run_ttl_seconds: u64,

    /// Run store sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub run_sweep_interval: u64,

    /// Optional analyzer schema file
    #[serde(default)]
    pub schema_path: Option<String>,

    /// Optional verdict rule table file
    #[serde(default)]
    pub rules_path: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8030
}

fn default_server_name() -> String {
    "threatflow-control-plane".to_string()
}

fn default_run_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `THREATFLOW_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("THREATFLOW_").from_env::<AppConfig>()
    }

    /// Get the server bind address as a string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug: false,
            server_name: default_server_name(),
            run_ttl_seconds: default_run_ttl(),
            run_sweep_interval: default_sweep_interval(),
            schema_path: None,
            rules_path: None,
        }
    }
}
