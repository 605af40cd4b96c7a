//! Application configuration.
//!
//! Configuration is deserialized once from a JSON file at a CLI-given path
//! and passed by reference into every component. There is no global
//! configuration state and no hidden re-read.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, one section per collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Upstream vulnerability API.
    pub nvd: UpstreamConfig,

    /// Search index cluster.
    pub opensearch: IndexConfig,

    /// Mirror repository and release hosting.
    pub github: MirrorConfig,

    /// Outcome notifications.
    pub teams: NotifyConfig,

    /// Time anchor persistence.
    pub time_anchors: TimeAnchorConfig,
}

/// Upstream API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// API endpoint, e.g. `https://services.nvd.nist.gov/rest/json/cves/2.0`.
    pub endpoint: String,

    /// Optional API key sent as the `apiKey` request header.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Rate limit window length in seconds.
    pub throttle_window_size: u64,

    /// Requests permitted per window.
    pub throttle_window_request_limit: u64,
}

impl UpstreamConfig {
    /// Post-page sleep honoring the upstream rate policy.
    pub fn throttle(&self) -> Duration {
        Duration::from_secs_f64(
            self.throttle_window_size as f64 / self.throttle_window_request_limit.max(1) as f64,
        )
    }
}

/// Search index cluster settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the cluster, e.g. `https://localhost:9200`.
    pub url: String,

    /// Basic auth user.
    pub username: String,

    /// Basic auth password.
    pub password: String,

    /// Collection (index) name holding the records.
    pub index: String,

    /// Page size for scroll queries.
    #[serde(default = "default_scroll_size")]
    pub scroll_size: u32,

    /// Scroll cursor keepalive, e.g. `10m`.
    #[serde(default = "default_scroll_keepalive")]
    pub scroll_keepalive: String,

    /// Filesystem location for the snapshot repository on the cluster.
    pub snapshot_location: String,

    /// Verify TLS certificates (disable for self-signed dev clusters).
    #[serde(default = "default_true")]
    pub verify_certs: bool,
}

fn default_true() -> bool {
    true
}

fn default_scroll_size() -> u32 {
    500
}

fn default_scroll_keepalive() -> String {
    "10m".to_string()
}

/// Mirror repository and release settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Remote repository in `owner/name` form.
    pub remote_repository: String,

    /// Local working copy path.
    pub local_repository: PathBuf,

    /// Target branch for mirror commits and release tags.
    pub branch: String,

    /// SSH deploy key for pushes; HTTPS token auth is used when unset.
    #[serde(default)]
    pub deploy_key_path: Option<PathBuf>,

    /// Token for the release hosting API.
    #[serde(default)]
    pub personal_access_token: Option<String>,

    /// gzip level for feed archives (0-9).
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

fn default_compression_level() -> u32 {
    9
}

/// Notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Whether outcome cards are delivered at all.
    pub enabled: bool,

    /// Webhook URL receiving the rendered cards.
    #[serde(default)]
    pub connector_url: String,
}

/// Time anchor persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeAnchorConfig {
    /// Path of the anchor JSON file.
    pub path: PathBuf,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "reading configuration");

        let raw = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read '{}': {e}", path.display()))
        })?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse '{}': {e}", path.display())))?;

        tracing::info!(
            endpoint = %config.nvd.endpoint,
            index = %config.opensearch.index,
            repo = %config.github.remote_repository,
            branch = %config.github.branch,
            notifications = config.teams.enabled,
            "configuration loaded"
        );

        Ok(config)
    }
}
