//! Versioned release publishing.
//!
//! Feed archives are attached to a release on the mirror repository, tagged
//! from the run timestamp. Only the newest release is kept; older ones and
//! their tags are pruned after a successful publish so consumers always find
//! the full feed set in one place.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info, warn};

const API_ROOT: &str = "https://api.github.com";
const UPLOAD_ROOT: &str = "https://uploads.github.com";
const USER_AGENT: &str = concat!("nvdmirror/", env!("CARGO_PKG_VERSION"));

/// Tag for a release cut at `timestamp`.
pub fn version_tag(timestamp: DateTime<Utc>) -> String {
    timestamp.format("v%Y.%m.%d-%H%M%S").to_string()
}

/// The identity of a published release.
#[derive(Debug, Clone)]
pub struct PublishedRelease {
    pub version: String,
    pub commit: String,
}

/// Publishing seam for the release workflow.
#[async_trait]
pub trait ReleasePublisher {
    /// Create a tagged release at the branch head and upload `assets` to it.
    async fn publish(
        &self,
        timestamp: DateTime<Utc>,
        assets: &[&Path],
    ) -> Result<PublishedRelease>;

    /// Delete every release and tag except the newest. Returns how many
    /// were removed.
    async fn prune_old(&self) -> Result<usize>;
}

/// [`ReleasePublisher`] over the GitHub REST API.
pub struct GitHubReleases {
    http: reqwest::Client,
    repo: String,
    branch: String,
    token: String,
}

impl GitHubReleases {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(600))
            .build()?;
        Ok(Self {
            http,
            repo: repo.into(),
            branch: branch.into(),
            token: token.into(),
        })
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
    }

    async fn api(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let context = format!("{method} {path}");
        let mut request = self.request(method, format!("{API_ROOT}/repos/{}/{path}", self.repo));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Release(format!("{context} returned {status}: {text}")));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn upload_asset(&self, release_id: u64, asset: &Path) -> Result<()> {
        let name = asset
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Release(format!("asset has no file name: {}", asset.display())))?;
        let bytes = tokio::fs::read(asset).await?;

        debug!(asset = name, bytes = bytes.len(), "uploading release asset");
        let url = format!(
            "{UPLOAD_ROOT}/repos/{}/releases/{release_id}/assets?name={name}",
            self.repo
        );
        let response = self
            .request(reqwest::Method::POST, url)
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Release(format!(
                "uploading '{name}' returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ReleasePublisher for GitHubReleases {
    async fn publish(
        &self,
        timestamp: DateTime<Utc>,
        assets: &[&Path],
    ) -> Result<PublishedRelease> {
        let branch = self
            .api(
                reqwest::Method::GET,
                &format!("branches/{}", self.branch),
                None,
            )
            .await?;
        let commit = branch
            .pointer("/commit/sha")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Release("branch response has no commit sha".to_string()))?
            .to_string();

        let version = version_tag(timestamp);
        self.api(
            reqwest::Method::POST,
            "git/refs",
            Some(&json!({ "ref": format!("refs/tags/{version}"), "sha": commit })),
        )
        .await?;

        let release = self
            .api(
                reqwest::Method::POST,
                "releases",
                Some(&json!({
                    "tag_name": version,
                    "name": version,
                    "body": format!("Automated feed release {version}"),
                    "target_commitish": self.branch,
                })),
            )
            .await?;
        let release_id = release
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Release("release response has no id".to_string()))?;

        for asset in assets {
            self.upload_asset(release_id, asset).await?;
        }

        info!(version = %version, commit = %commit, assets = assets.len(), "published release");
        Ok(PublishedRelease { version, commit })
    }

    async fn prune_old(&self) -> Result<usize> {
        let releases = self
            .api(reqwest::Method::GET, "releases?per_page=100", None)
            .await?;
        let releases = releases
            .as_array()
            .cloned()
            .unwrap_or_default();

        // The listing is newest-first; everything after the head is stale.
        let mut pruned = 0;
        for release in releases.iter().skip(1) {
            let Some(id) = release.get("id").and_then(Value::as_u64) else {
                continue;
            };
            let tag = release.get("tag_name").and_then(Value::as_str);

            self.api(reqwest::Method::DELETE, &format!("releases/{id}"), None)
                .await?;
            if let Some(tag) = tag {
                if let Err(e) = self
                    .api(
                        reqwest::Method::DELETE,
                        &format!("git/refs/tags/{tag}"),
                        None,
                    )
                    .await
                {
                    warn!(tag, error = %e, "failed to delete stale tag");
                }
            }
            pruned += 1;
        }

        if pruned > 0 {
            info!(pruned, "removed stale releases");
        }
        Ok(pruned)
    }
}
