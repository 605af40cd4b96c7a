//! Upstream vulnerability API polling.
//!
//! The upstream API serves records in pages addressed by a zero-based start
//! offset. [`UpdateStream`] drives the paging protocol: it re-reads the
//! total-available count from every response (the upstream is live and the
//! total may move between calls), retries transient failures against a fixed
//! budget with a fixed backoff, and sleeps between pages to honor the
//! upstream rate policy.
//!
//! The stream is finite and non-restartable: it terminates once the running
//! fetched count reaches the last observed total, and there is no resume
//! cursor beyond the `since` bound; a failed run starts over from the
//! beginning.
//!
//! # Failure classes
//!
//! - Not-found/auth responses signal misconfigured credentials and abort the
//!   whole sequence immediately, with zero retries.
//! - Any other non-success response (or transport error) is retried up to
//!   [`RETRY_BUDGET`] times with [`DEFAULT_BACKOFF`] between attempts; the
//!   counter resets after each successful page.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use nvdmirror_core::{CveRecord, UpstreamConfig};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Retries permitted per page before the sequence is abandoned.
pub const RETRY_BUDGET: u32 = 3;

/// Delay between retry attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(30);

/// One raw page as returned by the upstream API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    /// Total records matching the query at response time.
    pub total_results: usize,

    /// The records in this page.
    #[serde(default)]
    pub vulnerabilities: Vec<CveRecord>,
}

/// A page yielded by [`UpdateStream`], with running progress counts.
#[derive(Debug, Clone)]
pub struct Page {
    /// Records in this batch (may be empty).
    pub records: Vec<CveRecord>,

    /// Records fetched so far, including this batch.
    pub fetched: usize,

    /// Total available as observed on this response.
    pub total: usize,
}

/// Classified failure of a single page request.
#[derive(Debug)]
pub enum FetchError {
    /// Not-found/auth class response; never retried.
    Fatal { status: u16 },

    /// Any other failure; retried against the budget.
    Retryable {
        status: Option<u16>,
        message: String,
    },
}

/// One page request against the upstream API.
#[async_trait]
pub trait PageFetcher {
    /// Fetch the page starting at `start_index`. When `since` is given the
    /// query is bounded by the modified-time window `[since, now)`.
    async fn fetch_page(
        &self,
        start_index: usize,
        since: Option<DateTime<Utc>>,
    ) -> std::result::Result<PageResponse, FetchError>;
}

/// reqwest-backed fetcher for the NVD 2.0 REST API.
pub struct NvdApiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl NvdApiClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        debug!(endpoint = %config.endpoint, "connecting to upstream vulnerability API");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|key| !key.is_empty()),
        })
    }
}

#[async_trait]
impl PageFetcher for NvdApiClient {
    async fn fetch_page(
        &self,
        start_index: usize,
        since: Option<DateTime<Utc>>,
    ) -> std::result::Result<PageResponse, FetchError> {
        let mut query: Vec<(&str, String)> = vec![("startIndex", start_index.to_string())];
        if let Some(since) = since {
            // End bound is now-at-call-time, re-evaluated for every page.
            query.push(("lastModStartDate", iso(since)));
            query.push(("lastModEndDate", iso(Utc::now())));
        }
        debug!(?query, "new request to upstream vulnerability API");

        let mut request = self.http.get(&self.endpoint).query(&query);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await.map_err(|e| FetchError::Retryable {
            status: None,
            message: e.to_string(),
        })?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(FetchError::Fatal {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Retryable {
                status: Some(status.as_u16()),
                message: format!("upstream returned status {status}"),
            });
        }

        response
            .json::<PageResponse>()
            .await
            .map_err(|e| FetchError::Retryable {
                status: None,
                message: format!("malformed upstream body: {e}"),
            })
    }
}

fn iso(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Finite, non-restartable stream of upstream pages.
pub struct UpdateStream<'a, F: PageFetcher> {
    fetcher: &'a F,
    since: Option<DateTime<Utc>>,
    fetched: usize,
    total: usize,
    retries: u32,
    backoff: Duration,
    throttle: Duration,
    done: bool,
}

impl<'a, F: PageFetcher> UpdateStream<'a, F> {
    /// A stream with explicit backoff and throttle delays (tests pass zero).
    pub fn new(
        fetcher: &'a F,
        since: Option<DateTime<Utc>>,
        backoff: Duration,
        throttle: Duration,
    ) -> Self {
        Self {
            fetcher,
            since,
            fetched: 0,
            // Sentinel so the first request always goes out; replaced by the
            // observed total on every successful page.
            total: 1,
            retries: 0,
            backoff,
            throttle,
            done: false,
        }
    }

    /// A stream using the configured throttle window and default backoff.
    pub fn for_config(
        fetcher: &'a F,
        since: Option<DateTime<Utc>>,
        config: &UpstreamConfig,
    ) -> Self {
        Self::new(fetcher, since, DEFAULT_BACKOFF, config.throttle())
    }

    /// Fetch the next page, or `None` once the sequence has terminated.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.done {
            return Ok(None);
        }

        loop {
            match self.fetcher.fetch_page(self.fetched, self.since).await {
                Ok(response) => {
                    self.retries = 0;
                    self.total = response.total_results;
                    self.fetched += response.vulnerabilities.len();
                    debug!(
                        batch = response.vulnerabilities.len(),
                        fetched = self.fetched,
                        total = self.total,
                        "retrieved page from upstream"
                    );

                    if self.fetched >= self.total {
                        self.done = true;
                    }

                    // Rate policy applies to every request that got a
                    // response, empty pages included.
                    tokio::time::sleep(self.throttle).await;

                    return Ok(Some(Page {
                        records: response.vulnerabilities,
                        fetched: self.fetched,
                        total: self.total,
                    }));
                }
                Err(FetchError::Fatal { status }) => {
                    self.done = true;
                    return Err(Error::UpstreamUnavailable {
                        status: Some(status),
                        retries: 0,
                    });
                }
                Err(FetchError::Retryable { status, message }) => {
                    if self.retries >= RETRY_BUDGET {
                        self.done = true;
                        return Err(Error::UpstreamUnavailable {
                            status,
                            retries: self.retries,
                        });
                    }
                    warn!(
                        status = ?status,
                        retry = self.retries,
                        "upstream request failed: {message}; backing off"
                    );
                    tokio::time::sleep(self.backoff).await;
                    self.retries += 1;
                }
            }
        }
    }
}
