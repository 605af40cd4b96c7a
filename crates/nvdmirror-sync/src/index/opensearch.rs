//! OpenSearch-backed index store.
//!
//! Talks to the cluster's REST API directly: index settings for the
//! lifecycle block flag, `_snapshot` for backups, `_bulk` for batched
//! upserts, `_count`/`_search` for queries, and the scroll API for lazy
//! bulk scans.
//!
//! Documents are the upstream envelope shape (`{"cve": {...}}`), so query
//! fields are addressed as `cve.published`, `cve.lastModified`, `cve.id`.

use super::{DateField, IndexStore, Order, RecordScan};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use nvdmirror_core::{epoch, CveRecord, IndexConfig};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Index store over the OpenSearch REST API.
#[derive(Clone)]
pub struct OpenSearchStore {
    http: reqwest::Client,
    base: String,
    index: String,
    username: String,
    password: String,
    scroll_size: u32,
    scroll_keepalive: String,
    snapshot_location: String,
}

impl OpenSearchStore {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        debug!(url = %config.url, index = %config.index, "connecting to index cluster");
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(360))
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()?;

        Ok(Self {
            http,
            base: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            scroll_size: config.scroll_size,
            scroll_keepalive: config.scroll_keepalive.clone(),
            snapshot_location: config.snapshot_location.clone(),
        })
    }

    fn snapshot_repo(&self) -> String {
        format!("{}-snapshots", self.index)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}/{path}", self.base))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Send and require a success status, folding the response body into the
    /// error for diagnosis.
    async fn send_ok(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let context = format!("{method} {path}");
        let response = self.send(method, path, body).await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Index(format!("{context} returned {status}: {body}")));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn close_index(&self) -> Result<()> {
        self.send_ok(Method::POST, &format!("{}/_close", self.index), None)
            .await?;
        Ok(())
    }

    async fn open_index(&self) -> Result<()> {
        self.send_ok(Method::POST, &format!("{}/_open", self.index), None)
            .await?;
        Ok(())
    }

    async fn set_read_block(&self, blocked: bool) -> Result<()> {
        let body = json!({ "index.blocks.read": blocked.to_string() });
        self.send_ok(
            Method::PUT,
            &format!("{}/_settings", self.index),
            Some(&body),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IndexStore for OpenSearchStore {
    type Scan = ScrollScan;

    async fn is_blocked(&self) -> Result<bool> {
        let response = self
            .send(Method::GET, &format!("{}/_settings", self.index), None)
            .await?;

        match response.status() {
            // Fail closed: if we may not read the flag, treat it as set.
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Ok(true),
            StatusCode::NOT_FOUND => return Ok(false),
            status if !status.is_success() => {
                return Err(Error::Index(format!(
                    "reading index settings returned {status}"
                )))
            }
            _ => {}
        }

        let settings: Value = response.json().await?;
        let state = settings
            .get(&self.index)
            .and_then(|v| v.pointer("/settings/index/blocks/read"))
            .and_then(Value::as_str)
            .unwrap_or("false");

        debug!(index = %self.index, state, "index blocking state");
        Ok(state == "true")
    }

    async fn block(&self) -> Result<()> {
        self.set_read_block(true).await
    }

    async fn unblock(&self) -> Result<()> {
        self.set_read_block(false).await
    }

    async fn create_if_missing(&self) -> Result<()> {
        if self.is_blocked().await? {
            return Ok(());
        }

        let response = self.send(Method::PUT, &self.index, None).await?;
        let status = response.status();
        if status.is_success() {
            info!(index = %self.index, "created index");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(Error::Index(format!(
            "creating index '{}' returned {status}: {body}",
            self.index
        )))
    }

    async fn snapshot(&self) -> Result<()> {
        let repo = self.snapshot_repo();
        let name = Utc::now().timestamp().to_string();

        let repo_body = json!({
            "type": "fs",
            "settings": { "location": format!("{}/{repo}", self.snapshot_location) },
        });
        self.send_ok(Method::PUT, &format!("_snapshot/{repo}"), Some(&repo_body))
            .await?;

        debug!(snapshot = %name, index = %self.index, repo = %repo, "creating snapshot");
        let body = json!({ "indices": self.index });
        self.send_ok(
            Method::PUT,
            &format!("_snapshot/{repo}/{name}?wait_for_completion=true"),
            Some(&body),
        )
        .await?;

        self.send_ok(Method::POST, &format!("_snapshot/{repo}/_cleanup"), None)
            .await?;
        Ok(())
    }

    async fn restore_latest_snapshot(&self) -> Result<()> {
        let repo = self.snapshot_repo();
        let listing = self
            .send_ok(Method::GET, &format!("_snapshot/{repo}/_all"), None)
            .await?;

        let latest = select_latest_snapshot(&listing, &self.index).ok_or_else(|| {
            Error::Index(format!(
                "no snapshot covering index '{}' found in repository '{repo}'",
                self.index
            ))
        })?;

        debug!(snapshot = %latest, index = %self.index, repo = %repo, "restoring snapshot");
        self.unblock().await?;
        self.close_index().await?;
        let body = json!({ "indices": self.index });
        self.send_ok(
            Method::POST,
            &format!("_snapshot/{repo}/{latest}/_restore?wait_for_completion=true"),
            Some(&body),
        )
        .await?;
        self.unblock().await?;
        self.open_index().await?;
        // Rebuild-safe state: a freshly restored index stays blocked until
        // an operator (or the success path) releases it.
        self.block().await
    }

    async fn wipe(&self) -> Result<()> {
        self.unblock().await?;
        self.close_index().await?;
        self.send_ok(Method::DELETE, &self.index, None).await?;
        debug!(index = %self.index, "removed index for recreation");
        self.create_if_missing().await?;
        self.block().await
    }

    async fn upsert(&self, record: &CveRecord) -> Result<()> {
        let id = record.id()?.to_string();
        info!(id = %id, "pushing single record to index");
        self.send_ok(
            Method::PUT,
            &format!("{}/_doc/{id}", self.index),
            Some(record.document()),
        )
        .await?;
        Ok(())
    }

    async fn bulk_upsert(&self, records: &[CveRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut payload = String::new();
        for record in records {
            let action = json!({ "index": { "_index": self.index, "_id": record.id()? } });
            payload.push_str(&action.to_string());
            payload.push('\n');
            payload.push_str(&serde_json::to_string(record.document())?);
            payload.push('\n');
        }

        // refresh=wait_for so a reconciliation pass right after a sync sees
        // the fresh documents.
        let response = self
            .request(Method::POST, "_bulk?refresh=wait_for")
            .header("content-type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() || body.get("errors").and_then(Value::as_bool) == Some(true) {
            return Err(Error::Index(format!(
                "bulk upsert returned {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn count_in_range(
        &self,
        field: DateField,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<u64> {
        let query = json!({ "query": range_clause(field, start, stop) });
        let response = self
            .send_ok(Method::POST, &format!("{}/_count", self.index), Some(&query))
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Index("count response has no 'count' field".to_string()))
    }

    async fn latest_by_field(
        &self,
        field: DateField,
    ) -> Result<(Option<CveRecord>, DateTime<Utc>)> {
        let query = json!({
            "sort": [ { format!("cve.{}", field.as_str()): { "order": "desc" } } ],
        });

        debug!(field = field.as_str(), "querying latest record");
        let response = self
            .send(
                Method::POST,
                &format!("{}/_search?size=1", self.index),
                Some(&query),
            )
            .await?;

        let status = response.status();
        if status.is_client_error() {
            // Query-shape errors on an unseeded index are a recoverable
            // empty-state, not a fault.
            debug!(
                field = field.as_str(),
                %status,
                "latest-record query rejected, treating as empty index"
            );
            return Ok((None, epoch()));
        }
        if !status.is_success() {
            return Err(Error::Index(format!("latest-record query returned {status}")));
        }

        let body: Value = response.json().await?;
        let Some(source) = body.pointer("/hits/hits/0/_source") else {
            debug!(field = field.as_str(), "result set is empty, defaulting to epoch");
            return Ok((None, epoch()));
        };

        let record = CveRecord::new(source.clone());
        let timestamp = match field {
            DateField::Published => record.published()?,
            DateField::LastModified => record.last_modified()?,
        };
        Ok((Some(record), timestamp))
    }

    async fn scan_range(
        &self,
        field: DateField,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        sort_field: &str,
        order: Order,
    ) -> Result<Self::Scan> {
        let query = json!({
            "query": range_clause(field, start, stop),
            "sort": [ { sort_field: { "order": order.as_str() } } ],
        });
        Ok(ScrollScan::new(self.clone(), query))
    }

    async fn scan_year_mod_range(
        &self,
        year: i32,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Self::Scan> {
        let query = json!({
            "query": {
                "bool": {
                    "must": [
                        { "match_phrase_prefix": { "cve.id": format!("CVE-{year}") } },
                        range_clause(DateField::LastModified, start, stop),
                    ],
                }
            },
            "sort": [ { "cve.lastModified": { "order": "asc" } } ],
        });
        Ok(ScrollScan::new(self.clone(), query))
    }
}

/// Inclusive range clause on a record date field.
fn range_clause(field: DateField, start: DateTime<Utc>, stop: DateTime<Utc>) -> Value {
    json!({
        "range": {
            format!("cve.{}", field.as_str()): {
                "gte": iso(start),
                "lte": iso(stop),
            }
        }
    })
}

fn iso(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Pick the snapshot to restore: the greatest epoch-second name among
/// snapshots covering `index`. Names that do not parse as integers are
/// skipped (never treated as candidates).
fn select_latest_snapshot(listing: &Value, index: &str) -> Option<String> {
    let mut latest: Option<i64> = None;

    for snap in listing.get("snapshots")?.as_array()? {
        let covers_index = snap
            .get("indices")
            .and_then(Value::as_array)
            .is_some_and(|indices| indices.iter().any(|i| i.as_str() == Some(index)));
        if !covers_index {
            continue;
        }

        let Some(name) = snap.get("snapshot").and_then(Value::as_str) else {
            warn!("skipping snapshot listing entry without a name");
            continue;
        };
        match name.parse::<i64>() {
            Ok(ts) => latest = Some(latest.map_or(ts, |prev| prev.max(ts))),
            Err(_) => {
                warn!(snapshot = name, "skipping snapshot with non-numeric name");
            }
        }
    }

    latest.map(|ts| ts.to_string())
}

/// Scroll-API-backed lazy record scan.
///
/// The first `next_batch` opens the scroll cursor; an empty page (or an
/// explicit `close`) releases it server-side.
pub struct ScrollScan {
    store: OpenSearchStore,
    query: Value,
    scroll_id: Option<String>,
    opened: bool,
    done: bool,
}

impl ScrollScan {
    fn new(store: OpenSearchStore, query: Value) -> Self {
        Self {
            store,
            query,
            scroll_id: None,
            opened: false,
            done: false,
        }
    }
}

#[async_trait]
impl RecordScan for ScrollScan {
    async fn next_batch(&mut self) -> Result<Option<Vec<CveRecord>>> {
        if self.done {
            return Ok(None);
        }

        let result = if !self.opened {
            self.opened = true;
            let path = format!(
                "{}/_search?scroll={}&size={}",
                self.store.index, self.store.scroll_keepalive, self.store.scroll_size
            );
            self.store.send_ok(Method::POST, &path, Some(&self.query)).await?
        } else {
            let body = json!({
                "scroll": self.store.scroll_keepalive,
                "scroll_id": self.scroll_id,
            });
            self.store
                .send_ok(Method::POST, "_search/scroll", Some(&body))
                .await?
        };

        // The server may assign a new scroll id on any page; once it does,
        // continuation requests must use it.
        if let Some(id) = result.get("_scroll_id").and_then(Value::as_str) {
            self.scroll_id = Some(id.to_string());
        }

        let hits = result
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if hits.is_empty() {
            self.close().await?;
            return Ok(None);
        }

        let records = hits
            .into_iter()
            .filter_map(|hit| hit.get("_source").cloned())
            .map(CveRecord::new)
            .collect();
        Ok(Some(records))
    }

    async fn close(&mut self) -> Result<()> {
        self.done = true;
        if let Some(id) = self.scroll_id.take() {
            let body = json!({ "scroll_id": id });
            if let Err(e) = self
                .store
                .send_ok(Method::DELETE, "_search/scroll", Some(&body))
                .await
            {
                warn!(error = %e, "failed to release scroll cursor");
            }
        }
        Ok(())
    }
}
