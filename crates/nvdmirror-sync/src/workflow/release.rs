//! Package the feeds and publish them as a versioned release.
//!
//! Feeds are staged into a temporary directory, uploaded in one release, and
//! the release set is pruned down to the newest afterwards. The feed set:
//! one per identifier year, the 8-day `CVE-modified` and `CVE-recent`
//! windows, and the full `CVE-all` dump.

use super::{iso, skipped_outcome, WorkflowOutcome};
use crate::error::Result;
use crate::index::{collect_scan, DateField, IndexStore, Order};
use crate::package::{FeedArtifacts, FeedPackager};
use crate::publish::ReleasePublisher;
use chrono::{DateTime, Datelike, Duration, Utc};
use nvdmirror_core::{epoch, CveRecord, MessageCard, FIRST_CVE_YEAR};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Window of the `CVE-modified` and `CVE-recent` feeds.
const RECENT_WINDOW_DAYS: i64 = 8;

pub(super) async fn run<S, P>(
    store: &S,
    publisher: &P,
    repo: &str,
    compression_level: u32,
    prior_anchor: DateTime<Utc>,
    exec_ts: DateTime<Utc>,
) -> Result<WorkflowOutcome>
where
    S: IndexStore + Sync,
    P: ReleasePublisher + Sync,
{
    if store.is_blocked().await? {
        return Ok(skipped_outcome("Feed release", repo, prior_anchor));
    }

    let stage = tempfile::tempdir()?;
    let packager = FeedPackager::new(stage.path(), repo, compression_level);
    let mut artifacts: Vec<FeedArtifacts> = Vec::new();

    for year in FIRST_CVE_YEAR..=exec_ts.year() {
        let scan = store.scan_year_mod_range(year, epoch(), exec_ts).await?;
        let items = into_items(collect_scan(scan).await?)?;
        debug!(year, records = items.len(), "packaging year feed");
        artifacts.push(packager.create_feed(&format!("CVE-{year}"), items, exec_ts)?);
    }

    let window_start = exec_ts - Duration::days(RECENT_WINDOW_DAYS);
    let modified = store
        .scan_range(
            DateField::LastModified,
            window_start,
            exec_ts,
            "cve.lastModified",
            Order::Asc,
        )
        .await?;
    artifacts.push(packager.create_feed(
        "CVE-modified",
        into_items(collect_scan(modified).await?)?,
        exec_ts,
    )?);

    let recent = store
        .scan_range(
            DateField::Published,
            window_start,
            exec_ts,
            "cve.published",
            Order::Asc,
        )
        .await?;
    artifacts.push(packager.create_feed(
        "CVE-recent",
        into_items(collect_scan(recent).await?)?,
        exec_ts,
    )?);

    let all = store
        .scan_range(
            DateField::Published,
            epoch(),
            exec_ts,
            "cve.published",
            Order::Asc,
        )
        .await?;
    artifacts.push(packager.create_feed(
        "CVE-all",
        into_items(collect_scan(all).await?)?,
        exec_ts,
    )?);

    let assets: Vec<&Path> = artifacts.iter().flat_map(|a| a.paths()).collect();
    let release = publisher.publish(exec_ts, &assets).await?;
    let pruned = publisher.prune_old().await?;
    info!(
        version = %release.version,
        feeds = artifacts.len(),
        pruned,
        "release published"
    );

    let card = MessageCard::new(true, "[OK] Feed Release Published", repo)
        .with_message(format!(
            "Published {} feed archives as {}",
            artifacts.len(),
            release.version
        ))
        .fact("Timestamp", iso(exec_ts))
        .fact("Version", release.version)
        .fact("Commit", release.commit)
        .action_link(
            "Latest Release",
            format!("https://github.com/{repo}/releases/latest"),
        );

    Ok(WorkflowOutcome {
        anchor: exec_ts,
        card,
    })
}

/// Unwrap the records' inner objects for the feed envelope.
fn into_items(records: Vec<CveRecord>) -> Result<Vec<Value>> {
    records
        .iter()
        .map(|record| Ok(record.inner()?.clone()))
        .collect()
}
