//! Full rebuild of the index behind a snapshot guard.
//!
//! The rebuild is a strict phase sequence: block, snapshot, wipe, reload,
//! unblock. The block is taken first so concurrent invocations abstain, and
//! the snapshot is taken before anything destructive so a failure in any
//! later phase can roll the index back. After a rollback the index is left
//! blocked on purpose; an operator decides when the restored data goes live
//! again.

use super::{iso, skipped_outcome, WorkflowOutcome, NVD_IMAGE};
use crate::error::{Error, Result};
use crate::index::{DateField, IndexStore};
use crate::upstream::{PageFetcher, UpdateStream};
use chrono::{DateTime, Utc};
use nvdmirror_core::{epoch, MessageCard, UpstreamConfig};
use std::fmt;
use tracing::{error, info, warn};

/// Phase of the rebuild sequence, reported when one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Blocking,
    Snapshotting,
    Wiping,
    Reloading,
    Unblocking,
    Recovering,
}

impl fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Blocking => "blocking",
            Self::Snapshotting => "snapshotting",
            Self::Wiping => "wiping",
            Self::Reloading => "reloading",
            Self::Unblocking => "unblocking",
            Self::Recovering => "recovering",
        };
        f.write_str(name)
    }
}

pub(super) async fn run<S, F>(
    store: &S,
    fetcher: &F,
    upstream: &UpstreamConfig,
    repo: &str,
    prior_anchor: DateTime<Utc>,
    exec_ts: DateTime<Utc>,
) -> Result<WorkflowOutcome>
where
    S: IndexStore + Sync,
    F: PageFetcher + Sync,
{
    if store.is_blocked().await? {
        return Ok(skipped_outcome("NVD rebuild", repo, prior_anchor));
    }

    store.block().await?;

    let updated = match guarded(store, fetcher, upstream).await {
        Ok(updated) => updated,
        Err((phase, cause)) => {
            error!(%phase, error = %cause, "rebuild failed, rolling the index back");
            recover(store).await?;
            warn!("index restored from snapshot and left blocked");
            return Err(Error::CatastrophicRebuild {
                phase,
                source: Box::new(cause),
            });
        }
    };

    store.unblock().await?;

    let (_, anchor) = store.latest_by_field(DateField::LastModified).await?;
    let total = store
        .count_in_range(DateField::LastModified, epoch(), Utc::now())
        .await?;
    info!(updated, total, "rebuild complete");

    let card = MessageCard::new(true, "[OK] NVD Rebuild Complete", repo)
        .with_message(format!("Rebuilt the index from scratch with {updated} records"))
        .fact("Timestamp", iso(exec_ts))
        .fact("Updated", updated.to_string())
        .fact("Total", total.to_string())
        .with_image(NVD_IMAGE);

    Ok(WorkflowOutcome { anchor, card })
}

/// The destructive phases, each tagged with its position in the sequence.
/// Returns the final observed upstream total.
async fn guarded<S, F>(
    store: &S,
    fetcher: &F,
    upstream: &UpstreamConfig,
) -> std::result::Result<usize, (RebuildPhase, Error)>
where
    S: IndexStore + Sync,
    F: PageFetcher + Sync,
{
    store
        .snapshot()
        .await
        .map_err(|e| (RebuildPhase::Snapshotting, e))?;
    store.wipe().await.map_err(|e| (RebuildPhase::Wiping, e))?;
    reload(store, fetcher, upstream)
        .await
        .map_err(|e| (RebuildPhase::Reloading, e))
}

/// Pull the complete feed, unbounded by any modified-time window.
async fn reload<S, F>(store: &S, fetcher: &F, upstream: &UpstreamConfig) -> Result<usize>
where
    S: IndexStore + Sync,
    F: PageFetcher + Sync,
{
    let mut stream = UpdateStream::for_config(fetcher, None, upstream);
    let mut updated = 0usize;
    while let Some(page) = stream.next_page().await? {
        if !page.records.is_empty() {
            store.bulk_upsert(&page.records).await?;
        }
        updated = page.total;
    }
    Ok(updated)
}

async fn recover<S: IndexStore + Sync>(store: &S) -> Result<()> {
    store.wipe().await?;
    store.restore_latest_snapshot().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::memory::MemoryIndex;
    use crate::workflow::testing::{record, upstream_config, ScriptedFetcher};
    use nvdmirror_core::epoch;

    fn exec_ts() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_replaces_contents_and_unblocks() {
        let store = MemoryIndex::with_records(vec![record(
            "CVE-2020-9999",
            "2020-01-01T00:00:00.000",
            "2020-01-01T00:00:00.000",
        )]);
        let fetcher = ScriptedFetcher::single_page(vec![
            record("CVE-2024-0001", "2024-01-01T00:00:00.000", "2024-01-05T00:00:00.000"),
            record("CVE-2024-0002", "2024-02-01T00:00:00.000", "2024-02-10T00:00:00.000"),
        ]);

        let outcome = run(
            &store,
            &fetcher,
            &upstream_config(),
            "org/mirror",
            epoch(),
            exec_ts(),
        )
        .await
        .unwrap();

        assert_eq!(store.ids(), ["CVE-2024-0001", "CVE-2024-0002"]);
        assert!(!store.is_blocked().await.unwrap());
        assert_eq!(store.snapshot_count(), 1);
        assert!(outcome.card.success);
        assert_eq!(outcome.anchor.to_rfc3339(), "2024-02-10T00:00:00+00:00");

        // Updated is the final observed upstream total, Total the post-run
        // index count.
        let fact = |name: &str| {
            outcome
                .card
                .facts
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(fact("Updated").as_deref(), Some("2"));
        assert_eq!(fact("Total").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_reload_failure_restores_snapshot_and_stays_blocked() {
        let store = MemoryIndex::with_records(vec![
            record("CVE-2020-0001", "2020-01-01T00:00:00.000", "2020-01-01T00:00:00.000"),
            record("CVE-2020-0002", "2020-02-01T00:00:00.000", "2020-02-01T00:00:00.000"),
        ]);
        let fetcher = ScriptedFetcher::single_page(vec![record(
            "CVE-2024-0001",
            "2024-01-01T00:00:00.000",
            "2024-01-05T00:00:00.000",
        )]);
        store.fail_bulk_upserts();

        let err = run(
            &store,
            &fetcher,
            &upstream_config(),
            "org/mirror",
            epoch(),
            exec_ts(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::CatastrophicRebuild {
                phase: RebuildPhase::Reloading,
                ..
            }
        ));
        // Rolled back to the pre-rebuild contents, left blocked.
        assert_eq!(store.ids(), ["CVE-2020-0001", "CVE-2020-0002"]);
        assert!(store.is_blocked().await.unwrap());
    }

    #[tokio::test]
    async fn test_blocked_index_skips() {
        let store = MemoryIndex::new();
        store.block().await.unwrap();
        let fetcher = ScriptedFetcher::new(Vec::new());

        let prior: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let outcome = run(
            &store,
            &fetcher,
            &upstream_config(),
            "org/mirror",
            prior,
            exec_ts(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.anchor, prior);
        assert!(!outcome.card.success);
        assert_eq!(store.snapshot_count(), 0);
    }

    #[test]
    fn test_phase_display_is_lowercase() {
        assert_eq!(RebuildPhase::Snapshotting.to_string(), "snapshotting");
        assert_eq!(RebuildPhase::Reloading.to_string(), "reloading");
    }
}
