//! Incremental synchronization from the upstream feed into the index.
//!
//! The `since` bound comes from the index itself (the highest `lastModified`
//! present), not from the time anchor: whatever the last run managed to
//! write is exactly where this run resumes. An empty index naturally widens
//! the window to everything upstream has.

use super::{iso, skipped_outcome, WorkflowOutcome, NVD_IMAGE};
use crate::error::Result;
use crate::index::{DateField, IndexStore};
use crate::upstream::{PageFetcher, UpdateStream};
use chrono::{DateTime, Utc};
use nvdmirror_core::{epoch, MessageCard, UpstreamConfig};
use tracing::{debug, info};

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
        return Ok(skipped_outcome("NVD sync", repo, prior_anchor));
    }

    let (latest, latest_ts) = store.latest_by_field(DateField::LastModified).await?;
    let since = latest.map(|_| latest_ts);
    match since {
        Some(since) => debug!(since = %iso(since), "incremental sync window"),
        None => debug!("index is empty, pulling the full feed"),
    }

    let mut stream = UpdateStream::for_config(fetcher, since, upstream);
    let mut updated = 0usize;
    while let Some(page) = stream.next_page().await? {
        if !page.records.is_empty() {
            store.bulk_upsert(&page.records).await?;
        }
        updated = page.total;
    }

    // The anchor is what actually landed, re-read from the index.
    let (_, anchor) = store.latest_by_field(DateField::LastModified).await?;
    let total = store
        .count_in_range(DateField::LastModified, epoch(), Utc::now())
        .await?;
    info!(updated, total, "sync complete");

    let card = MessageCard::new(true, "[OK] NVD Sync Complete", repo)
        .with_message(format!("Synchronized {updated} changed records from upstream"))
        .fact("Timestamp", iso(exec_ts))
        .fact("Updated", updated.to_string())
        .fact("Total", total.to_string())
        .with_image(NVD_IMAGE);

    Ok(WorkflowOutcome { anchor, card })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::memory::MemoryIndex;
    use crate::workflow::testing::{record, upstream_config, ScriptedFetcher};
    use crate::upstream::PageResponse;

    fn exec_ts() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn test_full_sync_into_empty_index() {
        let store = MemoryIndex::new();
        let fetcher = ScriptedFetcher::single_page(vec![
            record("CVE-2024-0001", "2024-01-01T00:00:00.000", "2024-01-05T00:00:00.000"),
            record("CVE-2024-0002", "2024-02-01T00:00:00.000", "2024-03-20T08:00:00.000"),
            record("CVE-2024-0003", "2024-02-01T00:00:00.000", "2024-02-02T00:00:00.000"),
            record("CVE-2024-0004", "2024-03-01T00:00:00.000", "2024-03-01T00:00:00.000"),
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

        assert_eq!(store.len(), 4);
        // An empty index means no lower bound on the pull.
        assert_eq!(fetcher.calls.lock().unwrap()[0].1, None);
        // The anchor is the highest lastModified that landed.
        assert_eq!(
            outcome.anchor.to_rfc3339(),
            "2024-03-20T08:00:00+00:00"
        );
        assert!(outcome.card.success);
        let updated = outcome
            .card
            .facts
            .iter()
            .find(|(name, _)| name == "Updated")
            .unwrap();
        assert_eq!(updated.1, "4");
    }

    #[tokio::test]
    async fn test_incremental_sync_uses_index_watermark() {
        let store = MemoryIndex::with_records(vec![record(
            "CVE-2023-1111",
            "2023-01-01T00:00:00.000",
            "2023-06-15T00:00:00.000",
        )]);
        let fetcher = ScriptedFetcher::single_page(vec![record(
            "CVE-2024-0001",
            "2024-01-01T00:00:00.000",
            "2024-01-05T00:00:00.000",
        )]);

        run(
            &store,
            &fetcher,
            &upstream_config(),
            "org/mirror",
            epoch(),
            exec_ts(),
        )
        .await
        .unwrap();

        let since = fetcher.calls.lock().unwrap()[0].1.unwrap();
        assert_eq!(since.to_rfc3339(), "2023-06-15T00:00:00+00:00");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_upstream_window_keeps_anchor() {
        let store = MemoryIndex::with_records(vec![record(
            "CVE-2023-1111",
            "2023-01-01T00:00:00.000",
            "2023-06-15T00:00:00.000",
        )]);
        let fetcher = ScriptedFetcher::new(vec![Ok(PageResponse {
            total_results: 0,
            vulnerabilities: Vec::new(),
        })]);

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

        assert_eq!(outcome.anchor.to_rfc3339(), "2023-06-15T00:00:00+00:00");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_index_skips_without_writes() {
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
        assert_eq!(store.bulk_calls(), 0);
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }
}
