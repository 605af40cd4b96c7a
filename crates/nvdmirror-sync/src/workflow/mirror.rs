//! Reconcile the index into the mirror git tree and push.
//!
//! Records are pulled year by year so no single scan holds the whole feed
//! in memory. Deltas are decided by content digest in `MirrorTree`; the
//! scan window deliberately starts at the epoch rather than the last run's
//! anchor, so a record the previous push missed is picked up the next time
//! regardless of when it changed.

use super::{iso, skipped_outcome, WorkflowOutcome};
use crate::error::Result;
use crate::git::{auto_update_message, MirrorRemote};
use crate::index::{collect_scan, IndexStore};
use crate::mirror::{MirrorTree, RepoCacheDelta};
use chrono::{DateTime, Datelike, Utc};
use nvdmirror_core::{epoch, MessageCard, FIRST_CVE_YEAR};
use tracing::{debug, info};

pub(super) async fn run<S, R>(
    store: &S,
    remote: &R,
    tree: &MirrorTree,
    repo: &str,
    prior_anchor: DateTime<Utc>,
    exec_ts: DateTime<Utc>,
) -> Result<WorkflowOutcome>
where
    S: IndexStore + Sync,
    R: MirrorRemote + Sync,
{
    if store.is_blocked().await? {
        return Ok(skipped_outcome("Mirror update", repo, prior_anchor));
    }

    remote.prepare().await?;
    match remote.last_auto_update().await? {
        Some(commit) => info!(
            hash = %commit.hash,
            timestamp = ?commit.auto_update_timestamp(),
            "last automated mirror commit"
        ),
        None => info!("no automated mirror commit found"),
    }

    let mut deltas: Vec<RepoCacheDelta> = Vec::new();
    let mut written = 0usize;
    for year in FIRST_CVE_YEAR..=exec_ts.year() {
        let scan = store.scan_year_mod_range(year, epoch(), exec_ts).await?;
        let records = collect_scan(scan).await?;
        if records.is_empty() {
            continue;
        }

        let year_deltas = tree.compute_deltas(&records)?;
        written += tree.apply(&year_deltas)?;
        debug!(year, records = year_deltas.len(), written, "reconciled year");
        deltas.extend(year_deltas);
    }

    if written == 0 {
        let head = remote.head_commit().await?;
        info!("mirror tree already current, nothing to push");
        let card = MessageCard::new(true, "[OK] Mirror Already Current", repo)
            .with_message("No record changed since the last push".to_string())
            .fact("Timestamp", iso(exec_ts))
            .fact("Hash", head.hash);
        return Ok(WorkflowOutcome {
            anchor: prior_anchor,
            card,
        });
    }

    tree.write_audit(&deltas)?;
    let commit = remote.commit_and_push(&auto_update_message(exec_ts)).await?;
    let Some(commit) = commit else {
        // Files were written but git saw no change, e.g. line-ending
        // normalization swallowed it. Report as current.
        let head = remote.head_commit().await?;
        let card = MessageCard::new(true, "[OK] Mirror Already Current", repo)
            .with_message("No record changed since the last push".to_string())
            .fact("Timestamp", iso(exec_ts))
            .fact("Hash", head.hash);
        return Ok(WorkflowOutcome {
            anchor: prior_anchor,
            card,
        });
    };

    info!(written, hash = %commit.hash, "pushed mirror update");
    let card = MessageCard::new(true, "[OK] Mirror Updated", repo)
        .with_message(format!("Pushed {written} new or changed record files"))
        .fact("Timestamp", iso(exec_ts))
        .fact("Author", commit.author)
        .fact("Message", commit.message)
        .fact("Hash", commit.hash)
        .action_link(
            "Latest Release",
            format!("https://github.com/{repo}/releases/latest"),
        );

    Ok(WorkflowOutcome {
        anchor: exec_ts,
        card,
    })
}
