//! The four operator-facing workflows.
//!
//! Each workflow reads its time anchor, checks the index block flag, does
//! its work, and reports back as a [`WorkflowOutcome`]: the anchor value to
//! persist and the notification card describing the run. A skipped run (the
//! index was blocked by another invocation) returns its prior anchor
//! unchanged with a warning card; only [`execute`] touches the anchor file
//! and the webhook.

mod mirror;
mod rebuild;
mod release;
mod sync;

pub use rebuild::RebuildPhase;

use crate::error::{Error, Result};
use crate::git::GitCli;
use crate::index::{IndexStore, OpenSearchStore};
use crate::mirror::MirrorTree;
use crate::notify;
use crate::publish::GitHubReleases;
use crate::upstream::NvdApiClient;
use chrono::{DateTime, SecondsFormat, Utc};
use nvdmirror_core::{Config, MessageCard, TimeAnchorStore};
use tracing::info;

/// Card image for workflows reporting on the upstream feed.
const NVD_IMAGE: &str = "https://nvd.nist.gov/site-media/images/general/A_Brief_History.png";

/// The selectable workflows, one per CLI subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    /// Incremental pull of upstream changes into the index.
    Sync,
    /// Full refetch behind a snapshot-guarded wipe.
    Rebuild,
    /// Reconcile the index into the mirror git tree and push.
    UpdateMirror,
    /// Package and publish the compressed bulk feeds.
    Release,
}

impl Workflow {
    /// Name of this workflow's persistent time anchor.
    pub fn anchor_key(self) -> &'static str {
        match self {
            Self::Sync => "sync_nvd",
            Self::Rebuild => "rebuild_nvd",
            Self::UpdateMirror => "update_git_repo",
            Self::Release => "release_git_package",
        }
    }
}

/// What a workflow run produced: the anchor value to persist and the
/// notification card to deliver.
#[derive(Debug)]
pub struct WorkflowOutcome {
    pub anchor: DateTime<Utc>,
    pub card: MessageCard,
}

/// Run one workflow end to end against the configured collaborators.
pub async fn execute(workflow: Workflow, config: &Config) -> Result<()> {
    let mut anchors = TimeAnchorStore::load(&config.time_anchors.path)?;
    let prior_anchor = anchors.get(workflow.anchor_key())?;
    let exec_ts = Utc::now();
    info!(
        workflow = ?workflow,
        prior_anchor = %iso(prior_anchor),
        "starting workflow"
    );

    let store = OpenSearchStore::new(&config.opensearch)?;
    store.create_if_missing().await?;
    let repo = config.github.remote_repository.as_str();

    let outcome = match workflow {
        Workflow::Sync => {
            let client = NvdApiClient::new(&config.nvd)?;
            sync::run(&store, &client, &config.nvd, repo, prior_anchor, exec_ts).await?
        }
        Workflow::Rebuild => {
            let client = NvdApiClient::new(&config.nvd)?;
            rebuild::run(&store, &client, &config.nvd, repo, prior_anchor, exec_ts).await?
        }
        Workflow::UpdateMirror => {
            let remote = GitCli::new(config.github.clone());
            let tree = MirrorTree::new(&config.github.local_repository);
            mirror::run(&store, &remote, &tree, repo, prior_anchor, exec_ts).await?
        }
        Workflow::Release => {
            let token = config.github.personal_access_token.clone().ok_or_else(|| {
                Error::Release("releases need a personal access token".to_string())
            })?;
            let publisher = GitHubReleases::new(repo, config.github.branch.as_str(), token)?;
            release::run(
                &store,
                &publisher,
                repo,
                config.github.compression_level,
                prior_anchor,
                exec_ts,
            )
            .await?
        }
    };

    anchors.set(workflow.anchor_key(), outcome.anchor)?;
    notify::send_card(&config.teams, &outcome.card).await?;
    info!(
        workflow = ?workflow,
        anchor = %iso(outcome.anchor),
        "workflow finished"
    );
    Ok(())
}

/// Outcome of a run skipped because the index is read-blocked.
fn skipped_outcome(workflow_name: &str, repo: &str, prior_anchor: DateTime<Utc>) -> WorkflowOutcome {
    let card = MessageCard::new(
        false,
        format!("[WARNING] {workflow_name} skipped"),
        repo,
    )
    .with_message(format!(
        "{workflow_name} skipped: the index is read-blocked by another invocation"
    ))
    .fact("Timestamp", iso(Utc::now()))
    .with_image(NVD_IMAGE);

    WorkflowOutcome {
        anchor: prior_anchor,
        card,
    }
}

fn iso(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
