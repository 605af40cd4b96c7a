//! CLI entry point for the NVD mirror bot.

use anyhow::Result;
use clap::{Parser, Subcommand};
use nvdmirror_core::Config;
use nvdmirror_sync::{execute, notify, Workflow};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nvdmirror", version, about = "Sync-indexed mirror of the NVD CVE feed")]
struct Cli {
    /// Path of the JSON configuration file.
    #[arg(short, long, default_value = "data/config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull upstream changes into the index.
    Sync,
    /// Rebuild the index from scratch behind a snapshot guard.
    Rebuild,
    /// Reconcile the index into the mirror git tree and push.
    UpdateMirror,
    /// Package and publish the compressed bulk feeds.
    Release,
}

impl Command {
    fn workflow(&self) -> Workflow {
        match self {
            Self::Sync => Workflow::Sync,
            Self::Rebuild => Workflow::Rebuild,
            Self::UpdateMirror => Workflow::UpdateMirror,
            Self::Release => Workflow::Release,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nvdmirror_sync=debug,nvdmirror_core=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let workflow = cli.command.workflow();

    if let Err(e) = execute(workflow, &config).await {
        error!(workflow = ?workflow, error = %e, "workflow failed");
        // Failures are reported out-of-band too, best effort.
        let detail = format!("{workflow:?}: {e}");
        if let Err(notify_err) = notify::send_failure(
            &config.teams,
            &config.github.remote_repository,
            &detail,
        )
        .await
        {
            error!(error = %notify_err, "could not deliver failure notification");
        }
        return Err(e.into());
    }

    Ok(())
}
