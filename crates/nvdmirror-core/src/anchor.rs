//! Persistent per-workflow time anchors.
//!
//! Each workflow (sync, rebuild, mirror update, release) stores the
//! timestamp of its last successful run in a small JSON file. The anchor is
//! read before a run and written only after the workflow has advanced its
//! data; a skipped or failed run never moves it.
//!
//! The file is created with epoch defaults when missing, so every known
//! anchor name always resolves to a valid timestamp.

use crate::error::{Error, Result};
use crate::{epoch, record::parse_nvd_timestamp};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The set of known anchor names. `get`/`set` on any other name is an error.
pub const ANCHOR_NAMES: &[&str] = &[
    "sync_nvd",
    "rebuild_nvd",
    "update_git_repo",
    "release_git_package",
];

/// File-backed store of workflow-name → last-successful-run timestamp.
pub struct TimeAnchorStore {
    path: PathBuf,
    anchors: BTreeMap<String, String>,
}

impl TimeAnchorStore {
    /// Load the anchor file, creating it with epoch defaults when absent.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "time anchor file does not exist, creating with epoch defaults"
            );
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let defaults: BTreeMap<String, String> = ANCHOR_NAMES
                .iter()
                .map(|name| (name.to_string(), iso(epoch())))
                .collect();
            fs::write(&path, serde_json::to_string_pretty(&defaults)?)?;
        }

        tracing::debug!(path = %path.display(), "loading time anchors");
        let anchors: BTreeMap<String, String> = serde_json::from_str(&fs::read_to_string(&path)?)?;

        Ok(Self { path, anchors })
    }

    /// Read the anchor for a workflow name.
    pub fn get(&self, name: &str) -> Result<DateTime<Utc>> {
        let raw = self
            .anchors
            .get(name)
            .ok_or_else(|| Error::UnknownAnchor(name.to_string()))?;
        parse_nvd_timestamp(raw)
    }

    /// Write the anchor for a workflow name and persist the file.
    ///
    /// An unknown name fails without mutating or persisting anything.
    pub fn set(&mut self, name: &str, value: DateTime<Utc>) -> Result<()> {
        if !self.anchors.contains_key(name) {
            return Err(Error::UnknownAnchor(name.to_string()));
        }
        self.anchors.insert(name.to_string(), iso(value));
        self.save()
    }

    fn save(&self) -> Result<()> {
        tracing::debug!(path = %self.path.display(), "saving time anchors");
        fs::write(&self.path, serde_json::to_string_pretty(&self.anchors)?)?;
        Ok(())
    }
}

fn iso(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
