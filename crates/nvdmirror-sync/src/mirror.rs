//! Mirror tree store and content-addressed delta reconciler.
//!
//! The mirror is a git working tree with one pretty-printed JSON file per
//! record, bucketed by identifier (see `nvdmirror_core::paths`). Deltas
//! between the index and the tree are decided purely by content digest:
//! SHA-256 over the canonical serialized form on both sides. A record whose
//! file is absent compares against the digest of `{}`, so "new" falls out of
//! the same comparison as "changed".

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use nvdmirror_core::{epoch, record_json_path, CveRecord, EMPTY_OBJECT_DIGEST};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the audit trail file written at the tree root on every push.
const AUDIT_FILE: &str = "_state.csv";

/// One record's reconciliation result against the mirror tree.
#[derive(Debug, Clone)]
pub struct RepoCacheDelta {
    pub id: String,
    pub record: CveRecord,
    /// No mirror file existed for this identifier.
    pub new: bool,
    /// The index digest differs from the mirror digest.
    pub changed: bool,
    pub mirror_hash: String,
    pub index_hash: String,
    pub mirror_last_modified: DateTime<Utc>,
    pub index_last_modified: DateTime<Utc>,
}

impl RepoCacheDelta {
    /// Whether this delta requires a write to the tree.
    pub fn dirty(&self) -> bool {
        self.new || self.changed
    }
}

/// Read/write access to the per-record files of the mirror working tree.
pub struct MirrorTree {
    root: PathBuf,
}

impl MirrorTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, id: &str) -> PathBuf {
        record_json_path(id, &self.root)
    }

    /// Load one record's file, if present.
    pub fn read(&self, id: &str) -> Result<Option<CveRecord>> {
        let path = self.file_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let inner: Value = serde_json::from_str(&raw)?;
        Ok(Some(CveRecord::from_inner(inner)))
    }

    /// Write one record's canonical form, creating its bucket directory.
    pub fn write(&self, record: &CveRecord) -> Result<()> {
        let path = self.file_path(record.id()?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, record.canonical_json()?)?;
        debug!(path = %path.display(), "wrote mirror file");
        Ok(())
    }

    /// Reconcile one index record against its mirror file.
    ///
    /// The mirror side is re-serialized to canonical form before hashing, so
    /// cosmetic differences in the stored file (key order, whitespace) never
    /// register as a change.
    pub fn delta_for(&self, record: &CveRecord) -> Result<RepoCacheDelta> {
        let id = record.id()?.to_string();
        let index_hash = record.digest()?;
        let index_last_modified = record.last_modified()?;

        let (new, mirror_hash, mirror_last_modified) = match self.read(&id)? {
            Some(existing) => {
                let hash = existing.digest()?;
                let modified = match existing.last_modified() {
                    Ok(ts) => ts,
                    Err(e) => {
                        warn!(id = %id, error = %e, "mirror file has no usable lastModified");
                        epoch()
                    }
                };
                (false, hash, modified)
            }
            None => (true, EMPTY_OBJECT_DIGEST.to_string(), epoch()),
        };

        // Pure digest comparison: an absent file carries the "{}" sentinel
        // digest, so a new record is always also changed.
        let changed = mirror_hash != index_hash;
        Ok(RepoCacheDelta {
            id,
            record: record.clone(),
            new,
            changed,
            mirror_hash,
            index_hash,
            mirror_last_modified,
            index_last_modified,
        })
    }

    /// Reconcile a batch of index records, ordered by identifier.
    pub fn compute_deltas(&self, records: &[CveRecord]) -> Result<Vec<RepoCacheDelta>> {
        let mut deltas = records
            .iter()
            .map(|record| self.delta_for(record))
            .collect::<Result<Vec<_>>>()?;
        deltas.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(deltas)
    }

    /// Write the dirty records of `deltas` to the tree. Returns how many
    /// files were written.
    pub fn apply(&self, deltas: &[RepoCacheDelta]) -> Result<usize> {
        let mut written = 0;
        for delta in deltas.iter().filter(|d| d.dirty()) {
            self.write(&delta.record)?;
            written += 1;
        }
        Ok(written)
    }

    /// Overwrite the audit trail file from the full delta listing.
    pub fn write_audit(&self, deltas: &[RepoCacheDelta]) -> Result<()> {
        let mut csv = String::from("cve,new,changed,sha256,lastModifiedNVD\n");
        for delta in deltas {
            csv.push_str(&format!(
                "{},{},{},{},{}\n",
                delta.id,
                u8::from(delta.new),
                u8::from(delta.changed),
                delta.index_hash,
                delta
                    .index_last_modified
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }
        fs::write(self.root.join(AUDIT_FILE), csv)?;
        Ok(())
    }
}
