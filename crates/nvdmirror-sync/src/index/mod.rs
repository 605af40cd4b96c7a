//! Search index adapter.
//!
//! [`IndexStore`] is the seam between the workflows and the index cluster.
//! It covers record CRUD, inclusive range/count queries, lazy scroll scans,
//! and the lifecycle operations the rebuild state machine drives
//! (block/unblock, snapshot/restore, wipe).
//!
//! Lifecycle state lives in the cluster, not in this process: the read-block
//! flag is the cross-invocation mutual-exclusion signal, so callers must
//! re-check [`IndexStore::is_blocked`] before every destructive step rather
//! than caching the answer.

mod opensearch;

#[cfg(test)]
pub(crate) mod memory;

pub use opensearch::{OpenSearchStore, ScrollScan};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nvdmirror_core::CveRecord;

/// The two timestamp fields records are queried by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Published,
    LastModified,
}

impl DateField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::LastModified => "lastModified",
        }
    }
}

/// Sort direction for range scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// A lazy, finite, non-restartable sequence of record batches.
///
/// The first `next_batch` opens a server-side cursor; subsequent calls
/// continue it until an empty page closes it. `close` releases the cursor
/// early and is safe to call more than once.
#[async_trait]
pub trait RecordScan {
    async fn next_batch(&mut self) -> Result<Option<Vec<CveRecord>>>;

    async fn close(&mut self) -> Result<()>;
}

/// Operations against the record collection.
///
/// All operations are independent and idempotent unless noted. Range bounds
/// are inclusive on both ends.
#[async_trait]
pub trait IndexStore {
    type Scan: RecordScan + Send;

    /// Whether the lifecycle read-block flag is set. Fails closed: an auth
    /// error reading the flag reports `true`; a missing collection reports
    /// `false`.
    async fn is_blocked(&self) -> Result<bool>;

    /// Set the read-block flag.
    async fn block(&self) -> Result<()>;

    /// Clear the read-block flag; safe to call when already clear.
    async fn unblock(&self) -> Result<()>;

    /// Create the collection when absent and not blocked.
    async fn create_if_missing(&self) -> Result<()>;

    /// Create a point-in-time backup named by the current epoch second.
    /// Failures propagate; a rebuild must never proceed without one.
    async fn snapshot(&self) -> Result<()>;

    /// Restore the backup with the greatest numeric name that covers this
    /// collection, leaving the collection blocked afterward.
    async fn restore_latest_snapshot(&self) -> Result<()>;

    /// Drop and recreate the collection, leaving it blocked.
    async fn wipe(&self) -> Result<()>;

    /// Overwrite-by-id upsert of a single record.
    async fn upsert(&self, record: &CveRecord) -> Result<()>;

    /// Overwrite-by-id upsert of a batch. Waits until the write is visible
    /// to subsequent reads before returning.
    async fn bulk_upsert(&self, records: &[CveRecord]) -> Result<()>;

    /// Count records with `field` within `[start, stop]`.
    async fn count_in_range(
        &self,
        field: DateField,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<u64>;

    /// The single highest record by `field`, with its timestamp. An empty
    /// collection or a query-shape error yields `(None, epoch)`, a
    /// recoverable empty-state rather than a fault.
    async fn latest_by_field(
        &self,
        field: DateField,
    ) -> Result<(Option<CveRecord>, DateTime<Utc>)>;

    /// Scan records with `field` within `[start, stop]`.
    async fn scan_range(
        &self,
        field: DateField,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        sort_field: &str,
        order: Order,
    ) -> Result<Self::Scan>;

    /// Scan records of one identifier year with `lastModified` within
    /// `[start, stop]`.
    async fn scan_year_mod_range(
        &self,
        year: i32,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Self::Scan>;
}

/// Drain a scan into memory. Year-partitioned callers use this per slice.
pub async fn collect_scan<S: RecordScan>(mut scan: S) -> Result<Vec<CveRecord>> {
    let mut records = Vec::new();
    while let Some(batch) = scan.next_batch().await? {
        records.extend(batch);
    }
    Ok(records)
}
