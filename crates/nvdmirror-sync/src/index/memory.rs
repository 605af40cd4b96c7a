//! In-memory [`IndexStore`] used by workflow tests.
//!
//! Mimics the cluster-side contract closely enough to drive the workflows:
//! the block flag, epoch-named snapshots, wipe/restore leaving the
//! collection blocked, and batch scans. Bulk writes can be made to fail on
//! demand to exercise the rebuild recovery path.

use super::{DateField, IndexStore, Order, RecordScan};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nvdmirror_core::{epoch, CveRecord};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

type DocMap = BTreeMap<String, CveRecord>;

#[derive(Default)]
struct Shared {
    docs: Mutex<DocMap>,
    blocked: AtomicBool,
    snapshots: Mutex<Vec<(i64, DocMap)>>,
    fail_bulk_upserts: AtomicBool,
    bulk_calls: AtomicU32,
}

/// Cloneable handle onto one fake collection.
#[derive(Clone, Default)]
pub(crate) struct MemoryIndex {
    shared: Arc<Shared>,
}

impl MemoryIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_records(records: Vec<CveRecord>) -> Self {
        let index = Self::new();
        {
            let mut docs = index.shared.docs.lock().unwrap();
            for record in records {
                docs.insert(record.id().unwrap().to_string(), record);
            }
        }
        index
    }

    /// Make every subsequent `bulk_upsert` fail.
    pub(crate) fn fail_bulk_upserts(&self) {
        self.shared.fail_bulk_upserts.store(true, Ordering::SeqCst);
    }

    pub(crate) fn bulk_calls(&self) -> u32 {
        self.shared.bulk_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot_count(&self) -> usize {
        self.shared.snapshots.lock().unwrap().len()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.shared.docs.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.docs.lock().unwrap().len()
    }

    fn field_value(record: &CveRecord, field: DateField) -> Result<DateTime<Utc>> {
        match field {
            DateField::Published => Ok(record.published()?),
            DateField::LastModified => Ok(record.last_modified()?),
        }
    }

    fn records_in_range(
        &self,
        field: DateField,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Vec<CveRecord>> {
        let docs = self.shared.docs.lock().unwrap();
        let mut hits = Vec::new();
        for record in docs.values() {
            let ts = Self::field_value(record, field)?;
            if ts >= start && ts <= stop {
                hits.push(record.clone());
            }
        }
        Ok(hits)
    }
}

#[async_trait]
impl IndexStore for MemoryIndex {
    type Scan = MemoryScan;

    async fn is_blocked(&self) -> Result<bool> {
        Ok(self.shared.blocked.load(Ordering::SeqCst))
    }

    async fn block(&self) -> Result<()> {
        self.shared.blocked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unblock(&self) -> Result<()> {
        self.shared.blocked.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn create_if_missing(&self) -> Result<()> {
        Ok(())
    }

    async fn snapshot(&self) -> Result<()> {
        let docs = self.shared.docs.lock().unwrap().clone();
        let mut snapshots = self.shared.snapshots.lock().unwrap();
        let name = snapshots.last().map_or(1, |(n, _)| n + 1);
        snapshots.push((name, docs));
        Ok(())
    }

    async fn restore_latest_snapshot(&self) -> Result<()> {
        let snapshots = self.shared.snapshots.lock().unwrap();
        let (_, latest) = snapshots
            .iter()
            .max_by_key(|(name, _)| *name)
            .ok_or_else(|| Error::Index("no snapshot to restore".to_string()))?;
        *self.shared.docs.lock().unwrap() = latest.clone();
        self.shared.blocked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        self.shared.docs.lock().unwrap().clear();
        self.shared.blocked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, record: &CveRecord) -> Result<()> {
        let id = record.id()?.to_string();
        self.shared.docs.lock().unwrap().insert(id, record.clone());
        Ok(())
    }

    async fn bulk_upsert(&self, records: &[CveRecord]) -> Result<()> {
        self.shared.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_bulk_upserts.load(Ordering::SeqCst) {
            return Err(Error::Index("bulk write refused".to_string()));
        }
        let mut docs = self.shared.docs.lock().unwrap();
        for record in records {
            docs.insert(record.id()?.to_string(), record.clone());
        }
        Ok(())
    }

    async fn count_in_range(
        &self,
        field: DateField,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self.records_in_range(field, start, stop)?.len() as u64)
    }

    async fn latest_by_field(
        &self,
        field: DateField,
    ) -> Result<(Option<CveRecord>, DateTime<Utc>)> {
        let docs = self.shared.docs.lock().unwrap();
        let mut latest: Option<(CveRecord, DateTime<Utc>)> = None;
        for record in docs.values() {
            let ts = Self::field_value(record, field)?;
            if latest.as_ref().map_or(true, |(_, prev)| ts > *prev) {
                latest = Some((record.clone(), ts));
            }
        }
        Ok(match latest {
            Some((record, ts)) => (Some(record), ts),
            None => (None, epoch()),
        })
    }

    async fn scan_range(
        &self,
        field: DateField,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        _sort_field: &str,
        order: Order,
    ) -> Result<Self::Scan> {
        let mut hits = self.records_in_range(field, start, stop)?;
        hits.sort_by_key(|r| Self::field_value(r, field).unwrap());
        if order == Order::Desc {
            hits.reverse();
        }
        Ok(MemoryScan::new(hits))
    }

    async fn scan_year_mod_range(
        &self,
        year: i32,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Self::Scan> {
        let prefix = format!("CVE-{year}-");
        let mut hits: Vec<CveRecord> = self
            .records_in_range(DateField::LastModified, start, stop)?
            .into_iter()
            .filter(|r| r.id().is_ok_and(|id| id.starts_with(&prefix)))
            .collect();
        hits.sort_by_key(|r| r.last_modified().unwrap());
        Ok(MemoryScan::new(hits))
    }
}

/// Yields the matched records in fixed-size batches like a scroll cursor.
pub(crate) struct MemoryScan {
    batches: Vec<Vec<CveRecord>>,
}

impl MemoryScan {
    fn new(records: Vec<CveRecord>) -> Self {
        let mut batches: Vec<Vec<CveRecord>> = records
            .chunks(2)
            .map(|chunk| chunk.to_vec())
            .collect();
        batches.reverse();
        Self { batches }
    }
}

#[async_trait]
impl RecordScan for MemoryScan {
    async fn next_batch(&mut self) -> Result<Option<Vec<CveRecord>>> {
        Ok(self.batches.pop())
    }

    async fn close(&mut self) -> Result<()> {
        self.batches.clear();
        Ok(())
    }
}
