//! Synchronization, rebuild, and reconciliation engine for the NVD mirror.
//!
//! This crate keeps a search-indexed mirror of the NVD vulnerability feed in
//! step with its upstream source and publishes the mirror as a file-per-record
//! git tree plus versioned compressed bulk feeds.
//!
//! # Modules
//!
//! - [`upstream`] - Paginated upstream polling with retry/backoff/throttle
//! - [`index`] - Search index adapter (CRUD, scans, lifecycle operations)
//! - [`workflow`] - The sync / rebuild / mirror-update / release workflows
//! - [`mirror`] - Mirror tree store and content-addressed delta reconciler
//! - [`package`] - Compressed bulk-feed archives with integrity sidecars
//! - [`git`], [`publish`], [`notify`] - Thin external collaborators
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     pages      ┌──────────────┐
//! │ UpdateStream │ ─────────────► │  IndexStore  │  lifecycle: block /
//! │  (upstream)  │   bulk upsert  │ (OpenSearch) │  snapshot / wipe / restore
//! └──────────────┘                └──────┬───────┘
//!                                        │ scroll scans
//!                                        ▼
//!                      ┌─────────────────┴────────────────┐
//!                      │                                  │
//!               ┌──────────────┐                  ┌──────────────┐
//!               │  MirrorTree  │  delta + audit   │ FeedPackager │  archives
//!               │ (reconciler) │ ───► git push    │  (releases)  │ ───► upload
//!               └──────────────┘                  └──────────────┘
//! ```
//!
//! The index's read-block flag is the cross-invocation mutual exclusion
//! mechanism: every workflow re-checks it immediately before bulk or
//! destructive work and abstains while a rebuild holds it.

pub mod error;
pub mod git;
pub mod index;
pub mod mirror;
pub mod notify;
pub mod package;
pub mod publish;
pub mod upstream;
pub mod workflow;

pub use error::{Error, Result};

pub use index::{DateField, IndexStore, OpenSearchStore, Order, RecordScan};
pub use mirror::{MirrorTree, RepoCacheDelta};
pub use package::{FeedArtifacts, FeedPackager};
pub use upstream::{NvdApiClient, Page, PageFetcher, UpdateStream};
pub use workflow::{execute, RebuildPhase, Workflow, WorkflowOutcome};
