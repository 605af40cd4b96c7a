//! Core types, configuration, and shared utilities for the NVD mirror bot.
//!
//! This crate provides:
//! - The [`CveRecord`] envelope type with canonical serialization and digests
//! - Persistent per-workflow time anchors ([`TimeAnchorStore`])
//! - Mirror-tree path mapping for the file-per-record repository layout
//! - The [`MessageCard`] notification payload
//! - Configuration loading ([`Config`])
//! - Shared error types

mod anchor;
mod card;
mod config;
mod error;
pub mod paths;
mod record;

use chrono::{DateTime, Utc};

/// The epoch timestamp used as the default for unset anchors and empty
/// result sets.
pub fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// SHA-256 hex digest of `"{}"`, the sentinel hash assigned to records that
/// have no mirror file yet.
pub const EMPTY_OBJECT_DIGEST: &str =
    "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a";

/// First year for which CVE identifiers exist. Year-partitioned workflows
/// iterate from here up to the current year.
pub const FIRST_CVE_YEAR: i32 = 1999;

pub use anchor::{TimeAnchorStore, ANCHOR_NAMES};
pub use card::MessageCard;
pub use config::{
    Config, IndexConfig, MirrorConfig, NotifyConfig, TimeAnchorConfig, UpstreamConfig,
};
pub use error::{Error, Result};
pub use paths::{bucket_for_id, record_json_path};
pub use record::{parse_nvd_timestamp, CveRecord};
