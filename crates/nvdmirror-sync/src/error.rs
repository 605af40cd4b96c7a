//! Error types for the mirror engine.
//!
//! The failure taxonomy the workflows care about:
//!
//! - [`Error::UpstreamUnavailable`] - the upstream API could not be reached
//!   (auth failure, or the retry budget was exhausted); fatal for the run
//! - [`Error::CatastrophicRebuild`] - a destructive rebuild phase failed;
//!   raised only after the snapshot-restore recovery path has run
//!
//! A read-blocked index is not an error: workflows observe the flag and
//! report a skipped run instead.
//!
//! Empty "latest record" results are not errors at all: the index adapter
//! absorbs them into an epoch-defaulted value.

use crate::workflow::RebuildPhase;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the mirror.
#[derive(Error, Debug)]
pub enum Error {
    /// The upstream API is unreachable or rejected us.
    #[error("upstream unavailable after {retries} retries (status: {status:?})")]
    UpstreamUnavailable {
        /// HTTP status of the last response, if one was received.
        status: Option<u16>,
        /// Number of retries performed before giving up.
        retries: u32,
    },

    /// A destructive rebuild phase failed; the snapshot has been restored.
    #[error("catastrophic rebuild failure during {phase}: {source}")]
    CatastrophicRebuild {
        /// The state-machine phase that failed.
        phase: RebuildPhase,
        /// The original failure.
        #[source]
        source: Box<Error>,
    },

    /// An index request returned an unexpected response.
    #[error("index request failed: {0}")]
    Index(String),

    /// A git operation failed.
    #[error("git operation failed: {0}")]
    Git(String),

    /// Release publishing failed.
    #[error("release publishing failed: {0}")]
    Release(String),

    /// Notification delivery failed.
    #[error("notification delivery failed: {0}")]
    Notify(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Core type error.
    #[error(transparent)]
    Core(#[from] nvdmirror_core::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
