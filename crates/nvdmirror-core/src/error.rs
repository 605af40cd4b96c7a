//! Error types shared across the mirror bot.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core types.
#[derive(Error, Debug)]
pub enum Error {
    /// A time anchor was requested or set under a name that does not exist.
    #[error("no such time anchor '{0}'")]
    UnknownAnchor(String),

    /// A record is missing a required field or the field has the wrong shape.
    #[error("invalid record field '{field}': {reason}")]
    InvalidRecord {
        /// The name of the offending field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// A timestamp string could not be parsed.
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
