//! Error types for the leaderboard
//!
//! Error taxonomy using thiserror

use thiserror::Error;

/// A submission that cannot be accepted as sent.
///
/// Display strings are sent verbatim to the offending connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid score: must be a positive number")]
    InvalidScore,

    #[error("Invalid entity_id: must be a non-empty string")]
    MissingEntityId,

    #[error("Invalid entity_id: length {len} exceeds {max} bytes")]
    EntityIdTooLong { len: usize, max: usize },

    #[error("Invalid message: {0}")]
    Malformed(String),

    #[error("Unknown leaderboard: {0}")]
    UnknownLeaderboard(String),
}

/// Durable store failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Index query failure or connection hiccup; the next cycle may succeed.
    #[error("Store temporarily unavailable: {0}")]
    Transient(String),

    /// Persistent failure (bad credentials, corrupt record, script error).
    #[error("Store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}
