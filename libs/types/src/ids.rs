//! Identifier types for leaderboard entities
//!
//! Entity and leaderboard identifiers are opaque caller-supplied strings,
//! used verbatim as ranking keys. Subscriber identifiers are generated
//! server-side with UUID v7 so connection logs sort chronologically.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::ValidationError;

/// Maximum accepted length of an entity identifier, in bytes.
pub const MAX_ENTITY_ID_LEN: usize = 128;

/// Name of the leaderboard used when a submission does not name one.
pub const DEFAULT_LEADERBOARD: &str = "default";

/// Unique key of a ranked entity (player, team, ...).
///
/// Ordered lexicographically; this order is the tie-break between equal scores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create an EntityId, rejecting blank or oversized identifiers
    pub fn try_new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::MissingEntityId);
        }
        if id.len() > MAX_ENTITY_ID_LEN {
            return Err(ValidationError::EntityIdTooLong {
                len: id.len(),
                max: MAX_ENTITY_ID_LEN,
            });
        }
        Ok(Self(id))
    }

    /// Get the identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of a logical leaderboard (one ranking).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaderboardId(String);

impl LeaderboardId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LeaderboardId {
    fn default() -> Self {
        Self(DEFAULT_LEADERBOARD.to_string())
    }
}

impl fmt::Display for LeaderboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LeaderboardId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for a viewer connection
///
/// Uses UUID v7 for time-based sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Create a new SubscriberId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
