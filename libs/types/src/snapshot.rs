//! Published ranking snapshots
//!
//! A snapshot is immutable once produced. A newer snapshot replaces the
//! previous one as a whole; it is never edited in place.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::score::{rank_order, ScoreEntry};

/// Wire form of one ranked row: `{"entity_id": ..., "score": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub entity_id: EntityId,
    pub score: i64,
}

impl From<&ScoreEntry> for RankedEntry {
    fn from(entry: &ScoreEntry) -> Self {
        Self {
            entity_id: entry.entity_id.clone(),
            score: entry.score,
        }
    }
}

/// Ordered top-K view, strictly descending by score (ties by ascending id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingSnapshot {
    /// Monotonic publish version; 0 for the initial empty snapshot.
    pub version: u64,
    /// When this snapshot was published.
    pub published_at: DateTime<Utc>,
    /// Entries in rank order.
    pub entries: Vec<ScoreEntry>,
}

impl RankingSnapshot {
    /// The snapshot visible before anything has been computed.
    pub fn empty() -> Self {
        Self {
            version: 0,
            published_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Build a snapshot, putting `entries` into rank order.
    pub fn new(version: u64, published_at: DateTime<Utc>, mut entries: Vec<ScoreEntry>) -> Self {
        entries.sort_by(rank_order);
        Self {
            version,
            published_at,
            entries,
        }
    }

    /// Compare by visible content (ids and scores, in order).
    ///
    /// Versions and timestamps are ignored, so re-publishing an identical
    /// ranking can be suppressed.
    pub fn same_ranking(&self, entries: &[ScoreEntry]) -> bool {
        self.entries.len() == entries.len()
            && self
                .entries
                .iter()
                .zip(entries)
                .all(|(a, b)| a.entity_id == b.entity_id && a.score == b.score)
    }

    /// Rows as sent to viewers.
    pub fn ranked(&self) -> Vec<RankedEntry> {
        self.entries.iter().map(RankedEntry::from).collect()
    }

    /// ISO-8601 UTC publish time, e.g. `2024-02-16T22:30:56.789Z`.
    pub fn timestamp(&self) -> String {
        self.published_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
