//! Durable score store adapter
//!
//! `ScoreStore` is the seam to the external key-value store. Backends
//! provide three calls: an upsert (atomic increment where the store has
//! one), a ranked query against the secondary index, and a full scan.
//!
//! `StoreAdapter` binds a backend to one leaderboard and owns the read
//! policy: the ranked index is the primary path, and a failed index query
//! degrades to scan + in-process sort. The degraded path is logged and
//! counted but never fatal. Nothing here retries; a failed read is retried
//! by the next refresh cycle, a failed write is reported to the submitter.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use types::errors::StoreError;
use types::ids::{EntityId, LeaderboardId};
use types::score::{top_k, ScoreEntry, SubmitMode};

use crate::metrics::ServiceMetrics;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// External durable store holding one record per (leaderboard, entity).
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Apply a submission and return the resulting record.
    async fn upsert(
        &self,
        leaderboard: &LeaderboardId,
        entity_id: &EntityId,
        value: i64,
        mode: SubmitMode,
    ) -> Result<ScoreEntry, StoreError>;

    /// Ranked query on the secondary index: best `k` in rank order.
    async fn top(&self, leaderboard: &LeaderboardId, k: usize) -> Result<Vec<ScoreEntry>, StoreError>;

    /// Every record of the leaderboard, unordered.
    async fn scan_all(&self, leaderboard: &LeaderboardId) -> Result<Vec<ScoreEntry>, StoreError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Which path served a ranked read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    /// Secondary index range query.
    Index,
    /// Full scan plus in-process sort (degraded).
    Scan,
}

/// Result of a ranked read.
#[derive(Debug, Clone)]
pub struct TopRead {
    pub entries: Vec<ScoreEntry>,
    pub path: ReadPath,
}

/// A store backend bound to one leaderboard.
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn ScoreStore>,
    leaderboard: LeaderboardId,
    metrics: Arc<ServiceMetrics>,
}

impl StoreAdapter {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        leaderboard: LeaderboardId,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            store,
            leaderboard,
            metrics,
        }
    }

    /// Persist a submission. Errors are returned to the submission path.
    pub async fn upsert(
        &self,
        entity_id: &EntityId,
        value: i64,
        mode: SubmitMode,
    ) -> Result<ScoreEntry, StoreError> {
        match self
            .store
            .upsert(&self.leaderboard, entity_id, value, mode)
            .await
        {
            Ok(entry) => {
                debug!(
                    leaderboard = %self.leaderboard,
                    entity_id = %entry.entity_id,
                    score = entry.score,
                    mode = %mode,
                    "Score persisted"
                );
                Ok(entry)
            }
            Err(e) => {
                warn!(
                    leaderboard = %self.leaderboard,
                    entity_id = %entity_id,
                    backend = self.store.backend(),
                    error = %e,
                    "Score upsert failed"
                );
                Err(e)
            }
        }
    }

    /// Best `k` entries, falling back to a full scan if the index fails.
    pub async fn top(&self, k: usize) -> Result<TopRead, StoreError> {
        if k == 0 {
            return Ok(TopRead {
                entries: Vec::new(),
                path: ReadPath::Index,
            });
        }

        match self.store.top(&self.leaderboard, k).await {
            Ok(entries) => Ok(TopRead {
                entries,
                path: ReadPath::Index,
            }),
            Err(index_err) => {
                self.metrics.record_degraded_read();
                warn!(
                    leaderboard = %self.leaderboard,
                    backend = self.store.backend(),
                    error = %index_err,
                    "Ranked index query failed, serving from full scan (degraded)"
                );

                let all = self.store.scan_all(&self.leaderboard).await?;
                Ok(TopRead {
                    entries: top_k(all, k),
                    path: ReadPath::Scan,
                })
            }
        }
    }

    /// Every record of the bound leaderboard.
    pub async fn scan_all(&self) -> Result<Vec<ScoreEntry>, StoreError> {
        self.store.scan_all(&self.leaderboard).await
    }
}
