//! In-process score store
//!
//! Holds one partition per leaderboard: a record map (source of truth) and an
//! ordered secondary index over `RankKey`. Used when no `REDIS_URL` is
//! configured, and by tests, which can switch individual paths off to
//! exercise degraded and failing behaviour.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use types::errors::StoreError;
use types::ids::{EntityId, LeaderboardId};
use types::score::{RankKey, ScoreEntry, SubmitMode};

use super::ScoreStore;

#[derive(Debug, Default)]
struct Partition {
    records: HashMap<EntityId, ScoreEntry>,
    index: BTreeSet<RankKey>,
}

/// Map-backed store with a range-queryable index.
#[derive(Debug)]
pub struct MemoryStore {
    partitions: Mutex<HashMap<LeaderboardId, Partition>>,
    index_available: AtomicBool,
    scan_available: AtomicBool,
    writes_available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            index_available: AtomicBool::new(true),
            scan_available: AtomicBool::new(true),
            writes_available: AtomicBool::new(true),
        }
    }

    /// Make ranked index queries fail (transient) while `false`.
    pub fn set_index_available(&self, available: bool) {
        self.index_available.store(available, Ordering::SeqCst);
    }

    /// Make full scans fail (transient) while `false`.
    pub fn set_scan_available(&self, available: bool) {
        self.scan_available.store(available, Ordering::SeqCst);
    }

    /// Make upserts fail (transient) while `false`.
    pub fn set_writes_available(&self, available: bool) {
        self.writes_available.store(available, Ordering::SeqCst);
    }

    /// Number of records stored for a leaderboard.
    pub fn record_count(&self, leaderboard: &LeaderboardId) -> usize {
        self.partitions
            .lock()
            .map(|p| p.get(leaderboard).map_or(0, |part| part.records.len()))
            .unwrap_or(0)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<LeaderboardId, Partition>>, StoreError> {
        self.partitions
            .lock()
            .map_err(|_| StoreError::Fatal("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ScoreStore for MemoryStore {
    async fn upsert(
        &self,
        leaderboard: &LeaderboardId,
        entity_id: &EntityId,
        value: i64,
        mode: SubmitMode,
    ) -> Result<ScoreEntry, StoreError> {
        if !self.writes_available.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("write path unavailable".to_string()));
        }

        let mut partitions = self.lock()?;
        let partition = partitions.entry(leaderboard.clone()).or_default();

        let current = partition.records.get(entity_id).map(|e| e.score);
        if let Some(score) = current {
            partition.index.remove(&RankKey::new(entity_id.clone(), score));
        }

        let entry = ScoreEntry::new(entity_id.clone(), mode.apply(current, value), Utc::now());
        partition.index.insert(entry.rank_key());
        partition.records.insert(entity_id.clone(), entry.clone());

        Ok(entry)
    }

    async fn top(&self, leaderboard: &LeaderboardId, k: usize) -> Result<Vec<ScoreEntry>, StoreError> {
        if !self.index_available.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("ranked index unavailable".to_string()));
        }

        let partitions = self.lock()?;
        let Some(partition) = partitions.get(leaderboard) else {
            return Ok(Vec::new());
        };

        Ok(partition
            .index
            .iter()
            .take(k)
            .filter_map(|key| partition.records.get(key.entity_id()).cloned())
            .collect())
    }

    async fn scan_all(&self, leaderboard: &LeaderboardId) -> Result<Vec<ScoreEntry>, StoreError> {
        if !self.scan_available.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("scan unavailable".to_string()));
        }

        let partitions = self.lock()?;
        Ok(partitions
            .get(leaderboard)
            .map(|p| p.records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(s: &str) -> EntityId {
        EntityId::try_new(s).unwrap()
    }

    #[tokio::test]
    async fn test_increment_accumulates() {
        let store = MemoryStore::new();
        let lb = LeaderboardId::default();

        store.upsert(&lb, &id("A"), 10, SubmitMode::Increment).await.unwrap();
        let entry = store.upsert(&lb, &id("A"), 10, SubmitMode::Increment).await.unwrap();

        assert_eq!(entry.score, 20);
        assert_eq!(store.record_count(&lb), 1);
        assert_eq!(store.top(&lb, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_moves_index_entry() {
        let store = MemoryStore::new();
        let lb = LeaderboardId::default();

        store.upsert(&lb, &id("A"), 50, SubmitMode::Replace).await.unwrap();
        store.upsert(&lb, &id("B"), 40, SubmitMode::Replace).await.unwrap();
        store.upsert(&lb, &id("A"), 1, SubmitMode::Replace).await.unwrap();

        let top = store.top(&lb, 2).await.unwrap();
        assert_eq!(top[0].entity_id.as_str(), "B");
        assert_eq!(top[1].score, 1);
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let store = MemoryStore::new();
        let weekly = LeaderboardId::new("weekly");

        store
            .upsert(&LeaderboardId::default(), &id("A"), 5, SubmitMode::Increment)
            .await
            .unwrap();

        assert!(store.top(&weekly, 10).await.unwrap().is_empty());
        assert!(store.scan_all(&weekly).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_increments_do_not_lose_updates() {
        let store = Arc::new(MemoryStore::new());
        let lb = LeaderboardId::default();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let lb = lb.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(&lb, &id("A"), 1, SubmitMode::Increment).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let top = store.top(&lb, 1).await.unwrap();
        assert_eq!(top[0].score, 50);
    }
}
