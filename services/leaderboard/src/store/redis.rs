//! Redis score store
//!
//! Key layout per leaderboard `{id}`:
//! - `leaderboard:{id}:scores`  hash entity → score (record of truth)
//! - `leaderboard:{id}:updated` hash entity → last update, unix millis
//! - `leaderboard:{id}:rank`    sorted set entity → score (secondary index)
//!
//! All three are written by one Lua script so an increment and its index
//! entry land atomically. Ranked reads go through the sorted set; exact
//! scores and timestamps are always read back from the hashes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tracing::{info, warn};
use types::errors::StoreError;
use types::ids::{EntityId, LeaderboardId};
use types::score::{top_k, ScoreEntry, SubmitMode};

use super::ScoreStore;

const UPSERT_SCRIPT: &str = r#"
local score
if ARGV[1] == 'increment' then
  score = redis.call('HINCRBY', KEYS[1], ARGV[2], ARGV[3])
else
  redis.call('HSET', KEYS[1], ARGV[2], ARGV[3])
  score = tonumber(ARGV[3])
end
redis.call('HSET', KEYS[2], ARGV[2], ARGV[4])
redis.call('ZADD', KEYS[3], score, ARGV[2])
return score
"#;

/// Redis keys of one leaderboard partition.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Keys {
    scores: String,
    updated: String,
    rank: String,
}

impl Keys {
    fn for_leaderboard(leaderboard: &LeaderboardId) -> Self {
        let prefix = format!("leaderboard:{}", leaderboard);
        Self {
            scores: format!("{}:scores", prefix),
            updated: format!("{}:updated", prefix),
            rank: format!("{}:rank", prefix),
        }
    }
}

/// Map a client error onto the store taxonomy.
fn classify(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Fatal(err.to_string())
    }
}

fn timestamp(millis: Option<i64>) -> DateTime<Utc> {
    millis
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Store backed by a Redis server through a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    upsert_script: Script,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(classify)?;
        let conn = ConnectionManager::new(client).await.map_err(classify)?;
        info!(url = %url, "Connected to Redis score store");

        Ok(Self {
            conn,
            upsert_script: Script::new(UPSERT_SCRIPT),
        })
    }

    /// Read score and timestamp records for `ids` and build entries.
    async fn load(&self, keys: &Keys, ids: &[String]) -> Result<Vec<ScoreEntry>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let scores: Vec<Option<i64>> = redis::cmd("HMGET")
            .arg(&keys.scores)
            .arg(ids)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        let updated: Vec<Option<i64>> = redis::cmd("HMGET")
            .arg(&keys.updated)
            .arg(ids)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok(ids
            .iter()
            .zip(scores)
            .zip(updated)
            .filter_map(|((id, score), at)| entry(id, score?, at))
            .collect())
    }
}

fn entry(id: &str, score: i64, at: Option<i64>) -> Option<ScoreEntry> {
    match EntityId::try_new(id) {
        Ok(entity_id) => Some(ScoreEntry::new(entity_id, score, timestamp(at))),
        Err(e) => {
            warn!(entity_id = %id, error = %e, "Skipping unreadable score record");
            None
        }
    }
}

#[async_trait]
impl ScoreStore for RedisStore {
    async fn upsert(
        &self,
        leaderboard: &LeaderboardId,
        entity_id: &EntityId,
        value: i64,
        mode: SubmitMode,
    ) -> Result<ScoreEntry, StoreError> {
        let keys = Keys::for_leaderboard(leaderboard);
        let now = Utc::now();
        let mut conn = self.conn.clone();

        let score: i64 = self
            .upsert_script
            .key(&keys.scores)
            .key(&keys.updated)
            .key(&keys.rank)
            .arg(mode.as_str())
            .arg(entity_id.as_str())
            .arg(value)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok(ScoreEntry::new(entity_id.clone(), score, now))
    }

    async fn top(&self, leaderboard: &LeaderboardId, k: usize) -> Result<Vec<ScoreEntry>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let keys = Keys::for_leaderboard(leaderboard);
        let mut conn = self.conn.clone();

        let ranked: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(&keys.rank)
            .arg(0)
            .arg(k as isize - 1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        let Some(&(_, boundary)) = ranked.last() else {
            return Ok(Vec::new());
        };

        // Redis orders equal scores by descending member in ZREVRANGE; pull
        // the whole boundary group so the id tie-break can be applied here.
        let tied: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&keys.rank)
            .arg(boundary)
            .arg(boundary)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        let mut ids: Vec<String> = ranked
            .into_iter()
            .filter(|(_, score)| *score > boundary)
            .map(|(id, _)| id)
            .collect();
        ids.extend(tied);

        let entries = self.load(&keys, &ids).await?;
        Ok(top_k(entries, k))
    }

    async fn scan_all(&self, leaderboard: &LeaderboardId) -> Result<Vec<ScoreEntry>, StoreError> {
        let keys = Keys::for_leaderboard(leaderboard);
        let mut conn = self.conn.clone();

        let scores: HashMap<String, i64> = redis::cmd("HGETALL")
            .arg(&keys.scores)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;
        let updated: HashMap<String, i64> = redis::cmd("HGETALL")
            .arg(&keys.updated)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok(scores
            .into_iter()
            .filter_map(|(id, score)| {
                let at = updated.get(&id).copied();
                entry(&id, score, at)
            })
            .collect())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
