//! Per-entity submission throttling (token bucket).
//!
//! A bucket that has refilled to capacity behaves exactly like a fresh one,
//! so such buckets are swept out every `SWEEP_EVERY` checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use types::ids::EntityId;

use crate::config::RateLimitConfig;
use crate::error::SubmitError;

const SWEEP_EVERY: u64 = 1024;

#[derive(Clone)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn full(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_update: Instant::now(),
        }
    }

    fn is_full_at(&self, now: Instant, capacity: u32, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity as f64
    }

    fn allow_request(&mut self, capacity: u32, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = f64::min(capacity as f64, self.tokens + elapsed * refill_rate);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    buckets: DashMap<EntityId, Bucket>,
    config: RateLimitConfig,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            checks: AtomicU64::new(0),
        }
    }

    /// Take one submission token for `entity_id`.
    pub fn check(&self, entity_id: &EntityId) -> Result<(), SubmitError> {
        // Before taking the entry guard: retain locks every shard.
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.evict_idle();
        }

        let capacity = self.config.burst;
        let mut bucket = self
            .buckets
            .entry(entity_id.clone())
            .or_insert_with(|| Bucket::full(capacity));

        if bucket.allow_request(capacity, self.config.per_second) {
            Ok(())
        } else {
            Err(SubmitError::RateLimited(entity_id.to_string()))
        }
    }

    /// Drop buckets that have refilled to capacity. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let capacity = self.config.burst;
        let rate = self.config.per_second;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_full_at(now, capacity, rate));
        before.saturating_sub(self.buckets.len())
    }

    /// Number of entities with a bucket.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}
