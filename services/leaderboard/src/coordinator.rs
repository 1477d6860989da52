//! Refresh coordinator: one live leaderboard instance
//!
//! `Leaderboard` owns the published snapshot, the subscriber registry and
//! the background refresh task of a single named ranking. It is a cheap
//! clonable handle; there is no process-wide state.
//!
//! Lifecycle:
//! ```text
//!            first subscribe                last unsubscribe
//!   Idle ───────────────────────▶ Active ───────────────────────▶ Idle
//!         (initial refresh,                (cancel + await the
//!          spawn interval task)             interval task)
//! ```
//!
//! Locks, always taken in this order:
//! 1. `lifecycle`: Idle/Active transitions and subscriber admission.
//! 2. `publish`: every fetch → compare → swap → broadcast sequence.
//!
//! Because the fetch happens inside the publish lock, each published
//! snapshot reflects store state at least as new as the one before it, so a
//! broadcast for a later submission never overtakes an earlier one. Readers
//! never lock: they load the current `Arc<RankingSnapshot>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::errors::{StoreError, ValidationError};
use types::ids::{LeaderboardId, SubscriberId};
use types::score::{ScoreEntry, SubmitMode};
use types::snapshot::RankingSnapshot;

use crate::config::{LeaderboardConfig, RankingSource};
use crate::error::SubmitError;
use crate::metrics::{Alert, AlertLevel, ServiceMetrics};
use crate::protocol::{ScoreSubmission, ServerMessage};
use crate::ranking::RankingTable;
use crate::registry::{BroadcastReport, Subscriber, SubscriberRegistry};
use crate::store::{ScoreStore, StoreAdapter};

/// A refresh cycle that produced nothing.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What a successful refresh cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Same ranking as the published snapshot; nothing sent.
    Unchanged,
    /// A new snapshot was published and broadcast.
    Published { version: u64, report: BroadcastReport },
}

/// A registered viewer: its handle plus the queue its writer drains.
pub struct Subscription {
    pub subscriber: Subscriber,
    pub rx: mpsc::Receiver<Arc<str>>,
}

enum Phase {
    Idle,
    Active {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
}

/// State guarded by the publish lock.
struct PublishState {
    /// In-process ranking, only in `RankingSource::Memory` once seeded.
    table: Option<RankingTable>,
    version: u64,
    consecutive_failures: u32,
}

struct Inner {
    id: LeaderboardId,
    config: LeaderboardConfig,
    store: StoreAdapter,
    registry: SubscriberRegistry,
    metrics: Arc<ServiceMetrics>,
    published: ArcSwap<RankingSnapshot>,
    publish: Mutex<PublishState>,
    lifecycle: Mutex<Phase>,
    active: AtomicBool,
}

/// Handle to one live leaderboard.
#[derive(Clone)]
pub struct Leaderboard {
    inner: Arc<Inner>,
}

impl Leaderboard {
    pub fn new(
        id: LeaderboardId,
        config: LeaderboardConfig,
        store: Arc<dyn ScoreStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        let adapter = StoreAdapter::new(store, id.clone(), metrics.clone());
        let registry = SubscriberRegistry::new(config.send_timeout, metrics.clone());

        Self {
            inner: Arc::new(Inner {
                id,
                config,
                store: adapter,
                registry,
                metrics,
                published: ArcSwap::from_pointee(RankingSnapshot::empty()),
                publish: Mutex::new(PublishState {
                    table: None,
                    version: 0,
                    consecutive_failures: 0,
                }),
                lifecycle: Mutex::new(Phase::Idle),
                active: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &LeaderboardId {
        &self.inner.id
    }

    pub fn config(&self) -> &LeaderboardConfig {
        &self.inner.config
    }

    /// Whether the background refresh task is running.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Currently published snapshot. Never blocks.
    pub fn current(&self) -> Arc<RankingSnapshot> {
        self.inner.published.load_full()
    }

    /// Register a new viewer.
    ///
    /// The first viewer activates the leaderboard: an initial snapshot is
    /// computed before registration completes. Every viewer has the
    /// current snapshot queued before it can receive any broadcast.
    pub async fn subscribe(&self) -> Subscription {
        let inner = &self.inner;
        let (subscriber, rx) = Subscriber::channel(inner.config.subscriber_buffer);

        let mut phase = inner.lifecycle.lock().await;
        let mut state = inner.publish.lock().await;

        let activate = matches!(*phase, Phase::Idle);
        if activate {
            // Failure leaves the previous snapshot in place; the interval
            // task retries.
            let _ = inner.refresh_cycle(&mut state).await;
        }

        let snapshot = inner.published.load_full();
        match ServerMessage::update(&snapshot).encode() {
            Ok(message) => {
                if let Err(e) = subscriber.send(message, inner.config.send_timeout).await {
                    warn!(subscriber_id = %subscriber.id(), error = %e, "Initial snapshot not queued");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode initial snapshot"),
        }
        inner.registry.add(subscriber.clone());
        drop(state);

        if activate {
            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_refresh_loop(inner.clone(), cancel.clone()));
            *phase = Phase::Active { cancel, task };
            inner.active.store(true, Ordering::SeqCst);
            info!(
                leaderboard = %inner.id,
                interval_ms = inner.config.refresh_interval.as_millis() as u64,
                "Leaderboard active"
            );
        }

        debug!(
            leaderboard = %inner.id,
            subscriber_id = %subscriber.id(),
            version = snapshot.version,
            subscribers = inner.registry.len(),
            "Subscriber registered"
        );

        Subscription { subscriber, rx }
    }

    /// Deregister a viewer. Idempotent.
    ///
    /// When the last viewer leaves, the refresh task is cancelled and
    /// awaited before the leaderboard reports Idle.
    pub async fn unsubscribe(&self, id: &SubscriberId) {
        let inner = &self.inner;
        let mut phase = inner.lifecycle.lock().await;

        if inner.registry.remove(id) {
            debug!(leaderboard = %inner.id, subscriber_id = %id, "Subscriber removed");
        }

        if inner.registry.is_empty() {
            inner.deactivate(&mut phase).await;
        }
    }

    /// Persist a submission and push the resulting ranking to viewers.
    ///
    /// Returns the stored record once the store accepted it. When anyone
    /// is registered, the out-of-cycle refresh has completed by the time
    /// this returns. Registration happens under the publish lock, so a
    /// viewer admitted after its initial read still gets this refresh.
    pub async fn submit(&self, submission: ScoreSubmission) -> Result<ScoreEntry, SubmitError> {
        let inner = &self.inner;

        if let Some(requested) = &submission.leaderboard_id {
            if requested != &inner.id {
                inner.metrics.record_submission_rejected();
                return Err(ValidationError::UnknownLeaderboard(requested.to_string()).into());
            }
        }

        let mode = inner.config.score_mode;
        let entry = match inner.config.ranking_source {
            RankingSource::Store => {
                let entry = inner.persist(&submission, mode).await?;
                let mut state = inner.publish.lock().await;
                if !inner.registry.is_empty() {
                    let _ = inner.refresh_cycle(&mut state).await;
                }
                entry
            }
            RankingSource::Memory => {
                // Held across persist + apply so the table sees store
                // results in store order.
                let mut state = inner.publish.lock().await;
                let entry = inner.persist(&submission, mode).await?;
                if let Some(table) = state.table.as_mut() {
                    table.apply(&entry);
                }
                if !inner.registry.is_empty() {
                    let _ = inner.refresh_cycle(&mut state).await;
                }
                entry
            }
        };

        Ok(entry)
    }

    /// Queue the published snapshot to one viewer (pull request).
    ///
    /// Taken under the publish lock so the reply cannot be queued behind a
    /// newer broadcast. The lock is never held waiting on the requester's
    /// queue: a full queue prunes the viewer, as a broadcast would.
    pub async fn send_current(&self, subscriber: &Subscriber) {
        let inner = &self.inner;
        let _publish = inner.publish.lock().await;

        let snapshot = inner.published.load_full();
        let message = match ServerMessage::update(&snapshot).encode() {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Failed to encode snapshot");
                return;
            }
        };
        if let Err(e) = subscriber.try_send(message) {
            warn!(subscriber_id = %subscriber.id(), error = %e, "Pruning subscriber after failed snapshot reply");
            inner.registry.prune(&subscriber.id());
        }
    }

    /// Run one refresh cycle now.
    pub async fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        let mut state = self.inner.publish.lock().await;
        self.inner.refresh_cycle(&mut state).await
    }

    /// Ranking for pull-style readers.
    ///
    /// While Active the published snapshot is current. While Idle nothing
    /// refreshes it, so the store is queried directly; the result is
    /// returned but not published.
    pub async fn read(&self) -> Result<Arc<RankingSnapshot>, StoreError> {
        if self.is_active() {
            return Ok(self.current());
        }
        let top = self.inner.store.top(self.inner.config.top_k).await?;
        Ok(Arc::new(RankingSnapshot::new(
            self.current().version,
            Utc::now(),
            top.entries,
        )))
    }

    /// Stop the refresh task and close every subscriber.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let mut phase = inner.lifecycle.lock().await;

        for subscriber in inner.registry.members() {
            subscriber.close();
        }
        inner.deactivate(&mut phase).await;
        info!(leaderboard = %inner.id, "Leaderboard shut down");
    }
}

impl Inner {
    async fn persist(
        &self,
        submission: &ScoreSubmission,
        mode: SubmitMode,
    ) -> Result<ScoreEntry, SubmitError> {
        match self
            .store
            .upsert(&submission.entity_id, submission.score, mode)
            .await
        {
            Ok(entry) => {
                self.metrics.record_submission_accepted();
                Ok(entry)
            }
            Err(e) => {
                self.metrics.record_submission_rejected();
                Err(e.into())
            }
        }
    }

    async fn deactivate(&self, phase: &mut Phase) {
        let Phase::Active { cancel, task } = std::mem::replace(phase, Phase::Idle) else {
            return;
        };

        cancel.cancel();
        if let Err(e) = task.await {
            error!(leaderboard = %self.id, error = %e, "Refresh task ended abnormally");
        }
        self.active.store(false, Ordering::SeqCst);
        info!(leaderboard = %self.id, "Leaderboard idle");
    }

    /// One cycle with failure accounting. Never panics, never propagates
    /// beyond the caller.
    async fn refresh_cycle(&self, state: &mut PublishState) -> Result<RefreshOutcome, RefreshError> {
        let started = Instant::now();
        let result = self.refresh_locked(state).await;

        match &result {
            Ok(outcome) => {
                self.metrics
                    .record_refresh(started.elapsed().as_micros() as u64);
                if state.consecutive_failures > 0 {
                    info!(
                        leaderboard = %self.id,
                        after_failures = state.consecutive_failures,
                        "Refresh recovered"
                    );
                }
                state.consecutive_failures = 0;
                if let RefreshOutcome::Published { version, report } = outcome {
                    debug!(
                        leaderboard = %self.id,
                        version,
                        delivered = report.delivered,
                        pruned = report.pruned,
                        "Snapshot published"
                    );
                }
            }
            Err(e) => {
                self.metrics.record_refresh_failure();
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                warn!(
                    leaderboard = %self.id,
                    consecutive_failures = state.consecutive_failures,
                    error = %e,
                    "Refresh cycle failed"
                );

                if state.consecutive_failures == self.config.failure_alert_threshold {
                    let message = format!(
                        "{} consecutive refresh cycles failed for leaderboard {}: {}",
                        state.consecutive_failures, self.id, e
                    );
                    error!(leaderboard = %self.id, "{}", message);
                    self.metrics
                        .raise_alert(Alert::new(AlertLevel::Critical, "refresh_failures", message));
                }
            }
        }

        result
    }

    /// Fetch → compare → swap → broadcast. Caller holds the publish lock.
    async fn refresh_locked(&self, state: &mut PublishState) -> Result<RefreshOutcome, RefreshError> {
        let entries = match self.config.ranking_source {
            RankingSource::Store => self.store.top(self.config.top_k).await?.entries,
            RankingSource::Memory => {
                if state.table.is_none() {
                    let all = self.store.scan_all().await?;
                    info!(leaderboard = %self.id, records = all.len(), "Ranking table seeded from store");
                    state.table = Some(RankingTable::from_entries(self.config.top_k, all));
                }
                state
                    .table
                    .as_ref()
                    .map(RankingTable::snapshot)
                    .unwrap_or_default()
            }
        };

        if self.published.load().same_ranking(&entries) {
            self.metrics.record_broadcast_suppressed();
            return Ok(RefreshOutcome::Unchanged);
        }

        let version = state.version + 1;
        let snapshot = Arc::new(RankingSnapshot::new(version, Utc::now(), entries));
        let message = ServerMessage::update(&snapshot).encode()?;

        state.version = version;
        self.published.store(snapshot);
        let report = self.registry.broadcast(message).await;
        self.metrics.record_broadcast();

        Ok(RefreshOutcome::Published { version, report })
    }
}

/// Background cycle of an Active leaderboard.
///
/// Cancellation is observed only between cycles, never mid-fetch.
async fn run_refresh_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let period = inner.config.refresh_interval;
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        let mut state = inner.publish.lock().await;
        let _ = inner.refresh_cycle(&mut state).await;
    }

    debug!(leaderboard = %inner.id, "Refresh loop stopped");
}
