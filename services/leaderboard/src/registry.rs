//! Subscriber registry
//!
//! Tracks the outbound channel of every live viewer connection and fans
//! messages out to them. Each subscriber is a bounded queue drained by its
//! connection's writer task, so a broadcast only ever waits on a queue slot,
//! never on a socket.
//!
//! Broadcast copies membership under the lock, releases it, then sends to
//! all copies concurrently. A subscriber whose queue is closed or stays full
//! for longer than the send timeout is pruned and its `closed` token is
//! cancelled, which tells the owning connection to shut down.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use types::ids::SubscriberId;

use crate::metrics::ServiceMetrics;

/// Why a send to one subscriber did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("subscriber channel closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("subscriber queue full")]
    Full,
}

/// Outbound handle of one viewer connection.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
}

impl Subscriber {
    /// Create a subscriber and the receiving end its connection drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: SubscriberId::new(),
                tx,
                closed: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Token cancelled when the registry gives up on this subscriber.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Mark the subscriber as closed. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Queue a message, waiting at most `timeout` for a free slot.
    pub async fn send(&self, message: Arc<str>, timeout: Duration) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        self.tx
            .send_timeout(message, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => ChannelError::Timeout(timeout),
                SendTimeoutError::Closed(_) => ChannelError::Closed,
            })
    }

    /// Queue a message only if a slot is free right now.
    pub fn try_send(&self, message: Arc<str>) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::Closed,
        })
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Live subscriber set of one leaderboard.
pub struct SubscriberRegistry {
    members: Mutex<BTreeMap<SubscriberId, Subscriber>>,
    send_timeout: Duration,
    metrics: Arc<ServiceMetrics>,
}

impl SubscriberRegistry {
    pub fn new(send_timeout: Duration, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            members: Mutex::new(BTreeMap::new()),
            send_timeout,
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriberId, Subscriber>> {
        // Membership stays consistent even if a holder panicked: every
        // critical section is a single map operation.
        self.members.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a subscriber. Returns `false` if it was already registered.
    pub fn add(&self, subscriber: Subscriber) -> bool {
        let mut members = self.lock();
        let added = members.insert(subscriber.id, subscriber).is_none();
        self.metrics.set_connected_subscribers(members.len() as u64);
        added
    }

    /// Deregister a subscriber. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &SubscriberId) -> bool {
        let mut members = self.lock();
        let removed = members.remove(id);
        self.metrics.set_connected_subscribers(members.len() as u64);
        drop(members);

        match removed {
            Some(subscriber) => {
                subscriber.close();
                true
            }
            None => false,
        }
    }

    /// Drop a subscriber that stopped keeping up and count it as pruned.
    pub fn prune(&self, id: &SubscriberId) -> bool {
        let removed = self.remove(id);
        if removed {
            self.metrics.record_pruned(1);
        }
        removed
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Point-in-time copy of membership.
    pub fn members(&self) -> Vec<Subscriber> {
        self.lock().values().cloned().collect()
    }

    /// Send `message` to every registered subscriber, pruning failures.
    pub async fn broadcast(&self, message: Arc<str>) -> BroadcastReport {
        let members = self.members();
        if members.is_empty() {
            return BroadcastReport::default();
        }

        let timeout = self.send_timeout;
        let sends = members.iter().map(|subscriber| {
            let message = message.clone();
            async move { (subscriber, subscriber.send(message, timeout).await) }
        });
        let results = join_all(sends).await;

        let mut report = BroadcastReport::default();
        for (subscriber, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(subscriber_id = %subscriber.id, error = %e, "Pruning subscriber after failed send");
                    if self.remove(&subscriber.id) {
                        report.pruned += 1;
                    }
                }
            }
        }

        if report.pruned > 0 {
            self.metrics.record_pruned(report.pruned as u64);
        }
        debug!(
            delivered = report.delivered,
            pruned = report.pruned,
            "Broadcast complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(timeout_ms: u64) -> SubscriberRegistry {
        SubscriberRegistry::new(
            Duration::from_millis(timeout_ms),
            Arc::new(ServiceMetrics::new()),
        )
    }

    fn msg(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[tokio::test]
    async fn test_add_remove_idempotent() {
        let registry = registry(100);
        let (sub, _rx) = Subscriber::channel(4);
        let id = sub.id();

        assert!(registry.add(sub.clone()));
        assert!(!registry.add(sub));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_closes_subscriber() {
        let registry = registry(100);
        let (sub, _rx) = Subscriber::channel(4);
        let closed = sub.closed();
        registry.add(sub.clone());

        registry.remove(&sub.id());
        assert!(closed.is_cancelled());
        assert_eq!(
            sub.send(msg("late"), Duration::from_millis(10)).await,
            Err(ChannelError::Closed)
        );
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = registry(100);
        let (a, mut rx_a) = Subscriber::channel(4);
        let (b, mut rx_b) = Subscriber::channel(4);
        registry.add(a);
        registry.add(b);

        let report = registry.broadcast(msg("hello")).await;
        assert_eq!(report, BroadcastReport { delivered: 2, pruned: 0 });
        assert_eq!(&*rx_a.recv().await.unwrap(), "hello");
        assert_eq!(&*rx_b.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_pruned_without_blocking_others() {
        let registry = registry(100);
        let (dead, dead_rx) = Subscriber::channel(4);
        let (live, mut live_rx) = Subscriber::channel(4);
        let dead_closed = dead.closed();
        drop(dead_rx);

        registry.add(dead.clone());
        registry.add(live.clone());

        let report = registry.broadcast(msg("update")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert!(!registry.contains(&dead.id()));
        assert!(registry.contains(&live.id()));
        assert!(dead_closed.is_cancelled());
        assert_eq!(&*live_rx.recv().await.unwrap(), "update");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_times_out() {
        let metrics = Arc::new(ServiceMetrics::new());
        let registry = SubscriberRegistry::new(Duration::from_millis(50), metrics.clone());

        // Queue of one, never drained.
        let (slow, _slow_rx) = Subscriber::channel(1);
        let (fast, mut fast_rx) = Subscriber::channel(4);
        registry.add(slow.clone());
        registry.add(fast);

        registry.broadcast(msg("first")).await;
        let report = registry.broadcast(msg("second")).await;

        assert_eq!(report.pruned, 1);
        assert!(!registry.contains(&slow.id()));
        assert_eq!(&*fast_rx.recv().await.unwrap(), "first");
        assert_eq!(&*fast_rx.recv().await.unwrap(), "second");
        assert_eq!(metrics.export()["subscribers_pruned"], 1);
        assert_eq!(metrics.export()["connected_subscribers"], 1);
    }

    #[tokio::test]
    async fn test_try_send_full_queue_then_prune() {
        let metrics = Arc::new(ServiceMetrics::new());
        let registry = SubscriberRegistry::new(Duration::from_millis(50), metrics.clone());
        let (sub, _rx) = Subscriber::channel(1);
        registry.add(sub.clone());

        assert_eq!(sub.try_send(msg("a")), Ok(()));
        assert_eq!(sub.try_send(msg("b")), Err(ChannelError::Full));

        assert!(registry.prune(&sub.id()));
        assert!(!registry.prune(&sub.id()));
        assert_eq!(sub.try_send(msg("c")), Err(ChannelError::Closed));
        assert_eq!(metrics.export()["subscribers_pruned"], 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let registry = registry(100);
        assert_eq!(registry.broadcast(msg("x")).await, BroadcastReport::default());
    }
}
