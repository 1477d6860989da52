//! Observability and metrics for the leaderboard service
//!
//! Counters are plain atomics, read by the `/metrics` route. Refresh
//! latency is sampled into a bounded window for percentiles. Repeated
//! refresh failures are escalated as alerts rather than crashing anything.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Core metrics for the leaderboard service.
pub struct ServiceMetrics {
    // Submissions
    pub submissions_accepted: AtomicU64,
    pub submissions_rejected: AtomicU64,

    // Refresh cycles
    pub refresh_cycles: AtomicU64,
    pub refresh_failures: AtomicU64,
    pub refresh_latency_us: Mutex<LatencyTracker>,
    pub degraded_reads: AtomicU64,

    // Fan-out
    pub broadcasts_sent: AtomicU64,
    pub broadcasts_suppressed: AtomicU64,
    pub subscribers_pruned: AtomicU64,
    pub connected_subscribers: AtomicU64,

    // Alerts
    pub alerts: Mutex<Vec<Alert>>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            submissions_accepted: AtomicU64::new(0),
            submissions_rejected: AtomicU64::new(0),
            refresh_cycles: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
            refresh_latency_us: Mutex::new(LatencyTracker::new(1000)),
            degraded_reads: AtomicU64::new(0),
            broadcasts_sent: AtomicU64::new(0),
            broadcasts_suppressed: AtomicU64::new(0),
            subscribers_pruned: AtomicU64::new(0),
            connected_subscribers: AtomicU64::new(0),
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn record_submission_accepted(&self) {
        self.submissions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_rejected(&self) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed refresh cycle and how long it took.
    pub fn record_refresh(&self, latency_us: u64) {
        self.refresh_cycles.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.refresh_latency_us.lock() {
            tracker.record(latency_us);
        }
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a ranked read served by the scan fallback.
    pub fn record_degraded_read(&self) {
        self.degraded_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self) {
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cycle whose result matched the published snapshot.
    pub fn record_broadcast_suppressed(&self) {
        self.broadcasts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, count: u64) {
        self.subscribers_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_connected_subscribers(&self, count: u64) {
        self.connected_subscribers.store(count, Ordering::Relaxed);
    }

    /// Store an alert for later inspection.
    pub fn raise_alert(&self, alert: Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }

    /// Alerts raised so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Export counters as a sorted map.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("submissions_accepted".to_string(), self.submissions_accepted.load(Ordering::Relaxed));
        m.insert("submissions_rejected".to_string(), self.submissions_rejected.load(Ordering::Relaxed));
        m.insert("refresh_cycles".to_string(), self.refresh_cycles.load(Ordering::Relaxed));
        m.insert("refresh_failures".to_string(), self.refresh_failures.load(Ordering::Relaxed));
        m.insert("degraded_reads".to_string(), self.degraded_reads.load(Ordering::Relaxed));
        m.insert("broadcasts_sent".to_string(), self.broadcasts_sent.load(Ordering::Relaxed));
        m.insert("broadcasts_suppressed".to_string(), self.broadcasts_suppressed.load(Ordering::Relaxed));
        m.insert("subscribers_pruned".to_string(), self.subscribers_pruned.load(Ordering::Relaxed));
        m.insert("connected_subscribers".to_string(), self.connected_subscribers.load(Ordering::Relaxed));

        if let Ok(tracker) = self.refresh_latency_us.lock() {
            if let Some(p50) = tracker.percentile(50) {
                m.insert("refresh_latency_p50_us".to_string(), p50);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("refresh_latency_p99_us".to_string(), p99);
            }
        }

        m.insert(
            "alerts".to_string(),
            self.alerts.lock().map(|a| a.len() as u64).unwrap_or(0),
        );
        m
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Sliding window of latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// An operational alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, metric: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            metric: metric.into(),
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = ServiceMetrics::new();

        metrics.record_submission_accepted();
        metrics.record_submission_accepted();
        metrics.record_submission_rejected();
        metrics.record_refresh(120);
        metrics.record_refresh_failure();

        let exported = metrics.export();
        assert_eq!(exported["submissions_accepted"], 2);
        assert_eq!(exported["submissions_rejected"], 1);
        assert_eq!(exported["refresh_cycles"], 1);
        assert_eq!(exported["refresh_failures"], 1);
        assert_eq!(exported["refresh_latency_p99_us"], 120);
    }

    #[test]
    fn test_fanout_counters() {
        let metrics = ServiceMetrics::new();
        metrics.record_broadcast();
        metrics.record_broadcast_suppressed();
        metrics.record_pruned(3);
        metrics.set_connected_subscribers(7);

        let exported = metrics.export();
        assert_eq!(exported["broadcasts_sent"], 1);
        assert_eq!(exported["broadcasts_suppressed"], 1);
        assert_eq!(exported["subscribers_pruned"], 3);
        assert_eq!(exported["connected_subscribers"], 7);
    }

    #[test]
    fn test_no_latency_keys_before_first_refresh() {
        let exported = ServiceMetrics::new().export();
        assert!(!exported.contains_key("refresh_latency_p50_us"));
    }

    #[test]
    fn test_latency_tracker_percentile() {
        let mut tracker = LatencyTracker::new(100);
        for i in 1..=100 {
            tracker.record(i);
        }

        let p50 = tracker.percentile(50).unwrap();
        assert!((49..=51).contains(&p50));

        let p99 = tracker.percentile(99).unwrap();
        assert!((98..=100).contains(&p99));
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);
        tracker.record(10);
        tracker.record(20);
        tracker.record(30);
        tracker.record(40); // evicts 10

        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.average().unwrap(), 30);
    }

    #[test]
    fn test_alerts_are_kept() {
        let metrics = ServiceMetrics::new();
        metrics.raise_alert(Alert::new(AlertLevel::Critical, "refresh_failures", "5 in a row"));

        let alerts = metrics.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(metrics.export()["alerts"], 1);
    }
}
