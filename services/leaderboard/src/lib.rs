//! Live Leaderboard Service
//!
//! Maintains a ranked top-K view of per-entity scores and pushes every
//! change to connected viewers over WebSocket:
//! - Score submissions over WebSocket or HTTP, persisted to a durable store
//! - Ranked reads from the store's secondary index, with a scan fallback
//! - Periodic and submission-driven refresh with redundant-update suppression
//! - Fan-out to all viewers with per-subscriber timeouts and pruning
//!
//! # Architecture
//!
//! ```text
//!  Viewer / HTTP submission
//!        │
//!    ┌───▼──────┐
//!    │ Handler  │  ← decode, validate, rate limit
//!    └───┬──────┘
//!        │
//!    ┌───▼──────┐      ┌──────────────┐
//!    │  Store   │◀─────│ Refresh loop │  (Active only)
//!    │ Adapter  │      └──────┬───────┘
//!    └───┬──────┘             │
//!        │ top(K)             │
//!   ┌────▼────────────────────▼──┐
//!   │ Coordinator: fetch → diff  │
//!   │ → swap snapshot → publish  │
//!   └────────────┬───────────────┘
//!                │
//!   ┌────────────▼───────────────┐
//!   │  Subscriber Registry       │
//!   │  fan-out, prune on failure │
//!   └────────────────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod protocol;
pub mod ranking;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod state;
pub mod store;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
