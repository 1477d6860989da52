//! Types library for the live leaderboard
//!
//! Shared type definitions used by the ranking engine, the store adapters
//! and the connection layer.
//!
//! # Modules
//! - `ids`: Identifiers (EntityId, LeaderboardId, SubscriberId)
//! - `score`: Score records, submission modes and the rank order
//! - `snapshot`: Immutable published rankings
//! - `errors`: Error taxonomy

pub mod ids;
pub mod score;
pub mod snapshot;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::score::*;
    pub use crate::snapshot::*;
    pub use crate::errors::*;
}
