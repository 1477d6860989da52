//! Service configuration from environment variables
//!
//! Every variable is optional. A value that is present but unparsable is an
//! error rather than a silent fallback to the default.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use types::ids::LeaderboardId;
use types::score::SubmitMode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Where refresh cycles read the ranking from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankingSource {
    /// Ask the store for `top(K)` every cycle.
    #[default]
    Store,
    /// Keep a RankingTable in process, seeded from one store scan.
    Memory,
}

impl FromStr for RankingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" => Ok(RankingSource::Store),
            "memory" => Ok(RankingSource::Memory),
            other => Err(format!("unknown ranking source: {}", other)),
        }
    }
}

impl fmt::Display for RankingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankingSource::Store => f.write_str("store"),
            RankingSource::Memory => f.write_str("memory"),
        }
    }
}

/// Behaviour of one leaderboard instance.
#[derive(Debug, Clone)]
pub struct LeaderboardConfig {
    /// Number of ranked entries published (K).
    pub top_k: usize,
    /// Period of the background refresh cycle while Active.
    pub refresh_interval: Duration,
    /// Longest a broadcast waits on one subscriber's queue.
    pub send_timeout: Duration,
    /// Outbound queue length per subscriber.
    pub subscriber_buffer: usize,
    /// Consecutive failed cycles before a critical alert.
    pub failure_alert_threshold: u32,
    pub score_mode: SubmitMode,
    pub ranking_source: RankingSource,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            refresh_interval: Duration::from_millis(1000),
            send_timeout: Duration::from_millis(2000),
            subscriber_buffer: 64,
            failure_alert_threshold: 5,
            score_mode: SubmitMode::Increment,
            ranking_source: RankingSource::Store,
        }
    }
}

/// Per-entity submission token bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub burst: u32,
    pub per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 20,
            per_second: 20.0,
        }
    }
}

/// Top-level configuration of the leaderboard service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub leaderboard_id: LeaderboardId,
    /// Redis connection URL; the in-memory store is used when unset.
    pub redis_url: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub leaderboard: LeaderboardConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            leaderboard_id: LeaderboardId::default(),
            redis_url: None,
            rate_limit: RateLimitConfig::default(),
            leaderboard: LeaderboardConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment (after `.env`).
    ///
    /// Environment variables:
    /// - `LEADERBOARD_BIND_ADDR` (default: 0.0.0.0:8765)
    /// - `LEADERBOARD_ID` (default: default)
    /// - `LEADERBOARD_TOP_K` (default: 10)
    /// - `LEADERBOARD_REFRESH_INTERVAL_MS` (default: 1000)
    /// - `LEADERBOARD_SEND_TIMEOUT_MS` (default: 2000)
    /// - `LEADERBOARD_SUBSCRIBER_BUFFER` (default: 64)
    /// - `LEADERBOARD_FAILURE_ALERT_THRESHOLD` (default: 5)
    /// - `LEADERBOARD_SCORE_MODE` (default: increment)
    /// - `LEADERBOARD_RANKING_SOURCE` (default: store)
    /// - `LEADERBOARD_SUBMIT_BURST` (default: 20)
    /// - `LEADERBOARD_SUBMIT_RATE_PER_SEC` (default: 20)
    /// - `REDIS_URL` (default: unset, in-memory store)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let leaderboard = LeaderboardConfig {
            top_k: parse(&get, "LEADERBOARD_TOP_K", defaults.leaderboard.top_k)?,
            refresh_interval: positive_millis(
                &get,
                "LEADERBOARD_REFRESH_INTERVAL_MS",
                defaults.leaderboard.refresh_interval,
            )?,
            send_timeout: positive_millis(
                &get,
                "LEADERBOARD_SEND_TIMEOUT_MS",
                defaults.leaderboard.send_timeout,
            )?,
            subscriber_buffer: positive(
                &get,
                "LEADERBOARD_SUBSCRIBER_BUFFER",
                defaults.leaderboard.subscriber_buffer,
            )?,
            failure_alert_threshold: positive(
                &get,
                "LEADERBOARD_FAILURE_ALERT_THRESHOLD",
                defaults.leaderboard.failure_alert_threshold,
            )?,
            score_mode: parse(&get, "LEADERBOARD_SCORE_MODE", defaults.leaderboard.score_mode)?,
            ranking_source: parse(
                &get,
                "LEADERBOARD_RANKING_SOURCE",
                defaults.leaderboard.ranking_source,
            )?,
        };

        let per_second: f64 = parse(
            &get,
            "LEADERBOARD_SUBMIT_RATE_PER_SEC",
            defaults.rate_limit.per_second,
        )?;
        if !(per_second.is_finite() && per_second > 0.0) {
            return Err(ConfigError::Invalid {
                key: "LEADERBOARD_SUBMIT_RATE_PER_SEC",
                value: per_second.to_string(),
            });
        }

        Ok(Self {
            bind_addr: parse(&get, "LEADERBOARD_BIND_ADDR", defaults.bind_addr)?,
            leaderboard_id: get("LEADERBOARD_ID")
                .map(|v| LeaderboardId::new(v.trim()))
                .unwrap_or(defaults.leaderboard_id),
            redis_url: get("REDIS_URL"),
            rate_limit: RateLimitConfig {
                burst: positive(&get, "LEADERBOARD_SUBMIT_BURST", defaults.rate_limit.burst)?,
                per_second,
            },
            leaderboard,
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn positive<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default + ToString,
    G: Fn(&str) -> Option<String>,
{
    let value = parse(get, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn positive_millis<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let millis: u64 = positive(get, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]).unwrap();

        assert_eq!(config.bind_addr.port(), 8765);
        assert_eq!(config.leaderboard_id.as_str(), "default");
        assert!(config.redis_url.is_none());
        assert_eq!(config.leaderboard.top_k, 10);
        assert_eq!(config.leaderboard.refresh_interval, Duration::from_secs(1));
        assert_eq!(config.leaderboard.send_timeout, Duration::from_secs(2));
        assert_eq!(config.leaderboard.subscriber_buffer, 64);
        assert_eq!(config.leaderboard.failure_alert_threshold, 5);
        assert_eq!(config.leaderboard.score_mode, SubmitMode::Increment);
        assert_eq!(config.leaderboard.ranking_source, RankingSource::Store);
        assert_eq!(config.rate_limit, RateLimitConfig::default());
    }

    #[test]
    fn test_custom_config() {
        let config = load(&[
            ("LEADERBOARD_BIND_ADDR", "127.0.0.1:9000"),
            ("LEADERBOARD_ID", "weekly"),
            ("LEADERBOARD_TOP_K", "3"),
            ("LEADERBOARD_REFRESH_INTERVAL_MS", "250"),
            ("LEADERBOARD_SCORE_MODE", "replace"),
            ("LEADERBOARD_RANKING_SOURCE", "memory"),
            ("LEADERBOARD_SUBMIT_RATE_PER_SEC", "0.5"),
            ("REDIS_URL", "redis://cache:6379/"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.leaderboard_id.as_str(), "weekly");
        assert_eq!(config.leaderboard.top_k, 3);
        assert_eq!(config.leaderboard.refresh_interval, Duration::from_millis(250));
        assert_eq!(config.leaderboard.score_mode, SubmitMode::Replace);
        assert_eq!(config.leaderboard.ranking_source, RankingSource::Memory);
        assert_eq!(config.rate_limit.per_second, 0.5);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379/"));
    }

    #[test]
    fn test_zero_top_k_is_allowed() {
        let config = load(&[("LEADERBOARD_TOP_K", "0")]).unwrap();
        assert_eq!(config.leaderboard.top_k, 0);
    }

    #[test]
    fn test_blank_value_uses_default() {
        let config = load(&[("LEADERBOARD_TOP_K", "  ")]).unwrap();
        assert_eq!(config.leaderboard.top_k, 10);
    }

    #[test]
    fn test_malformed_value_is_rejected() {
        let err = load(&[("LEADERBOARD_TOP_K", "ten")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "LEADERBOARD_TOP_K",
                value: "ten".to_string()
            }
        );
        assert!(load(&[("LEADERBOARD_SCORE_MODE", "sum")]).is_err());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(load(&[("LEADERBOARD_REFRESH_INTERVAL_MS", "0")]).is_err());
        assert!(load(&[("LEADERBOARD_SUBSCRIBER_BUFFER", "0")]).is_err());
        assert!(load(&[("LEADERBOARD_SUBMIT_RATE_PER_SEC", "0")]).is_err());
    }
}
