//! Configuration for the coordination layer
//!
//! Loaded from environment variables with sensible defaults, the same way
//! the rest of the deployment configures its services. None of these knobs
//! change semantics, only timing and addressing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coordinator-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Redis URL for the shared frontier, dedup filter and lock
    pub redis_url: String,

    /// Redis connection pool size
    pub redis_pool_size: usize,

    /// Key prefix for namespacing shared keys
    pub key_prefix: String,

    /// Frontier lock lease in milliseconds
    pub lock_lease_ms: u64,

    /// Bounded wait window for frontier lock acquisition, in milliseconds
    pub lock_wait_ms: u64,

    /// Heartbeat sweep interval in seconds
    pub tick_seconds: u64,

    /// Ticks without a heartbeat before a worker or job is presumed dead
    pub max_unresponsive_ticks: u32,

    /// Interval at which workers send heartbeats, in seconds
    pub heartbeat_interval_secs: u64,

    /// Default deadline for waiting on all started workers to finish
    pub wait_all_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            redis_pool_size: 10,
            key_prefix: "fleetcrawl".to_string(),
            lock_lease_ms: 2_000,
            lock_wait_ms: 500,
            tick_seconds: 5,
            max_unresponsive_ticks: 3,
            heartbeat_interval_secs: 2,
            wait_all_timeout_secs: 300,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            redis_url: std::env::var("FLEETCRAWL_REDIS_URL").unwrap_or(defaults.redis_url),
            redis_pool_size: env_parse("FLEETCRAWL_REDIS_POOL_SIZE", defaults.redis_pool_size),
            key_prefix: std::env::var("FLEETCRAWL_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            lock_lease_ms: env_parse("FLEETCRAWL_LOCK_LEASE_MS", defaults.lock_lease_ms),
            lock_wait_ms: env_parse("FLEETCRAWL_LOCK_WAIT_MS", defaults.lock_wait_ms),
            tick_seconds: env_parse("FLEETCRAWL_TICK_SECONDS", defaults.tick_seconds),
            max_unresponsive_ticks: env_parse(
                "FLEETCRAWL_MAX_UNRESPONSIVE_TICKS",
                defaults.max_unresponsive_ticks,
            ),
            heartbeat_interval_secs: env_parse(
                "FLEETCRAWL_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            ),
            wait_all_timeout_secs: env_parse(
                "FLEETCRAWL_WAIT_ALL_TIMEOUT_SECS",
                defaults.wait_all_timeout_secs,
            ),
        }
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn wait_all_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_all_timeout_secs)
    }

    /// Staleness threshold in milliseconds: `tick_seconds * max_unresponsive_ticks`
    pub fn unresponsive_threshold_ms(&self) -> i64 {
        (self.tick_seconds as i64) * 1_000 * (self.max_unresponsive_ticks as i64)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
