//! fleetcrawl - Crawl Fleet Coordination
//!
//! Coordination layer for a fleet of crawler workers sharing one crawl:
//! durable job lifecycle, worker registry with heartbeat-based eviction, a
//! distributed URL frontier with duplicate filtering, fan-in completion
//! tracking and stop-condition enforcement.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Environment-driven configuration
//! - [`models`] - Core data structures and types
//! - [`jobs`] - Durable job store and lifecycle transitions
//! - [`registry`] - Durable fleet registry of workers and assignments
//! - [`frontier`] - Shared URL frontier, dedup filter and distributed lock
//! - [`stop`] - Stop-condition evaluation
//! - [`fleet`] - Process-local fan-in tracking and cancellation signals
//! - [`monitor`] - Periodic heartbeat sweep
//! - [`protocol`] - Message-driven assignment protocol
//! - [`transport`] - Coordinator-to-worker notice transport
//! - [`worker`] - The crawl loop a worker process runs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetcrawl::config::CoordinatorConfig;
//! use fleetcrawl::frontier::{CrawlFrontier, RedisKeyedStore, RedisLock};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CoordinatorConfig::from_env();
//!     let store = Arc::new(RedisKeyedStore::new(&config)?);
//!     let lock = Arc::new(RedisLock::new(store.pool().clone()));
//!     let frontier = CrawlFrontier::new(store, lock, &config);
//!     frontier.enqueue("https://example.com/").await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod fleet;
pub mod frontier;
pub mod jobs;
pub mod models;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod stop;
pub mod store;
pub mod transport;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CoordinatorConfig;
    pub use crate::error::{Error, Result};
    pub use crate::fleet::{CancellationRegistry, CrawlerFleetManager};
    pub use crate::frontier::{CrawlFrontier, DedupFilter, Enqueued};
    pub use crate::jobs::JobStore;
    pub use crate::models::{Job, JobId, JobState, StopCondition, StopConditionKind, WorkerId};
    pub use crate::monitor::HeartbeatMonitor;
    pub use crate::protocol::{Ack, AssignmentProtocol, Message};
    pub use crate::registry::CrawlerFleetRegistry;
    pub use crate::worker::{CrawlWorker, Renderer};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
pub use models::{Job, JobId, JobState, WorkerId};
