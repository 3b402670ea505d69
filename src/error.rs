//! Unified error handling for the fleetcrawl crate
//!
//! Expected coordination failures (missing entities, state conflicts, lock
//! contention, fan-in timeouts) are values, not panics: every component
//! operation returns `Result<T, Error>` and callers branch on the variant.
//! Only protocol-integrity violations and configuration errors abort the
//! calling operation; neither ever takes down the process.

use thiserror::Error;

use crate::models::{JobId, JobState, WorkerId};

/// Result type used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Kind of entity a not-found error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Worker,
    Job,
    FleetTracker,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker => f.write_str("worker"),
            Self::Job => f.write_str("job"),
            Self::FleetTracker => f.write_str("fleet tracker"),
        }
    }
}

/// Unified error type for coordination operations
#[derive(Error, Debug)]
pub enum Error {
    /// A worker, job or tracker entry the operation needs does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    /// A worker is already registered under the same id
    #[error("worker already registered: {worker_id}")]
    AlreadyRegistered { worker_id: WorkerId },

    /// The job is not in the state the requested transition needs
    #[error("job {job_id} is {actual:?}, operation requires {required:?}")]
    InvalidJobState {
        job_id: JobId,
        actual: JobState,
        required: JobState,
    },

    /// The frontier lock could not be acquired within the wait window
    ///
    /// Expected under load; callers retry with backoff.
    #[error("frontier lock contended: {key}")]
    Contention { key: String },

    /// A fan-in wait deadline elapsed before all started workers finished
    ///
    /// Means "job not yet safe to finalize", not that anything is wrong
    /// with the job itself.
    #[error("timed out after {waited_ms}ms waiting for workers on job {job_id}")]
    WaitTimeout { job_id: JobId, waited_ms: u64 },

    /// A coordination-protocol integrity violation, e.g. finish without a
    /// matching start. Indicates a bug in a caller, logged loudly.
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// Invalid or unrecognized configuration, e.g. an unknown stop-condition
    /// kind. Prevents the affected job from ever running unbounded.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Failure inside a storage collaborator (durable store or keyed store)
    #[error("store error during {operation}: {reason}")]
    Store { operation: String, reason: String },

    /// Failure publishing through the message transport
    #[error("transport error: {reason}")]
    Transport { reason: String },
}

impl Error {
    /// Whether the caller can reasonably retry the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AlreadyRegistered { .. }
                | Self::InvalidJobState { .. }
                | Self::Contention { .. }
                | Self::WaitTimeout { .. }
        )
    }

    /// Shorthand for store-layer failures
    pub fn store(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn worker_not_found(worker_id: &WorkerId) -> Self {
        Self::NotFound {
            entity: Entity::Worker,
            id: worker_id.to_string(),
        }
    }

    pub fn job_not_found(job_id: JobId) -> Self {
        Self::NotFound {
            entity: Entity::Job,
            id: job_id.to_string(),
        }
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::store("redis pool checkout", e)
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::store("redis command", e)
    }
}
