// Core data structures for the crawl coordination layer

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque identity of a crawler worker process
///
/// Equality is by value. Construction rejects empty identifiers, so a
/// `WorkerId` held anywhere in the system is always meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a worker id, rejecting empty or whitespace-only input
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::Configuration {
                reason: "worker id must not be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Queued, waiting for the first worker to join
    Queued,

    /// At least one worker has joined and is crawling
    Running,

    /// All started workers finished; terminal
    Completed,

    /// Failed via error push, heartbeat timeout or cancellation; terminal
    Errored,
}

impl JobState {
    /// Only queued and running jobs may be cancelled
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Terminal states are history, never mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

/// An error recorded against a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub source: Option<String>,
    pub stack_trace: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// A crawl job and its collected results
///
/// Owned exclusively by the job store; mutated only through assignment
/// protocol operations and the heartbeat monitor. Never physically deleted:
/// terminal state is history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub date_queued: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_completed: Option<DateTime<Utc>>,

    /// Units of work completed across all workers
    pub crawl_count: u64,

    /// Data items extracted so far
    pub collected_data: Vec<serde_json::Value>,

    /// Errors pushed by workers or the heartbeat monitor
    pub errors: Vec<JobError>,

    /// Effective stop conditions (user-supplied plus the mandatory bounds)
    pub stop_conditions: Vec<StopCondition>,

    /// Job-level liveness signal, refreshed whenever an assigned worker
    /// heartbeats or pushes data
    pub last_heartbeat: DateTime<Utc>,
}

impl Job {
    /// Create a freshly queued job
    pub fn queued(stop_conditions: Vec<StopCondition>, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            state: JobState::Queued,
            date_queued: now,
            date_started: None,
            date_completed: None,
            crawl_count: 0,
            collected_data: Vec::new(),
            errors: Vec::new(),
            stop_conditions,
            last_heartbeat: now,
        }
    }

    /// Progress snapshot for stop-condition evaluation
    pub fn progress(&self, now: DateTime<Utc>) -> Progress {
        Progress {
            crawl_count: self.crawl_count,
            data_count: self.collected_data.len() as u64,
            duration: now - self.date_started.unwrap_or(self.date_queued),
        }
    }
}

/// One row per known worker in the durable fleet registry
///
/// `job_id` is `None` while the worker is idle. A non-null `job_id` must
/// reference a job in `Running` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub worker_id: WorkerId,
    pub job_id: Option<JobId>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerAssignment {
    /// Create an idle assignment row for a freshly registered worker
    pub fn idle(worker_id: WorkerId, now: DateTime<Utc>) -> Self {
        Self {
            worker_id,
            job_id: None,
            last_heartbeat: now,
        }
    }

    /// Milliseconds since the last heartbeat
    pub fn heartbeat_age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat).num_milliseconds()
    }
}

/// Kind of configured crawl limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopConditionKind {
    MaxCrawlCount,
    MaxDataCount,
    MaxDurationSeconds,

    /// Any kind this version does not understand. Deserializing foreign
    /// configuration lands here instead of failing, and evaluation turns it
    /// into a configuration error rather than "never stop".
    #[serde(other)]
    Unknown,
}

/// A configured limit that ends a crawl when satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCondition {
    pub kind: StopConditionKind,
    pub value: Option<i64>,
}

impl StopCondition {
    pub fn new(kind: StopConditionKind, value: i64) -> Self {
        Self {
            kind,
            value: Some(value),
        }
    }
}

/// Snapshot of crawl progress for stop-condition evaluation
#[derive(Debug, Clone)]
pub struct Progress {
    pub crawl_count: u64,
    pub data_count: u64,
    pub duration: Duration,
}

/// Output of rendering one page: extracted data plus outbound links
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub data: Vec<serde_json::Value>,
    pub links: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_rejects_empty() {
        assert!(WorkerId::new("").is_err());
        assert!(WorkerId::new("   ").is_err());
        assert!(WorkerId::new("crawler-1").is_ok());
    }

    #[test]
    fn test_worker_id_equality_by_value() {
        let a = WorkerId::new("w1").unwrap();
        let b = WorkerId::new("w1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_job_state_cancellable() {
        assert!(JobState::Queued.is_cancellable());
        assert!(JobState::Running.is_cancellable());
        assert!(!JobState::Completed.is_cancellable());
        assert!(!JobState::Errored.is_cancellable());
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Errored.is_terminal());
        assert!(!JobState::Queued.is_terminal());
    }

    #[test]
    fn test_job_progress_uses_start_time() {
        let queued = Utc::now() - Duration::seconds(100);
        let mut job = Job::queued(vec![], queued);
        job.date_started = Some(queued + Duration::seconds(40));
        job.crawl_count = 7;

        let progress = job.progress(queued + Duration::seconds(100));
        assert_eq!(progress.crawl_count, 7);
        assert_eq!(progress.duration.num_seconds(), 60);
    }

    #[test]
    fn test_stop_condition_kind_unknown_from_serde() {
        let condition: StopCondition =
            serde_json::from_str(r#"{"kind":"max_page_depth","value":3}"#).unwrap();
        assert_eq!(condition.kind, StopConditionKind::Unknown);
    }
}
