//! Process-local fleet tracking
//!
//! [`CrawlerFleetManager`] answers one question without durable storage:
//! have all workers that started work on a job also finished? The component
//! that queues a job uses it as a fan-in barrier before marking the job
//! complete.
//!
//! Tracker entries are ephemeral, created on the first `start` for a job and
//! discarded on `clear`. The manager is valid only with a single coordinator
//! instance per deployment; it is deliberately not distributed.

pub mod cancel;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Entity, Error, Result};
use crate::models::{JobId, WorkerId};

pub use cancel::CancellationRegistry;

/// Per-job tracking entry
struct JobTracker {
    /// Started workers and whether each has finished
    finished: HashMap<WorkerId, bool>,

    /// Bumped on every finish so waiters re-check without missing one
    generation: watch::Sender<u64>,
}

impl JobTracker {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            finished: HashMap::new(),
            generation,
        }
    }

    fn all_finished(&self) -> bool {
        self.finished.values().all(|done| *done)
    }
}

/// Fan-in tracker over the workers of each active job
#[derive(Default)]
pub struct CrawlerFleetManager {
    jobs: Mutex<HashMap<JobId, JobTracker>>,
}

impl CrawlerFleetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a worker began work on a job
    ///
    /// Creates the job's tracker on first call. Re-starting after a finish
    /// re-arms the barrier for that worker.
    pub fn start(&self, worker_id: &WorkerId, job_id: JobId) {
        let mut jobs = self.jobs.lock().unwrap();
        let tracker = jobs.entry(job_id).or_insert_with(JobTracker::new);
        tracker.finished.insert(worker_id.clone(), false);

        tracing::debug!(%worker_id, %job_id, workers = tracker.finished.len(), "worker started");
    }

    /// Record that a worker finished its work on a job
    ///
    /// A finish for a job with no tracker is a not-found error (the job was
    /// cleared or never started). A finish for a tracked job by a worker that
    /// never started is a protocol-integrity violation: it indicates a bug in
    /// the calling protocol, not a normal runtime condition.
    pub fn finish(&self, worker_id: &WorkerId, job_id: JobId) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();

        let tracker = jobs.get_mut(&job_id).ok_or(Error::NotFound {
            entity: Entity::FleetTracker,
            id: job_id.to_string(),
        })?;

        match tracker.finished.get_mut(worker_id) {
            Some(done) => {
                *done = true;
                tracker.generation.send_modify(|g| *g += 1);
                tracing::debug!(%worker_id, %job_id, "worker finished");
                Ok(())
            }
            None => {
                tracing::error!(
                    %worker_id,
                    %job_id,
                    "finish without matching start; coordination bug"
                );
                Err(Error::ProtocolViolation {
                    reason: format!("finish for {worker_id} on job {job_id} has no matching start"),
                })
            }
        }
    }

    /// Block until every started worker has finished, or the timeout elapses
    ///
    /// Returns immediately when no worker ever started (vacuously satisfied)
    /// and after `clear`. On timeout the job is still being worked on — the
    /// error is the signal "not yet safe to finalize", nothing more.
    ///
    /// The check and the wait cannot miss a racing finish: the waiter
    /// subscribes to the finish generation before re-checking, so any finish
    /// after the check wakes it.
    pub async fn wait_all_finished(&self, job_id: JobId, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let mut generation = {
                let jobs = self.jobs.lock().unwrap();
                let Some(tracker) = jobs.get(&job_id) else {
                    return Ok(());
                };
                if tracker.all_finished() {
                    return Ok(());
                }
                tracker.generation.subscribe()
            };

            match tokio::time::timeout_at(deadline, generation.changed()).await {
                // A finish arrived; re-check the full set.
                Ok(Ok(())) => continue,
                // Tracker cleared while waiting; re-check resolves vacuously.
                Ok(Err(_)) => continue,
                Err(_) => {
                    return Err(Error::WaitTimeout {
                        job_id,
                        waited_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Discard all tracking state for a job
    ///
    /// Subsequent `finish` calls for the job fail as not-found. Pending
    /// waiters resolve vacuously.
    pub fn clear(&self, job_id: JobId) {
        let removed = self.jobs.lock().unwrap().remove(&job_id);
        if removed.is_some() {
            tracing::debug!(%job_id, "fleet tracker cleared");
        }
    }

    /// Number of workers that started on a job
    pub fn started_count(&self, job_id: JobId) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|t| t.finished.len())
            .unwrap_or(0)
    }
}
