//! Durable crawler fleet registry
//!
//! One row per known worker: current job assignment and last heartbeat.
//! Every operation reports missing or conflicting entities as typed,
//! recoverable errors — a worker evicted between its heartbeats simply gets
//! "not found" back and re-registers; nothing here escalates to a crash.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::models::{JobId, JobState, WorkerAssignment, WorkerId};
use crate::store::{AssignmentStore, JobRepository};
use crate::transport::{Notice, SharedTransport};

/// Durable record of known workers and their assignments
pub struct CrawlerFleetRegistry {
    assignments: Arc<dyn AssignmentStore>,
    jobs: Arc<dyn JobRepository>,
    transport: SharedTransport,
    clock: SharedClock,
}

impl CrawlerFleetRegistry {
    pub fn new(
        assignments: Arc<dyn AssignmentStore>,
        jobs: Arc<dyn JobRepository>,
        transport: SharedTransport,
        clock: SharedClock,
    ) -> Self {
        Self {
            assignments,
            jobs,
            transport,
            clock,
        }
    }

    /// Register a new worker
    ///
    /// Fails with [`Error::AlreadyRegistered`] if a row exists. When a job is
    /// already running, a directed resume notice is published so the new
    /// worker can help; publish failure is logged, never fatal to
    /// registration.
    pub async fn worker_up(&self, worker_id: &WorkerId) -> Result<()> {
        let row = WorkerAssignment::idle(worker_id.clone(), self.clock.now());
        if !self.assignments.insert_new(row).await? {
            return Err(Error::AlreadyRegistered {
                worker_id: worker_id.clone(),
            });
        }

        tracing::info!(%worker_id, "worker registered");

        if let Some(job) = self.jobs.running().await?.into_iter().next() {
            let notice = Notice::ResumeJob {
                worker_id: worker_id.clone(),
                job_id: job.id,
            };
            if let Err(e) = self.transport.publish(notice).await {
                tracing::warn!(%worker_id, job_id = %job.id, error = %e, "resume notice failed");
            }
        }

        Ok(())
    }

    /// Remove a worker's row
    pub async fn worker_down(&self, worker_id: &WorkerId) -> Result<()> {
        if !self.assignments.remove(worker_id).await? {
            return Err(Error::worker_not_found(worker_id));
        }
        tracing::info!(%worker_id, "worker deregistered");
        Ok(())
    }

    /// Refresh a worker's heartbeat
    ///
    /// Also refreshes the assigned job's heartbeat, which is what keeps the
    /// job alive in the monitor's eyes while any of its workers are healthy.
    pub async fn worker_heartbeat(&self, worker_id: &WorkerId) -> Result<()> {
        let now = self.clock.now();
        let row = self
            .assignments
            .update(worker_id, Box::new(move |row| row.last_heartbeat = now))
            .await?
            .ok_or_else(|| Error::worker_not_found(worker_id))?;

        if let Some(job_id) = row.job_id {
            // The job may have reached a terminal state since assignment;
            // a missed touch is harmless.
            self.jobs
                .update(job_id, Box::new(move |job| job.last_heartbeat = now))
                .await?;
        }

        Ok(())
    }

    /// Assign a worker to a running job
    ///
    /// The job must exist and be `Running`; the invariant that a non-null
    /// assignment always references a running job is enforced here.
    pub async fn worker_joined(&self, worker_id: &WorkerId, job_id: JobId) -> Result<()> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        if job.state != JobState::Running {
            return Err(Error::InvalidJobState {
                job_id,
                actual: job.state,
                required: JobState::Running,
            });
        }

        let now = self.clock.now();
        self.assignments
            .update(
                worker_id,
                Box::new(move |row| {
                    row.job_id = Some(job_id);
                    row.last_heartbeat = now;
                }),
            )
            .await?
            .ok_or_else(|| Error::worker_not_found(worker_id))?;

        tracing::info!(%worker_id, %job_id, "worker joined job");
        Ok(())
    }

    /// Clear a worker's assignment
    pub async fn worker_left(&self, worker_id: &WorkerId) -> Result<()> {
        let now = self.clock.now();
        self.assignments
            .update(
                worker_id,
                Box::new(move |row| {
                    row.job_id = None;
                    row.last_heartbeat = now;
                }),
            )
            .await?
            .ok_or_else(|| Error::worker_not_found(worker_id))?;

        tracing::info!(%worker_id, "worker left job");
        Ok(())
    }

    /// Fetch one worker's row
    pub async fn get(&self, worker_id: &WorkerId) -> Result<Option<WorkerAssignment>> {
        self.assignments.get(worker_id).await
    }

    /// All known worker rows
    pub async fn list(&self) -> Result<Vec<WorkerAssignment>> {
        self.assignments.list().await
    }
}
