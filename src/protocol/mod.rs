//! Assignment protocol
//!
//! One handler per inbound event, each mapping the event to registry and
//! job-store operations plus a typed acknowledgement. Expected failures
//! (unknown worker, wrong job state) come back as recoverable error values
//! naming the missing entity; nothing here throws for a replayed or stale
//! message. Handlers are idempotent where the durable state allows it: a
//! duplicate `WorkerJoined` re-sets the same fields, a heartbeat for an
//! evicted worker fails cleanly as not-found.
//!
//! Every mutation behind a handler is a single atomic store update, so a
//! caller cancelled between awaits never leaves a half-applied transition
//! visible to anyone else.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fleet::{CancellationRegistry, CrawlerFleetManager};
use crate::jobs::JobStore;
use crate::models::{Job, JobId, JobState, StopCondition, WorkerId};
use crate::registry::CrawlerFleetRegistry;
use crate::transport::{Notice, SharedTransport};

/// Inbound coordination event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    WorkerUp {
        worker_id: WorkerId,
    },
    WorkerDown {
        worker_id: WorkerId,
    },
    WorkerHeartbeat {
        worker_id: WorkerId,
    },
    WorkerJoined {
        worker_id: WorkerId,
        job_id: JobId,
    },
    WorkerLeft {
        worker_id: WorkerId,
        job_id: JobId,
    },
    JobQueued {
        stop_conditions: Vec<StopCondition>,
    },
    JobCancelled {
        job_id: JobId,
    },
    DataPushed {
        job_id: JobId,
        data: Vec<serde_json::Value>,
    },
    ErrorPushed {
        job_id: JobId,
        message: String,
        source: Option<String>,
        stack_trace: Option<String>,
    },
}

/// Acknowledgement returned to the sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ack {
    Done,
    Queued { job_id: JobId },
}

/// Message-driven state transitions over registry, store, fan-in tracker
/// and cancellation registry
pub struct AssignmentProtocol {
    registry: Arc<CrawlerFleetRegistry>,
    jobs: Arc<JobStore>,
    fleet: Arc<CrawlerFleetManager>,
    cancellations: Arc<CancellationRegistry>,
    transport: SharedTransport,
}

impl AssignmentProtocol {
    pub fn new(
        registry: Arc<CrawlerFleetRegistry>,
        jobs: Arc<JobStore>,
        fleet: Arc<CrawlerFleetManager>,
        cancellations: Arc<CancellationRegistry>,
        transport: SharedTransport,
    ) -> Self {
        Self {
            registry,
            jobs,
            fleet,
            cancellations,
            transport,
        }
    }

    /// Dispatch one inbound message to its handler
    pub async fn handle(&self, message: Message) -> Result<Ack> {
        match message {
            Message::WorkerUp { worker_id } => {
                self.registry.worker_up(&worker_id).await?;
                Ok(Ack::Done)
            }
            Message::WorkerDown { worker_id } => {
                self.registry.worker_down(&worker_id).await?;
                Ok(Ack::Done)
            }
            Message::WorkerHeartbeat { worker_id } => {
                self.registry.worker_heartbeat(&worker_id).await?;
                Ok(Ack::Done)
            }
            Message::WorkerJoined { worker_id, job_id } => {
                self.worker_joined(&worker_id, job_id).await?;
                Ok(Ack::Done)
            }
            Message::WorkerLeft { worker_id, job_id } => {
                self.worker_left(&worker_id, job_id).await?;
                Ok(Ack::Done)
            }
            Message::JobQueued { stop_conditions } => {
                let job = self.queue_job(stop_conditions).await?;
                Ok(Ack::Queued { job_id: job.id })
            }
            Message::JobCancelled { job_id } => {
                self.cancel_job(job_id).await?;
                Ok(Ack::Done)
            }
            Message::DataPushed { job_id, data } => {
                self.jobs.append_data(job_id, data).await?;
                Ok(Ack::Done)
            }
            Message::ErrorPushed {
                job_id,
                message,
                source,
                stack_trace,
            } => {
                self.error_pushed(job_id, message, source, stack_trace)
                    .await?;
                Ok(Ack::Done)
            }
        }
    }

    /// Queue a new job and announce it to the fleet
    pub async fn queue_job(&self, stop_conditions: Vec<StopCondition>) -> Result<Job> {
        let job = self.jobs.queue(stop_conditions).await?;
        self.cancellations.get_or_create(job.id);

        self.transport
            .publish(Notice::JobAvailable { job_id: job.id })
            .await?;

        Ok(job)
    }

    /// Cancel a queued or running job
    ///
    /// The job moves to `Errored` with the cancellation recorded, the
    /// fleet-wide cancellation signal flips, and the fan-in tracker is
    /// discarded — nothing will wait on the job's workers anymore.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<Job> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        if !job.state.is_cancellable() {
            return Err(Error::InvalidJobState {
                job_id,
                actual: job.state,
                required: JobState::Running,
            });
        }

        let cancelled = self
            .jobs
            .mark_errored(job_id, "cancelled by request", None, None)
            .await?;

        self.cancellations.cancel(job_id);
        self.transport
            .publish(Notice::JobCancelled { job_id })
            .await?;

        self.fleet.clear(job_id);
        self.cancellations.dispose(job_id);

        tracing::info!(%job_id, "job cancelled");
        Ok(cancelled)
    }

    /// Wait for every started worker to finish, then mark the job completed
    ///
    /// Called by the flow that queued the job. A timeout comes back as the
    /// distinct [`Error::WaitTimeout`] — the job is still being worked on and
    /// the caller may wait again. Tracking state is discarded only once the
    /// job actually reaches a terminal state.
    pub async fn finalize_job(&self, job_id: JobId, timeout: std::time::Duration) -> Result<Job> {
        self.fleet.wait_all_finished(job_id, timeout).await?;

        match self.jobs.mark_completed(job_id).await {
            Ok(job) => {
                self.fleet.clear(job_id);
                self.cancellations.dispose(job_id);
                tracing::info!(%job_id, crawl_count = job.crawl_count, "job completed");
                Ok(job)
            }
            Err(e) => {
                // The monitor or an error push beat us to a terminal state;
                // the tracker is dead weight either way.
                if let Error::InvalidJobState { actual, .. } = &e {
                    if actual.is_terminal() {
                        self.fleet.clear(job_id);
                        self.cancellations.dispose(job_id);
                    }
                }
                Err(e)
            }
        }
    }

    async fn worker_joined(&self, worker_id: &WorkerId, job_id: JobId) -> Result<()> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        match job.state {
            // First joiner drives the queued job to running.
            JobState::Queued => match self.jobs.mark_running(job_id).await {
                Ok(_) => {}
                // A concurrent joiner won the transition; that is fine.
                Err(Error::InvalidJobState { actual, .. }) if actual == JobState::Running => {}
                Err(e) => return Err(e),
            },
            JobState::Running => {}
            JobState::Completed | JobState::Errored => {
                return Err(Error::InvalidJobState {
                    job_id,
                    actual: job.state,
                    required: JobState::Running,
                });
            }
        }

        self.registry.worker_joined(worker_id, job_id).await?;
        self.fleet.start(worker_id, job_id);
        Ok(())
    }

    async fn worker_left(&self, worker_id: &WorkerId, job_id: JobId) -> Result<()> {
        // The barrier is released before the registry row is touched: a
        // worker evicted mid-crawl has no row anymore, but its finish must
        // still count or finalization would wait out the full deadline.
        let finished = self.fleet.finish(worker_id, job_id);

        match self.registry.worker_left(worker_id).await {
            Ok(()) => finished,
            Err(Error::NotFound { .. }) if finished.is_ok() => {
                tracing::debug!(%worker_id, %job_id, "worker left after eviction");
                Ok(())
            }
            Err(e) => {
                finished?;
                Err(e)
            }
        }
    }

    async fn error_pushed(
        &self,
        job_id: JobId,
        message: String,
        source: Option<String>,
        stack_trace: Option<String>,
    ) -> Result<()> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        if job.state == JobState::Running {
            self.jobs
                .mark_errored(job_id, message, source, stack_trace)
                .await?;
        } else {
            self.jobs
                .append_error(job_id, message, source, stack_trace)
                .await?;
        }
        Ok(())
    }
}
