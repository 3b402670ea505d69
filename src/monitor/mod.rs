//! Heartbeat monitor
//!
//! A recurring sweep over the durable state, run on an interval with an
//! explicit start/stop lifecycle. Two independent passes per tick:
//!
//! 1. worker eviction — registry rows whose heartbeat is older than
//!    `tick_seconds * max_unresponsive_ticks` are deleted. A soft failure
//!    detector: the evicted worker gets no say, and its next heartbeat fails
//!    as not-found, at which point it re-registers.
//! 2. job failure — running jobs whose job-level heartbeat crossed the same
//!    threshold move to `Errored` with the unresponsive duration recorded.
//!
//! Staleness is strict: a heartbeat aged exactly at the threshold survives.
//! Both passes are idempotent; sweeping twice with no new heartbeats changes
//! nothing the second time.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::clock::SharedClock;
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::jobs::JobStore;
use crate::store::AssignmentStore;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub workers_evicted: usize,
    pub jobs_failed: usize,
}

/// Periodic liveness sweep over workers and jobs
pub struct HeartbeatMonitor {
    assignments: Arc<dyn AssignmentStore>,
    jobs: Arc<JobStore>,
    clock: SharedClock,
    tick_seconds: u64,
    threshold_ms: i64,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HeartbeatMonitor {
    pub fn new(
        assignments: Arc<dyn AssignmentStore>,
        jobs: Arc<JobStore>,
        clock: SharedClock,
        config: &CoordinatorConfig,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        Self {
            assignments,
            jobs,
            clock,
            tick_seconds: config.tick_seconds,
            threshold_ms: config.unresponsive_threshold_ms(),
            shutdown,
            shutdown_rx,
        }
    }

    /// Run one sweep: evict stale workers, fail stale running jobs
    pub async fn sweep(&self) -> Result<SweepStats> {
        let now = self.clock.now();
        let mut stats = SweepStats::default();

        for row in self.assignments.list().await? {
            let age_ms = row.heartbeat_age_ms(now);
            if age_ms > self.threshold_ms {
                if self.assignments.remove(&row.worker_id).await? {
                    stats.workers_evicted += 1;
                    tracing::warn!(
                        worker_id = %row.worker_id,
                        age_ms,
                        threshold_ms = self.threshold_ms,
                        "evicting unresponsive worker"
                    );
                }
            }
        }

        // Fetched after eviction so a job whose only worker just vanished is
        // still judged by its own heartbeat field, not the missing row.
        for job in self.jobs.running_jobs().await? {
            let age_ms = (now - job.last_heartbeat).num_milliseconds();
            if age_ms > self.threshold_ms {
                let message = format!(
                    "job unresponsive for {age_ms}ms (threshold {}ms)",
                    self.threshold_ms
                );
                match self.jobs.mark_errored(job.id, message, None, None).await {
                    Ok(_) => stats.jobs_failed += 1,
                    // Lost a race with a concurrent transition; the job is
                    // no longer ours to fail.
                    Err(e) if e.is_recoverable() => {
                        tracing::debug!(job_id = %job.id, error = %e, "job failure skipped");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if stats != SweepStats::default() {
            tracing::info!(
                workers_evicted = stats.workers_evicted,
                jobs_failed = stats.jobs_failed,
                "heartbeat sweep acted"
            );
        }

        Ok(stats)
    }

    /// Spawn the periodic sweep loop
    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let shutdown = self.shutdown.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let tick = Duration::from_secs(self.tick_seconds);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!(error = %e, "heartbeat sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("heartbeat monitor shutting down");
                        break;
                    }
                }
            }
        });

        MonitorHandle { handle, shutdown }
    }
}

/// Handle to the running monitor loop
pub struct MonitorHandle {
    handle: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MonitorHandle {
    /// Signal shutdown and wait for the loop to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
