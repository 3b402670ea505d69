//! Per-job cancellation registry
//!
//! An explicit, lock-protected map of cancellation channels owned by one
//! long-lived component instance — not ambient static state. Workers hold a
//! receiver for the job they are crawling and stop promptly when it flips;
//! the protocol flips it on `JobCancelled` and disposes the entry once the
//! job is finalized.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::models::JobId;

/// Receiver side of a job's cancellation signal
pub type CancelSignal = watch::Receiver<bool>;

/// Lock-protected map of per-job cancellation channels
#[derive(Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<JobId, watch::Sender<bool>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cancellation signal for a job, creating the channel on first use
    pub fn get_or_create(&self, job_id: JobId) -> CancelSignal {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(job_id)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Flip a job's cancellation signal
    ///
    /// Returns `false` when no channel exists, i.e. nothing is listening.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(&job_id) {
            Some(sender) => {
                sender.send_replace(true);
                tracing::info!(%job_id, "cancellation signalled");
                true
            }
            None => false,
        }
    }

    /// Whether a job has been cancelled
    pub fn is_cancelled(&self, job_id: JobId) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|sender| *sender.borrow())
            .unwrap_or(false)
    }

    /// Drop a job's channel once the job is finalized
    pub fn dispose(&self, job_id: JobId) {
        self.entries.lock().unwrap().remove(&job_id);
    }
}
