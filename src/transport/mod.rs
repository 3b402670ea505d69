//! Pub/sub transport collaborator
//!
//! The coordinator pushes notices to workers (a new job is available, a
//! worker should resume a running job, a job was cancelled) through this
//! seam. Delivery is at-least-once; every notice handler on the worker side
//! is idempotent, so the broker wiring behind the trait is free to redeliver.
//!
//! [`BroadcastTransport`] is the in-process implementation used by tests and
//! single-host deployments, fanning out over a tokio broadcast channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::models::{JobId, WorkerId};

/// Outbound notice from coordinator to workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A job was queued and is open for joiners
    JobAvailable { job_id: JobId },

    /// Directed at one worker: a job is already running, come help
    ResumeJob { worker_id: WorkerId, job_id: JobId },

    /// The job was cancelled; workers should stop pulling for it
    JobCancelled { job_id: JobId },
}

/// Message transport collaborator
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Publish a notice to the fleet
    async fn publish(&self, notice: Notice) -> Result<()>;
}

/// Shared handle to a transport
pub type SharedTransport = Arc<dyn MessageTransport>;

/// In-process broadcast transport
pub struct BroadcastTransport {
    tx: broadcast::Sender<Notice>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the notice stream
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl MessageTransport for BroadcastTransport {
    async fn publish(&self, notice: Notice) -> Result<()> {
        // A send error only means no subscriber is currently listening.
        if self.tx.send(notice.clone()).is_err() {
            tracing::debug!(?notice, "notice published with no subscribers");
        }
        Ok(())
    }
}

/// Transport that drops every notice, for tests that ignore notifications
#[derive(Default)]
pub struct NullTransport;

#[async_trait]
impl MessageTransport for NullTransport {
    async fn publish(&self, _notice: Notice) -> Result<()> {
        Ok(())
    }
}

impl Error {
    /// Shorthand for transport-layer failures
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            reason: reason.to_string(),
        }
    }
}
