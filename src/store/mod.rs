//! Durable-store collaborators
//!
//! The coordination core does not pick a persistence technology. It consumes
//! two narrow traits — one for job records, one for worker-assignment rows —
//! with per-entity atomic update semantics: a mutation is applied as a single
//! closure under the store's own exclusion, so a cancelled caller can never
//! leave a half-updated record behind.
//!
//! [`MemoryStore`] implements both traits over locked maps. It backs the test
//! suite and single-process deployments; production deployments substitute a
//! database-backed implementation with the same contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{Job, JobId, JobState, WorkerAssignment, WorkerId};

/// Atomic single-record mutation
pub type Mutation<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Durable storage for job records
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job record
    async fn insert(&self, job: Job) -> Result<()>;

    /// Fetch a job by id across all lifecycle states
    async fn get(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Apply one atomic mutation to a job record
    ///
    /// Returns the updated record, or `None` if the job does not exist.
    /// The mutation either applies fully or not at all.
    async fn update(&self, job_id: JobId, mutate: Mutation<Job>) -> Result<Option<Job>>;

    /// All jobs currently in `Running` state
    async fn running(&self) -> Result<Vec<Job>>;
}

/// Durable storage for worker-assignment rows
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Insert a row for a new worker; returns `false` if one already exists
    async fn insert_new(&self, assignment: WorkerAssignment) -> Result<bool>;

    /// Fetch a worker's row
    async fn get(&self, worker_id: &WorkerId) -> Result<Option<WorkerAssignment>>;

    /// Apply one atomic mutation to a worker's row
    ///
    /// Returns the updated row, or `None` if the worker is unknown.
    async fn update(
        &self,
        worker_id: &WorkerId,
        mutate: Mutation<WorkerAssignment>,
    ) -> Result<Option<WorkerAssignment>>;

    /// Delete a worker's row; returns `false` if the worker was unknown
    async fn remove(&self, worker_id: &WorkerId) -> Result<bool>;

    /// All known worker rows
    async fn list(&self) -> Result<Vec<WorkerAssignment>>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory implementation of both store traits
#[derive(Default)]
pub struct MemoryStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    assignments: Arc<RwLock<HashMap<WorkerId, WorkerAssignment>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn insert(&self, job: Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn update(&self, job_id: JobId, mutate: Mutation<Job>) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) => {
                mutate(job);
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn running(&self) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.state == JobState::Running)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn insert_new(&self, assignment: WorkerAssignment) -> Result<bool> {
        let mut assignments = self.assignments.write().await;
        if assignments.contains_key(&assignment.worker_id) {
            return Ok(false);
        }
        assignments.insert(assignment.worker_id.clone(), assignment);
        Ok(true)
    }

    async fn get(&self, worker_id: &WorkerId) -> Result<Option<WorkerAssignment>> {
        Ok(self.assignments.read().await.get(worker_id).cloned())
    }

    async fn update(
        &self,
        worker_id: &WorkerId,
        mutate: Mutation<WorkerAssignment>,
    ) -> Result<Option<WorkerAssignment>> {
        let mut assignments = self.assignments.write().await;
        match assignments.get_mut(worker_id) {
            Some(row) => {
                mutate(row);
                Ok(Some(row.clone()))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, worker_id: &WorkerId) -> Result<bool> {
        Ok(self.assignments.write().await.remove(worker_id).is_some())
    }

    async fn list(&self) -> Result<Vec<WorkerAssignment>> {
        Ok(self.assignments.read().await.values().cloned().collect())
    }
}
