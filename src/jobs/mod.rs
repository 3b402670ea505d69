//! Durable job store
//!
//! Owns the job lifecycle records. Queueing validates the caller's stop
//! conditions up front — a misconfigured job is rejected before it can ever
//! run — and always appends two mandatory upper bounds, so no job can run
//! unbounded no matter what the caller supplied.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::models::{Job, JobError, JobId, JobState, StopCondition, StopConditionKind};
use crate::stop;
use crate::store::JobRepository;

/// Mandatory cap on job duration: one day
pub const MAX_DURATION_SECONDS: i64 = 86_400;

/// Mandatory cap on units of work per job
pub const MAX_CRAWL_COUNT: i64 = 1_000_000;

/// Durable record of jobs and their lifecycle state
pub struct JobStore {
    repo: Arc<dyn JobRepository>,
    clock: SharedClock,
}

impl JobStore {
    pub fn new(repo: Arc<dyn JobRepository>, clock: SharedClock) -> Self {
        Self { repo, clock }
    }

    /// Queue a new job
    ///
    /// The user-supplied stop conditions are validated (an unknown kind or
    /// invalid value aborts queueing as a configuration error) and the two
    /// mandatory bounds are appended regardless of input.
    pub async fn queue(&self, user_conditions: Vec<StopCondition>) -> Result<Job> {
        stop::validate(&user_conditions)?;

        let mut conditions = user_conditions;
        conditions.push(StopCondition::new(
            StopConditionKind::MaxDurationSeconds,
            MAX_DURATION_SECONDS,
        ));
        conditions.push(StopCondition::new(
            StopConditionKind::MaxCrawlCount,
            MAX_CRAWL_COUNT,
        ));

        let job = Job::queued(conditions, self.clock.now());
        self.repo.insert(job.clone()).await?;

        tracing::info!(job_id = %job.id, "job queued");
        Ok(job)
    }

    /// Union lookup across all lifecycle states
    pub async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        self.repo.get(job_id).await
    }

    /// All jobs currently running
    pub async fn running_jobs(&self) -> Result<Vec<Job>> {
        self.repo.running().await
    }

    /// Transition `Queued -> Running`
    pub async fn mark_running(&self, job_id: JobId) -> Result<Job> {
        self.transition(job_id, JobState::Queued, |job, now| {
            job.state = JobState::Running;
            job.date_started = Some(now);
            job.last_heartbeat = now;
        })
        .await
    }

    /// Transition `Running -> Completed`
    pub async fn mark_completed(&self, job_id: JobId) -> Result<Job> {
        self.transition(job_id, JobState::Running, |job, now| {
            job.state = JobState::Completed;
            job.date_completed = Some(now);
        })
        .await
    }

    /// Move a non-terminal job to `Errored`, recording why
    pub async fn mark_errored(
        &self,
        job_id: JobId,
        message: impl Into<String>,
        source: Option<String>,
        stack_trace: Option<String>,
    ) -> Result<Job> {
        let now = self.clock.now();
        let message = message.into();

        let job = self
            .repo
            .get(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        if job.state.is_terminal() {
            return Err(Error::InvalidJobState {
                job_id,
                actual: job.state,
                required: JobState::Running,
            });
        }

        let updated = self
            .repo
            .update(
                job_id,
                Box::new(move |job| {
                    job.state = JobState::Errored;
                    job.date_completed = Some(now);
                    job.errors.push(JobError {
                        message,
                        source,
                        stack_trace,
                        occurred_at: now,
                    });
                }),
            )
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        tracing::warn!(%job_id, "job errored");
        Ok(updated)
    }

    /// Append an error to a job's error log without changing state
    pub async fn append_error(
        &self,
        job_id: JobId,
        message: impl Into<String>,
        source: Option<String>,
        stack_trace: Option<String>,
    ) -> Result<Job> {
        let now = self.clock.now();
        let message = message.into();

        self.repo
            .update(
                job_id,
                Box::new(move |job| {
                    job.errors.push(JobError {
                        message,
                        source,
                        stack_trace,
                        occurred_at: now,
                    });
                }),
            )
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    /// Append collected data from one unit of work
    ///
    /// Bumps the crawl count and refreshes the job heartbeat: a worker that
    /// is producing data is alive even if its heartbeat message is late.
    pub async fn append_data(
        &self,
        job_id: JobId,
        items: Vec<serde_json::Value>,
    ) -> Result<Job> {
        let now = self.clock.now();

        self.repo
            .update(
                job_id,
                Box::new(move |job| {
                    job.collected_data.extend(items);
                    job.crawl_count += 1;
                    job.last_heartbeat = now;
                }),
            )
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    async fn transition(
        &self,
        job_id: JobId,
        required: JobState,
        apply: impl FnOnce(&mut Job, chrono::DateTime<chrono::Utc>) + Send + 'static,
    ) -> Result<Job> {
        let job = self
            .repo
            .get(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        if job.state != required {
            return Err(Error::InvalidJobState {
                job_id,
                actual: job.state,
                required,
            });
        }

        let now = self.clock.now();
        // Re-checked inside the atomic update: a racing transition between
        // the read above and this write leaves the record untouched.
        let updated = self
            .repo
            .update(
                job_id,
                Box::new(move |job| {
                    if job.state == required {
                        apply(job, now);
                    }
                }),
            )
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::store::MemoryStore;

    fn job_store() -> JobStore {
        JobStore::new(Arc::new(MemoryStore::new()), system_clock())
    }

    #[tokio::test]
    async fn test_queue_appends_mandatory_bounds() {
        let store = job_store();
        let job = store.queue(vec![]).await.unwrap();

        assert!(job.stop_conditions.contains(&StopCondition::new(
            StopConditionKind::MaxDurationSeconds,
            86_400
        )));
        assert!(job.stop_conditions.contains(&StopCondition::new(
            StopConditionKind::MaxCrawlCount,
            1_000_000
        )));
    }

    #[tokio::test]
    async fn test_queue_keeps_user_conditions() {
        let store = job_store();
        let user = StopCondition::new(StopConditionKind::MaxDataCount, 50);
        let job = store.queue(vec![user.clone()]).await.unwrap();

        assert!(job.stop_conditions.contains(&user));
        assert_eq!(job.stop_conditions.len(), 3);
    }

    #[tokio::test]
    async fn test_queue_rejects_invalid_conditions() {
        let store = job_store();
        let result = store
            .queue(vec![StopCondition::new(StopConditionKind::Unknown, 1)])
            .await;
        assert!(matches!(result, Err(Error::Configuration { .. })));

        let result = store
            .queue(vec![StopCondition {
                kind: StopConditionKind::MaxCrawlCount,
                value: None,
            }])
            .await;
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let store = job_store();
        let job = store.queue(vec![]).await.unwrap();

        let running = store.mark_running(job.id).await.unwrap();
        assert_eq!(running.state, JobState::Running);
        assert!(running.date_started.is_some());

        let completed = store.mark_completed(job.id).await.unwrap();
        assert_eq!(completed.state, JobState::Completed);
        assert!(completed.date_completed.is_some());
    }

    #[tokio::test]
    async fn test_mark_running_requires_queued() {
        let store = job_store();
        let job = store.queue(vec![]).await.unwrap();
        store.mark_running(job.id).await.unwrap();

        let result = store.mark_running(job.id).await;
        assert!(matches!(result, Err(Error::InvalidJobState { .. })));
    }

    #[tokio::test]
    async fn test_mark_completed_requires_running() {
        let store = job_store();
        let job = store.queue(vec![]).await.unwrap();

        let result = store.mark_completed(job.id).await;
        assert!(matches!(result, Err(Error::InvalidJobState { .. })));
    }

    #[tokio::test]
    async fn test_mark_errored_records_reason() {
        let store = job_store();
        let job = store.queue(vec![]).await.unwrap();
        store.mark_running(job.id).await.unwrap();

        let errored = store
            .mark_errored(job.id, "renderer crashed", Some("w1".to_string()), None)
            .await
            .unwrap();
        assert_eq!(errored.state, JobState::Errored);
        assert_eq!(errored.errors.len(), 1);
        assert_eq!(errored.errors[0].message, "renderer crashed");
    }

    #[tokio::test]
    async fn test_mark_errored_rejects_terminal() {
        let store = job_store();
        let job = store.queue(vec![]).await.unwrap();
        store.mark_running(job.id).await.unwrap();
        store.mark_completed(job.id).await.unwrap();

        let result = store.mark_errored(job.id, "late failure", None, None).await;
        assert!(matches!(result, Err(Error::InvalidJobState { .. })));
    }

    #[tokio::test]
    async fn test_append_data_bumps_count_and_heartbeat() {
        let store = job_store();
        let job = store.queue(vec![]).await.unwrap();
        store.mark_running(job.id).await.unwrap();

        let updated = store
            .append_data(job.id, vec![serde_json::json!({"title": "a"})])
            .await
            .unwrap();
        assert_eq!(updated.crawl_count, 1);
        assert_eq!(updated.collected_data.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let store = job_store();
        assert!(store.get(JobId::new()).await.unwrap().is_none());
    }
}
