//! Crawl worker
//!
//! One [`CrawlWorker`] per crawler process. The worker registers itself,
//! joins a job, and then drives the crawl loop: pull a URI from the shared
//! frontier, render it, feed extracted links back into the frontier, push
//! extracted data to the coordinator. A background task heartbeats on the
//! configured interval for as long as the worker is crawling.
//!
//! The loop ends for one of three reasons: a stop condition on the job is
//! satisfied, the job's cancellation signal flips, or the frontier stays
//! empty past the idle allowance. In every case the worker announces
//! `WorkerLeft` so the fan-in barrier can resolve.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use crate::clock::SharedClock;
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::fleet::cancel::CancelSignal;
use crate::frontier::CrawlFrontier;
use crate::jobs::JobStore;
use crate::models::{Extraction, JobId, WorkerId};
use crate::protocol::{AssignmentProtocol, Message};
use crate::stop;

/// Empty or contended polls tolerated before the worker leaves the job
const MAX_IDLE_POLLS: u32 = 5;

/// Jittered backoff bounds between polls, in milliseconds
const POLL_BACKOFF_MIN_MS: u64 = 50;
const POLL_BACKOFF_MAX_MS: u64 = 250;

/// Page rendering collaborator
///
/// The only part of the system that touches the target site. Implementations
/// wrap whatever fetch/render engine the deployment uses.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    /// Fetch a URI and return the rendered page content
    async fn navigate(&self, uri: &str) -> Result<String>;

    /// Extract data items and outbound links from rendered content
    async fn extract(&self, content: &str) -> Result<Extraction>;
}

/// A single crawler process participating in the fleet
pub struct CrawlWorker {
    id: WorkerId,
    protocol: Arc<AssignmentProtocol>,
    jobs: Arc<JobStore>,
    frontier: Arc<CrawlFrontier>,
    renderer: Arc<dyn Renderer>,
    clock: SharedClock,
    heartbeat_interval: Duration,
}

impl CrawlWorker {
    pub fn new(
        id: WorkerId,
        protocol: Arc<AssignmentProtocol>,
        jobs: Arc<JobStore>,
        frontier: Arc<CrawlFrontier>,
        renderer: Arc<dyn Renderer>,
        clock: SharedClock,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            id,
            protocol,
            jobs,
            frontier,
            renderer,
            clock,
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Announce this worker to the fleet
    pub async fn register(&self) -> Result<()> {
        self.protocol
            .handle(Message::WorkerUp {
                worker_id: self.id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Remove this worker from the fleet
    pub async fn deregister(&self) -> Result<()> {
        self.protocol
            .handle(Message::WorkerDown {
                worker_id: self.id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Join a job and crawl until a stop condition, cancellation, or an
    /// exhausted frontier ends it
    ///
    /// `WorkerLeft` is always announced on the way out, including when the
    /// loop itself failed, so the fan-in barrier never waits on a dead
    /// worker that managed to join.
    pub async fn crawl_job(&self, job_id: JobId, cancel: CancelSignal) -> Result<()> {
        self.protocol
            .handle(Message::WorkerJoined {
                worker_id: self.id.clone(),
                job_id,
            })
            .await?;

        let heartbeat = self.spawn_heartbeat();
        let outcome = self.crawl_loop(job_id, cancel).await;
        heartbeat.stop().await;

        let left = self
            .protocol
            .handle(Message::WorkerLeft {
                worker_id: self.id.clone(),
                job_id,
            })
            .await;
        if let Err(e) = left {
            tracing::warn!(worker_id = %self.id, %job_id, error = %e, "worker left announcement failed");
        }

        outcome
    }

    async fn crawl_loop(&self, job_id: JobId, mut cancel: CancelSignal) -> Result<()> {
        let mut idle_polls = 0u32;

        loop {
            if *cancel.borrow_and_update() {
                tracing::info!(worker_id = %self.id, %job_id, "crawl cancelled");
                return Ok(());
            }

            if self.should_stop(job_id).await? {
                tracing::info!(worker_id = %self.id, %job_id, "stop condition satisfied");
                return Ok(());
            }

            let Some(uri) = self.frontier.dequeue().await? else {
                idle_polls += 1;
                if idle_polls >= MAX_IDLE_POLLS {
                    tracing::info!(worker_id = %self.id, %job_id, "frontier exhausted");
                    return Ok(());
                }
                self.backoff(&mut cancel).await;
                continue;
            };
            idle_polls = 0;

            match self.crawl_one(&uri).await {
                Ok(extraction) => {
                    for link in &extraction.links {
                        // Duplicates and contention are both non-fatal here;
                        // a contended link is simply retried on a later page.
                        match self.frontier.enqueue(link).await {
                            Ok(_) => {}
                            Err(Error::Contention { .. }) => {
                                tracing::debug!(link, "frontier contended, link dropped for now");
                            }
                            Err(e) => return Err(e),
                        }
                    }

                    self.protocol
                        .handle(Message::DataPushed {
                            job_id,
                            data: extraction.data,
                        })
                        .await?;
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.id, %job_id, uri, error = %e, "crawl failed");
                    self.protocol
                        .handle(Message::ErrorPushed {
                            job_id,
                            message: format!("failed to crawl {uri}: {e}"),
                            source: Some(self.id.to_string()),
                            stack_trace: None,
                        })
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    async fn crawl_one(&self, uri: &str) -> Result<Extraction> {
        let content = self.renderer.navigate(uri).await?;
        self.renderer.extract(&content).await
    }

    async fn should_stop(&self, job_id: JobId) -> Result<bool> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))?;

        // A terminal job means another party already ended the crawl.
        if job.state.is_terminal() {
            return Ok(true);
        }

        let progress = job.progress(self.clock.now());
        stop::should_stop(&job.stop_conditions, &progress)
    }

    async fn backoff(&self, cancel: &mut CancelSignal) {
        let wait = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(POLL_BACKOFF_MIN_MS..=POLL_BACKOFF_MAX_MS))
        };
        tokio::select! {
            _ = sleep(wait) => {}
            _ = cancel.changed() => {}
        }
    }

    fn spawn_heartbeat(&self) -> HeartbeatTask {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let protocol = self.protocol.clone();
        let worker_id = self.id.clone();
        let period = self.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            // The immediate first tick is redundant with the join itself.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let beat = protocol
                            .handle(Message::WorkerHeartbeat { worker_id: worker_id.clone() })
                            .await;
                        match beat {
                            Ok(_) => {}
                            // Evicted while alive: re-register and carry on.
                            Err(Error::NotFound { .. }) => {
                                tracing::warn!(%worker_id, "evicted while alive, re-registering");
                                if let Err(e) = protocol
                                    .handle(Message::WorkerUp { worker_id: worker_id.clone() })
                                    .await
                                {
                                    tracing::error!(%worker_id, error = %e, "re-registration failed");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(%worker_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        HeartbeatTask { handle, shutdown }
    }
}

struct HeartbeatTask {
    handle: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl HeartbeatTask {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::fleet::{CancellationRegistry, CrawlerFleetManager};
    use crate::frontier::{LocalLock, MemoryKeyedStore, SharedKeyedStore, SharedLock};
    use crate::models::{JobState, StopCondition, StopConditionKind};
    use crate::registry::CrawlerFleetRegistry;
    use crate::store::MemoryStore;
    use crate::transport::NullTransport;
    use std::collections::HashMap;

    /// Renderer over a fixed in-memory site graph
    struct StubRenderer {
        pages: HashMap<String, Extraction>,
    }

    impl StubRenderer {
        fn new(pages: Vec<(&str, Vec<&str>)>) -> Self {
            let pages = pages
                .into_iter()
                .map(|(uri, links)| {
                    let extraction = Extraction {
                        data: vec![serde_json::json!({"uri": uri})],
                        links: links.into_iter().map(String::from).collect(),
                    };
                    (uri.to_string(), extraction)
                })
                .collect();
            Self { pages }
        }
    }

    #[async_trait::async_trait]
    impl Renderer for StubRenderer {
        async fn navigate(&self, uri: &str) -> Result<String> {
            if self.pages.contains_key(uri) {
                Ok(uri.to_string())
            } else {
                Err(Error::transport(format!("unreachable page {uri}")))
            }
        }

        async fn extract(&self, content: &str) -> Result<Extraction> {
            Ok(self.pages[content].clone())
        }
    }

    struct Rig {
        protocol: Arc<AssignmentProtocol>,
        jobs: Arc<JobStore>,
        frontier: Arc<CrawlFrontier>,
        cancellations: Arc<CancellationRegistry>,
        clock: SharedClock,
        config: CoordinatorConfig,
    }

    fn rig() -> Rig {
        let store = Arc::new(MemoryStore::new());
        let clock = system_clock();
        let transport = Arc::new(NullTransport);
        let jobs = Arc::new(JobStore::new(store.clone(), clock.clone()));
        let fleet = Arc::new(CrawlerFleetManager::new());
        let cancellations = Arc::new(CancellationRegistry::new());
        let registry = Arc::new(CrawlerFleetRegistry::new(
            store.clone(),
            store,
            transport.clone(),
            clock.clone(),
        ));
        let protocol = Arc::new(AssignmentProtocol::new(
            registry,
            jobs.clone(),
            fleet,
            cancellations.clone(),
            transport,
        ));

        let config = CoordinatorConfig::default();
        let keyed: SharedKeyedStore = Arc::new(MemoryKeyedStore::new());
        let lock: SharedLock = Arc::new(LocalLock::new());
        let frontier = Arc::new(CrawlFrontier::new(keyed, lock, &config));

        Rig {
            protocol,
            jobs,
            frontier,
            cancellations,
            clock,
            config,
        }
    }

    fn crawl_worker(rig: &Rig, id: &str, renderer: StubRenderer) -> CrawlWorker {
        CrawlWorker::new(
            WorkerId::new(id).unwrap(),
            rig.protocol.clone(),
            rig.jobs.clone(),
            rig.frontier.clone(),
            Arc::new(renderer),
            rig.clock.clone(),
            &rig.config,
        )
    }

    #[tokio::test]
    async fn test_crawls_site_until_frontier_empty() {
        let rig = rig();
        let renderer = StubRenderer::new(vec![
            ("https://site.test/", vec!["https://site.test/a", "https://site.test/b"]),
            ("https://site.test/a", vec!["https://site.test/b"]),
            ("https://site.test/b", vec![]),
        ]);
        let worker = crawl_worker(&rig, "w1", renderer);

        let job = rig.protocol.queue_job(vec![]).await.unwrap();
        rig.frontier.enqueue("https://site.test/").await.unwrap();

        worker.register().await.unwrap();
        let cancel = rig.cancellations.get_or_create(job.id);
        worker.crawl_job(job.id, cancel).await.unwrap();

        let done = rig
            .protocol
            .finalize_job(job.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Completed);
        // Three pages, the /b link deduplicated across both referrers.
        assert_eq!(done.crawl_count, 3);
        assert_eq!(done.collected_data.len(), 3);
    }

    #[tokio::test]
    async fn test_stop_condition_halts_crawl_early() {
        let rig = rig();
        let renderer = StubRenderer::new(vec![
            ("https://site.test/", vec!["https://site.test/a"]),
            ("https://site.test/a", vec!["https://site.test/b"]),
            ("https://site.test/b", vec!["https://site.test/c"]),
            ("https://site.test/c", vec![]),
        ]);
        let worker = crawl_worker(&rig, "w1", renderer);

        let job = rig
            .protocol
            .queue_job(vec![StopCondition::new(StopConditionKind::MaxCrawlCount, 2)])
            .await
            .unwrap();
        rig.frontier.enqueue("https://site.test/").await.unwrap();

        worker.register().await.unwrap();
        let cancel = rig.cancellations.get_or_create(job.id);
        worker.crawl_job(job.id, cancel).await.unwrap();

        let job = rig.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.crawl_count, 2);
    }

    /// Renderer whose every page links to a fresh one, so the frontier
    /// never drains
    struct EndlessRenderer;

    #[async_trait::async_trait]
    impl Renderer for EndlessRenderer {
        async fn navigate(&self, uri: &str) -> Result<String> {
            Ok(uri.to_string())
        }

        async fn extract(&self, content: &str) -> Result<Extraction> {
            let next = content
                .rsplit('/')
                .next()
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            Ok(Extraction {
                data: vec![serde_json::json!({"uri": content})],
                links: vec![format!("https://site.test/{next}")],
            })
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_worker() {
        let rig = rig();
        let worker = Arc::new(CrawlWorker::new(
            WorkerId::new("w1").unwrap(),
            rig.protocol.clone(),
            rig.jobs.clone(),
            rig.frontier.clone(),
            Arc::new(EndlessRenderer),
            rig.clock.clone(),
            &rig.config,
        ));

        let job = rig.protocol.queue_job(vec![]).await.unwrap();
        rig.frontier.enqueue("https://site.test/0").await.unwrap();
        worker.register().await.unwrap();

        let cancel = rig.cancellations.get_or_create(job.id);
        let crawling = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.crawl_job(job.id, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        rig.protocol.cancel_job(job.id).await.unwrap();

        crawling.await.unwrap().unwrap();
        let cancelled = rig.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(cancelled.state, JobState::Errored);
    }

    #[tokio::test]
    async fn test_render_failure_errors_job() {
        let rig = rig();
        // The single page links to a target the renderer cannot reach.
        let renderer = StubRenderer::new(vec![(
            "https://site.test/",
            vec!["https://site.test/missing"],
        )]);
        let worker = crawl_worker(&rig, "w1", renderer);

        let job = rig.protocol.queue_job(vec![]).await.unwrap();
        rig.frontier.enqueue("https://site.test/").await.unwrap();

        worker.register().await.unwrap();
        let cancel = rig.cancellations.get_or_create(job.id);
        worker.crawl_job(job.id, cancel).await.unwrap();

        let errored = rig.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(errored.state, JobState::Errored);
        assert!(errored.errors[0].message.contains("missing"));
        assert_eq!(errored.errors[0].source.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_worker_leaves_even_when_frontier_starts_empty() {
        let rig = rig();
        let renderer = StubRenderer::new(vec![]);
        let worker = crawl_worker(&rig, "w1", renderer);

        let job = rig.protocol.queue_job(vec![]).await.unwrap();
        worker.register().await.unwrap();

        let cancel = rig.cancellations.get_or_create(job.id);
        worker.crawl_job(job.id, cancel).await.unwrap();

        // The barrier resolves because the worker announced its departure.
        let done = rig
            .protocol
            .finalize_job(job.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Completed);
    }
}
