//! End-to-end coordination tests
//!
//! Whole-system runs over the in-memory collaborators: several workers
//! sharing one frontier and one job, driven through the assignment protocol
//! exactly as a deployment would drive them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use fleetcrawl::clock::{system_clock, SharedClock};
use fleetcrawl::config::CoordinatorConfig;
use fleetcrawl::fleet::{CancellationRegistry, CrawlerFleetManager};
use fleetcrawl::frontier::{CrawlFrontier, LocalLock, MemoryKeyedStore, SharedKeyedStore, SharedLock};
use fleetcrawl::jobs::JobStore;
use fleetcrawl::models::{Extraction, StopCondition, StopConditionKind, WorkerId};
use fleetcrawl::monitor::HeartbeatMonitor;
use fleetcrawl::protocol::AssignmentProtocol;
use fleetcrawl::registry::CrawlerFleetRegistry;
use fleetcrawl::store::MemoryStore;
use fleetcrawl::transport::BroadcastTransport;
use fleetcrawl::worker::{CrawlWorker, Renderer};
use fleetcrawl::{Error, JobState, Result};

/// Renderer over a fixed site graph shared by all workers
struct SiteRenderer {
    pages: HashMap<String, Vec<String>>,
}

impl SiteRenderer {
    fn chain(len: usize) -> Self {
        let pages = (0..len)
            .map(|i| {
                let links = if i + 1 < len {
                    vec![format!("https://site.test/p{}", i + 1)]
                } else {
                    Vec::new()
                };
                (format!("https://site.test/p{i}"), links)
            })
            .collect();
        Self { pages }
    }
}

#[async_trait]
impl Renderer for SiteRenderer {
    async fn navigate(&self, uri: &str) -> Result<String> {
        if self.pages.contains_key(uri) {
            Ok(uri.to_string())
        } else {
            Err(Error::transport(format!("unreachable page {uri}")))
        }
    }

    async fn extract(&self, content: &str) -> Result<Extraction> {
        Ok(Extraction {
            data: vec![serde_json::json!({"uri": content})],
            links: self.pages[content].clone(),
        })
    }
}

struct Deployment {
    protocol: Arc<AssignmentProtocol>,
    jobs: Arc<JobStore>,
    frontier: Arc<CrawlFrontier>,
    cancellations: Arc<CancellationRegistry>,
    store: Arc<MemoryStore>,
    clock: SharedClock,
    config: CoordinatorConfig,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn deployment() -> Deployment {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let clock = system_clock();
    let transport = Arc::new(BroadcastTransport::default());
    let jobs = Arc::new(JobStore::new(store.clone(), clock.clone()));
    let fleet = Arc::new(CrawlerFleetManager::new());
    let cancellations = Arc::new(CancellationRegistry::new());
    let registry = Arc::new(CrawlerFleetRegistry::new(
        store.clone(),
        store.clone(),
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

    Deployment {
        protocol,
        jobs,
        frontier,
        cancellations,
        store,
        clock,
        config,
    }
}

fn spawn_worker(
    d: &Deployment,
    id: &str,
    renderer: Arc<SiteRenderer>,
) -> Arc<CrawlWorker> {
    Arc::new(CrawlWorker::new(
        WorkerId::new(id).unwrap(),
        d.protocol.clone(),
        d.jobs.clone(),
        d.frontier.clone(),
        renderer,
        d.clock.clone(),
        &d.config,
    ))
}

#[tokio::test]
async fn test_three_workers_complete_one_job() {
    let d = deployment();
    let renderer = Arc::new(SiteRenderer::chain(12));

    let job = d.protocol.queue_job(vec![]).await.unwrap();
    d.frontier.enqueue("https://site.test/p0").await.unwrap();

    let mut handles = Vec::new();
    for id in ["crawler-1", "crawler-2", "crawler-3"] {
        let worker = spawn_worker(&d, id, renderer.clone());
        worker.register().await.unwrap();
        let cancel = d.cancellations.get_or_create(job.id);
        handles.push(tokio::spawn(
            async move { worker.crawl_job(job.id, cancel).await },
        ));
    }
    for outcome in join_all(handles).await {
        outcome.unwrap().unwrap();
    }

    let done = d
        .protocol
        .finalize_job(job.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.state, JobState::Completed);

    // Dedup guarantees each page was crawled exactly once across the fleet.
    assert_eq!(done.crawl_count, 12);
    assert_eq!(done.collected_data.len(), 12);
    assert!(d.frontier.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_stop_condition_bounds_the_whole_fleet() {
    let d = deployment();
    let renderer = Arc::new(SiteRenderer::chain(50));

    let job = d
        .protocol
        .queue_job(vec![StopCondition::new(StopConditionKind::MaxDataCount, 5)])
        .await
        .unwrap();
    d.frontier.enqueue("https://site.test/p0").await.unwrap();

    let worker = spawn_worker(&d, "crawler-1", renderer);
    worker.register().await.unwrap();
    let cancel = d.cancellations.get_or_create(job.id);
    worker.crawl_job(job.id, cancel).await.unwrap();

    let done = d
        .protocol
        .finalize_job(job.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.collected_data.len(), 5);
}

#[tokio::test]
async fn test_cancellation_mid_crawl() {
    let d = deployment();
    let renderer = Arc::new(SiteRenderer::chain(10_000));

    let job = d.protocol.queue_job(vec![]).await.unwrap();
    d.frontier.enqueue("https://site.test/p0").await.unwrap();

    let worker = spawn_worker(&d, "crawler-1", renderer);
    worker.register().await.unwrap();
    let cancel = d.cancellations.get_or_create(job.id);
    let crawling = tokio::spawn(async move { worker.crawl_job(job.id, cancel).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancelled = d.protocol.cancel_job(job.id).await.unwrap();
    assert_eq!(cancelled.state, JobState::Errored);

    // The worker notices the signal and exits cleanly.
    crawling.await.unwrap().unwrap();

    // Further work on the cancelled job is a state conflict.
    let late = d.protocol.cancel_job(job.id).await;
    assert!(matches!(late, Err(Error::InvalidJobState { .. })));
}

#[tokio::test]
async fn test_monitor_evicts_silent_worker() {
    let d = deployment();

    // A registered worker that never heartbeats again.
    let silent = WorkerId::new("silent").unwrap();
    let registry = CrawlerFleetRegistry::new(
        d.store.clone(),
        d.store.clone(),
        Arc::new(fleetcrawl::transport::NullTransport),
        d.clock.clone(),
    );
    registry.worker_up(&silent).await.unwrap();

    let config = CoordinatorConfig {
        tick_seconds: 1,
        max_unresponsive_ticks: 3,
        ..Default::default()
    };
    let monitor = HeartbeatMonitor::new(d.store.clone(), d.jobs.clone(), d.clock.clone(), &config);

    // Within the threshold nothing happens.
    let stats = monitor.sweep().await.unwrap();
    assert_eq!(stats.workers_evicted, 0);

    // A zero-tick allowance makes any silence past the sweep stale.
    let strict = CoordinatorConfig {
        tick_seconds: 0,
        max_unresponsive_ticks: 1,
        ..Default::default()
    };
    let strict_monitor =
        HeartbeatMonitor::new(d.store.clone(), d.jobs.clone(), d.clock.clone(), &strict);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = strict_monitor.sweep().await.unwrap();
    assert_eq!(stats.workers_evicted, 1);

    // The silent worker's next heartbeat fails as not-found, so it would
    // re-register.
    let beat = registry.worker_heartbeat(&silent).await;
    assert!(matches!(beat, Err(Error::NotFound { .. })));
}
