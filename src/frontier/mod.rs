//! Shared URL frontier and duplicate filter
//!
//! The frontier is a cross-process FIFO queue of pending URIs guarded by a
//! distributed lock; the dedup filter is a cross-process membership set of
//! URIs already enqueued or visited. Workers talk to both directly, without
//! going through the coordinator. A URI is marked seen at enqueue time, not
//! at dequeue time, so two workers racing to enqueue the same link cannot
//! both get it in — the filter is always a superset of the frontier plus
//! everything already dequeued.

pub mod lock;
pub mod store;

use std::time::Duration;

use url::Url;

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};

pub use lock::{DistributedLock, LocalLock, LockGuard, RedisLock, SharedLock};
pub use store::{KeyedStore, MemoryKeyedStore, RedisKeyedStore, SharedKeyedStore};

/// Outcome of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The URI entered the frontier
    Added,

    /// The URI was already seen; reported as success, nothing inserted
    Duplicate,
}

// ============================================================================
// Dedup Filter
// ============================================================================

/// Cross-process membership set of already-seen URIs
pub struct DedupFilter {
    store: SharedKeyedStore,
    key: String,
}

impl DedupFilter {
    pub fn new(store: SharedKeyedStore, key_prefix: &str) -> Self {
        Self {
            store,
            key: format!("{key_prefix}:dedup:seen"),
        }
    }

    /// Mark a URI as seen
    pub async fn add(&self, uri: &str) -> Result<()> {
        self.store.set_add(&self.key, uri).await
    }

    /// Whether a URI has been seen; observes any completed `add` by any party
    pub async fn contains(&self, uri: &str) -> Result<bool> {
        self.store.set_contains(&self.key, uri).await
    }

    /// Number of seen URIs
    pub async fn count(&self) -> Result<u64> {
        self.store.set_count(&self.key).await
    }

    /// Drop the whole filter. Test/reset use only; there is no per-item
    /// removal.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.key).await
    }
}

// ============================================================================
// Crawl Frontier
// ============================================================================

/// Cross-process FIFO queue of pending URIs
pub struct CrawlFrontier {
    store: SharedKeyedStore,
    lock: SharedLock,
    dedup: DedupFilter,
    queue_key: String,
    lock_key: String,
    lease: Duration,
    wait: Duration,
}

impl CrawlFrontier {
    pub fn new(store: SharedKeyedStore, lock: SharedLock, config: &CoordinatorConfig) -> Self {
        let dedup = DedupFilter::new(store.clone(), &config.key_prefix);
        Self {
            store,
            lock,
            dedup,
            queue_key: format!("{}:frontier:queue", config.key_prefix),
            lock_key: format!("{}:frontier:lock", config.key_prefix),
            lease: config.lock_lease(),
            wait: config.lock_wait(),
        }
    }

    /// The dedup filter guarding this frontier
    pub fn dedup(&self) -> &DedupFilter {
        &self.dedup
    }

    /// Add a URI to the tail of the frontier
    ///
    /// Fails with [`Error::Contention`] if the lock wait window closes; the
    /// caller retries. A URI already in the dedup filter is reported as
    /// success without insertion. Once the lock is held the item is never
    /// silently dropped.
    pub async fn enqueue(&self, uri: &str) -> Result<Enqueued> {
        Url::parse(uri).map_err(|e| Error::Configuration {
            reason: format!("invalid frontier uri {uri:?}: {e}"),
        })?;

        let Some(guard) = self.lock.acquire(&self.lock_key, self.lease, self.wait).await? else {
            return Err(Error::Contention {
                key: self.lock_key.clone(),
            });
        };

        let outcome = self.enqueue_locked(uri).await;
        self.release(guard).await;
        outcome
    }

    /// Pop the URI at the head of the frontier
    ///
    /// Returns `Ok(None)` both when the frontier is empty and when the lock
    /// wait window closes; the caller backs off either way.
    pub async fn dequeue(&self) -> Result<Option<String>> {
        let Some(guard) = self.lock.acquire(&self.lock_key, self.lease, self.wait).await? else {
            return Ok(None);
        };

        let outcome = self.store.list_pop_head(&self.queue_key).await;
        self.release(guard).await;
        outcome
    }

    /// Number of URIs currently pending
    pub async fn len(&self) -> Result<u64> {
        self.store.list_len(&self.queue_key).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn enqueue_locked(&self, uri: &str) -> Result<Enqueued> {
        if self.dedup.contains(uri).await? {
            tracing::debug!(uri, "skipping duplicate uri");
            return Ok(Enqueued::Duplicate);
        }

        // Seen is marked before the push so a concurrent enqueue of the same
        // uri after we drop the lock still observes it.
        self.dedup.add(uri).await?;
        self.store.list_push_tail(&self.queue_key, uri).await?;
        Ok(Enqueued::Added)
    }

    async fn release(&self, guard: LockGuard) {
        if let Err(e) = self.lock.release(guard).await {
            tracing::warn!(key = %self.lock_key, error = %e, "frontier lock release failed");
        }
    }
}
