//! Distributed mutual exclusion for the frontier
//!
//! A lock is an acquire/release handle with a lease: the holder gets at most
//! `lease` of exclusivity, after which the key expires on its own and a
//! crashed holder cannot wedge the fleet. Acquisition retries with jitter
//! inside a bounded wait window and reports `None` when the window closes;
//! it never blocks indefinitely. Locks are not reentrant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::Pool;
use rand::Rng;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

/// Delay bounds between acquisition attempts
const RETRY_MIN_MS: u64 = 10;
const RETRY_MAX_MS: u64 = 50;

/// Proof of lock ownership
///
/// The token ties release to the acquisition that produced it: a holder whose
/// lease expired cannot release a lock someone else has since taken.
#[derive(Debug)]
pub struct LockGuard {
    pub(crate) key: String,
    pub(crate) token: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Distributed lock primitive
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to acquire `key` for `lease`, retrying for at most `wait`
    ///
    /// Returns `None` when the wait window closes without acquisition.
    async fn acquire(&self, key: &str, lease: Duration, wait: Duration)
        -> Result<Option<LockGuard>>;

    /// Release a held lock
    ///
    /// A no-op if the lease already expired and the key moved on.
    async fn release(&self, guard: LockGuard) -> Result<()>;
}

/// Shared handle to a distributed lock
pub type SharedLock = Arc<dyn DistributedLock>;

fn retry_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(RETRY_MIN_MS..=RETRY_MAX_MS))
}

// ============================================================================
// Redis Lock
// ============================================================================

/// Compare-and-delete so only the holding token can release
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed distributed lock (`SET NX PX` with token release)
pub struct RedisLock {
    pool: Pool,
    release_script: redis::Script,
}

impl RedisLock {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    async fn try_acquire(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(
        &self,
        key: &str,
        lease: Duration,
        wait: Duration,
    ) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            if self.try_acquire(key, &token, lease).await? {
                return Ok(Some(LockGuard {
                    key: key.to_string(),
                    token,
                }));
            }
            let delay = retry_delay();
            if Instant::now() + delay >= deadline {
                tracing::debug!(key, wait_ms = wait.as_millis() as u64, "lock wait window closed");
                return Ok(None);
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn release(&self, guard: LockGuard) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let deleted: i64 = self
            .release_script
            .key(&guard.key)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            // Lease expired before release; the key is someone else's now.
            tracing::warn!(key = %guard.key, "lock lease expired before release");
        }
        Ok(())
    }
}

// ============================================================================
// Local Lock
// ============================================================================

/// In-process lock with the same lease semantics, for tests
#[derive(Default)]
pub struct LocalLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_acquire(&self, key: &str, token: &str, lease: Duration) -> bool {
        let mut held = self.held.lock().await;
        let now = Instant::now();

        match held.get(key) {
            Some((_, expiry)) if *expiry > now => false,
            _ => {
                held.insert(key.to_string(), (token.to_string(), now + lease));
                true
            }
        }
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn acquire(
        &self,
        key: &str,
        lease: Duration,
        wait: Duration,
    ) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            if self.try_acquire(key, &token, lease).await {
                return Ok(Some(LockGuard {
                    key: key.to_string(),
                    token,
                }));
            }
            let delay = retry_delay();
            if Instant::now() + delay >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn release(&self, guard: LockGuard) -> Result<()> {
        let mut held = self.held.lock().await;
        if let Some((token, _)) = held.get(&guard.key) {
            if *token == guard.token {
                held.remove(&guard.key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_lock_exclusion() {
        let lock = LocalLock::new();
        let lease = Duration::from_secs(2);

        let guard = lock
            .acquire("frontier", lease, Duration::from_millis(100))
            .await
            .unwrap()
            .expect("first acquire succeeds");

        // Second acquisition must give up within the wait window.
        let second = lock
            .acquire("frontier", lease, Duration::from_millis(60))
            .await
            .unwrap();
        assert!(second.is_none());

        lock.release(guard).await.unwrap();

        let third = lock
            .acquire("frontier", lease, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_local_lock_lease_expiry() {
        let lock = LocalLock::new();

        let _abandoned = lock
            .acquire("frontier", Duration::from_millis(20), Duration::from_millis(50))
            .await
            .unwrap()
            .expect("acquire succeeds");

        // The abandoned guard's lease expires, so a fresh acquire gets in.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let next = lock
            .acquire("frontier", Duration::from_secs(1), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_stale_token_cannot_release() {
        let lock = LocalLock::new();

        let stale = lock
            .acquire("frontier", Duration::from_millis(10), Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let current = lock
            .acquire("frontier", Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        // Releasing with the expired token must not free the current holder.
        lock.release(stale).await.unwrap();
        let blocked = lock
            .acquire("frontier", Duration::from_secs(1), Duration::from_millis(60))
            .await
            .unwrap();
        assert!(blocked.is_none());

        lock.release(current).await.unwrap();
    }
}
