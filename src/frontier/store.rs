//! Shared keyed store behind the frontier and dedup filter
//!
//! All worker processes reach this store directly, not through the
//! coordinator, so the operations here are the primitive list/set commands
//! the shared semantics are built on. [`RedisKeyedStore`] is the production
//! implementation; [`MemoryKeyedStore`] keeps the test suite free of external
//! services.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};

/// Primitive operations of the shared keyed store
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Append a value to the tail of a list
    async fn list_push_tail(&self, key: &str, value: &str) -> Result<()>;

    /// Pop the value at the head of a list, if any
    async fn list_pop_head(&self, key: &str) -> Result<Option<String>>;

    /// Current length of a list
    async fn list_len(&self, key: &str) -> Result<u64>;

    /// Add a member to a set
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Membership check, atomic with respect to concurrent adds
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    /// Cardinality of a set
    async fn set_count(&self, key: &str) -> Result<u64>;

    /// Delete a key entirely (test/reset only)
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Shared handle to a keyed store
pub type SharedKeyedStore = Arc<dyn KeyedStore>;

// ============================================================================
// Redis Keyed Store
// ============================================================================

/// Redis-backed keyed store
pub struct RedisKeyedStore {
    pool: Pool,
}

impl RedisKeyedStore {
    /// Create a store from coordinator configuration
    pub fn new(config: &CoordinatorConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(&config.redis_url);
        let pool = pool_config
            .builder()
            .map_err(|e| Error::store("redis pool config", e))?
            .max_size(config.redis_pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::store("redis pool build", e))?;

        Ok(Self { pool })
    }

    /// Shared connection pool, for composing other Redis collaborators
    /// (the frontier lock reuses it)
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl KeyedStore for RedisKeyedStore {
    async fn list_push_tail(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn list_pop_head(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.lpop(key, None).await?;
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let found: bool = conn.sismember(key, member).await?;
        Ok(found)
    }

    async fn set_count(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let count: u64 = conn.scard(key).await?;
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

// ============================================================================
// In-Memory Keyed Store
// ============================================================================

/// In-memory keyed store for tests and single-process runs
#[derive(Default)]
pub struct MemoryKeyedStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryKeyedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyedStore for MemoryKeyedStore {
    async fn list_push_tail(&self, key: &str, value: &str) -> Result<()> {
        self.lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_pop_head(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .lists
            .lock()
            .await
            .get_mut(key)
            .and_then(|list| list.pop_front()))
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        Ok(self
            .lists
            .lock()
            .await
            .get(key)
            .map(|list| list.len() as u64)
            .unwrap_or(0))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .lock()
            .await
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn set_count(&self, key: &str) -> Result<u64> {
        Ok(self
            .sets
            .lock()
            .await
            .get(key)
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lists.lock().await.remove(key);
        self.sets.lock().await.remove(key);
        Ok(())
    }
}
