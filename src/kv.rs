//! Shared KV store abstraction.
//!
//! Every other component talks to the store through the [`KvStore`] trait
//! rather than to Redis directly, so tests can swap in [`InMemoryStore`].
//! The production implementation, [`RedisStore`], pools connections with
//! `bb8` and never issues blocking `KEYS`; prefix enumeration goes through
//! `SCAN` instead.

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::RouterResult;

/// One write in an atomically-committed batch. See [`KvStore::exec_transaction`].
#[derive(Debug, Clone)]
pub enum KvOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    HSet {
        key: String,
        field: String,
        value: String,
    },
    HDel {
        key: String,
        field: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> RouterResult<Option<String>>;
    /// Sets `key`, refreshing its TTL if `ttl` is given, clearing it otherwise.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RouterResult<()>;
    async fn delete(&self, key: &str) -> RouterResult<()>;
    /// Enumerates keys matching `prefix*`. Backed by `SCAN`, never `KEYS`.
    async fn keys_with_prefix(&self, prefix: &str) -> RouterResult<Vec<String>>;
    async fn hgetall(&self, key: &str) -> RouterResult<HashMap<String, String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> RouterResult<()>;
    async fn hdel(&self, key: &str, field: &str) -> RouterResult<()>;
    async fn expire(&self, key: &str, ttl: Duration) -> RouterResult<()>;
    /// Submits every op as one atomic unit; all land or all fail.
    async fn exec_transaction(&self, ops: Vec<KvOp>) -> RouterResult<()>;
}

pub struct RedisStore {
    pool: bb8::Pool<RedisConnectionManager>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> RouterResult<Self> {
        let manager = RedisConnectionManager::new(redis_url)
            .map_err(|e| crate::error::RouterError::Internal(format!("redis manager: {e}")))?;
        let pool = bb8::Pool::builder()
            .max_size(16)
            .build(manager)
            .await
            .map_err(|e| crate::error::RouterError::Internal(format!("redis pool: {e}")))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> RouterResult<Option<String>> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RouterResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> RouterResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> RouterResult<Vec<String>> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let pattern = format!("{prefix}*");
        let mut iter: redis::AsyncIter<String> = conn.scan_match(&pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = futures_util_next(&mut iter).await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn hgetall(&self, key: &str) -> RouterResult<HashMap<String, String>> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        Ok(conn.hgetall(key).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> RouterResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> RouterResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> RouterResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let _: () = conn.expire(key, ttl.as_secs().max(1) as i64).await?;
        Ok(())
    }

    async fn exec_transaction(&self, ops: Vec<KvOp>) -> RouterResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_err)?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                KvOp::Set { key, value, ttl } => match ttl {
                    Some(ttl) => {
                        pipe.set_ex(key, value, ttl.as_secs().max(1));
                    }
                    None => {
                        pipe.set(key, value);
                    }
                },
                KvOp::Delete { key } => {
                    pipe.del(key);
                }
                KvOp::HSet { key, field, value } => {
                    pipe.hset(key, field, value);
                }
                KvOp::HDel { key, field } => {
                    pipe.hdel(key, field);
                }
                KvOp::Expire { key, ttl } => {
                    pipe.expire(key, ttl.as_secs().max(1) as i64);
                }
            }
        }
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }
}

fn pool_err<E: std::fmt::Display>(e: E) -> crate::error::RouterError {
    crate::error::RouterError::Internal(format!("redis pool checkout: {e}"))
}

async fn futures_util_next(iter: &mut redis::AsyncIter<'_, String>) -> Option<String> {
    use futures_util::StreamExt;
    iter.next().await
}

/// In-process fake used by unit tests: a plain map plus expiry instants, no
/// network involved. TTL refresh-on-write semantics mirror the Redis store.
pub struct InMemoryStore {
    strings: parking_lot::Mutex<HashMap<String, (String, Option<std::time::Instant>)>>,
    hashes: parking_lot::Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            strings: parking_lot::Mutex::new(HashMap::new()),
            hashes: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn expired(entry: &(String, Option<std::time::Instant>)) -> bool {
        matches!(entry.1, Some(deadline) if deadline <= std::time::Instant::now())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> RouterResult<Option<String>> {
        let mut store = self.strings.lock();
        if let Some(entry) = store.get(key) {
            if Self::expired(entry) {
                store.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.0.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> RouterResult<()> {
        let deadline = ttl.map(|d| std::time::Instant::now() + d);
        self.strings
            .lock()
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> RouterResult<()> {
        self.strings.lock().remove(key);
        self.hashes.lock().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> RouterResult<Vec<String>> {
        let mut store = self.strings.lock();
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, entry)| Self::expired(entry))
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            store.remove(&k);
        }
        Ok(store
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn hgetall(&self, key: &str) -> RouterResult<HashMap<String, String>> {
        Ok(self.hashes.lock().get(key).cloned().unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> RouterResult<()> {
        self.hashes
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> RouterResult<()> {
        if let Some(map) = self.hashes.lock().get_mut(key) {
            map.remove(field);
        }
        Ok(())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> RouterResult<()> {
        // The in-memory hash fake does not model field-level TTL; the
        // `health` hash's whole-key TTL is a durability concern that only
        // matters against the real store.
        Ok(())
    }

    async fn exec_transaction(&self, ops: Vec<KvOp>) -> RouterResult<()> {
        for op in ops {
            match op {
                KvOp::Set { key, value, ttl } => self.set(&key, &value, ttl).await?,
                KvOp::Delete { key } => self.delete(&key).await?,
                KvOp::HSet { key, field, value } => self.hset(&key, &field, &value).await?,
                KvOp::HDel { key, field } => self.hdel(&key, &field).await?,
                KvOp::Expire { key, ttl } => self.expire(&key, ttl).await?,
            }
        }
        Ok(())
    }
}
