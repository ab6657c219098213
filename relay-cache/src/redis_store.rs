//! Redis-backed JSON key/value store and string sets.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::error::CacheResult;

/// Thin wrapper around a Redis client that namespaces every key.
///
/// One multiplexed connection is shared by all callers and dropped after
/// any command error, so the next call reconnects.
pub struct RedisStore {
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    key_prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Open a client for `url` and check the server answers `PING`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let store = Self {
            client,
            connection: RwLock::new(None),
            key_prefix: key_prefix.into(),
        };

        let mut conn = store.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(prefix = %store.key_prefix, response = %pong, "Redis connection established");

        Ok(store)
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        {
            let guard = self.connection.read().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
        }

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.connection.write().await = None;
        debug!("Redis connection reset after error");
    }

    /// Drop the cached connection when a command fails.
    async fn checked<T>(&self, result: redis::RedisResult<T>) -> CacheResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "Redis command failed");
                self.reset_connection().await;
                Err(err.into())
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection().await?;
        let raw: Option<String> = self.checked(conn.get(&redis_key).await).await?;
        trace!(key = %redis_key, hit = raw.is_some(), "Redis get");

        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Store `value` as JSON. `ttl` of `None` keeps the key until deleted.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let redis_key = self.make_key(key);
        let data = serde_json::to_string(value)?;
        let mut conn = self.connection().await?;

        let result = match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(&redis_key, data, ttl.as_secs().max(1))
                    .await
            }
            None => conn.set::<_, _, ()>(&redis_key, data).await,
        };
        self.checked(result).await
    }

    /// Delete a key, returning whether it existed.
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection().await?;
        let removed: i64 = self.checked(conn.del(&redis_key).await).await?;
        Ok(removed > 0)
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection().await?;
        self.checked(conn.exists(&redis_key).await).await
    }

    /// Add `member` to the set at `key`, returning true if it was new.
    pub async fn set_add(&self, key: &str, member: &str) -> CacheResult<bool> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection().await?;
        let added: i64 = self.checked(conn.sadd(&redis_key, member).await).await?;
        Ok(added > 0)
    }

    /// Add `member` to the sorted set at `key`, keeping only the `keep`
    /// most recently added members. Returns true if it was new.
    ///
    /// Re-adding a member refreshes its position.
    pub async fn recent_add(&self, key: &str, member: &str, keep: usize) -> CacheResult<bool> {
        let redis_key = self.make_key(key);
        let score = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default();
        let mut conn = self.connection().await?;

        let added: i64 = self
            .checked(conn.zadd(&redis_key, member, score).await)
            .await?;
        let keep = isize::try_from(keep).unwrap_or(isize::MAX);
        let trimmed: i64 = self
            .checked(conn.zremrangebyrank(&redis_key, 0, -keep - 1).await)
            .await?;
        if trimmed > 0 {
            trace!(key = %redis_key, trimmed, "Trimmed recent set");
        }
        Ok(added > 0)
    }

    pub async fn set_contains(&self, key: &str, member: &str) -> CacheResult<bool> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection().await?;
        self.checked(conn.sismember(&redis_key, member).await).await
    }
}
