use std::{future::Future, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult, aio::ConnectionManager};

use super::{CacheError, CachedGeneration, ResponseCache};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Response cache backed by an external Redis instance.
///
/// The connection manager reconnects on its own after the store drops.
/// Every command is bounded by `command_timeout`, so a store that accepts
/// connections but never answers surfaces as [`CacheError::Backend`]
/// instead of stalling the request.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    command_timeout: Duration,
}

impl RedisCache {
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| CacheError::Backend(format!("timed out connecting to {url}")))??;

        let _pong: String = bounded(
            command_timeout,
            "PING",
            redis::cmd("PING").query_async(&mut conn),
        )
        .await?;

        Ok(Self {
            conn,
            command_timeout,
        })
    }
}

async fn bounded<T>(
    limit: Duration,
    command: &str,
    fut: impl Future<Output = RedisResult<T>>,
) -> Result<T, CacheError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| CacheError::Backend(format!("{command} timed out after {limit:?}")))?
        .map_err(CacheError::from)
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<CachedGeneration>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = bounded(self.command_timeout, "GET", conn.get(key)).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &CachedGeneration,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        // SETEX rejects a zero lifetime.
        let seconds = ttl.as_secs().max(1);
        let _: () = bounded(
            self.command_timeout,
            "SETEX",
            conn.set_ex(key, payload, seconds),
        )
        .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
