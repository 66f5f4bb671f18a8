//! Redis-backed primary cache tier.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::cache::{CacheError, SharedCache};

pub struct RedisCache {
    client: redis::Client,
    prefix: String,
    timeout: Duration,
}

impl RedisCache {
    /// Validate the URL; no connection is made until first use.
    pub fn new(url: &str, prefix: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            prefix: prefix.to_owned(),
            timeout,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.bounded("connect", self.client.get_multiplexed_async_connection())
            .await
    }

    /// Run one redis operation under the configured timeout.
    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| CacheError::Unavailable(e.to_string())),
            Err(_) => Err(CacheError::Unavailable(format!(
                "redis {op} timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded("get", conn.get(self.key(key))).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = self
            .bounded("set", conn.set_ex(self.key(key), value, ttl.as_secs().max(1)))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: i64 = self.bounded("del", conn.del(self.key(key))).await?;
        Ok(())
    }
}
