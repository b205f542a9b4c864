use crate::config::RedisConfig;
use crate::database::models::Interval;
use crate::error::{PipelineError, Result};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RedisManager {
    pool: Pool,
    default_ttl: Duration,
}

impl RedisManager {
    pub async fn new(url: &str, default_ttl_seconds: u64, max_connections: usize) -> Result<Self> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(PoolConfig::new(max_connections.max(1)));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| PipelineError::Cache(format!("Failed to create Redis connection pool: {}", e)))?;

        // Test connection
        let mut conn = pool.get().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;

        info!("Connected to Redis successfully");

        Ok(Self {
            pool,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        })
    }

    /// Connect when enabled. An unreachable Redis is not fatal: the caller
    /// gets `None` and runs uncached.
    pub async fn connect_optional(config: &RedisConfig) -> Option<Self> {
        if !config.enabled {
            info!("Redis cache disabled");
            return None;
        }
        match Self::new(&config.url, config.ttl_seconds, config.pool_size).await {
            Ok(manager) => Some(manager),
            Err(e) => {
                warn!("Redis unavailable ({}), continuing without cache", e);
                None
            }
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // Set a key with serialized value and TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(key, serialized, ttl.as_secs().max(1) as usize).await?;
        Ok(())
    }

    // Get and deserialize a value by key
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.pool.get().await?;
        let result: Option<String> = conn.get(key).await?;

        match result {
            Some(val) => Ok(Some(serde_json::from_str(&val)?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let result: i32 = conn.exists(key).await?;
        Ok(result == 1)
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let result: i32 = conn.del(key).await?;
        Ok(result == 1)
    }

    /// Set `key` only if it is absent (SET NX EX). Returns whether it was set.
    pub async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        debug!("Claim {} -> {:?}", key, reply);
        Ok(reply.is_some())
    }

    // Cache key for a fetched provider series
    pub fn series_key(provider: &str, symbol: &str, interval: Interval, output_size: usize) -> String {
        format!("series:{}:{}:{}:{}", provider, symbol, interval.table_suffix(), output_size)
    }

    // Marker key for a job that is currently being processed
    pub fn in_progress_key(job_key: &str) -> String {
        format!("in_progress:{}", job_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(
            RedisManager::series_key("TwelveData", "EUR/USD", Interval::Hour1, 500),
            "series:TwelveData:EUR/USD:1h:500"
        );
        assert_eq!(RedisManager::in_progress_key("job:AAPL"), "in_progress:job:AAPL");
    }

    #[tokio::test]
    async fn disabled_cache_is_none() {
        let config = RedisConfig {
            enabled: false,
            ..RedisConfig::default()
        };
        assert!(RedisManager::connect_optional(&config).await.is_none());
    }
}
