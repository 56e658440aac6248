//! Redis-backed shared tier.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use futures_util::{StreamExt, future};
use redis::AsyncCommands;

use super::{MessageStream, RemoteTier};
use crate::config::{RedisConfig, clamp_ttl};
use crate::error::RemoteError;

/// Shared tier backed by Redis.
///
/// Commands go through a connection pool. Subscriptions use a dedicated
/// client connection opened from the same URL.
#[derive(Clone)]
pub struct RedisTier {
    pool: Pool,
    url: String,
}

impl RedisTier {
    pub fn new(pool: Pool, url: impl Into<String>) -> Self {
        Self {
            pool,
            url: url.into(),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> Result<Connection, RemoteError> {
        self.pool
            .get()
            .await
            .map_err(|e| RemoteError::Pool(e.to_string()))
    }
}

fn millis(ttl: Duration) -> u64 {
    // PSETEX/PEXPIRE reject 0
    (clamp_ttl(ttl).as_millis() as u64).max(1)
}

#[async_trait]
impl RemoteTier for RedisTier {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| RemoteError::command("GET", e))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        ttl: Duration,
        value: &str,
    ) -> Result<(), RemoteError> {
        let mut conn = self.conn().await?;
        conn.pset_ex::<_, _, ()>(key, value, millis(ttl))
            .await
            .map_err(|e| RemoteError::command("PSETEX", e))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, RemoteError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        conn.del::<_, u64>(keys)
            .await
            .map_err(|e| RemoteError::command("DEL", e))
    }

    async fn add_to_set(&self, set_key: &str, members: &[String]) -> Result<u64, RemoteError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, u64>(set_key, members)
            .await
            .map_err(|e| RemoteError::command("SADD", e))
    }

    async fn members_of_set(&self, set_key: &str) -> Result<Vec<String>, RemoteError> {
        let mut conn = self.conn().await?;
        conn.smembers::<_, Vec<String>>(set_key)
            .await
            .map_err(|e| RemoteError::command("SMEMBERS", e))
    }

    async fn remove_from_set(&self, set_key: &str, member: &str) -> Result<u64, RemoteError> {
        let mut conn = self.conn().await?;
        conn.srem::<_, _, u64>(set_key, member)
            .await
            .map_err(|e| RemoteError::command("SREM", e))
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool, RemoteError> {
        let mut conn = self.conn().await?;
        conn.pexpire::<_, bool>(key, millis(ttl) as i64)
            .await
            .map_err(|e| RemoteError::command("PEXPIRE", e))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<u64, RemoteError> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, u64>(channel, payload)
            .await
            .map_err(|e| RemoteError::command("PUBLISH", e))
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, RemoteError> {
        // Pooled connections can't be used for SUBSCRIBE
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| RemoteError::Subscribe(e.to_string()))?;

        tracing::info!(channel = %channel, "subscribed to Redis channel");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| {
                future::ready(match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read pub/sub payload");
                        None
                    }
                })
            })
            .boxed();

        Ok(stream)
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.conn().await.map(|_| ())
    }
}

/// Connect to Redis according to `config`.
///
/// Returns `None` when Redis is disabled or unreachable; the cache then runs
/// in local-only mode.
pub async fn connect_redis(config: &RedisConfig) -> Option<RedisTier> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return None;
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    let timeout = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return None;
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            Some(RedisTier::new(pool, config.url.clone()))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            None
        }
    }
}
