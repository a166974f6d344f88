//! Dragonfly/Redis store client
// cspell:ignore Dragonfly ZREMRANGEBYSCORE ZCARD PEXPIRE PEXPIREAT WITHSCORES

use async_trait::async_trait;
use redis::Client;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CappedCount, DistributedStore, StoreError, WindowSnapshot};

/// Seeded, capped increment with an absolute expiry
const INCR_CAPPED_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local max = tonumber(ARGV[2])
if current then
  current = tonumber(current)
else
  current = tonumber(ARGV[1])
end
if current > max then
  current = max
end
local incremented = 0
if current < max then
  current = current + 1
  incremented = 1
end
redis.call('SET', KEYS[1], current)
redis.call('PEXPIREAT', KEYS[1], ARGV[3])
return {current, incremented}
"#;

/// Dragonfly/Redis backed store
pub struct DragonflyStore {
    connection_manager: Arc<ConnectionManager>,
    incr_capped_script: redis::Script,
}

impl DragonflyStore {
    /// Connect to the store and verify the connection with PING
    ///
    /// # Errors
    /// Returns an error if the client cannot be created or the server does
    /// not answer.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| {
            warn!("Failed to create Redis client for the key store: {}", e);
            StoreError::Unavailable(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            warn!("Failed to create connection manager for the key store: {}", e);
            StoreError::Unavailable(format!("Failed to create connection manager: {}", e))
        })?;

        let store = Self {
            connection_manager: Arc::new(connection_manager),
            incr_capped_script: redis::Script::new(INCR_CAPPED_SCRIPT),
        };
        store.ping().await.map_err(|e| {
            warn!("Failed to ping Dragonfly: {}", e);
            e
        })?;

        debug!("Successfully connected to Dragonfly at {}", url);
        Ok(store)
    }

    fn conn(&self) -> ConnectionManager {
        (*self.connection_manager).clone()
    }
}

#[async_trait]
impl DistributedStore for DragonflyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let ttl_ms = u64::try_from(ttl.as_millis().max(1)).unwrap_or(u64::MAX);
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        redis::cmd("DEL").arg(keys).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let keys: Vec<String> = redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await?;
        Ok(keys)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn sliding_window(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: u64,
        member: &str,
    ) -> Result<WindowSnapshot, StoreError> {
        let mut conn = self.conn();
        let window_start = now_ms.saturating_sub(i64::try_from(window_ms).unwrap_or(i64::MAX));

        // MULTI/EXEC keeps prune, count, insert and expiry consistent across callers
        let (_, count, oldest, _, _): (i64, u64, Vec<(String, f64)>, i64, i64) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(window_start)
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .query_async(&mut conn)
            .await?;

        Ok(WindowSnapshot {
            count,
            oldest_ms: oldest.first().map(|(_, score)| *score as i64),
        })
    }

    async fn incr_capped(
        &self,
        key: &str,
        seed: u64,
        max: u64,
        expire_at_ms: i64,
    ) -> Result<CappedCount, StoreError> {
        let mut conn = self.conn();
        let (value, incremented): (u64, u8) = self
            .incr_capped_script
            .key(key)
            .arg(seed)
            .arg(max)
            .arg(expire_at_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(CappedCount {
            value,
            incremented: incremented == 1,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
