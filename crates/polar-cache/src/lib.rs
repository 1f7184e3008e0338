//! Redis layer for Polar metering
//!
//! Provides the Redis connection used for per-key advisory locks and for
//! publishing state-change notifications, plus an in-process locker for
//! single-node deployments and tests.
//!
//! # Features
//!
//! - Connection pooling via Redis ConnectionManager
//! - `SET NX PX` locks released through a compare-and-delete script
//! - Pub/sub notifications with JSON payloads
//! - Error conversion to AppError
//!
//! # Example
//!
//! ```no_run
//! use polar_cache::{keys, RedisCache, RedisLocker};
//! use polar_core::traits::Locker;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RedisCache::new("redis://127.0.0.1:6379").await?;
//!     let locker = RedisLocker::new(cache);
//!
//!     let key = keys::account_credit_lock_key(uuid::Uuid::new_v4());
//!     let token = locker
//!         .acquire(&key, Duration::from_secs(5), Duration::from_millis(200))
//!         .await?;
//!     locker.release(token).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod keys;
pub mod lock;
pub mod notifier;

pub use lock::{MemoryLocker, RedisLocker};
pub use notifier::RedisNotifier;

use polar_core::error::AppError;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Compare-and-delete, so a lock is only released by its holder
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis connection wrapper
///
/// Wraps a Redis ConnectionManager to provide efficient, multiplexed access
/// to Redis. All operations are async and return Results with AppError.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
    release_script: redis::Script,
}

impl RedisCache {
    /// Create a new Redis connection
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheConnection` if the connection fails
    pub async fn new(url: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::CacheConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::CacheConnection(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self {
            manager,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// `SET key value NX PX ttl`; true when the key was set
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        debug!("SET {} NX PX {}", key, ttl.as_millis());
        let mut conn = self.manager.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(result.is_some())
    }

    /// Delete `key` only if it still holds `value`
    pub async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, AppError> {
        debug!("DEL {} (if owned)", key);
        let mut conn = self.manager.clone();

        let deleted: i32 = self
            .release_script
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(deleted > 0)
    }

    /// Publish a JSON payload; returns the number of receiving subscribers
    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        channel: &str,
        payload: &T,
    ) -> Result<i64, AppError> {
        let json = serde_json::to_string(payload).map_err(|e| {
            error!("Failed to serialize payload for {}: {}", channel, e);
            AppError::Serialization(format!("Serialization failed: {}", e))
        })?;

        debug!("PUBLISH {}", channel);
        let mut conn = self.manager.clone();
        let receivers: i64 = conn
            .publish(channel, json)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(receivers)
    }

    /// Flush all keys from the current database
    #[cfg(test)]
    pub async fn flush_db(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::CacheConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Cache(err.to_string())
            }
        }
    }
}
