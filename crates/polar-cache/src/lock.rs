//! Per-key advisory locks
//!
//! Two `Locker` implementations: `RedisLocker` serializes across processes,
//! `MemoryLocker` within one process. Both poll until the acquisition
//! timeout elapses and then fail with `AppError::LockTimeout` instead of
//! queuing, and both let a held lock lapse after its hold timeout.

use crate::{keys, RedisCache};
use async_trait::async_trait;
use parking_lot::Mutex;
use polar_core::{
    traits::{LockToken, Locker},
    AppError, AppResult,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Delay between acquisition attempts
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

fn new_token(key: &str) -> LockToken {
    LockToken {
        key: key.to_string(),
        token: Uuid::new_v4().to_string(),
    }
}

/// Sleep before the next attempt, or give up once `deadline` has passed
async fn backoff(key: &str, deadline: Instant) -> AppResult<()> {
    let now = Instant::now();
    if now >= deadline {
        debug!("Lock {} still contended, giving up", key);
        return Err(AppError::LockTimeout {
            key: key.to_string(),
        });
    }
    tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
    Ok(())
}

/// Redis-backed locker
#[derive(Clone)]
pub struct RedisLocker {
    cache: RedisCache,
}

impl RedisLocker {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Locker for RedisLocker {
    #[instrument(skip(self))]
    async fn acquire(&self, key: &str, hold: Duration, wait: Duration) -> AppResult<LockToken> {
        let token = new_token(key);
        let redis_key = keys::redis_lock_key(key);
        let deadline = Instant::now() + wait;

        loop {
            if self.cache.set_nx_px(&redis_key, &token.token, hold).await? {
                debug!("Acquired lock {}", key);
                return Ok(token);
            }
            backoff(key, deadline).await?;
        }
    }

    #[instrument(skip(self, token), fields(key = %token.key))]
    async fn release(&self, token: LockToken) -> AppResult<()> {
        let redis_key = keys::redis_lock_key(&token.key);
        if !self.cache.delete_if_equals(&redis_key, &token.token).await? {
            warn!("Lock {} expired before release", token.key);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HeldLock {
    token: String,
    expires_at: Instant,
}

/// In-process locker
#[derive(Debug, Default)]
pub struct MemoryLocker {
    held: Mutex<HashMap<String, HeldLock>>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, token: &LockToken, hold: Duration) -> bool {
        let now = Instant::now();
        let mut held = self.held.lock();

        match held.get(&token.key) {
            Some(lock) if lock.expires_at > now => false,
            _ => {
                held.insert(
                    token.key.clone(),
                    HeldLock {
                        token: token.token.clone(),
                        expires_at: now + hold,
                    },
                );
                true
            }
        }
    }

    /// Whether `key` is currently held
    pub fn is_locked(&self, key: &str) -> bool {
        self.held
            .lock()
            .get(key)
            .is_some_and(|lock| lock.expires_at > Instant::now())
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn acquire(&self, key: &str, hold: Duration, wait: Duration) -> AppResult<LockToken> {
        let token = new_token(key);
        let deadline = Instant::now() + wait;

        loop {
            if self.try_acquire(&token, hold) {
                return Ok(token);
            }
            backoff(key, deadline).await?;
        }
    }

    async fn release(&self, token: LockToken) -> AppResult<()> {
        let mut held = self.held.lock();
        if held
            .get(&token.key)
            .is_some_and(|lock| lock.token == token.token)
        {
            held.remove(&token.key);
        } else {
            warn!("Lock {} expired before release", token.key);
        }
        Ok(())
    }
}
