//! Scoped lock helper

use polar_core::{config::LockTimings, traits::Locker, AppResult};
use std::future::Future;
use tracing::warn;

/// Run `f` while holding `key`, releasing it whatever `f` returns.
///
/// Fails with `AppError::LockTimeout` without running `f` when the lock
/// cannot be acquired within `timings.wait`.
pub async fn with_lock<T, F, Fut>(
    locker: &dyn Locker,
    key: &str,
    timings: LockTimings,
    f: F,
) -> AppResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let token = locker.acquire(key, timings.hold, timings.wait).await?;
    let result = f().await;

    // The hold timeout frees the key even if this fails
    if let Err(e) = locker.release(token).await {
        warn!("Failed to release lock {}: {}", key, e);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use polar_cache::MemoryLocker;
    use polar_core::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const TIMINGS: LockTimings = LockTimings {
        hold: Duration::from_secs(5),
        wait: Duration::from_millis(50),
    };

    #[tokio::test]
    async fn test_releases_after_success() {
        let locker = MemoryLocker::new();

        let value = with_lock(&locker, "k", TIMINGS, || async { Ok(7) }).await.unwrap();

        assert_eq!(value, 7);
        assert!(!locker.is_locked("k"));
    }

    #[tokio::test]
    async fn test_releases_after_failure() {
        let locker = MemoryLocker::new();

        let result: AppResult<()> = with_lock(&locker, "k", TIMINGS, || async {
            Err(AppError::Internal("boom".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert!(!locker.is_locked("k"));
    }

    #[tokio::test]
    async fn test_contention_skips_body() {
        let locker = MemoryLocker::new();
        let _held = locker.acquire("k", TIMINGS.hold, TIMINGS.wait).await.unwrap();

        let ran = AtomicBool::new(false);
        let flag = &ran;
        let result = with_lock(&locker, "k", TIMINGS, move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AppError::LockTimeout { .. })));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
