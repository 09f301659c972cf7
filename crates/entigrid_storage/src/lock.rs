//! Mutual-exclusion locks keyed by string.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A held lock. The lock is released when the guard is dropped.
pub struct LockGuard {
    key: String,
    _held: Box<dyn Send + Sync>,
}

impl LockGuard {
    /// Wraps an implementation-specific handle whose drop releases the lock.
    pub fn new(key: impl Into<String>, held: impl Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            _held: Box::new(held),
        }
    }

    /// The key this guard holds.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A lock service shared by every writer of the store.
///
/// Acquisition is scoped: the returned [`LockGuard`] releases on drop, so a
/// lock is released on every exit path of the holder.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Acquires the lock for `key`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] if the lock is still held by
    /// someone else after `timeout`.
    async fn acquire(&self, key: &str, timeout: Duration) -> StorageResult<LockGuard>;
}

/// Process-local lock service.
#[derive(Default)]
pub struct InMemoryLocker {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl InMemoryLocker {
    /// Creates a lock service with no held locks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if some guard currently holds `key`.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .lock()
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        // Drop entries nobody is waiting on or holding.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

impl fmt::Debug for InMemoryLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLocker")
            .field("keys", &self.locks.lock().len())
            .finish()
    }
}

#[async_trait]
impl Locker for InMemoryLocker {
    async fn acquire(&self, key: &str, timeout: Duration) -> StorageResult<LockGuard> {
        let lock = self.lock_for(key);
        let guard: OwnedMutexGuard<()> = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| StorageError::LockTimeout {
                key: key.to_string(),
                timeout,
            })?;
        tracing::trace!(key, "lock acquired");
        Ok(LockGuard::new(key, guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let locker = InMemoryLocker::new();
        let guard = locker.acquire("k", Duration::from_millis(50)).await.unwrap();
        assert_eq!(guard.key(), "k");
        assert!(locker.is_locked("k"));

        drop(guard);
        assert!(!locker.is_locked("k"));
        let again = locker.acquire("k", Duration::from_millis(50)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let locker = InMemoryLocker::new();
        let _held = locker.acquire("k", Duration::from_millis(50)).await.unwrap();

        let result = locker.acquire("k", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(StorageError::LockTimeout { key, .. }) if key == "k"));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locker = InMemoryLocker::new();
        let _a = locker.acquire("a", Duration::from_millis(50)).await.unwrap();
        let b = locker.acquire("b", Duration::from_millis(50)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_release() {
        let locker = Arc::new(InMemoryLocker::new());
        let held = locker.acquire("k", Duration::from_millis(50)).await.unwrap();

        let waiter = {
            let locker = Arc::clone(&locker);
            tokio::spawn(async move { locker.acquire("k", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }
}
