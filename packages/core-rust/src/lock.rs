//! FIFO async lock with queryable release tokens.
//!
//! Serialises spans that contain a suspension point (initial load, forced
//! flush, bulk import). Waiters are granted strictly in arrival order, which
//! is what keeps a bulk import from interleaving with a flush that started
//! earlier.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct LockState {
    // tokio's mutex queues waiters in FIFO order.
    mutex: Arc<Mutex<()>>,
    /// Holders plus waiters.
    outstanding: AtomicUsize,
    /// Id of the token currently holding the lock; 0 when free.
    holder: AtomicU64,
    next_id: AtomicU64,
}

/// Asynchronous mutual-exclusion lock producing [`ReleaseToken`]s.
///
/// Cloning yields another handle to the same lock.
#[derive(Debug, Clone, Default)]
pub struct AsyncLock {
    state: Arc<LockState>,
}

impl AsyncLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock and returns a token that releases it.
    pub async fn acquire(&self) -> ReleaseToken {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.outstanding.fetch_add(1, Ordering::AcqRel);
        let mut waiter = Waiter {
            state: &self.state,
            armed: true,
        };
        let guard = Arc::clone(&self.state.mutex).lock_owned().await;
        waiter.armed = false;
        self.state.holder.store(id, Ordering::Release);
        ReleaseToken {
            id,
            guard: Some(guard),
            state: Arc::clone(&self.state),
        }
    }

    /// Whether `token` was issued by this lock and currently holds it.
    #[must_use]
    pub fn has(&self, token: &ReleaseToken) -> bool {
        Arc::ptr_eq(&self.state, &token.state)
            && token.guard.is_some()
            && self.state.holder.load(Ordering::Acquire) == token.id
    }

    /// Whether the lock is held or has queued waiters.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.state.outstanding.load(Ordering::Acquire) > 0
    }
}

/// Undoes the waiter count if an `acquire` future is dropped before it is
/// granted.
struct Waiter<'a> {
    state: &'a LockState,
    armed: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Proof of holding an [`AsyncLock`]. Released explicitly or on drop.
#[derive(Debug)]
pub struct ReleaseToken {
    id: u64,
    guard: Option<OwnedMutexGuard<()>>,
    state: Arc<LockState>,
}

impl ReleaseToken {
    /// Releases the lock. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            let _ = self.state.holder.compare_exchange(
                self.id,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            drop(guard);
            self.state.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn release_is_idempotent() {
        let lock = AsyncLock::new();
        let mut token = lock.acquire().await;
        assert!(lock.is_acquired());
        assert!(lock.has(&token));

        token.release();
        token.release();
        assert!(!lock.is_acquired());
        assert!(!lock.has(&token));

        // Lock can be taken again after a double release.
        let again = lock.acquire().await;
        assert!(lock.has(&again));
    }

    #[tokio::test]
    async fn has_rejects_foreign_tokens() {
        let a = AsyncLock::new();
        let b = AsyncLock::new();
        let token = a.acquire().await;
        assert!(a.has(&token));
        assert!(!b.has(&token));
    }

    #[tokio::test]
    async fn drop_releases() {
        let lock = AsyncLock::new();
        {
            let _token = lock.acquire().await;
            assert!(lock.is_acquired());
        }
        assert!(!lock.is_acquired());
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_granted_in_arrival_order() {
        let lock = AsyncLock::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let first = lock.acquire().await;

        let mut handles = Vec::new();
        for i in 1..=4u32 {
            let lock = lock.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _token = lock.acquire().await;
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }));
            // Let the task reach the wait queue before spawning the next.
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(lock.is_acquired());
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4]);
        assert!(!lock.is_acquired());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_is_not_counted() {
        let lock = AsyncLock::new();
        let token = lock.acquire().await;
        let attempt = tokio::time::timeout(Duration::from_millis(5), lock.acquire()).await;
        assert!(attempt.is_err());
        drop(token);
        assert!(!lock.is_acquired());
    }
}
