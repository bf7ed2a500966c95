use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::{Duration, Instant},
};

use crate::traits::{LockError, LockService, LockToken};

/// Wraps a lock service and makes the first `failures` acquire calls fail with a backend error. Every acquire call is
/// timestamped, so tests can observe the backoff between retries.
#[derive(Clone)]
pub struct FlakyLockService<L> {
    inner: L,
    remaining_failures: Arc<AtomicUsize>,
    attempts: Arc<Mutex<Vec<Instant>>>,
}

impl<L> FlakyLockService<L> {
    pub fn new(inner: L, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// The time between consecutive acquire calls.
    pub fn gaps(&self) -> Vec<Duration> {
        self.attempts().windows(2).map(|w| w[1] - w[0]).collect()
    }
}

impl<L: LockService> LockService for FlakyLockService<L> {
    async fn acquire(&self, key: &str, ttl: Duration, wait: Duration) -> Result<Option<LockToken>, LockError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(Instant::now());
        }
        let fail =
            self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if fail {
            return Err(LockError::BackendUnavailable("simulated outage".into()));
        }
        self.inner.acquire(key, ttl, wait).await
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, LockError> {
        self.inner.release(key, token).await
    }
}
