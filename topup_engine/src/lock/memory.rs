use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use log::*;
use tokio::sync::Mutex;

use crate::traits::{LockError, LockService, LockToken};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct Held {
    token: LockToken,
    expires_at: Instant,
}

/// An in-process [`LockService`]. Clones share the same lock table.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockService {
    locks: Arc<Mutex<HashMap<String, Held>>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_acquire(&self, key: &str, ttl: Duration) -> Option<LockToken> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        match locks.get(key) {
            Some(held) if held.expires_at > now => None,
            _ => {
                let token = LockToken::random();
                locks.insert(key.to_string(), Held { token: token.clone(), expires_at: now + ttl });
                Some(token)
            },
        }
    }
}

impl LockService for MemoryLockService {
    async fn acquire(&self, key: &str, ttl: Duration, wait: Duration) -> Result<Option<LockToken>, LockError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(token) = self.try_acquire(key, ttl).await {
                trace!("🔒️ Acquired {key}");
                return Ok(Some(token));
            }
            if Instant::now() >= deadline {
                debug!("🔒️ Timed out waiting for {key}");
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, LockError> {
        let mut locks = self.locks.lock().await;
        match locks.get(key) {
            Some(held) if &held.token == token => {
                locks.remove(key);
                trace!("🔒️ Released {key}");
                Ok(true)
            },
            Some(_) => {
                warn!("🔒️ Lock {key} is held by another owner. It was not released.");
                Ok(false)
            },
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn exclusive_until_released() {
        let locks = MemoryLockService::new();
        let token = locks.acquire("a", TTL, Duration::ZERO).await.unwrap().expect("first acquire");
        assert!(locks.acquire("a", TTL, Duration::from_millis(30)).await.unwrap().is_none());
        assert!(locks.acquire("b", TTL, Duration::ZERO).await.unwrap().is_some());
        assert!(locks.release("a", &token).await.unwrap());
        assert!(locks.acquire("a", TTL, Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let locks = MemoryLockService::new();
        let stale = locks.acquire("a", Duration::from_millis(20), Duration::ZERO).await.unwrap().unwrap();
        let fresh = locks.acquire("a", TTL, Duration::from_millis(200)).await.unwrap().expect("lock should expire");
        // The first holder no longer owns the lock and must not be able to release it
        assert!(!locks.release("a", &stale).await.unwrap());
        assert!(locks.release("a", &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn waiter_gets_lock_when_released() {
        let locks = MemoryLockService::new();
        let token = locks.acquire("a", TTL, Duration::ZERO).await.unwrap().unwrap();
        let other = locks.clone();
        let waiter = tokio::spawn(async move { other.acquire("a", TTL, Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        locks.release("a", &token).await.unwrap();
        assert!(waiter.await.unwrap().unwrap().is_some());
    }
}
