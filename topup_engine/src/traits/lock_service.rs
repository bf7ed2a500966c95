use std::{fmt::Display, time::Duration};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("Lock backend is unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Lock backend error: {0}")]
    BackendError(String),
}

/// Proof of ownership of a lock. Only the holder of the token can release the lock, so a holder whose TTL expired
/// cannot release a lock that has since been taken by someone else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn random() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cross-process mutual exclusion primitive keyed by string.
///
/// Locks auto-release once `ttl` elapses, so a crashed holder can never block a key for longer than that.
#[allow(async_fn_in_trait)]
pub trait LockService: Clone {
    /// Tries to take the lock on `key` for `ttl`, waiting up to `wait` for a current holder to let go.
    ///
    /// Returns `Ok(None)` if the lock could not be acquired in time. Errors mean the backend itself failed.
    async fn acquire(&self, key: &str, ttl: Duration, wait: Duration) -> Result<Option<LockToken>, LockError>;

    /// Releases the lock on `key` if, and only if, it is still held with `token`. Returns whether a lock was released.
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, LockError>;
}
