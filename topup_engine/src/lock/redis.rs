use std::time::{Duration, Instant};

use log::*;
use redis::{aio::ConnectionManager, Client, Script};

use crate::traits::{LockError, LockService, LockToken};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Deletes the key only if it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A [`LockService`] backed by Redis `SET NX PX`. Safe across any number of processes sharing the Redis instance.
#[derive(Clone)]
pub struct RedisLockService {
    conn: ConnectionManager,
}

impl From<redis::RedisError> for LockError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_io_error() || e.is_timeout() {
            LockError::BackendUnavailable(e.to_string())
        } else {
            LockError::BackendError(e.to_string())
        }
    }
}

impl RedisLockService {
    pub async fn new(url: &str) -> Result<Self, LockError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("🔒️ Connected to Redis lock service");
        Ok(Self { conn })
    }

    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let token = LockToken::random();
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|_| token))
    }
}

impl LockService for RedisLockService {
    async fn acquire(&self, key: &str, ttl: Duration, wait: Duration) -> Result<Option<LockToken>, LockError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(token) = self.try_acquire(key, ttl).await? {
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
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT).key(key).arg(token.as_str()).invoke_async(&mut conn).await?;
        if deleted == 0 {
            warn!("🔒️ Lock {key} had expired or changed owner before release");
        }
        Ok(deleted > 0)
    }
}
