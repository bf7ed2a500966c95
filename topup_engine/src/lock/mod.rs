//! Lock service backends.
//!
//! [`MemoryLockService`] serializes tasks within a single process and is what the tests and single-node deployments
//! use. [`RedisLockService`] (behind the `redis` feature) serializes across processes.
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryLockService;

#[cfg(feature = "redis")]
pub use self::redis::RedisLockService;
