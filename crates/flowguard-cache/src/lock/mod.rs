//! Distributed locking
//!
//! Locks are keyed by string and held by an owner token. A hold is
//! represented by a [`LockHandle`] and released by passing the handle
//! back to [`DistributedLocker::unlock`].

mod model;
mod redis;
mod service;

pub use model::*;
pub use self::redis::RedisLockBackend;
pub use service::{DEFAULT_RETRY_INTERVAL, DistributedLocker, LockBackend, MemoryLockBackend};
