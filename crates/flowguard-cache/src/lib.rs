//! Flowguard Cache - coordination primitives over a shared Redis cache
//!
//! This crate provides:
//! - Cache topology settings (single node, cluster, sentinel)
//! - A connection type that hides which topology is in use
//! - Distributed locking with leases, re-entrancy and watchdog renewal
//! - Atomically scripted queue operations (dedup push, sorted insert,
//!   conditional pop with reinsert)
//!
//! Every primitive has an in-memory backend with the same semantics for
//! standalone deployments and tests.

pub mod config;
pub mod connection;
pub mod error;
pub mod lock;
pub mod queue;
pub mod sentinel;

pub use config::{CacheSettings, Topology};
pub use connection::CacheConnection;
pub use error::{CacheError, Result};
pub use sentinel::SentinelConnection;
pub use lock::{
    DistributedLocker, Lease, LockBackend, LockHandle, LockRequest, MemoryLockBackend,
    RedisLockBackend, ReleaseOutcome,
};
pub use queue::{
    MemoryQueue, QueueOperations, RedisQueue, ReinsertOp, UnsupportedReinsertOp, aux_key,
};
