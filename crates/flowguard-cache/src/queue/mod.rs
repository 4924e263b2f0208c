//! Atomic list operations on the shared cache
//!
//! Each operation runs as one indivisible unit against the cache: a Lua
//! script on Redis, a single critical section in memory. Composing two
//! calls is not atomic.

mod memory;
mod redis;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

pub use memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// How a popped value is pushed back onto its list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinsertOp {
    /// `lpush`
    PushHead,
    /// `rpush`
    PushTail,
}

impl ReinsertOp {
    /// Redis command implementing the reinsert
    pub fn as_command(&self) -> &'static str {
        match self {
            ReinsertOp::PushHead => "lpush",
            ReinsertOp::PushTail => "rpush",
        }
    }
}

impl fmt::Display for ReinsertOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_command())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported reinsert operation '{0}', expected lpush or rpush")]
pub struct UnsupportedReinsertOp(pub String);

impl FromStr for ReinsertOp {
    type Err = UnsupportedReinsertOp;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("lpush") {
            Ok(ReinsertOp::PushHead)
        } else if s.eq_ignore_ascii_case("rpush") {
            Ok(ReinsertOp::PushTail)
        } else {
            Err(UnsupportedReinsertOp(s.to_string()))
        }
    }
}

/// Key of the auxiliary list checked by a conditional pop
pub fn aux_key(prefix: &str, value: &str, suffix: &str) -> String {
    format!("{prefix}:{value}{suffix}")
}

/// Parse a sorted-insert value the way the cache script does. Non-finite
/// values have no Lua counterpart and are rejected.
pub(crate) fn parse_numeric(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[async_trait]
pub trait QueueOperations: Send + Sync {
    /// Push `value` to the head of `key` unless the list already contains
    /// it. Returns whether it was inserted.
    async fn push_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// Insert numeric `value` before the first element numerically greater
    /// than it, or at the tail. No-op when an equal string is present.
    /// Elements that are not numeric are never considered greater.
    async fn push_sorted(&self, key: &str, value: &str) -> Result<bool>;

    /// Pop from the tail of `primary` until a value whose auxiliary list
    /// (see [`aux_key`]) is non-empty is found, discarding the others. That
    /// value is pushed back with `reinsert` and returned; `None` once
    /// `primary` is drained.
    async fn pop_if_present(
        &self,
        primary: &str,
        aux_prefix: &str,
        aux_suffix: &str,
        reinsert: ReinsertOp,
    ) -> Result<Option<String>>;

    /// [`pop_if_present`](Self::pop_if_present) with the reinsert operation
    /// given by name. Any name other than `lpush`/`rpush` returns `None`
    /// without touching the cache.
    async fn pop_if_present_with(
        &self,
        primary: &str,
        aux_prefix: &str,
        aux_suffix: &str,
        reinsert: &str,
    ) -> Result<Option<String>> {
        match reinsert.parse::<ReinsertOp>() {
            Ok(op) => {
                self.pop_if_present(primary, aux_prefix, aux_suffix, op)
                    .await
            }
            Err(e) => {
                warn!(key = %primary, error = %e, "Rejected conditional pop");
                Ok(None)
            }
        }
    }

    /// Increment the counter at `key`, setting its expiry when the
    /// increment created it. Returns the new value.
    async fn increment_with_expire(&self, key: &str, ttl_seconds: u64) -> Result<i64>;

    /// Whole list, head first
    async fn range(&self, key: &str) -> Result<Vec<String>>;

    async fn len(&self, key: &str) -> Result<usize>;

    /// Returns the new length.
    async fn push_head(&self, key: &str, value: &str) -> Result<usize>;

    /// Returns the new length.
    async fn push_tail(&self, key: &str, value: &str) -> Result<usize>;
}
