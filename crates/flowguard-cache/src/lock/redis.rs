//! Redis lock backend
//!
//! A lock is a hash at the lock key mapping the owner token to its hold
//! count, with the lease applied as the key expiry. Every state change runs
//! as a Lua script so check and update are atomic on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};

use super::model::{AcquireOutcome, ReleaseOutcome};
use super::service::LockBackend;
use crate::connection::CacheConnection;
use crate::error::Result;

// Returns nil when acquired, else the remaining lease in milliseconds
const ACQUIRE_SCRIPT: &str = r"
if (redis.call('exists', KEYS[1]) == 0) or (redis.call('hexists', KEYS[1], ARGV[2]) == 1) then
    redis.call('hincrby', KEYS[1], ARGV[2], 1)
    redis.call('pexpire', KEYS[1], ARGV[1])
    return nil
end
return redis.call('pttl', KEYS[1])
";

const RENEW_SCRIPT: &str = r"
if redis.call('hexists', KEYS[1], ARGV[2]) == 1 then
    redis.call('pexpire', KEYS[1], ARGV[1])
    return 1
end
return 0
";

// -1: not held by owner, 0: released, >0: holds remaining
const RELEASE_SCRIPT: &str = r"
if redis.call('hexists', KEYS[1], ARGV[1]) == 0 then
    return -1
end
local holds = redis.call('hincrby', KEYS[1], ARGV[1], -1)
if holds > 0 then
    return holds
end
redis.call('del', KEYS[1])
return 0
";

pub struct RedisLockBackend {
    connection: CacheConnection,
    acquire: Script,
    renew: Script,
    release: Script,
}

impl RedisLockBackend {
    pub fn new(connection: CacheConnection) -> Self {
        Self {
            connection,
            acquire: Script::new(ACQUIRE_SCRIPT),
            renew: Script::new(RENEW_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<AcquireOutcome> {
        let mut conn = self.connection.clone();
        let pttl: Option<i64> = self
            .acquire
            .key(key)
            .arg(ttl_millis(ttl))
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;

        Ok(match pttl {
            None => AcquireOutcome::Acquired,
            Some(ms) if ms > 0 => AcquireOutcome::Held {
                remaining: Some(Duration::from_millis(ms as u64)),
            },
            Some(_) => AcquireOutcome::Held { remaining: None },
        })
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let renewed: i64 = self
            .renew
            .key(key)
            .arg(ttl_millis(ttl))
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<ReleaseOutcome> {
        let mut conn = self.connection.clone();
        let holds: i64 = self
            .release
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;

        Ok(match holds {
            0 => ReleaseOutcome::Released,
            h if h > 0 => ReleaseOutcome::StillHeld,
            _ => ReleaseOutcome::NotHeld,
        })
    }

    async fn force_release(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }
}
