//! Redis queue operations
//!
//! On a cluster every key a script touches must hash to the same slot.
//! The auxiliary list of a conditional pop is derived inside the script,
//! so callers on a cluster should put a hash tag such as `{tasks}` in both
//! the primary key and the auxiliary prefix.

use async_trait::async_trait;
use redis::{AsyncCommands, Script};

use super::{QueueOperations, ReinsertOp, parse_numeric};
use crate::connection::CacheConnection;
use crate::error::{CacheError, Result};

const PUSH_IF_ABSENT_SCRIPT: &str = r#"
local list = redis.call("lrange", KEYS[1], 0, -1)
for _, v in ipairs(list) do
  if v == ARGV[1] then
    return 0
  end
end
return redis.call("lpush", KEYS[1], ARGV[1])
"#;

const PUSH_SORTED_SCRIPT: &str = r#"
local value = tonumber(ARGV[1])
local list = redis.call("lrange", KEYS[1], 0, -1)
for _, v in ipairs(list) do
  if v == ARGV[1] then
    return 0
  end
  local n = tonumber(v)
  if n ~= nil and n > value then
    return redis.call("linsert", KEYS[1], "before", v, ARGV[1])
  end
end
return redis.call("rpush", KEYS[1], ARGV[1])
"#;

// KEYS[1] primary list, KEYS[2] auxiliary prefix,
// ARGV[1] auxiliary suffix, ARGV[2] reinsert command
const POP_IF_PRESENT_SCRIPT: &str = r#"
while true do
  local value = redis.call("rpop", KEYS[1])
  if not value then
    return nil
  elseif redis.call("llen", KEYS[2] .. ":" .. value .. ARGV[1]) > 0 then
    redis.call(ARGV[2], KEYS[1], value)
    return value
  end
end
"#;

const INCREMENT_WITH_EXPIRE_SCRIPT: &str = r#"
local count = redis.call("incr", KEYS[1])
if count == 1 then
  redis.call("expire", KEYS[1], ARGV[1])
end
return count
"#;

pub struct RedisQueue {
    connection: CacheConnection,
    push_if_absent: Script,
    push_sorted: Script,
    pop_if_present: Script,
    increment_with_expire: Script,
}

impl RedisQueue {
    pub fn new(connection: CacheConnection) -> Self {
        Self {
            connection,
            push_if_absent: Script::new(PUSH_IF_ABSENT_SCRIPT),
            push_sorted: Script::new(PUSH_SORTED_SCRIPT),
            pop_if_present: Script::new(POP_IF_PRESENT_SCRIPT),
            increment_with_expire: Script::new(INCREMENT_WITH_EXPIRE_SCRIPT),
        }
    }
}

#[async_trait]
impl QueueOperations for RedisQueue {
    async fn push_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let length: i64 = self
            .push_if_absent
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(length > 0)
    }

    async fn push_sorted(&self, key: &str, value: &str) -> Result<bool> {
        if parse_numeric(value).is_none() {
            return Err(CacheError::NotNumeric(value.to_string()));
        }

        let mut conn = self.connection.clone();
        let length: i64 = self
            .push_sorted
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(length > 0)
    }

    async fn pop_if_present(
        &self,
        primary: &str,
        aux_prefix: &str,
        aux_suffix: &str,
        reinsert: ReinsertOp,
    ) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = self
            .pop_if_present
            .key(primary)
            .key(aux_prefix)
            .arg(aux_suffix)
            .arg(reinsert.as_command())
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn increment_with_expire(&self, key: &str, ttl_seconds: u64) -> Result<i64> {
        let mut conn = self.connection.clone();
        let count: i64 = self
            .increment_with_expire
            .key(key)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn range(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let values: Vec<String> = conn.lrange(key, 0, -1).await?;
        Ok(values)
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn push_head(&self, key: &str, value: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        let len: usize = conn.lpush(key, value).await?;
        Ok(len)
    }

    async fn push_tail(&self, key: &str, value: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        let len: usize = conn.rpush(key, value).await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_script_reinserts_with_given_command() {
        assert!(POP_IF_PRESENT_SCRIPT.contains(r#"KEYS[2] .. ":" .. value .. ARGV[1]"#));
        assert!(POP_IF_PRESENT_SCRIPT.contains("redis.call(ARGV[2], KEYS[1], value)"));
    }

    #[test]
    fn test_scripts_are_distinct() {
        let hashes = [
            Script::new(PUSH_IF_ABSENT_SCRIPT).get_hash().to_string(),
            Script::new(PUSH_SORTED_SCRIPT).get_hash().to_string(),
            Script::new(POP_IF_PRESENT_SCRIPT).get_hash().to_string(),
            Script::new(INCREMENT_WITH_EXPIRE_SCRIPT).get_hash().to_string(),
        ];
        for (i, a) in hashes.iter().enumerate() {
            assert_eq!(a.len(), 40);
            for b in &hashes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
