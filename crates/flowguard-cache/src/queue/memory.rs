//! In-memory queue operations
//!
//! One mutex guards every list and counter, so each operation is as
//! indivisible as a script on a single-threaded cache server.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{QueueOperations, ReinsertOp, aux_key, parse_numeric};
use crate::error::{CacheError, Result};

struct Counter {
    value: i64,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    counters: HashMap<String, Counter>,
}

impl State {
    fn list_len(&self, key: &str) -> usize {
        self.lists.get(key).map_or(0, VecDeque::len)
    }

    fn push(&mut self, key: &str, value: &str, op: ReinsertOp) -> usize {
        let list = self.lists.entry(key.to_string()).or_default();
        match op {
            ReinsertOp::PushHead => list.push_front(value.to_string()),
            ReinsertOp::PushTail => list.push_back(value.to_string()),
        }
        list.len()
    }

    fn pop_tail(&mut self, key: &str) -> Option<String> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_back();
        if list.is_empty() {
            self.lists.remove(key);
        }
        value
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueOperations for MemoryQueue {
    async fn push_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if state
            .lists
            .get(key)
            .is_some_and(|list| list.iter().any(|v| v == value))
        {
            return Ok(false);
        }
        state.push(key, value, ReinsertOp::PushHead);
        Ok(true)
    }

    async fn push_sorted(&self, key: &str, value: &str) -> Result<bool> {
        let number =
            parse_numeric(value).ok_or_else(|| CacheError::NotNumeric(value.to_string()))?;

        let mut state = self.state.lock();
        let list = state.lists.entry(key.to_string()).or_default();

        let mut position = list.len();
        for (index, existing) in list.iter().enumerate() {
            if existing == value {
                return Ok(false);
            }
            if parse_numeric(existing).is_some_and(|n| n > number) {
                position = index;
                break;
            }
        }

        list.insert(position, value.to_string());
        Ok(true)
    }

    async fn pop_if_present(
        &self,
        primary: &str,
        aux_prefix: &str,
        aux_suffix: &str,
        reinsert: ReinsertOp,
    ) -> Result<Option<String>> {
        let mut state = self.state.lock();
        while let Some(value) = state.pop_tail(primary) {
            if state.list_len(&aux_key(aux_prefix, &value, aux_suffix)) > 0 {
                state.push(primary, &value, reinsert);
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn increment_with_expire(&self, key: &str, ttl_seconds: u64) -> Result<i64> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(counter) = state.counters.get_mut(key)
            && counter.expires_at > now
        {
            counter.value += 1;
            return Ok(counter.value);
        }

        // A new window starts; lapsed counters go with the old ones
        state.counters.retain(|_, counter| counter.expires_at > now);
        state.counters.insert(
            key.to_string(),
            Counter {
                value: 1,
                expires_at: now + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(1)
    }

    async fn range(&self, key: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, key: &str) -> Result<usize> {
        Ok(self.state.lock().list_len(key))
    }

    async fn push_head(&self, key: &str, value: &str) -> Result<usize> {
        Ok(self.state.lock().push(key, value, ReinsertOp::PushHead))
    }

    async fn push_tail(&self, key: &str, value: &str) -> Result<usize> {
        Ok(self.state.lock().push(key, value, ReinsertOp::PushTail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_if_absent() {
        let queue = MemoryQueue::new();
        assert!(queue.push_if_absent("q", "a").await.unwrap());
        assert!(queue.push_if_absent("q", "b").await.unwrap());
        assert!(!queue.push_if_absent("q", "a").await.unwrap());
        assert_eq!(queue.range("q").await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_push_sorted() {
        let queue = MemoryQueue::new();
        for v in ["5", "1", "3", "10", "3"] {
            queue.push_sorted("q", v).await.unwrap();
        }
        assert_eq!(queue.range("q").await.unwrap(), vec!["1", "3", "5", "10"]);
    }

    #[tokio::test]
    async fn test_push_sorted_equality_is_textual() {
        let queue = MemoryQueue::new();
        assert!(queue.push_sorted("q", "1").await.unwrap());
        // Numerically equal, textually different: both kept
        assert!(queue.push_sorted("q", "1.0").await.unwrap());
        assert_eq!(queue.len("q").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_push_sorted_rejects_non_numeric() {
        let queue = MemoryQueue::new();
        let err = queue.push_sorted("q", "abc").await.unwrap_err();
        assert!(matches!(err, CacheError::NotNumeric(ref v) if v == "abc"));
        assert_eq!(queue.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_push_sorted_skips_non_numeric_elements() {
        let queue = MemoryQueue::new();
        queue.push_tail("q", "x").await.unwrap();
        queue.push_sorted("q", "2").await.unwrap();
        queue.push_sorted("q", "1").await.unwrap();
        assert_eq!(queue.range("q").await.unwrap(), vec!["x", "1", "2"]);
    }

    #[tokio::test]
    async fn test_pop_if_present_discards_values_without_aux() {
        let queue = MemoryQueue::new();
        for v in ["a", "b", "c"] {
            queue.push_head("primary", v).await.unwrap();
        }
        // Tail is "a"; only "b" has work queued
        queue.push_head("work:b:pending", "job-1").await.unwrap();

        let popped = queue
            .pop_if_present("primary", "work", ":pending", ReinsertOp::PushHead)
            .await
            .unwrap();
        assert_eq!(popped.as_deref(), Some("b"));
        assert_eq!(queue.range("primary").await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_pop_if_present_drains_to_none() {
        let queue = MemoryQueue::new();
        queue.push_head("primary", "a").await.unwrap();
        queue.push_head("primary", "b").await.unwrap();

        let popped = queue
            .pop_if_present("primary", "work", "", ReinsertOp::PushTail)
            .await
            .unwrap();
        assert!(popped.is_none());
        assert_eq!(queue.len("primary").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pop_if_present_with_invalid_op_is_noop() {
        let queue = MemoryQueue::new();
        queue.push_head("primary", "a").await.unwrap();
        queue.push_head("work:a", "job").await.unwrap();

        let popped = queue
            .pop_if_present_with("primary", "work", "", "del")
            .await
            .unwrap();
        assert!(popped.is_none());
        assert_eq!(queue.range("primary").await.unwrap(), vec!["a"]);

        let popped = queue
            .pop_if_present_with("primary", "work", "", "rpush")
            .await
            .unwrap();
        assert_eq!(popped.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_increment_with_expire() {
        let queue = MemoryQueue::new();
        assert_eq!(queue.increment_with_expire("hits", 60).await.unwrap(), 1);
        assert_eq!(queue.increment_with_expire("hits", 60).await.unwrap(), 2);

        // Zero ttl expires immediately, so the next increment starts over
        assert_eq!(queue.increment_with_expire("burst", 0).await.unwrap(), 1);
        assert_eq!(queue.increment_with_expire("burst", 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_counters_are_dropped() {
        let queue = MemoryQueue::new();
        queue.increment_with_expire("burst-a", 0).await.unwrap();
        queue.increment_with_expire("burst-b", 0).await.unwrap();
        queue.increment_with_expire("hits", 60).await.unwrap();
        assert_eq!(queue.state.lock().counters.len(), 1);

        assert_eq!(queue.increment_with_expire("burst-c", 0).await.unwrap(), 1);
        let state = queue.state.lock();
        let mut keys: Vec<_> = state.counters.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["burst-c", "hits"]);
        assert_eq!(state.counters["hits"].value, 1);
    }
}
