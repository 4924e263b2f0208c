//! Behavior shared by every cache backend
//!
//! Each suite runs against the in-memory backends in every test run and
//! against a live Redis when one is available. Keys carry a random hash tag
//! so runs never collide and a cluster keeps them on one slot.

use std::time::Duration;

use flowguard_cache::{
    CacheError, DistributedLocker, LockRequest, QueueOperations, ReinsertOp, ReleaseOutcome,
};

/// Keys under one random hash tag
pub struct TestKeys {
    tag: String,
    used: Vec<String>,
}

impl TestKeys {
    pub fn new() -> Self {
        Self {
            tag: uuid::Uuid::new_v4().simple().to_string(),
            used: Vec::new(),
        }
    }

    pub fn key(&mut self, name: &str) -> String {
        let key = format!("{{flowguard-test-{}}}:{name}", self.tag);
        self.used.push(key.clone());
        key
    }

    /// Every key handed out so far
    pub fn used(&self) -> &[String] {
        &self.used
    }
}

pub async fn queue_behavior(queue: &dyn QueueOperations, keys: &mut TestKeys) {
    let machines = keys.key("machines");
    assert!(queue.push_if_absent(&machines, "10.0.0.1").await.unwrap());
    assert!(queue.push_if_absent(&machines, "10.0.0.2").await.unwrap());
    assert!(!queue.push_if_absent(&machines, "10.0.0.1").await.unwrap());
    assert_eq!(queue.range(&machines).await.unwrap(), vec!["10.0.0.2", "10.0.0.1"]);

    let delays = keys.key("delays");
    for value in ["10", "2", "33", "2", "7.5"] {
        queue.push_sorted(&delays, value).await.unwrap();
    }
    assert_eq!(queue.range(&delays).await.unwrap(), vec!["2", "7.5", "10", "33"]);
    assert!(matches!(
        queue.push_sorted(&delays, "soon").await,
        Err(CacheError::NotNumeric(_))
    ));
    assert_eq!(queue.len(&delays).await.unwrap(), 4);

    // Only "orders" has pending work; "payments" is discarded on the way
    let apps = keys.key("apps");
    let work_prefix = keys.key("work");
    for app in ["payments", "orders", "inventory"] {
        queue.push_head(&apps, app).await.unwrap();
    }
    let work_key = keys.key("work:orders:pending");
    queue.push_tail(&work_key, "job-1").await.unwrap();

    let popped = queue
        .pop_if_present(&apps, &work_prefix, ":pending", ReinsertOp::PushHead)
        .await
        .unwrap();
    assert_eq!(popped.as_deref(), Some("orders"));
    assert_eq!(queue.range(&apps).await.unwrap(), vec!["orders", "inventory"]);

    let rejected = queue
        .pop_if_present_with(&apps, &work_prefix, ":pending", "sadd")
        .await
        .unwrap();
    assert!(rejected.is_none());
    assert_eq!(queue.len(&apps).await.unwrap(), 2);

    let hits = keys.key("hits");
    assert_eq!(queue.increment_with_expire(&hits, 60).await.unwrap(), 1);
    assert_eq!(queue.increment_with_expire(&hits, 60).await.unwrap(), 2);
}

pub async fn lock_behavior(locker: &DistributedLocker, keys: &mut TestKeys) {
    let key = keys.key("rule-lock");
    let outer = locker.lock_default(&key).await.unwrap();
    assert!(locker.is_locked(&key).await.unwrap());

    let contender = locker
        .try_lock(LockRequest::new(key.clone()), Duration::ZERO)
        .await
        .unwrap();
    assert!(contender.is_none());

    let inner = locker
        .try_lock(LockRequest::reenter(&outer), Duration::ZERO)
        .await
        .unwrap()
        .expect("owner re-enters its own lock");
    assert_eq!(locker.unlock(inner).await.unwrap(), ReleaseOutcome::StillHeld);
    assert!(locker.is_locked(&key).await.unwrap());
    assert_eq!(locker.unlock(outer).await.unwrap(), ReleaseOutcome::Released);
    assert!(!locker.is_locked(&key).await.unwrap());

    let leased = keys.key("leased-lock");
    let _abandoned = locker
        .lock_for(&leased, Duration::from_millis(100))
        .await
        .unwrap();
    let waiter = locker
        .try_lock(LockRequest::new(leased.clone()), Duration::from_secs(2))
        .await
        .unwrap()
        .expect("lease runs out while waiting");
    assert_eq!(locker.unlock(waiter).await.unwrap(), ReleaseOutcome::Released);

    let forced = keys.key("forced-lock");
    let _stuck = locker.lock_default(&forced).await.unwrap();
    assert!(locker.force_unlock(&forced).await.unwrap());
    assert!(!locker.is_locked(&forced).await.unwrap());
    assert!(!locker.force_unlock(&forced).await.unwrap());
}
