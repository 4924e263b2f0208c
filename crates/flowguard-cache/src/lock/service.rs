//! Distributed lock service
//!
//! [`LockBackend`] is the per-store primitive: one acquisition attempt,
//! renewal, release. [`DistributedLocker`] builds blocking, bounded and
//! cancellable acquisition on top of it, plus watchdog renewal for locks
//! held until released.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::interval;
use tracing::{debug, error, warn};

use super::model::*;
use crate::error::{CacheError, Result};

/// Upper bound between acquisition attempts while a key is contended
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Acquisitions between sweeps of expired in-memory locks
const MEMORY_SWEEP_INTERVAL: u64 = 256;

/// Lock storage primitive
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Try once to acquire `key` for `owner`. Re-acquiring as the current
    /// owner adds a hold and refreshes the expiry.
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<AcquireOutcome>;

    /// Extend the expiry if `owner` still holds `key`.
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Give up one hold of `owner` on `key`.
    async fn release(&self, key: &str, owner: &str) -> Result<ReleaseOutcome>;

    /// Delete the lock regardless of owner. Returns whether it was held.
    async fn force_release(&self, key: &str) -> Result<bool>;

    async fn is_locked(&self, key: &str) -> Result<bool>;
}

/// Mutual exclusion keyed by string over a [`LockBackend`]
#[derive(Clone)]
pub struct DistributedLocker {
    backend: Arc<dyn LockBackend>,
    watchdog_lease: Duration,
    retry_interval: Duration,
}

impl std::fmt::Debug for DistributedLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLocker")
            .field("watchdog_lease", &self.watchdog_lease)
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}

impl DistributedLocker {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self {
            backend,
            watchdog_lease: DEFAULT_LEASE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Locker backed by process-local state
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryLockBackend::new()))
    }

    /// Lease renewed by the watchdog for [`Lease::UntilReleased`] locks
    pub fn with_watchdog_lease(mut self, lease: Duration) -> Self {
        self.watchdog_lease = lease;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Acquire `request.key`, waiting at most `wait` (`None` waits until
    /// acquired).
    pub async fn lock(&self, request: LockRequest, wait: Option<Duration>) -> Result<LockHandle> {
        let key = request.key.clone();
        self.acquire_within(request, wait)
            .await?
            .ok_or(CacheError::LockTimeout { key })
    }

    /// Block until `key` is acquired, held until released.
    pub async fn lock_default(&self, key: &str) -> Result<LockHandle> {
        self.lock(LockRequest::new(key), None).await
    }

    /// Block until `key` is acquired. `-1` holds it until released, a
    /// non-negative value auto-releases after that many seconds.
    pub async fn lock_for_seconds(&self, key: &str, lease_seconds: i64) -> Result<LockHandle> {
        self.lock(
            LockRequest::new(key).with_lease(Lease::from_seconds(lease_seconds)),
            None,
        )
        .await
    }

    /// Block until `key` is acquired with a fixed lease.
    pub async fn lock_for(&self, key: &str, lease: Duration) -> Result<LockHandle> {
        self.lock(LockRequest::new(key).with_lease(Lease::Fixed(lease)), None)
            .await
    }

    /// Try to acquire within `wait`; `None` when the wait elapses.
    pub async fn try_lock(&self, request: LockRequest, wait: Duration) -> Result<Option<LockHandle>> {
        self.acquire_within(request, Some(wait)).await
    }

    /// Like [`try_lock`](Self::try_lock), but gives up with `None` as soon
    /// as `cancel` completes.
    pub async fn try_lock_until<F>(
        &self,
        request: LockRequest,
        wait: Duration,
        cancel: F,
    ) -> Result<Option<LockHandle>>
    where
        F: Future<Output = ()>,
    {
        let key = request.key.clone();
        tokio::select! {
            result = self.try_lock(request, wait) => result,
            _ = cancel => {
                debug!(key = %key, "Lock wait cancelled");
                Ok(None)
            }
        }
    }

    /// Release the hold represented by `handle`.
    pub async fn unlock(&self, handle: LockHandle) -> Result<ReleaseOutcome> {
        let LockHandle {
            key,
            owner,
            acquired_at,
            watchdog,
            ..
        } = handle;
        drop(watchdog);

        let outcome = self.backend.release(&key, &owner).await?;
        match outcome {
            ReleaseOutcome::NotHeld => {
                warn!(key = %key, "Unlock of a lock no longer held (lease expired or force-released)");
            }
            _ => {
                debug!(
                    key = %key,
                    held_ms = acquired_at.elapsed().as_millis() as u64,
                    outcome = ?outcome,
                    "Lock released"
                );
            }
        }
        Ok(outcome)
    }

    /// Administrative release by key; no-op returning `false` when the key
    /// is not held.
    pub async fn force_unlock(&self, key: &str) -> Result<bool> {
        let released = self.backend.force_release(key).await?;
        if released {
            warn!(key = %key, "Lock force-released");
        }
        Ok(released)
    }

    pub async fn is_locked(&self, key: &str) -> Result<bool> {
        self.backend.is_locked(key).await
    }

    async fn acquire_within(
        &self,
        request: LockRequest,
        wait: Option<Duration>,
    ) -> Result<Option<LockHandle>> {
        let LockRequest { key, lease, owner } = request;
        let owner = owner.unwrap_or_else(new_owner_token);
        let ttl = lease.ttl(self.watchdog_lease);
        let deadline = wait.map(|w| Instant::now() + w);

        loop {
            match self.backend.acquire(&key, &owner, ttl).await? {
                AcquireOutcome::Acquired => {
                    let mut handle = LockHandle::new(key, owner, lease);
                    if lease.needs_watchdog() {
                        handle.watchdog = Some(self.spawn_watchdog(&handle, ttl));
                    }
                    debug!(key = %handle.key, lease = ?lease, "Lock acquired");
                    return Ok(Some(handle));
                }
                AcquireOutcome::Held { remaining } => {
                    let mut pause = self.retry_interval;
                    if let Some(remaining) = remaining {
                        pause = pause.min(remaining.max(Duration::from_millis(1)));
                    }
                    if let Some(deadline) = deadline {
                        let now = Instant::now();
                        if now >= deadline {
                            debug!(key = %key, "Lock wait elapsed");
                            return Ok(None);
                        }
                        pause = pause.min(deadline - now);
                    }
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    fn spawn_watchdog(&self, handle: &LockHandle, ttl: Duration) -> Watchdog {
        let backend = self.backend.clone();
        let key = handle.key.clone();
        let owner = handle.owner.clone();
        let period = (ttl / 3).max(Duration::from_millis(10));

        Watchdog::new(tokio::spawn(async move {
            let mut interval = interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match backend.renew(&key, &owner, ttl).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(key = %key, "Lock renewal failed: no longer held by owner");
                        break;
                    }
                    Err(e) => {
                        error!(key = %key, error = %e, "Lock renewal error");
                        break;
                    }
                }
            }
        }))
    }
}

fn new_owner_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

struct MemoryLockEntry {
    owner: String,
    holds: u32,
    expires_at: Instant,
}

/// In-memory lock backend for standalone deployments and tests
#[derive(Default)]
pub struct MemoryLockBackend {
    locks: DashMap<String, MemoryLockEntry>,
    acquisitions: AtomicU64,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every lock whose lease has run out.
    fn sweep_expired(&self, now: Instant) {
        let before = self.locks.len();
        self.locks.retain(|_, entry| entry.expires_at > now);
        let reaped = before.saturating_sub(self.locks.len());
        if reaped > 0 {
            debug!(reaped, "Reaped expired in-memory locks");
        }
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<AcquireOutcome> {
        let now = Instant::now();
        if self.acquisitions.fetch_add(1, Ordering::Relaxed) % MEMORY_SWEEP_INTERVAL
            == MEMORY_SWEEP_INTERVAL - 1
        {
            self.sweep_expired(now);
        }

        let outcome = match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expires_at <= now {
                    *entry = MemoryLockEntry {
                        owner: owner.to_string(),
                        holds: 1,
                        expires_at: now + ttl,
                    };
                    AcquireOutcome::Acquired
                } else if entry.owner == owner {
                    entry.holds += 1;
                    entry.expires_at = now + ttl;
                    AcquireOutcome::Acquired
                } else {
                    AcquireOutcome::Held {
                        remaining: Some(entry.expires_at - now),
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryLockEntry {
                    owner: owner.to_string(),
                    holds: 1,
                    expires_at: now + ttl,
                });
                AcquireOutcome::Acquired
            }
        };

        Ok(outcome)
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        Ok(match self.locks.get_mut(key) {
            Some(mut entry) if entry.owner == owner && entry.expires_at > now => {
                entry.expires_at = now + ttl;
                true
            }
            _ => false,
        })
    }

    async fn release(&self, key: &str, owner: &str) -> Result<ReleaseOutcome> {
        let now = Instant::now();
        let mut outcome = ReleaseOutcome::NotHeld;

        self.locks.remove_if_mut(key, |_, entry| {
            if entry.expires_at <= now {
                return true;
            }
            if entry.owner != owner {
                return false;
            }
            entry.holds -= 1;
            if entry.holds == 0 {
                outcome = ReleaseOutcome::Released;
                true
            } else {
                outcome = ReleaseOutcome::StillHeld;
                false
            }
        });

        Ok(outcome)
    }

    async fn force_release(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .locks
            .remove(key)
            .map(|(_, entry)| entry.expires_at > now)
            .unwrap_or(false))
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        self.locks.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(self.locks.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locker() -> DistributedLocker {
        DistributedLocker::memory().with_retry_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_basic_lock_unlock() {
        let locker = locker();

        let handle = locker.lock_default("orders").await.unwrap();
        assert_eq!(handle.key(), "orders");
        assert!(locker.is_locked("orders").await.unwrap());

        let outcome = locker.unlock(handle).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Released);
        assert!(!locker.is_locked("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_try_lock_times_out_when_contended() {
        let locker = locker();
        let _held = locker.lock_default("orders").await.unwrap();

        let started = Instant::now();
        let attempt = locker
            .try_lock(LockRequest::new("orders"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(attempt.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_try_lock_zero_wait_is_single_attempt() {
        let locker = locker();
        let _held = locker.lock_default("orders").await.unwrap();

        let attempt = locker
            .try_lock(LockRequest::new("orders"), Duration::ZERO)
            .await
            .unwrap();
        assert!(attempt.is_none());
    }

    #[tokio::test]
    async fn test_lock_with_bounded_wait_errors_on_timeout() {
        let locker = locker();
        let _held = locker.lock_default("orders").await.unwrap();

        let err = locker
            .lock(LockRequest::new("orders"), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::LockTimeout { ref key } if key == "orders"));
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let locker = locker();
        let held = locker.lock_default("orders").await.unwrap();

        let waiter = {
            let locker = locker.clone();
            tokio::spawn(async move {
                locker
                    .try_lock(LockRequest::new("orders"), Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        locker.unlock(held).await.unwrap();

        let acquired = waiter.await.unwrap().unwrap();
        assert!(acquired.is_some());
    }

    #[tokio::test]
    async fn test_fixed_lease_expires_without_unlock() {
        let locker = locker();
        let handle = locker
            .lock_for("orders", Duration::from_millis(30))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!locker.is_locked("orders").await.unwrap());

        // Another owner can take it now; the stale handle releases nothing
        let other = locker
            .try_lock(LockRequest::new("orders"), Duration::ZERO)
            .await
            .unwrap();
        assert!(other.is_some());
        assert_eq!(
            locker.unlock(handle).await.unwrap(),
            ReleaseOutcome::NotHeld
        );
        assert!(locker.is_locked("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_for_seconds_negative_holds_until_released() {
        let locker = locker().with_watchdog_lease(Duration::from_millis(60));
        let handle = locker.lock_for_seconds("orders", -1).await.unwrap();
        assert_eq!(handle.lease(), Lease::UntilReleased);

        // The watchdog keeps renewing past several leases
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(locker.is_locked("orders").await.unwrap());

        locker.unlock(handle).await.unwrap();
        assert!(!locker.is_locked("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_renewal() {
        let locker = locker().with_watchdog_lease(Duration::from_millis(60));
        let handle = locker.lock_default("orders").await.unwrap();
        drop(handle);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!locker.is_locked("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_reentrant_holds() {
        let locker = locker();
        let outer = locker.lock_default("orders").await.unwrap();

        let inner = locker
            .try_lock(LockRequest::reenter(&outer), Duration::ZERO)
            .await
            .unwrap()
            .expect("same owner re-enters immediately");
        assert_eq!(inner.owner(), outer.owner());

        assert_eq!(
            locker.unlock(inner).await.unwrap(),
            ReleaseOutcome::StillHeld
        );
        assert!(locker.is_locked("orders").await.unwrap());

        assert_eq!(
            locker.unlock(outer).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert!(!locker.is_locked("orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_other_owner_cannot_reenter() {
        let locker = locker();
        let _held = locker.lock_default("orders").await.unwrap();

        let request = LockRequest {
            owner: Some("someone-else".to_string()),
            ..LockRequest::new("orders")
        };
        assert!(
            locker
                .try_lock(request, Duration::ZERO)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let locker = locker();

        // Not held: no-op
        assert!(!locker.force_unlock("orders").await.unwrap());

        let handle = locker.lock_default("orders").await.unwrap();
        assert!(locker.force_unlock("orders").await.unwrap());
        assert!(!locker.is_locked("orders").await.unwrap());
        assert_eq!(
            locker.unlock(handle).await.unwrap(),
            ReleaseOutcome::NotHeld
        );
    }

    #[tokio::test]
    async fn test_try_lock_until_cancelled() {
        let locker = locker();
        let _held = locker.lock_default("orders").await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let cancel = async move {
            let _ = rx.await;
        };

        let waiter = {
            let locker = locker.clone();
            tokio::spawn(async move {
                locker
                    .try_lock_until(LockRequest::new("orders"), Duration::from_secs(10), cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation ends the wait")
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let locker = locker();
        let _a = locker.lock_default("app-a-flow-rules").await.unwrap();
        let b = locker
            .try_lock(LockRequest::new("app-b-flow-rules"), Duration::ZERO)
            .await
            .unwrap();
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn test_expired_locks_are_reaped() {
        let backend = MemoryLockBackend::new();
        let lease = Duration::from_millis(10);
        backend.acquire("app-a", "owner-1", lease).await.unwrap();
        backend.acquire("app-b", "owner-1", lease).await.unwrap();
        backend.acquire("app-c", "owner-1", lease).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // releasing a lapsed lock reports it as not held and drops it
        let outcome = backend.release("app-a", "owner-1").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::NotHeld);
        assert!(!backend.locks.contains_key("app-a"));

        // so does asking about it, whoever asks
        assert!(!backend.is_locked("app-b").await.unwrap());
        assert!(!backend.locks.contains_key("app-b"));

        // a release by another owner still clears the lapsed entry
        let outcome = backend.release("app-c", "owner-2").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::NotHeld);
        assert!(backend.locks.is_empty());
    }

    #[tokio::test]
    async fn test_acquire_sweeps_abandoned_keys() {
        let backend = MemoryLockBackend::new();
        for i in 0..MEMORY_SWEEP_INTERVAL / 2 {
            backend
                .acquire(&format!("abandoned-{i}"), "owner-1", Duration::from_millis(5))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let lease = Duration::from_secs(30);
        for i in 0..MEMORY_SWEEP_INTERVAL / 2 {
            backend
                .acquire(&format!("live-{i}"), "owner-1", lease)
                .await
                .unwrap();
        }

        assert_eq!(backend.locks.len(), (MEMORY_SWEEP_INTERVAL / 2) as usize);
        assert!(backend.locks.iter().all(|entry| entry.key().starts_with("live-")));
    }
}
