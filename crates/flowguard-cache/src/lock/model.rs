//! Distributed lock data model

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Lease used when none is given; renewed by a watchdog while held
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// How long a held lock survives without an explicit unlock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lease {
    /// Held until unlocked. The backend entry carries a watchdog lease that
    /// is renewed while the handle is alive, so a crashed holder cannot
    /// block the key forever.
    #[default]
    UntilReleased,
    /// Released automatically once the duration elapses
    Fixed(Duration),
}

impl Lease {
    /// Lease from a seconds count: negative (`-1`) means held until
    /// released, anything else auto-releases after that many seconds.
    pub fn from_seconds(seconds: i64) -> Self {
        if seconds < 0 {
            Lease::UntilReleased
        } else {
            Lease::Fixed(Duration::from_secs(seconds as u64))
        }
    }

    /// Backend expiry to apply on acquisition, given the watchdog lease.
    pub fn ttl(&self, watchdog_lease: Duration) -> Duration {
        match self {
            Lease::UntilReleased => watchdog_lease,
            Lease::Fixed(d) => (*d).max(Duration::from_millis(1)),
        }
    }

    pub fn needs_watchdog(&self) -> bool {
        matches!(self, Lease::UntilReleased)
    }
}

/// A request to acquire a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub key: String,
    pub lease: Lease,
    /// Owner token; `None` acquires as a fresh owner
    pub owner: Option<String>,
}

impl LockRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            lease: Lease::default(),
            owner: None,
        }
    }

    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = lease;
        self
    }

    /// Acquire the key of `handle` again as the same owner. Succeeds
    /// immediately while `handle` is held; every handle obtained this way
    /// must be unlocked before the key becomes free.
    pub fn reenter(handle: &LockHandle) -> Self {
        Self {
            key: handle.key.clone(),
            lease: handle.lease,
            owner: Some(handle.owner.clone()),
        }
    }
}

/// Result of a single acquisition attempt against a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// Held by another owner; remaining lease if it has one
    Held { remaining: Option<Duration> },
}

/// Result of releasing one hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Last hold released, the key is free
    Released,
    /// A re-entrant hold by the same owner remains
    StillHeld,
    /// The owner did not hold the key (expired or force-released)
    NotHeld,
}

impl ReleaseOutcome {
    /// Whether this release gave up a hold that was actually held
    pub fn is_released(&self) -> bool {
        !matches!(self, ReleaseOutcome::NotHeld)
    }
}

/// Proof of ownership of one hold on a lock.
///
/// The only way to release a hold is to pass its handle to
/// [`DistributedLocker::unlock`](super::DistributedLocker::unlock).
/// Dropping a handle without unlocking stops lease renewal; the backend
/// entry then expires on its own.
#[derive(Debug)]
pub struct LockHandle {
    pub(crate) key: String,
    pub(crate) owner: String,
    pub(crate) lease: Lease,
    pub(crate) acquired_at: Instant,
    pub(crate) watchdog: Option<Watchdog>,
}

impl LockHandle {
    pub(crate) fn new(key: String, owner: String, lease: Lease) -> Self {
        Self {
            key,
            owner,
            lease,
            acquired_at: Instant::now(),
            watchdog: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lease(&self) -> Lease {
        self.lease
    }

    /// Time since acquisition
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Background lease renewal, stopped when dropped
#[derive(Debug)]
pub(crate) struct Watchdog {
    task: JoinHandle<()>,
}

impl Watchdog {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_from_seconds() {
        assert_eq!(Lease::from_seconds(-1), Lease::UntilReleased);
        assert_eq!(Lease::from_seconds(-5), Lease::UntilReleased);
        assert_eq!(
            Lease::from_seconds(10),
            Lease::Fixed(Duration::from_secs(10))
        );
        assert_eq!(Lease::from_seconds(0), Lease::Fixed(Duration::ZERO));
    }

    #[test]
    fn test_lease_ttl() {
        let watchdog = Duration::from_secs(30);
        assert_eq!(Lease::UntilReleased.ttl(watchdog), watchdog);
        assert_eq!(
            Lease::Fixed(Duration::from_secs(5)).ttl(watchdog),
            Duration::from_secs(5)
        );
        assert_eq!(
            Lease::Fixed(Duration::ZERO).ttl(watchdog),
            Duration::from_millis(1)
        );
        assert!(Lease::UntilReleased.needs_watchdog());
        assert!(!Lease::Fixed(Duration::from_secs(1)).needs_watchdog());
    }

    #[test]
    fn test_reenter_copies_owner() {
        let handle = LockHandle::new(
            "rules:orderService".to_string(),
            "owner-1".to_string(),
            Lease::Fixed(Duration::from_secs(3)),
        );
        let request = LockRequest::reenter(&handle);
        assert_eq!(request.key, "rules:orderService");
        assert_eq!(request.owner.as_deref(), Some("owner-1"));
        assert_eq!(request.lease, Lease::Fixed(Duration::from_secs(3)));
    }

    #[test]
    fn test_release_outcome() {
        assert!(ReleaseOutcome::Released.is_released());
        assert!(ReleaseOutcome::StillHeld.is_released());
        assert!(!ReleaseOutcome::NotHeld.is_released());
    }
}
