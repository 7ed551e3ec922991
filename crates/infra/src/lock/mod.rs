//! Locking strategies guarding the registry cleaner.
//!
//! A strategy answers one question per pass: may this node reap now? Exactly one holder
//! at a time; a holder that dies loses the lock once its lease runs out.

#[cfg(feature = "redis")]
pub mod redis;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

#[cfg(feature = "redis")]
pub use self::redis::RedisLockingStrategy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock backend unavailable: {0}")]
    Unavailable(String),

    #[error("lock state poisoned")]
    Poisoned,
}

pub trait LockingStrategy: Send + Sync + core::fmt::Debug {
    /// Try to take the lock without blocking. `Ok(false)` means someone else holds it.
    fn acquire(&self) -> Result<bool, LockError>;

    /// Give the lock up if held by this strategy; a no-op otherwise.
    fn release(&self) -> Result<(), LockError>;
}

impl<L> LockingStrategy for Arc<L>
where
    L: LockingStrategy + ?Sized,
{
    fn acquire(&self) -> Result<bool, LockError> {
        (**self).acquire()
    }

    fn release(&self) -> Result<(), LockError> {
        (**self).release()
    }
}

/// Always granted. Single-node deployments only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLockingStrategy;

impl LockingStrategy for NoOpLockingStrategy {
    fn acquire(&self) -> Result<bool, LockError> {
        Ok(true)
    }

    fn release(&self) -> Result<(), LockError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: Uuid,
    expires_at: Instant,
}

/// Lease-based lock shared between strategies of one process.
///
/// Each strategy has its own owner id; use [`peer`](Self::peer) to obtain another
/// contender on the same lock.
#[derive(Debug, Clone)]
pub struct InMemoryLockingStrategy {
    state: Arc<Mutex<Option<Lease>>>,
    owner: Uuid,
    lease: Duration,
}

impl InMemoryLockingStrategy {
    pub fn new(lease: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
            owner: Uuid::now_v7(),
            lease,
        }
    }

    /// Another contender for the same lock.
    pub fn peer(&self) -> Self {
        Self {
            state: self.state.clone(),
            owner: Uuid::now_v7(),
            lease: self.lease,
        }
    }
}

impl LockingStrategy for InMemoryLockingStrategy {
    fn acquire(&self) -> Result<bool, LockError> {
        let mut state = self.state.lock().map_err(|_| LockError::Poisoned)?;
        let now = Instant::now();
        match *state {
            Some(lease) if lease.owner != self.owner && lease.expires_at > now => Ok(false),
            _ => {
                *state = Some(Lease {
                    owner: self.owner,
                    expires_at: now + self.lease,
                });
                Ok(true)
            }
        }
    }

    fn release(&self) -> Result<(), LockError> {
        let mut state = self.state.lock().map_err(|_| LockError::Poisoned)?;
        if (*state).is_some_and(|lease| lease.owner == self.owner) {
            *state = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_always_grants() {
        let lock = NoOpLockingStrategy;
        assert!(lock.acquire().unwrap());
        assert!(lock.acquire().unwrap());
        lock.release().unwrap();
    }

    #[test]
    fn peers_exclude_each_other() {
        let a = InMemoryLockingStrategy::new(Duration::from_secs(60));
        let b = a.peer();

        assert!(a.acquire().unwrap());
        assert!(!b.acquire().unwrap());

        // Releasing someone else's lock does nothing.
        b.release().unwrap();
        assert!(!b.acquire().unwrap());

        a.release().unwrap();
        assert!(b.acquire().unwrap());
        assert!(!a.acquire().unwrap());
    }

    #[test]
    fn holder_may_renew() {
        let a = InMemoryLockingStrategy::new(Duration::from_secs(60));
        assert!(a.acquire().unwrap());
        assert!(a.acquire().unwrap());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let a = InMemoryLockingStrategy::new(Duration::from_millis(10));
        let b = a.peer();
        assert!(a.acquire().unwrap());
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.acquire().unwrap());
        assert!(!a.acquire().unwrap());
    }

    #[test]
    fn separate_instances_do_not_share() {
        let a = InMemoryLockingStrategy::new(Duration::from_secs(60));
        let c = InMemoryLockingStrategy::new(Duration::from_secs(60));
        assert!(a.acquire().unwrap());
        assert!(c.acquire().unwrap());
    }
}
