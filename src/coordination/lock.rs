//! Named, TTL-bounded leases.
//!
//! A lock is the key `Lock:<resource>` holding the holder's name. Acquisition is a
//! single create-if-absent, so two instances racing for the same resource can never
//! both win; the TTL bounds how long a crashed holder blocks everyone else.
//! Contention and ownership problems are reported as values, not errors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::fabric::{Fabric, FabricResult};

pub const LOCK_PREFIX: &str = "Lock:";
pub const FAILED_LOCK_ATTEMPT: &str = "FAILED_LOCK_ATTEMPT";
pub const NOT_OWNER_OF_THE_LOCK: &str = "NOT_OWNER_OF_THE_LOCK";
pub const LOCK_DOES_NOT_EXIST: &str = "LOCK_DOES_NOT_EXIST";

/// Result of [`Lock::attempt_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// The lease was created; carries the lock key.
    Acquired(String),
    /// Someone else holds it.
    Failed,
}

impl LockAttempt {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAttempt::Acquired(_))
    }
}

impl fmt::Display for LockAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockAttempt::Acquired(name) => f.write_str(name),
            LockAttempt::Failed => f.write_str(FAILED_LOCK_ATTEMPT),
        }
    }
}

/// Result of [`Lock::unlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unlock {
    Released(String),
    NotOwner,
    DoesNotExist,
}

impl fmt::Display for Unlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unlock::Released(name) => f.write_str(name),
            Unlock::NotOwner => f.write_str(NOT_OWNER_OF_THE_LOCK),
            Unlock::DoesNotExist => f.write_str(LOCK_DOES_NOT_EXIST),
        }
    }
}

/// Distributed lock over the fabric.
#[derive(Clone)]
pub struct Lock {
    fabric: Arc<dyn Fabric>,
    default_ttl: Duration,
}

impl Lock {
    pub fn new(fabric: Arc<dyn Fabric>, default_ttl: Duration) -> Self {
        Self { fabric, default_ttl }
    }

    fn key(resource: &str) -> String {
        format!("{LOCK_PREFIX}{resource}")
    }

    /// Takes the lease on `resource` for `requester`, for `ttl` or the default lease.
    pub async fn attempt_lock(
        &self,
        resource: &str,
        requester: &str,
        ttl: Option<Duration>,
    ) -> FabricResult<LockAttempt> {
        let key = Self::key(resource);
        let ttl = ttl.unwrap_or(self.default_ttl);
        if self
            .fabric
            .set_if_absent(&key, requester.to_string(), Some(ttl))
            .await?
        {
            debug!(resource, requester, "Lock acquired");
            Ok(LockAttempt::Acquired(key))
        } else {
            debug!(resource, requester, "Lock busy");
            Ok(LockAttempt::Failed)
        }
    }

    /// Releases `resource` if `requester` holds it (names compare case-insensitively).
    ///
    /// The holder check and the delete are two operations; a lease that expires and is
    /// re-acquired in between can be released by the previous holder.
    pub async fn unlock(&self, resource: &str, requester: &str) -> FabricResult<Unlock> {
        let key = Self::key(resource);
        let Some(holder) = self.fabric.get(&key).await? else {
            return Ok(Unlock::DoesNotExist);
        };
        if !holder.eq_ignore_ascii_case(requester) {
            return Ok(Unlock::NotOwner);
        }
        self.fabric.del(&key).await?;
        debug!(resource, requester, "Lock released");
        Ok(Unlock::Released(key))
    }

    pub async fn is_locked(&self, resource: &str) -> FabricResult<bool> {
        self.fabric.exists(&Self::key(resource)).await
    }

    pub async fn holder(&self, resource: &str) -> FabricResult<Option<String>> {
        self.fabric.get(&Self::key(resource)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::InMemoryFabric;

    fn lock() -> Lock {
        Lock::new(Arc::new(InMemoryFabric::new()), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_lock_contention_and_release() {
        let lock = lock();
        let first = lock.attempt_lock("R", "A", None).await.unwrap();
        assert_eq!(first, LockAttempt::Acquired("Lock:R".into()));

        let second = lock.attempt_lock("R", "B", None).await.unwrap();
        assert_eq!(second.to_string(), FAILED_LOCK_ATTEMPT);

        assert_eq!(lock.unlock("R", "B").await.unwrap(), Unlock::NotOwner);
        assert_eq!(lock.unlock("R", "a").await.unwrap(), Unlock::Released("Lock:R".into()));
        assert!(lock.attempt_lock("R", "B", None).await.unwrap().is_acquired());
    }

    #[tokio::test]
    async fn test_unlock_missing_lock() {
        let lock = lock();
        let outcome = lock.unlock("nothing", "A").await.unwrap();
        assert_eq!(outcome.to_string(), LOCK_DOES_NOT_EXIST);
        assert!(!lock.is_locked("nothing").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires() {
        let lock = lock();
        lock.attempt_lock("R", "A", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(lock.is_locked("R").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!lock.is_locked("R").await.unwrap());
        assert!(lock.attempt_lock("R", "B", None).await.unwrap().is_acquired());
    }
}
