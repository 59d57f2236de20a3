//! Scoped credential reservation.

use super::credential::Credential;
use super::pool::CredentialPool;
use std::ops::Deref;
use std::time::Duration;

/// A reserved credential that goes back to its pool when dropped.
///
/// Callers that hit a provider rate limit call `mark_rate_limited` before
/// letting the lease go so the pool can record it.
#[derive(Debug)]
pub struct CredentialLease {
    pool: CredentialPool,
    index: usize,
    rate_limited: Option<Duration>,
    released: bool,
}

impl CredentialLease {
    pub(crate) fn new(pool: CredentialPool, index: usize) -> Self {
        Self {
            pool,
            index,
            rate_limited: None,
            released: false,
        }
    }

    /// The reserved credential
    pub fn credential(&self) -> &Credential {
        self.pool.credential_at(self.index)
    }

    pub fn name(&self) -> &str {
        self.credential().name()
    }

    /// Record that the provider rate limited this credential
    pub fn mark_rate_limited(&mut self, backoff_hint: Duration) {
        self.rate_limited = Some(backoff_hint);
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited.is_some()
    }

    /// Release now instead of at drop
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let name = self.pool.credential_at(self.index).name().to_string();
        match self.rate_limited {
            Some(hint) => self.pool.release(&name, true, hint),
            None => self.pool.release(&name, false, Duration::ZERO),
        }
    }
}

impl Deref for CredentialLease {
    type Target = Credential;

    fn deref(&self) -> &Self::Target {
        self.credential()
    }
}

impl Drop for CredentialLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credential_pool::{PoolConfig, ReleasePolicy};

    fn pool() -> CredentialPool {
        CredentialPool::with_defaults(vec![
            Credential::api_key("A", "secret-a"),
            Credential::api_key("B", "secret-b"),
        ])
    }

    #[tokio::test]
    async fn test_lease_releases_on_drop() {
        let pool = pool();
        {
            let lease = pool.checkout(None).await.unwrap();
            assert_eq!(lease.name(), "A");
            assert_eq!(lease.secret(), "secret-a");
            assert_eq!(pool.stats().in_use, 1);
        }
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(pool.stats().available, 2);
    }

    #[tokio::test]
    async fn test_lease_released_on_error_path() {
        async fn failing_step(pool: &CredentialPool) -> Result<(), String> {
            let _lease = pool.checkout(None).await.ok_or("no credential")?;
            Err("provider exploded".to_string())
        }

        let pool = pool();
        assert!(failing_step(&pool).await.is_err());
        assert_eq!(pool.stats().available, 2);
    }

    #[tokio::test]
    async fn test_explicit_release_is_not_repeated_on_drop() {
        let pool = pool();
        let lease = pool.checkout(None).await.unwrap();
        lease.release();

        let stats = pool.stats();
        assert_eq!(stats.available, 2);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_lease_is_recorded() {
        let pool = CredentialPool::new(
            vec![Credential::api_key("A", "a")],
            PoolConfig::default().with_release_policy(ReleasePolicy::Deferred),
        );

        let mut lease = pool.checkout(None).await.unwrap();
        lease.mark_rate_limited(Duration::from_secs(60));
        assert!(lease.is_rate_limited());
        drop(lease);

        let stats = pool.stats();
        assert_eq!(stats.rate_limit_events, 1);
        assert_eq!(stats.cooling, 1);
        assert!(pool.checkout(Some(Duration::from_millis(10))).await.is_none());
    }
}
