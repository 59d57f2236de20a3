//! Credential Pool Implementation
//!
//! This module provides the `CredentialPool` that hands out credentials for
//! exclusive use and takes them back, optionally cooling rate-limited ones
//! down before they are reused.

use super::credential::{enabled_only, Credential};
use super::guard::CredentialLease;
use super::source::{CredentialSource, CredentialSourceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Pool Configuration
// ============================================================================

/// What `release` does with a credential that hit a rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Log the rate limit and return the credential to the free queue at once
    #[default]
    Immediate,
    /// Hold the credential until its backoff hint elapses, then return it
    Deferred,
}

impl std::fmt::Display for ReleasePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// Configuration for credential pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Label used in log events (e.g. the provider name)
    pub label: String,
    /// Handling of rate-limited releases
    pub release_policy: ReleasePolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            label: "default".to_string(),
            release_policy: ReleasePolicy::Immediate,
        }
    }
}

impl PoolConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }
}

// ============================================================================
// Pool State
// ============================================================================

/// Rate-limit history of one credential
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitRecord {
    pub count: u32,
    pub last_at: DateTime<Utc>,
    pub last_backoff_ms: u128,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Free credentials; acquire pops the front, release pushes the back
    available: VecDeque<String>,
    /// Reserved credentials, including ones the pool is cooling down
    in_use: HashSet<String>,
    /// Subset of `in_use` held by the pool until a backoff elapses
    cooling: HashSet<String>,
    /// Set once the exhaustion warning has been emitted for the current episode
    exhaustion_reported: bool,
    rate_limits: HashMap<String, RateLimitRecord>,
}

#[derive(Debug)]
struct PoolInner {
    credentials: Vec<Credential>,
    index: HashMap<String, usize>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    notify: Notify,
}

// ============================================================================
// Credential Pool
// ============================================================================

/// A shared pool of interchangeable credentials.
///
/// Every credential is either free or reserved, never both. `acquire`
/// reserves one (waiting if none is free) and `release` hands it back.
/// The handle is cheap to clone; all clones share the same pool.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    inner: Arc<PoolInner>,
}

impl CredentialPool {
    /// Create a new credential pool.
    ///
    /// Disabled credentials are skipped, and so is any credential whose
    /// name was already seen.
    pub fn new(credentials: Vec<Credential>, config: PoolConfig) -> Self {
        let loaded = credentials.len();
        let mut kept: Vec<Credential> = Vec::with_capacity(loaded);
        let mut index = HashMap::new();

        for cred in enabled_only(credentials) {
            if index.contains_key(cred.name()) {
                tracing::warn!(
                    pool = %config.label,
                    credential = cred.name(),
                    "Duplicate credential name ignored"
                );
                continue;
            }
            index.insert(cred.name().to_string(), kept.len());
            kept.push(cred);
        }

        if kept.len() < loaded {
            tracing::debug!(
                pool = %config.label,
                skipped = loaded - kept.len(),
                "Skipped disabled or duplicate credentials"
            );
        }

        let state = PoolState {
            available: kept.iter().map(|c| c.name().to_string()).collect(),
            ..Default::default()
        };

        tracing::info!(
            pool = %config.label,
            credential_count = kept.len(),
            release_policy = %config.release_policy,
            "Initialized credential pool"
        );

        Self {
            inner: Arc::new(PoolInner {
                credentials: kept,
                index,
                config,
                state: Mutex::new(state),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a pool with the default configuration
    pub fn with_defaults(credentials: Vec<Credential>) -> Self {
        Self::new(credentials, PoolConfig::default())
    }

    /// Load credentials from a source and build a pool from them
    pub fn from_source(
        source: &dyn CredentialSource,
        config: PoolConfig,
    ) -> Result<Self, CredentialSourceError> {
        let credentials = source.load()?;
        tracing::debug!(source = %source.describe(), "Building pool from credential source");
        Ok(Self::new(credentials, config))
    }

    /// Reserve a credential, waiting up to `timeout` for one to become free.
    ///
    /// Returns `None` if the timeout elapses first. With no timeout this waits
    /// until some other caller releases a credential.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Option<String> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            // Register interest before checking state so a release between the
            // check and the await still wakes us.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(name) = self.take_available(true) {
                return Some(name);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        self.forward_wakeup();
                        tracing::debug!(
                            pool = %self.inner.config.label,
                            timeout_ms = timeout.map(|t| t.as_millis()).unwrap_or_default(),
                            "Timed out waiting for a credential"
                        );
                        return None;
                    }
                }
            }
        }
    }

    /// Reserve a credential only if one is free right now
    pub fn try_acquire(&self) -> Option<String> {
        self.take_available(false)
    }

    /// Reserve a credential and wrap it in a lease that releases on drop
    pub async fn checkout(&self, timeout: Option<Duration>) -> Option<CredentialLease> {
        let name = self.acquire(timeout).await?;
        let index = self.inner.index.get(&name).copied()?;
        Some(CredentialLease::new(self.clone(), index))
    }

    /// Return a reserved credential to the pool.
    ///
    /// Releasing a name that is not currently reserved is a no-op.
    /// `rate_limited` records a provider rate limit; under
    /// `ReleasePolicy::Deferred` the credential is held back for
    /// `backoff_hint` before it can be acquired again.
    pub fn release(&self, name: &str, rate_limited: bool, backoff_hint: Duration) {
        let mut state = self.state();

        if !state.in_use.contains(name) || state.cooling.contains(name) {
            tracing::debug!(
                pool = %self.inner.config.label,
                credential = name,
                "Ignoring release of credential that is not reserved"
            );
            return;
        }

        if rate_limited {
            let record = state
                .rate_limits
                .entry(name.to_string())
                .or_insert(RateLimitRecord {
                    count: 0,
                    last_at: Utc::now(),
                    last_backoff_ms: 0,
                });
            record.count += 1;
            record.last_at = Utc::now();
            record.last_backoff_ms = backoff_hint.as_millis();

            tracing::warn!(
                pool = %self.inner.config.label,
                credential = name,
                backoff_ms = backoff_hint.as_millis(),
                release_policy = %self.inner.config.release_policy,
                "Credential hit provider rate limit"
            );

            if self.inner.config.release_policy == ReleasePolicy::Deferred && !backoff_hint.is_zero() {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        state.cooling.insert(name.to_string());
                        drop(state);

                        let pool = self.clone();
                        let name = name.to_string();
                        handle.spawn(async move {
                            tokio::time::sleep(backoff_hint).await;
                            pool.finish_cooldown(&name);
                        });
                        return;
                    }
                    Err(_) => {
                        tracing::warn!(
                            pool = %self.inner.config.label,
                            credential = name,
                            "No async runtime for deferred release, returning credential now"
                        );
                    }
                }
            }
        }

        Self::make_available(&mut state, name);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Look up a credential by name
    pub fn get(&self, name: &str) -> Option<&Credential> {
        self.inner
            .index
            .get(name)
            .map(|&idx| &self.inner.credentials[idx])
    }

    pub(crate) fn credential_at(&self, index: usize) -> &Credential {
        &self.inner.credentials[index]
    }

    /// All loaded credentials, in load order
    pub fn all(&self) -> &[Credential] {
        &self.inner.credentials
    }

    /// Names of all loaded credentials
    pub fn names(&self) -> Vec<&str> {
        self.inner.credentials.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.credentials.is_empty()
    }

    pub fn release_policy(&self) -> ReleasePolicy {
        self.inner.config.release_policy
    }

    /// Rate-limit history for a credential, if it was ever rate limited
    pub fn rate_limit_record(&self, name: &str) -> Option<RateLimitRecord> {
        self.state().rate_limits.get(name).cloned()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        PoolStats {
            total: self.inner.credentials.len(),
            available: state.available.len(),
            in_use: state.in_use.len(),
            cooling: state.cooling.len(),
            rate_limit_events: state.rate_limits.values().map(|r| r.count as u64).sum(),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // The state is only mutated in short non-panicking sections, so a
        // poisoned lock still holds consistent data.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_available(&self, about_to_wait: bool) -> Option<String> {
        let mut state = self.state();

        if let Some(name) = state.available.pop_front() {
            state.in_use.insert(name.clone());
            tracing::trace!(pool = %self.inner.config.label, credential = %name, "Credential acquired");
            return Some(name);
        }

        if about_to_wait && !state.exhaustion_reported {
            state.exhaustion_reported = true;
            tracing::warn!(
                pool = %self.inner.config.label,
                total = self.inner.credentials.len(),
                in_use = state.in_use.len(),
                cooling = state.cooling.len(),
                "Credential pool exhausted, waiting for a release"
            );
        }

        None
    }

    fn make_available(state: &mut PoolState, name: &str) {
        state.in_use.remove(name);
        state.available.push_back(name.to_string());
        state.exhaustion_reported = false;
    }

    fn finish_cooldown(&self, name: &str) {
        let mut state = self.state();
        if !state.cooling.remove(name) {
            return;
        }
        Self::make_available(&mut state, name);
        drop(state);

        tracing::info!(
            pool = %self.inner.config.label,
            credential = name,
            "Credential cooldown finished"
        );
        self.inner.notify.notify_one();
    }

    /// A waiter that gives up may have consumed a wakeup meant for a free
    /// credential; pass it on.
    fn forward_wakeup(&self) {
        if !self.state().available.is_empty() {
            self.inner.notify.notify_one();
        }
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

/// Statistics about a credential pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of loaded credentials
    pub total: usize,
    /// Credentials free to acquire
    pub available: usize,
    /// Credentials reserved by callers or cooling down
    pub in_use: usize,
    /// Credentials held back after a rate limit
    pub cooling: usize,
    /// Rate-limited releases seen so far
    pub rate_limit_events: u64,
}

impl PoolStats {
    /// Every credential is reserved
    pub fn is_exhausted(&self) -> bool {
        self.available == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
