//! Credential Pool Module
//!
//! This module coordinates a fixed set of provider credentials shared by many
//! concurrent workflow steps.
//!
//! # Features
//! - Exclusive reservation: a credential is used by one caller at a time
//! - Blocking acquire with optional timeout and exhaustion logging
//! - Rate-limit aware release, with an opt-in cooldown before reuse
//! - Scoped leases that release on every exit path
//!
//! # Example
//! ```ignore
//! use llm_rotate::services::credential_pool::{Credential, CredentialPool};
//!
//! let pool = CredentialPool::with_defaults(vec![
//!     Credential::api_key("personal", "AIza..."),
//!     Credential::oauth("work", "ya29..."),
//! ]);
//!
//! if let Some(lease) = pool.checkout(Some(Duration::from_secs(30))).await {
//!     println!("Using credential: {}", lease.name());
//! }
//! ```

mod credential;
mod guard;
mod pool;
mod source;

pub use credential::{
    enabled_only, Credential, CredentialConfig, CredentialKind, CredentialSummary,
};
pub use guard::CredentialLease;
pub use pool::{CredentialPool, PoolConfig, PoolStats, RateLimitRecord, ReleasePolicy};
pub use source::{
    CredentialSource, CredentialSourceError, EnvSource, FileSource, DEFAULT_KEYS_VAR,
};
