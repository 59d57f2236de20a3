//! Credential rotation on top of retry
//!
//! When a credential stays rate limited through its whole retry budget, the
//! invoker hands it back to the pool marked as rate limited and repeats the
//! call with the next free credential.

use crate::error::Error;
use crate::services::credential_pool::{Credential, CredentialPool};
use crate::services::operation::ExternalOperation;
use crate::services::retry::{InvokeOutcome, RetryExecutor};
use serde::Serialize;
use std::time::Duration;

/// Result of a rotated invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RotationOutcome {
    /// A credential produced a success or a fatal failure
    Finished {
        credential: String,
        outcome: InvokeOutcome,
        tried: Vec<String>,
    },
    /// Every round ended rate limited
    AllRateLimited {
        tried: Vec<String>,
        last_error: String,
    },
    /// No credential became free within the acquire timeout
    NoCredential { tried: Vec<String> },
}

impl RotationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Finished { outcome, .. } if outcome.is_success()
        )
    }

    /// Credentials used, in order
    pub fn tried(&self) -> &[String] {
        match self {
            Self::Finished { tried, .. }
            | Self::AllRateLimited { tried, .. }
            | Self::NoCredential { tried } => tried,
        }
    }

    /// Collapse into the operation output or a crate error
    pub fn into_result(self) -> Result<String, Error> {
        match self {
            Self::Finished { outcome, .. } => Ok(outcome.into_result()?),
            Self::AllRateLimited { tried, last_error } => {
                Err(Error::AllRateLimited { tried, last_error })
            }
            Self::NoCredential { tried } => Err(Error::NoCredential { tried }),
        }
    }
}

/// Runs an operation with pooled credentials, rotating on rate limits
#[derive(Debug, Clone)]
pub struct RotatingInvoker {
    pool: CredentialPool,
    executor: RetryExecutor,
}

impl RotatingInvoker {
    pub fn new(pool: CredentialPool, executor: RetryExecutor) -> Self {
        Self { pool, executor }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Run the operation built by `factory` for up to one round per
    /// credential in the pool.
    pub async fn invoke<F, Op>(&self, acquire_timeout: Option<Duration>, factory: F) -> RotationOutcome
    where
        F: Fn(&Credential) -> Op,
        Op: ExternalOperation,
    {
        let rounds = self.pool.len();
        let backoff_hint = self.executor.policy().max_delay;
        let mut tried: Vec<String> = Vec::new();
        let mut last_error = String::new();

        for round in 0..rounds {
            let Some(mut lease) = self.pool.checkout(acquire_timeout).await else {
                tracing::warn!(
                    round = round + 1,
                    tried = tried.len(),
                    "No credential available for rotation"
                );
                return RotationOutcome::NoCredential { tried };
            };

            let name = lease.name().to_string();
            tried.push(name.clone());

            let operation = factory(lease.credential());
            let outcome = self.executor.invoke(&operation).await;

            match outcome {
                InvokeOutcome::Exhausted { last_error: err, .. } => {
                    lease.mark_rate_limited(backoff_hint);
                    drop(lease);
                    tracing::warn!(
                        credential = %name,
                        round = round + 1,
                        rounds,
                        "Credential rate limited, rotating"
                    );
                    last_error = err;
                }
                outcome => {
                    drop(lease);
                    tracing::info!(
                        credential = %name,
                        round = round + 1,
                        state = ?outcome.state(),
                        "Rotated invocation finished"
                    );
                    return RotationOutcome::Finished {
                        credential: name,
                        outcome,
                        tried,
                    };
                }
            }
        }

        if tried.is_empty() {
            return RotationOutcome::NoCredential { tried };
        }

        tracing::error!(tried = ?tried, "All credentials rate limited");
        RotationOutcome::AllRateLimited { tried, last_error }
    }
}
