//! Invocation outcomes.
//!
//! Retries end in one of three terminal states. Callers match on the
//! outcome rather than treating "no error" as success.

use super::classifier::FailureClass;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// States of a single `RetryExecutor::invoke` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Pending,
    Retrying,
    Succeeded,
    FatalFailed,
    Exhausted,
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FatalFailed | Self::Exhausted)
    }
}

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttempt {
    /// 0-indexed attempt number
    pub attempt_number: u32,
    /// Sleep taken before the next attempt; `None` when no retry followed
    pub delay_before_next: Option<Duration>,
    pub classification: FailureClass,
}

/// Why an invocation stopped without retrying
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FatalCause {
    /// The attempt ran past its deadline and was killed
    TimedOut { after: Duration },
    /// Non-zero exit that is not a rate limit
    Failed { exit_code: i32, diagnostic: String },
    /// The operation could not be started
    Launch { message: String },
}

impl std::fmt::Display for FatalCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut { after } => write!(f, "timed out after {:?}", after),
            Self::Failed {
                exit_code,
                diagnostic,
            } => write!(f, "exit code {}: {}", exit_code, diagnostic.trim()),
            Self::Launch { message } => write!(f, "failed to launch: {}", message),
        }
    }
}

/// Terminal result of a retried invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvokeOutcome {
    Succeeded {
        output: String,
        /// Failed attempts that preceded the success
        failures: Vec<RetryAttempt>,
    },
    Fatal {
        cause: FatalCause,
        failures: Vec<RetryAttempt>,
    },
    Exhausted {
        /// Diagnostic text of the final rate-limited attempt
        last_error: String,
        failures: Vec<RetryAttempt>,
    },
}

impl InvokeOutcome {
    pub fn state(&self) -> RetryState {
        match self {
            Self::Succeeded { .. } => RetryState::Succeeded,
            Self::Fatal { .. } => RetryState::FatalFailed,
            Self::Exhausted { .. } => RetryState::Exhausted,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn failures(&self) -> &[RetryAttempt] {
        match self {
            Self::Succeeded { failures, .. }
            | Self::Fatal { failures, .. }
            | Self::Exhausted { failures, .. } => failures,
        }
    }

    /// Number of times the operation was run
    pub fn attempt_count(&self) -> u32 {
        let failed = self.failures().len() as u32;
        match self {
            Self::Succeeded { .. } | Self::Fatal { .. } => failed + 1,
            Self::Exhausted { .. } => failed,
        }
    }

    /// Backoff sleeps taken, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.failures()
            .iter()
            .filter_map(|a| a.delay_before_next)
            .collect()
    }

    /// Collapse into a `Result` for callers that only want the output
    pub fn into_result(self) -> Result<String, InvokeError> {
        let attempts = self.attempt_count();
        match self {
            Self::Succeeded { output, .. } => Ok(output),
            Self::Fatal { cause, .. } => Err(InvokeError::Fatal { cause, attempts }),
            Self::Exhausted { last_error, .. } => Err(InvokeError::Exhausted {
                attempts,
                last_error,
            }),
        }
    }
}

/// Error form of a non-successful `InvokeOutcome`
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Operation failed after {attempts} attempt(s): {cause}")]
    Fatal { cause: FatalCause, attempts: u32 },

    #[error("Still rate limited after {attempts} attempt(s): {}", .last_error.trim())]
    Exhausted { attempts: u32, last_error: String },
}

impl InvokeError {
    /// Whether a caller could reasonably try again later or elsewhere
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
