//! Top-level error type

use crate::services::credential_pool::CredentialSourceError;
use crate::services::retry::InvokeError;
use thiserror::Error;

/// Exit code for fatal failures and missing credentials
pub const EXIT_FAILURE: i32 = 1;

/// Exit code when every attempt was rate limited
pub const EXIT_EXHAUSTED: i32 = 2;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Credential source error: {0}")]
    Source(#[from] CredentialSourceError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("No credential became available (tried: {})", .tried.join(", "))]
    NoCredential { tried: Vec<String> },

    #[error("All {} credential(s) rate limited: {last_error}", .tried.len())]
    AllRateLimited {
        tried: Vec<String>,
        last_error: String,
    },
}

impl Error {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::AllRateLimited { .. } => EXIT_EXHAUSTED,
            Error::Invoke(err) if err.is_retryable() => EXIT_EXHAUSTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Whether retrying later, with fresh quota, could succeed
    pub fn is_rate_limited(&self) -> bool {
        self.exit_code() == EXIT_EXHAUSTED
    }
}

pub type Result<T> = std::result::Result<T, Error>;
