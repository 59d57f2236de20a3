//! Credential pooling and rate-limit aware retry for LLM command-line calls

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::Error;
pub use services::{CredentialPool, RetryExecutor, RotatingInvoker};
