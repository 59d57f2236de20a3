//! Retry Module
//!
//! Bounded retries with exponential backoff and jitter around a single
//! external call. Only failures classified as rate limits or capacity
//! problems are retried; timeouts and unknown failures stop immediately.

mod classifier;
mod executor;
mod outcome;
pub mod policy;

pub use classifier::{classify, FailureClass, FailureClassifier, TextClassifier, RATE_LIMIT_PATTERNS};
pub use executor::RetryExecutor;
pub use outcome::{FatalCause, InvokeError, InvokeOutcome, RetryAttempt, RetryState};
pub use policy::{presets, RetryPolicy};
