//! Utility modules

pub mod timeout;

pub use timeout::{parse_timeout_secs, with_timeout, TimeoutError};
