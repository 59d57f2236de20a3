//! Crate error types
//!
//! Each service has its own `thiserror` enum. `Error` collects them for
//! callers that want one type, and maps each failure to a process exit code.

mod types;

pub use types::{Error, Result};
