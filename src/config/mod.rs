//! Configuration management module
//!
//! This module handles loading and validating application configuration
//! from environment variables and .env files.

pub mod settings;

pub use settings::{Settings, DEFAULT_API_KEY_ENV, DEFAULT_OAUTH_ENV};
