//! Application settings and configuration
//!
//! Settings are read from environment variables (and a `.env` file when
//! present) with sensible defaults. Command-line flags override them.

use crate::services::credential_pool::{
    CredentialSource, EnvSource, FileSource, ReleasePolicy, DEFAULT_KEYS_VAR,
};
use crate::services::retry::RetryPolicy;
use crate::utils::timeout::parse_timeout_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Env var the child process reads an API key from
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Env var the child process reads an OAuth access token from
pub const DEFAULT_OAUTH_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Main application settings
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub log_level: String,

    // Credential sources
    /// JSON credentials file; when unset, keys come from `api_keys_var`
    pub credentials_file: Option<PathBuf>,
    pub api_keys_var: String,

    // Retry
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub jitter_fraction: f64,
    pub attempt_timeout_secs: u64,

    // Pool
    /// How long to wait for a free credential; `None` waits forever
    pub acquire_timeout: Option<Duration>,
    pub defer_rate_limited: bool,

    // Child process environment
    pub api_key_env: String,
    pub oauth_env: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            credentials_file: None,
            api_keys_var: DEFAULT_KEYS_VAR.to_string(),
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            jitter_fraction: 0.2,
            attempt_timeout_secs: 300,
            acquire_timeout: None,
            defer_rate_limited: false,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            oauth_env: DEFAULT_OAUTH_ENV.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables with defaults.
    ///
    /// Values are not validated here; callers apply command-line overrides
    /// first and then call `validate`.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let settings = Self {
            log_level: env_or_default("LOG_LEVEL", "info"),

            credentials_file: env::var("LLM_ROTATE_CREDENTIALS_FILE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            api_keys_var: env_or_default("LLM_ROTATE_API_KEYS_VAR", DEFAULT_KEYS_VAR),

            max_attempts: env_parse("LLM_ROTATE_MAX_ATTEMPTS", "3")?,
            base_delay_secs: env_parse("LLM_ROTATE_BASE_DELAY_SECS", "1.0")?,
            max_delay_secs: env_parse("LLM_ROTATE_MAX_DELAY_SECS", "60.0")?,
            jitter_fraction: env_parse("LLM_ROTATE_JITTER", "0.2")?,
            attempt_timeout_secs: env_parse("LLM_ROTATE_ATTEMPT_TIMEOUT_SECS", "300")?,

            acquire_timeout: env::var("LLM_ROTATE_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|raw| parse_timeout_secs(&raw)),
            defer_rate_limited: env_flag("LLM_ROTATE_DEFER_RATE_LIMITED", false)?,

            api_key_env: env_or_default("LLM_ROTATE_API_KEY_ENV", DEFAULT_API_KEY_ENV),
            oauth_env: env_or_default("LLM_ROTATE_OAUTH_ENV", DEFAULT_OAUTH_ENV),
        };

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if !self.base_delay_secs.is_finite() || self.base_delay_secs < 0.0 {
            anyhow::bail!("Base delay must be a non-negative number of seconds");
        }
        if !self.max_delay_secs.is_finite() || self.max_delay_secs < self.base_delay_secs {
            anyhow::bail!(
                "Max delay ({}s) must not be smaller than base delay ({}s)",
                self.max_delay_secs,
                self.base_delay_secs
            );
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            anyhow::bail!("Jitter fraction must be within [0, 1], got {}", self.jitter_fraction);
        }
        if self.attempt_timeout_secs == 0 {
            anyhow::bail!("Attempt timeout must be > 0");
        }
        if self.max_attempts == 0 {
            tracing::warn!("max_attempts is 0, every operation will still be tried once");
        }

        Ok(())
    }

    /// Retry policy built from these settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_delay_secs(self.base_delay_secs, self.max_delay_secs)
            .with_jitter_fraction(self.jitter_fraction)
            .with_per_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
    }

    pub fn release_policy(&self) -> ReleasePolicy {
        if self.defer_rate_limited {
            ReleasePolicy::Deferred
        } else {
            ReleasePolicy::Immediate
        }
    }

    /// Where credentials come from: the JSON file if configured, otherwise
    /// the comma-separated key list in `api_keys_var`
    pub fn credential_source(&self) -> Box<dyn CredentialSource> {
        match &self.credentials_file {
            Some(path) => Box::new(FileSource::new(path)),
            None => Box::new(EnvSource::new(&self.api_keys_var)),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, failing loudly on malformed values
fn env_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env_or_default(key, default);
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {:?}", key, raw))
}

/// Read a boolean environment variable (true/false, 1/0, yes/no, on/off)
fn env_flag(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_flag(&raw)
            .with_context(|| format!("Invalid {} value: {:?}", key, raw)),
        _ => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {:?}", other),
    }
}
