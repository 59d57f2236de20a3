//! Failure classification from diagnostic text.
//!
//! Providers report throttling in free-form error text, so classification is
//! a substring match. The matcher is a trait so each provider can bring its
//! own patterns without touching the retry loop.

use serde::Serialize;
use std::fmt;

/// Default patterns that mark a provider rate limit
pub const RATE_LIMIT_PATTERNS: &[&str] = &["429", "rate limit", "too many requests"];

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Provider throttled the caller; retry after backoff
    RateLimited,
    /// Provider is out of capacity; retry after backoff
    Capacity,
    /// Anything else; never retried
    Fatal,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Capacity)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Capacity => write!(f, "capacity"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Maps an operation's diagnostic output to a `FailureClass`
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, diagnostic: &str) -> FailureClass;
}

impl<F> FailureClassifier for F
where
    F: Fn(&str) -> FailureClass + Send + Sync,
{
    fn classify(&self, diagnostic: &str) -> FailureClass {
        self(diagnostic)
    }
}

/// Case-insensitive substring classifier
#[derive(Debug, Clone)]
pub struct TextClassifier {
    rate_limit_patterns: Vec<String>,
    capacity_patterns: Vec<String>,
}

impl Default for TextClassifier {
    fn default() -> Self {
        Self {
            rate_limit_patterns: RATE_LIMIT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            capacity_patterns: Vec::new(),
        }
    }
}

impl TextClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rate-limit patterns
    pub fn with_rate_limit_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rate_limit_patterns = patterns.into_iter().map(|p| p.as_ref().to_lowercase()).collect();
        self
    }

    /// Add patterns that mark a capacity condition (e.g. "overloaded")
    pub fn with_capacity_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.capacity_patterns = patterns.into_iter().map(|p| p.as_ref().to_lowercase()).collect();
        self
    }

    /// The pattern that matched, if any
    pub fn matched_pattern(&self, diagnostic: &str) -> Option<&str> {
        let lowered = diagnostic.to_lowercase();
        self.rate_limit_patterns
            .iter()
            .chain(self.capacity_patterns.iter())
            .find(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
    }
}

impl FailureClassifier for TextClassifier {
    fn classify(&self, diagnostic: &str) -> FailureClass {
        let lowered = diagnostic.to_lowercase();
        if self.rate_limit_patterns.iter().any(|p| lowered.contains(p.as_str())) {
            FailureClass::RateLimited
        } else if self.capacity_patterns.iter().any(|p| lowered.contains(p.as_str())) {
            FailureClass::Capacity
        } else {
            FailureClass::Fatal
        }
    }
}

/// Classify with the default patterns
pub fn classify(diagnostic: &str) -> FailureClass {
    TextClassifier::default().classify(diagnostic)
}
