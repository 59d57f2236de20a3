//! Credential types
//!
//! This module defines the `Credential` record shared by the pool, the
//! credential sources and the child-process launcher.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ============================================================================
// Credential Kind
// ============================================================================

/// How a credential authenticates against the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Static API key (default)
    #[default]
    ApiKey,
    /// OAuth access token or token bundle
    Oauth,
}

impl std::str::FromStr for CredentialKind {
    type Err = String;

    /// Parse from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api_key" | "apikey" | "api-key" => Ok(Self::ApiKey),
            "oauth" | "token" => Ok(Self::Oauth),
            other => Err(format!("unknown credential kind: {other}")),
        }
    }
}

// Same spellings as `FromStr`, so config files accept every alias
impl<'de> Deserialize<'de> for CredentialKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey => write!(f, "api_key"),
            Self::Oauth => write!(f, "oauth"),
        }
    }
}

// ============================================================================
// Credential
// ============================================================================

/// A single provider credential.
///
/// Credentials are immutable once loaded; only their pool membership changes.
/// The secret never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    name: String,
    secret: String,
    kind: CredentialKind,
    enabled: bool,
}

impl Credential {
    /// Create a new enabled credential
    pub fn new(name: impl Into<String>, secret: impl Into<String>, kind: CredentialKind) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            kind,
            enabled: true,
        }
    }

    /// Create an enabled API key credential
    pub fn api_key(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::new(name, secret, CredentialKind::ApiKey)
    }

    /// Create an enabled OAuth credential
    pub fn oauth(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::new(name, secret, CredentialKind::Oauth)
    }

    /// Set the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Secret with everything but the last four characters masked
    pub fn redacted_secret(&self) -> String {
        let count = self.secret.chars().count();
        if count <= 4 {
            return "****".to_string();
        }
        let tail: String = self.secret.chars().skip(count - 4).collect();
        format!("****{}", tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("secret", &self.redacted_secret())
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// Keep only enabled credentials, preserving order
pub fn enabled_only(credentials: Vec<Credential>) -> Vec<Credential> {
    credentials.into_iter().filter(|c| c.is_enabled()).collect()
}

// ============================================================================
// Configuration Structures (for deserialization)
// ============================================================================

/// On-disk representation of a credential
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialConfig {
    pub name: String,
    pub key: String,
    #[serde(default, rename = "type")]
    pub kind: CredentialKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<CredentialConfig> for Credential {
    fn from(config: CredentialConfig) -> Self {
        Credential::new(config.name, config.key, config.kind).with_enabled(config.enabled)
    }
}

/// Status view of a credential that is safe to print
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub name: String,
    pub kind: CredentialKind,
    pub secret: String,
}

impl From<&Credential> for CredentialSummary {
    fn from(cred: &Credential) -> Self {
        Self {
            name: cred.name().to_string(),
            kind: cred.kind(),
            secret: cred.redacted_secret(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_credential() {
        let cred = Credential::api_key("primary", "sk-test-1234");
        assert_eq!(cred.name(), "primary");
        assert_eq!(cred.secret(), "sk-test-1234");
        assert_eq!(cred.kind(), CredentialKind::ApiKey);
        assert!(cred.is_enabled());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let cred = Credential::oauth("work", "ya29.very-secret-token");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("****oken"));
        assert_eq!(cred.to_string(), "work (oauth)");
    }

    #[test]
    fn test_redacted_short_secret() {
        let cred = Credential::api_key("tiny", "abc");
        assert_eq!(cred.redacted_secret(), "****");
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("API_KEY".parse::<CredentialKind>(), Ok(CredentialKind::ApiKey));
        assert_eq!("api-key".parse::<CredentialKind>(), Ok(CredentialKind::ApiKey));
        assert_eq!("token".parse::<CredentialKind>(), Ok(CredentialKind::Oauth));
        assert!("password".parse::<CredentialKind>().is_err());
    }

    #[test]
    fn test_kind_deserialize_accepts_aliases() {
        for (raw, kind) in [
            ("\"api_key\"", CredentialKind::ApiKey),
            ("\"apikey\"", CredentialKind::ApiKey),
            ("\"API-KEY\"", CredentialKind::ApiKey),
            ("\"OAuth\"", CredentialKind::Oauth),
            ("\"token\"", CredentialKind::Oauth),
        ] {
            assert_eq!(serde_json::from_str::<CredentialKind>(raw).unwrap(), kind, "{}", raw);
        }

        let err = serde_json::from_str::<CredentialKind>("\"password\"").unwrap_err();
        assert!(err.to_string().contains("unknown credential kind"));
        assert_eq!(serde_json::to_string(&CredentialKind::Oauth).unwrap(), "\"oauth\"");
    }

    #[test]
    fn test_enabled_only_preserves_order() {
        let creds = vec![
            Credential::api_key("a", "1"),
            Credential::api_key("b", "2").with_enabled(false),
            Credential::api_key("c", "3"),
        ];
        let names: Vec<String> = enabled_only(creds)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_config_defaults() {
        let config: CredentialConfig =
            serde_json::from_str(r#"{"name": "k1", "key": "secret"}"#).unwrap();
        let cred = Credential::from(config);
        assert_eq!(cred.kind(), CredentialKind::ApiKey);
        assert!(cred.is_enabled());

        let config: CredentialConfig = serde_json::from_str(
            r#"{"name": "k2", "key": "secret", "type": "oauth", "enabled": false}"#,
        )
        .unwrap();
        let cred = Credential::from(config);
        assert_eq!(cred.kind(), CredentialKind::Oauth);
        assert!(!cred.is_enabled());
    }
}
