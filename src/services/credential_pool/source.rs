//! Credential sources
//!
//! A source yields the ordered list of credentials a pool is built from.
//! Two sources ship with the crate: a JSON credentials file and a
//! comma-separated key list in an environment variable.

use super::credential::{Credential, CredentialConfig, CredentialKind};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default environment variable holding a comma-separated key list
pub const DEFAULT_KEYS_VAR: &str = "LLM_ROTATE_API_KEYS";

/// Errors raised while loading credentials
#[derive(Debug, Error)]
pub enum CredentialSourceError {
    #[error("Failed to read credentials file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse credentials file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Environment variable {0} is not valid unicode")]
    InvalidEnv(String),
}

/// Anything that can produce the pool's credential list
pub trait CredentialSource {
    /// Load credentials in source order
    fn load(&self) -> Result<Vec<Credential>, CredentialSourceError>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

// ============================================================================
// File Source
// ============================================================================

/// Wrapped form `{"credentials": [...]}`; a bare array is accepted too
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    credentials: Vec<CredentialConfig>,
}

/// JSON credentials file
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialSource for FileSource {
    fn load(&self) -> Result<Vec<Credential>, CredentialSourceError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| CredentialSourceError::Read {
            path: self.path.clone(),
            source,
        })?;

        let parse_error = |source: serde_json::Error| CredentialSourceError::Parse {
            path: self.path.clone(),
            source,
        };

        // Pick the shape first so field errors are reported as-is
        let value: serde_json::Value = serde_json::from_str(&raw).map_err(parse_error)?;
        let configs: Vec<CredentialConfig> = if value.is_array() {
            serde_json::from_value(value).map_err(parse_error)?
        } else {
            serde_json::from_value::<CredentialsFile>(value)
                .map_err(parse_error)?
                .credentials
        };

        let credentials: Vec<Credential> = configs.into_iter().map(Credential::from).collect();

        tracing::debug!(
            path = %self.path.display(),
            count = credentials.len(),
            "Loaded credentials from file"
        );

        Ok(credentials)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

// ============================================================================
// Environment Source
// ============================================================================

/// Comma-separated API keys in one environment variable
#[derive(Debug, Clone)]
pub struct EnvSource {
    var: String,
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new(DEFAULT_KEYS_VAR)
    }
}

impl EnvSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// Parse a comma-separated key list into credentials named `key_1`, `key_2`, ...
    pub fn parse_list(raw: &str) -> Vec<Credential> {
        raw.split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .enumerate()
            .map(|(idx, key)| {
                Credential::new(format!("key_{}", idx + 1), key, CredentialKind::ApiKey)
            })
            .collect()
    }
}

impl CredentialSource for EnvSource {
    fn load(&self) -> Result<Vec<Credential>, CredentialSourceError> {
        match std::env::var(&self.var) {
            Ok(raw) => Ok(Self::parse_list(&raw)),
            Err(std::env::VarError::NotPresent) => Ok(Vec::new()),
            Err(std::env::VarError::NotUnicode(_)) => {
                Err(CredentialSourceError::InvalidEnv(self.var.clone()))
            }
        }
    }

    fn describe(&self) -> String {
        format!("env:{}", self.var)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_file_source_wrapped() {
        let file = write_file(
            r#"{"credentials": [
                {"name": "personal", "key": "AIza-1"},
                {"name": "work", "key": "ya29.tok", "type": "oauth"},
                {"name": "old", "key": "AIza-3", "enabled": false}
            ]}"#,
        );

        let creds = FileSource::new(file.path()).load().unwrap();
        assert_eq!(creds.len(), 3);
        assert_eq!(creds[0].name(), "personal");
        assert_eq!(creds[1].kind(), CredentialKind::Oauth);
        assert!(!creds[2].is_enabled());
    }

    #[test]
    fn test_file_source_bare_array() {
        let file = write_file(r#"[{"name": "only", "key": "k"}]"#);
        let creds = FileSource::new(file.path()).load().unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].secret(), "k");
    }

    #[test]
    fn test_file_source_missing_file() {
        let err = FileSource::new("/nonexistent/credentials.json")
            .load()
            .unwrap_err();
        assert!(matches!(err, CredentialSourceError::Read { .. }));
    }

    #[test]
    fn test_file_source_malformed() {
        let file = write_file("{ not json");
        let err = FileSource::new(file.path()).load().unwrap_err();
        assert!(matches!(err, CredentialSourceError::Parse { .. }));
        assert!(err.to_string().contains("Failed to parse credentials file"));
    }

    #[test]
    fn test_file_source_kind_aliases() {
        for (kind, expected) in [
            ("apikey", CredentialKind::ApiKey),
            ("api-key", CredentialKind::ApiKey),
            ("API_KEY", CredentialKind::ApiKey),
            ("OAuth", CredentialKind::Oauth),
            ("token", CredentialKind::Oauth),
        ] {
            let file = write_file(&format!(
                r#"[{{"name": "a", "key": "k", "type": "{}"}}]"#,
                kind
            ));
            let creds = FileSource::new(file.path()).load().unwrap();
            assert_eq!(creds[0].kind(), expected, "type {:?}", kind);
        }
    }

    #[test]
    fn test_file_source_reports_bad_field() {
        let file = write_file(r#"{"credentials": [{"name": "a", "key": "k", "type": "password"}]}"#);
        let err = FileSource::new(file.path()).load().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown credential kind"), "{}", message);
        assert!(!message.contains("untagged"));
    }

    #[test]
    fn test_parse_list_skips_blanks() {
        let creds = EnvSource::parse_list(" k1 , ,k2,");
        let names: Vec<&str> = creds.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["key_1", "key_2"]);
        assert_eq!(creds[1].secret(), "k2");
    }

    #[test]
    fn test_env_source_unset_is_empty() {
        let source = EnvSource::new("LLM_ROTATE_TEST_SURELY_UNSET_VAR");
        assert!(source.load().unwrap().is_empty());
        assert_eq!(source.describe(), "env:LLM_ROTATE_TEST_SURELY_UNSET_VAR");
    }
}
