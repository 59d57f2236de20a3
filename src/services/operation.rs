//! External operations
//!
//! An external operation is one blocking call into something outside the
//! process, usually an LLM command-line tool. The retry executor only sees
//! its exit code and captured output.

use crate::config::Settings;
use crate::services::credential_pool::{Credential, CredentialKind};
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

// ============================================================================
// Types
// ============================================================================

/// Captured result of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl OperationOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Text used for failure classification: stderr, or stdout if stderr is empty
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// The operation could not produce an `OperationOutput`
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Something the retry executor can run
#[async_trait]
pub trait ExternalOperation: Send + Sync {
    async fn run(&self) -> Result<OperationOutput, OperationError>;

    /// Short label for log events
    fn describe(&self) -> String {
        "operation".to_string()
    }
}

// ============================================================================
// Closure Operation
// ============================================================================

/// Adapts an async closure into an `ExternalOperation`
pub struct FnOperation<F> {
    label: String,
    f: F,
}

impl<F, Fut> FnOperation<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<OperationOutput, OperationError>> + Send,
{
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> ExternalOperation for FnOperation<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<OperationOutput, OperationError>> + Send,
{
    async fn run(&self) -> Result<OperationOutput, OperationError> {
        (self.f)().await
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

// ============================================================================
// Command Operation
// ============================================================================

/// A child process run to completion.
///
/// The child is spawned with `kill_on_drop`, so cancelling the `run` future
/// (for example when an attempt deadline passes) kills the process.
#[derive(Clone)]
pub struct CommandOperation {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
}

impl std::fmt::Debug for CommandOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Env values may hold secrets; list only the names
        let env_names: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandOperation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("env", &env_names)
            .field("stdin_bytes", &self.stdin.as_ref().map(|s| s.len()))
            .finish()
    }
}

impl CommandOperation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Text written to the child's stdin (e.g. the prompt)
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Pass the credential secret through the kind-specific env var
    pub fn with_credential(self, credential: &Credential, settings: &Settings) -> Self {
        let var = match credential.kind() {
            CredentialKind::ApiKey => settings.api_key_env.clone(),
            CredentialKind::Oauth => settings.oauth_env.clone(),
        };
        self.env(var, credential.secret())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn io_error(&self, source: std::io::Error) -> OperationError {
        OperationError::Io {
            program: self.program.clone(),
            source,
        }
    }
}

#[async_trait]
impl ExternalOperation for CommandOperation {
    async fn run(&self) -> Result<OperationOutput, OperationError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        // Own process group, so a cancelled attempt can take down helpers
        // the tool forked, not just the tool itself
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| OperationError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let group = ProcessGroupGuard::new(child.id());

        // Feed stdin while output is drained; a child that writes before it
        // finishes reading would otherwise block on a full pipe
        let pipe = child.stdin.take();
        let feed = async {
            match (self.stdin.as_deref(), pipe) {
                (Some(input), Some(mut pipe)) => {
                    let written = pipe.write_all(input.as_bytes()).await;
                    // Dropping the pipe closes stdin so the child sees EOF
                    drop(pipe);
                    written
                }
                _ => Ok(()),
            }
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| self.io_error(e))?;
        group.disarm();

        if let Err(e) = fed {
            // The child may legitimately exit without reading all input
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                tracing::debug!(program = %self.program, "Child closed stdin before reading all input");
            } else {
                return Err(self.io_error(e));
            }
        }

        let exit_code = output.status.code().unwrap_or_else(|| {
            tracing::warn!(program = %self.program, "Process terminated by signal, using exit code 1");
            1
        });

        Ok(OperationOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn describe(&self) -> String {
        self.program.clone()
    }
}

// ============================================================================
// Process Group Guard
// ============================================================================

/// Kills the child's whole process group when dropped while armed.
///
/// `run` futures are cancelled by dropping them at the attempt deadline;
/// `kill_on_drop` only reaches the direct child.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).filter(|pid| *pid > 0),
        }
    }

    /// The child has been reaped; leave the group alone
    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid else {
            return;
        };

        #[cfg(unix)]
        {
            // SAFETY: kill() has no memory-safety preconditions. The negative
            // pid targets the group created by process_group(0) at spawn.
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if rc == 0 {
                tracing::debug!(pgid, "Killed process group of cancelled operation");
            }
        }

        #[cfg(not(unix))]
        let _ = pgid;
    }
}

// ============================================================================
// Tests
// ============================================================================
