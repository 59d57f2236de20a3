//! llm-rotate
//!
//! Runs an LLM command-line tool with a pooled credential, retrying on rate
//! limits and optionally rotating to the next credential.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm_rotate::{
    config::Settings,
    error::Error,
    logging::init_tracing,
    services::{
        credential_pool::{Credential, CredentialPool, CredentialSummary, PoolConfig},
        retry::{FailureClassifier, InvokeOutcome, RetryExecutor, TextClassifier},
        CommandOperation, RotatingInvoker,
    },
    utils::parse_timeout_secs,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// llm-rotate
///
/// Credential pooling and rate-limit aware retry for LLM CLIs.
#[derive(Parser, Debug)]
#[command(name = "llm-rotate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log file path for JSON logs (enables file logging with 10MB rotation)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// JSON credentials file (overrides LLM_ROTATE_CREDENTIALS_FILE)
    #[arg(long, global = true)]
    credentials_file: Option<PathBuf>,

    /// Attempts per credential (overrides LLM_ROTATE_MAX_ATTEMPTS)
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Per-attempt deadline in seconds (overrides LLM_ROTATE_ATTEMPT_TIMEOUT_SECS)
    #[arg(long, global = true)]
    attempt_timeout_secs: Option<u64>,

    /// Seconds to wait for a free credential (overrides LLM_ROTATE_ACQUIRE_TIMEOUT_SECS)
    #[arg(long, global = true)]
    acquire_timeout_secs: Option<String>,

    /// Hold rate-limited credentials back until their backoff elapses
    #[arg(long, global = true)]
    defer_rate_limited: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program with a pooled credential
    Run {
        /// On rate-limit exhaustion, retry once with each other credential
        #[arg(long)]
        rotate: bool,

        /// Working directory for the program
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// File whose contents are written to the program's stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,

        /// Program followed by its arguments
        #[arg(last = true, required = true, num_args = 1..)]
        program: Vec<String>,
    },

    /// Print the loaded credentials with secrets redacted
    Status,

    /// Classify a diagnostic text the way the retry executor would
    Check {
        #[arg(last = true, required = true, num_args = 1..)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(path) = args.credentials_file {
        settings.credentials_file = Some(path);
    }
    if let Some(max_attempts) = args.max_attempts {
        settings.max_attempts = max_attempts;
    }
    if let Some(secs) = args.attempt_timeout_secs {
        settings.attempt_timeout_secs = secs;
    }
    if let Some(raw) = args.acquire_timeout_secs {
        settings.acquire_timeout = Some(
            parse_timeout_secs(&raw)
                .with_context(|| format!("Invalid --acquire-timeout-secs value: {:?}", raw))?,
        );
    }
    if args.defer_rate_limited {
        settings.defer_rate_limited = true;
    }
    settings.validate()?;

    init_tracing(&settings.log_level, args.log_file.as_deref())?;

    match args.command {
        Command::Run {
            rotate,
            workdir,
            stdin_file,
            program,
        } => run(&settings, rotate, workdir, stdin_file, program).await,
        Command::Status => status(&settings),
        Command::Check { text } => check(&text.join(" ")),
    }
}

fn load_pool(settings: &Settings) -> Result<CredentialPool> {
    let source = settings.credential_source();
    let config = PoolConfig::new("cli").with_release_policy(settings.release_policy());
    CredentialPool::from_source(source.as_ref(), config)
        .with_context(|| format!("Failed to load credentials from {}", source.describe()))
}

async fn run(
    settings: &Settings,
    rotate: bool,
    workdir: Option<PathBuf>,
    stdin_file: Option<PathBuf>,
    program: Vec<String>,
) -> Result<ExitCode> {
    let stdin = match &stdin_file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read stdin file {}", path.display()))?,
        ),
        None => None,
    };

    let pool = load_pool(settings)?;
    if pool.is_empty() {
        anyhow::bail!("No enabled credentials configured");
    }

    let (name, args) = program
        .split_first()
        .context("No program given")?;

    let build = |credential: &Credential| {
        let mut op = CommandOperation::new(name.as_str())
            .args(args.iter().cloned())
            .with_credential(credential, settings);
        if let Some(dir) = &workdir {
            op = op.working_dir(dir);
        }
        if let Some(input) = &stdin {
            op = op.stdin(input.as_str());
        }
        op
    };

    tracing::info!(
        program = %name,
        credentials = pool.len(),
        rotate,
        release_policy = %pool.release_policy(),
        "Starting run"
    );

    let result = if rotate {
        // Rotation replaces per-credential backoff: one attempt per credential
        let executor = RetryExecutor::new(settings.retry_policy().with_max_attempts(1));
        RotatingInvoker::new(pool, executor)
            .invoke(settings.acquire_timeout, build)
            .await
            .into_result()
    } else {
        run_single(settings, &pool, build).await
    };

    match result {
        Ok(output) => {
            print!("{}", output);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!(error = %err, exit_code = err.exit_code(), "Run failed");
            eprintln!("llm-rotate: {}", err);
            Ok(exit_code(err.exit_code()))
        }
    }
}

/// One credential, full retry budget
async fn run_single<F>(
    settings: &Settings,
    pool: &CredentialPool,
    build: F,
) -> Result<String, Error>
where
    F: Fn(&Credential) -> CommandOperation,
{
    let Some(mut lease) = pool.checkout(settings.acquire_timeout).await else {
        return Err(Error::NoCredential { tried: Vec::new() });
    };

    let executor = RetryExecutor::new(settings.retry_policy());
    let outcome = executor.invoke(&build(lease.credential())).await;
    if matches!(outcome, InvokeOutcome::Exhausted { .. }) {
        lease.mark_rate_limited(executor.policy().max_delay);
    }
    lease.release();

    Ok(outcome.into_result()?)
}

fn status(settings: &Settings) -> Result<ExitCode> {
    let pool = load_pool(settings)?;
    let summaries: Vec<CredentialSummary> = pool.all().iter().map(CredentialSummary::from).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&summaries).context("Failed to serialize status")?
    );
    Ok(ExitCode::SUCCESS)
}

fn check(text: &str) -> Result<ExitCode> {
    let classifier = TextClassifier::default();
    let classification = classifier.classify(text);
    let report = serde_json::json!({
        "classification": classification,
        "retryable": classification.is_retryable(),
        "matched_pattern": classifier.matched_pattern(text),
    });
    println!("{}", report);
    Ok(ExitCode::SUCCESS)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
