//! Logging utilities
//!
//! JSON tracing output to stderr (stdout is reserved for the wrapped
//! program's output), plus an optional size-based rolling log file.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default maximum log file size (10MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default maximum number of rotated files to keep
pub const DEFAULT_MAX_FILES: usize = 5;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `log_level`. When `log_file` is set, a
/// second JSON layer writes through a `SizeBasedRollingWriter`.
pub fn init_tracing(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    let console_layer = fmt::layer()
        .json()
        .with_writer(io::stderr)
        .with_filter(env_filter(log_level));

    let subscriber = tracing_subscriber::registry().with(console_layer);

    match log_file {
        Some(path) => {
            let file_writer = SizeBasedRollingWriter::with_defaults(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            let file_layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_filter(env_filter(log_level));

            subscriber
                .with(file_layer)
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
        None => {
            subscriber
                .try_init()
                .context("Failed to install tracing subscriber")?;
        }
    }

    Ok(())
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// A size-based rolling file writer
///
/// This writer automatically rotates log files when they exceed a specified size.
/// Files are named with a numeric suffix (e.g., app.log, app.log.1, app.log.2, etc.)
#[derive(Debug, Clone)]
pub struct SizeBasedRollingWriter {
    inner: Arc<Mutex<RollingWriterInner>>,
}

#[derive(Debug)]
struct RollingWriterInner {
    base_path: PathBuf,
    file: Option<File>,
    current_size: u64,
    max_size: u64,
    /// Rotated files kept besides the live one
    max_files: usize,
}

impl SizeBasedRollingWriter {
    /// Create a new size-based rolling writer
    ///
    /// # Arguments
    /// * `path` - Base path for the log file (e.g., /var/log/llm-rotate.log)
    /// * `max_size` - Maximum file size in bytes before rotation
    /// * `max_files` - Maximum number of rotated files to keep
    pub fn new(path: impl AsRef<Path>, max_size: u64, max_files: usize) -> io::Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if base_path.file_name().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Log path {} has no file name", base_path.display()),
            ));
        }

        if let Some(parent) = base_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let current_size = fs::metadata(&base_path).map(|m| m.len()).unwrap_or(0);
        let file = open_append(&base_path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(RollingWriterInner {
                base_path,
                file: Some(file),
                current_size,
                max_size,
                max_files,
            })),
        })
    }

    /// Create a new size-based rolling writer with default settings
    pub fn with_defaults(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(path, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_FILES)
    }

    fn lock(&self) -> MutexGuard<'_, RollingWriterInner> {
        // A panic mid-write leaves the file handle usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl RollingWriterInner {
    /// Shift app.log.N-1 -> app.log.N ... app.log -> app.log.1, dropping
    /// whatever falls past `max_files`
    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;

        if self.max_files == 0 {
            fs::remove_file(&self.base_path).ok();
        } else {
            fs::remove_file(self.rotated_path(self.max_files)).ok();
            for i in (1..self.max_files).rev() {
                let from = self.rotated_path(i);
                if from.exists() {
                    fs::rename(&from, self.rotated_path(i + 1)).ok();
                }
            }
            if self.base_path.exists() {
                fs::rename(&self.base_path, self.rotated_path(1))?;
            }
        }

        self.file = Some(open_append(&self.base_path)?);
        self.current_size = 0;

        Ok(())
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        let mut name = self
            .base_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}", index));
        self.base_path.with_file_name(name)
    }
}

impl Write for SizeBasedRollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();

        if inner.current_size > 0 && inner.current_size + buf.len() as u64 > inner.max_size {
            inner.rotate()?;
        }

        match inner.file.as_mut() {
            Some(file) => {
                let written = file.write(buf)?;
                inner.current_size += written as u64;
                Ok(written)
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "Log file not open")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Make the writer usable with tracing-subscriber
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SizeBasedRollingWriter {
    type Writer = SizeBasedRollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
