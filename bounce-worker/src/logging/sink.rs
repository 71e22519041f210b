//! Append-only, timestamped log sink.
//!
//! A sink starts unconfigured, may be pointed at a path and switched between
//! console and file mode, opens its file lazily on the first write and keeps
//! the handle until [`LogSink::close`] or drop. If the configured file cannot
//! be opened, the sink falls back once to a file in the working directory;
//! failing that too is the one unrecoverable error in the worker.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::LogError;

/// Path used when no path has been configured.
pub const DEFAULT_LOG_FILE: &str = "/var/log/pmta/pmta-bounce-handler.log";

/// Working-directory file used when the configured path cannot be opened.
pub const FALLBACK_LOG_FILE: &str = "bounce-handler.log";

/// Where a sink writes its lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    /// Write to stdout, never touch the filesystem.
    Console,
    #[default]
    File,
}

/// Format a timestamp the way every log line is prefixed.
///
/// Produces `[19/Oct/2026 14:03:09]`.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("[%d/%b/%Y %H:%M:%S]").to_string()
}

#[derive(Debug)]
struct SinkState {
    path: Option<PathBuf>,
    mode: LogMode,
    default_path: PathBuf,
    fallback_path: PathBuf,
    file: Option<File>,
    opened_path: Option<PathBuf>,
}

/// A lazily opened append-only log file (or stdout in console mode).
///
/// All methods take `&self`; writes are serialized through an internal mutex
/// so lines from concurrent writers never interleave.
#[derive(Debug)]
pub struct LogSink {
    state: Mutex<SinkState>,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink {
    /// Create an unconfigured sink using the built-in default and fallback paths.
    pub fn new() -> Self {
        Self::with_defaults(DEFAULT_LOG_FILE, FALLBACK_LOG_FILE)
    }

    /// Create an unconfigured sink with explicit default and fallback paths.
    pub fn with_defaults(default_path: impl Into<PathBuf>, fallback_path: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(SinkState {
                path: None,
                mode: LogMode::File,
                default_path: default_path.into(),
                fallback_path: fallback_path.into(),
                file: None,
                opened_path: None,
            }),
        }
    }

    /// Create a file-mode sink already pointed at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let sink = Self::new();
        sink.set_path(path);
        sink
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Point the sink at a new file. An open handle is released so the next
    /// write opens the new path.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let mut state = self.lock();
        state.path = Some(path.into());
        state.file = None;
        state.opened_path = None;
    }

    pub fn set_mode(&self, mode: LogMode) {
        let mut state = self.lock();
        state.mode = mode;
        if mode == LogMode::Console {
            state.file = None;
            state.opened_path = None;
        }
    }

    pub fn mode(&self) -> LogMode {
        self.lock().mode
    }

    /// The file currently held open, if any.
    pub fn opened_path(&self) -> Option<PathBuf> {
        self.lock().opened_path.clone()
    }

    /// Append one timestamped line.
    ///
    /// Returns [`LogError::Unopenable`] only when neither the configured path
    /// nor the fallback could be opened; callers treat that as fatal.
    pub fn write(&self, message: &str) -> Result<(), LogError> {
        let line = format!("{} {}\n", timestamp(Utc::now()), message.trim_end_matches('\n'));
        let mut state = self.lock();

        if state.mode == LogMode::Console {
            let mut stdout = io::stdout().lock();
            stdout.write_all(line.as_bytes())?;
            return Ok(());
        }

        if state.file.is_none() {
            let (file, path) = open(&state)?;
            state.file = Some(file);
            state.opened_path = Some(path);
        }

        if let Some(file) = state.file.as_mut() {
            file.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    /// Release the file handle. No-op in console mode or when nothing is open.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.mode == LogMode::Console {
            return;
        }
        if let Some(mut file) = state.file.take() {
            let _ = file.flush();
        }
        state.opened_path = None;
    }
}

fn open(state: &SinkState) -> Result<(File, PathBuf), LogError> {
    let wanted = state.path.clone().unwrap_or_else(|| state.default_path.clone());

    match append(&wanted) {
        Ok(file) => Ok((file, wanted)),
        Err(_) => match append(&state.fallback_path) {
            Ok(file) => Ok((file, state.fallback_path.clone())),
            Err(source) => Err(LogError::Unopenable {
                path: wanted,
                fallback: state.fallback_path.clone(),
                source,
            }),
        },
    }
}

fn append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
