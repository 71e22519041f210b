//! Bounce statistics recorded into a round-robin store.
//!
//! The recorder is fire-and-forget: creation and update failures are logged
//! and never reach the caller. A recorder without a usable store is inert and
//! turns every call into a no-op.

pub mod rrd;

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use fd_lock::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::StatsError;

pub use rrd::{Archive, DataSource, RoundRobinStore};

/// Sampling step of the store, in seconds.
pub const STEP_SECS: u64 = 300;

/// Counter for every handled bounce.
pub const FIELD_BOUNCES: &str = "bounces";

/// Counter for bounces of transactional mail.
pub const FIELD_TRANSACTIONAL: &str = "bounce_bidorbuy";

/// Data sources every store is created with.
pub const DEFAULT_DATA_SOURCES: [&str; 5] = [
    "fbl_reports:ABSOLUTE:600:0:U",
    "bounces:ABSOLUTE:600:0:U",
    "bounce_mailwizz:ABSOLUTE:600:0:U",
    "bounce_interspire:ABSOLUTE:600:0:U",
    "bounce_bidorbuy:ABSOLUTE:600:0:U",
];

/// 5-minute rows for a day, hourly for a week, roughly daily for a year.
pub const DEFAULT_ARCHIVES: [&str; 3] = [
    "AVERAGE:0.5:1:288",
    "AVERAGE:0.5:12:168",
    "AVERAGE:0.5:228:365",
];

/// Shape of a newly created store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreLayout {
    pub step: u64,
    pub data_sources: Vec<String>,
    pub archives: Vec<String>,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            step: STEP_SECS,
            data_sources: DEFAULT_DATA_SOURCES.iter().map(|s| s.to_string()).collect(),
            archives: DEFAULT_ARCHIVES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl StoreLayout {
    /// Add an ABSOLUTE counter with the default heartbeat and limits.
    pub fn with_counter(mut self, name: &str) -> Self {
        if !self.has_counter(name) {
            self.data_sources.push(format!("{name}:ABSOLUTE:600:0:U"));
        }
        self
    }

    pub fn counter_names(&self) -> impl Iterator<Item = &str> {
        self.data_sources
            .iter()
            .filter_map(|def| def.split(':').next())
    }

    pub fn has_counter(&self, name: &str) -> bool {
        self.counter_names().any(|n| n == name)
    }

    fn build(&self, start: i64) -> Result<RoundRobinStore, String> {
        let sources = self
            .data_sources
            .iter()
            .map(|def| def.parse::<DataSource>())
            .collect::<Result<Vec<_>, _>>()?;
        let archives = self
            .archives
            .iter()
            .map(|def| def.parse::<Archive>())
            .collect::<Result<Vec<_>, _>>()?;
        if self.step == 0 {
            return Err("step must be positive".to_string());
        }
        Ok(RoundRobinStore::new(self.step, start, sources, archives))
    }
}

/// Records bounce counters into a round-robin store on disk.
///
/// Each update loads the store, folds in the counts and writes it back while
/// holding an exclusive lock on `<store>.lock`, so several processes (or
/// several recorders in one process) can share one store file.
#[derive(Debug)]
pub struct StatsRecorder {
    path: Option<PathBuf>,
    inert_warned: AtomicBool,
}

impl StatsRecorder {
    /// A recorder with no backing store.
    pub fn disabled() -> Self {
        Self {
            path: None,
            inert_warned: AtomicBool::new(false),
        }
    }

    /// Open the store at `path`, creating it with the default layout if absent.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with(path, &StoreLayout::default(), Utc::now().timestamp())
    }

    /// Open the store at `path`, creating it with `layout` at `now` if absent.
    ///
    /// An existing file is reused as-is. Failure to create or read the store
    /// leaves the recorder inert.
    pub fn open_with(path: impl Into<PathBuf>, layout: &StoreLayout, now: i64) -> Self {
        let path = path.into();
        info!(path = %path.display(), "stats_store_init");

        let ready = match locked(&path, || create_or_reuse(&path, layout, now)) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    hint = "check path and permissions",
                    "stats_store_open_failed"
                );
                false
            }
        };

        Self {
            path: ready.then_some(path),
            ..Self::disabled()
        }
    }

    pub fn is_active(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Add one to every comma-separated field.
    pub fn record(&self, fields: &str) {
        self.record_count(fields, 1);
    }

    /// Add `count` to every comma-separated field.
    pub fn record_count(&self, fields: &str, count: u64) {
        self.record_at(fields, count, Utc::now().timestamp());
    }

    /// Add `count` to every comma-separated field as of `at` (unix seconds).
    pub fn record_at(&self, fields: &str, count: u64, at: i64) {
        let names: Vec<&str> = fields
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        if names.is_empty() {
            return;
        }

        let Some(path) = self.path.as_deref() else {
            if !self.inert_warned.swap(true, Ordering::Relaxed) {
                warn!(fields = %fields, "stats_recorder_inert");
            }
            return;
        };

        if !path.exists() {
            debug!(path = %path.display(), "stats_store_missing");
            return;
        }

        let values: Vec<(&str, u64)> = names.iter().map(|name| (*name, count)).collect();
        if let Err(e) = locked(path, || update(path, &values, at)) {
            warn!(fields = %fields, error = %e, "stats_update_failed");
        }
    }
}

/// Sibling file holding the advisory lock for `path`.
fn lock_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// Run `f` while holding the exclusive lock of the store at `path`.
fn locked<T>(path: &Path, f: impl FnOnce() -> Result<T, StatsError>) -> Result<T, StatsError> {
    let lock_path = lock_path(path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|source| StatsError::Io {
            path: lock_path.clone(),
            source,
        })?;
    let mut lock = RwLock::new(file);
    let _guard = lock.write().map_err(|source| StatsError::Io {
        path: lock_path.clone(),
        source,
    })?;
    f()
}

fn create_or_reuse(path: &Path, layout: &StoreLayout, now: i64) -> Result<(), StatsError> {
    if path.exists() {
        let store = RoundRobinStore::load(path)?;
        debug!(path = %path.display(), store = %store, "stats_store_reused");
        return Ok(());
    }

    info!(path = %path.display(), "stats_store_creating");
    let store = layout.build(now).map_err(StatsError::Layout)?;
    store.save(path)?;
    info!(path = %path.display(), "stats_store_created");
    Ok(())
}

fn update(path: &Path, values: &[(&str, u64)], at: i64) -> Result<(), StatsError> {
    let mut store = RoundRobinStore::load(path)?;
    store.update(at, values)?;
    store.save(path)
}
