//! Round-robin time-series store.
//!
//! A fixed-size store in the spirit of RRDtool: a fixed sampling step, a set
//! of data sources folded into one primary data point (PDP) per step, and
//! archives of fixed-length ring buffers that consolidate PDPs with AVERAGE.
//! The whole store is serialized as a single JSON document.
//!
//! Only ABSOLUTE data sources are supported: each update carries a count
//! accumulated since the previous update, spread evenly over that interval.
//! A PDP is the per-second rate over its step.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::StatsError;

/// Data source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DsKind {
    /// Counts reset on every update.
    Absolute,
}

/// Consolidation function of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Consolidation {
    Average,
}

/// A data source and its accumulator for the step in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub kind: DsKind,
    /// Longest gap between updates, in seconds, before values become unknown.
    pub heartbeat: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default)]
    pdp_sum: f64,
    #[serde(default)]
    unknown_secs: u64,
}

impl DataSource {
    pub fn absolute(name: &str, heartbeat: u64, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            kind: DsKind::Absolute,
            heartbeat,
            min,
            max,
            pdp_sum: 0.0,
            unknown_secs: 0,
        }
    }

    fn in_range(&self, rate: f64) -> bool {
        self.min.map_or(true, |min| rate >= min) && self.max.map_or(true, |max| rate <= max)
    }
}

/// Parses the RRDtool definition syntax `name:ABSOLUTE:heartbeat:min:max`,
/// with `U` for an unbounded limit.
impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 5 {
            return Err(format!("expected name:TYPE:heartbeat:min:max, got {s}"));
        }
        if !parts[1].eq_ignore_ascii_case("ABSOLUTE") {
            return Err(format!("unsupported data source type {}", parts[1]));
        }
        let heartbeat = parts[2]
            .parse()
            .map_err(|_| format!("invalid heartbeat {}", parts[2]))?;
        let limit = |v: &str| -> Result<Option<f64>, String> {
            if v == "U" {
                Ok(None)
            } else {
                v.parse().map(Some).map_err(|_| format!("invalid limit {v}"))
            }
        };
        Ok(Self::absolute(parts[0], heartbeat, limit(parts[3])?, limit(parts[4])?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CdpPrep {
    sum: f64,
    known: u32,
}

/// A ring buffer of consolidated rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub cf: Consolidation,
    /// Fraction of unknown PDPs tolerated in one consolidated row.
    pub xff: f64,
    pub steps_per_row: u32,
    pub rows: u32,
    cur_row: u32,
    cdp: Vec<CdpPrep>,
    data: Vec<Vec<Option<f64>>>,
}

impl Archive {
    pub fn average(xff: f64, steps_per_row: u32, rows: u32) -> Self {
        Self {
            cf: Consolidation::Average,
            xff,
            steps_per_row,
            rows,
            cur_row: 0,
            cdp: Vec::new(),
            data: Vec::new(),
        }
    }

    fn allocate(&mut self, sources: usize) {
        self.cur_row = self.rows.saturating_sub(1);
        self.cdp = vec![CdpPrep::default(); sources];
        self.data = vec![vec![None; sources]; self.rows as usize];
    }

    fn push(&mut self, step_index: i64, pdps: &[Option<f64>]) {
        if self.rows == 0 || self.steps_per_row == 0 {
            return;
        }
        for (prep, pdp) in self.cdp.iter_mut().zip(pdps) {
            if let Some(value) = pdp {
                prep.sum += value;
                prep.known += 1;
            }
        }

        if (step_index + 1) % i64::from(self.steps_per_row) != 0 {
            return;
        }

        self.cur_row = (self.cur_row + 1) % self.rows;
        let spr = f64::from(self.steps_per_row);
        let row = &mut self.data[self.cur_row as usize];
        for (slot, prep) in row.iter_mut().zip(self.cdp.iter_mut()) {
            let unknown = (spr - f64::from(prep.known)) / spr;
            *slot = if prep.known > 0 && unknown <= self.xff {
                Some(prep.sum / f64::from(prep.known))
            } else {
                None
            };
            *prep = CdpPrep::default();
        }
    }

    /// Rows ordered oldest to newest.
    pub fn rows_oldest_first(&self) -> Vec<Vec<Option<f64>>> {
        let n = self.data.len();
        (1..=n)
            .map(|i| self.data[(self.cur_row as usize + i) % n].clone())
            .collect()
    }
}

/// Parses the RRDtool archive syntax `AVERAGE:xff:steps:rows`.
impl FromStr for Archive {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 || !parts[0].eq_ignore_ascii_case("AVERAGE") {
            return Err(format!("expected AVERAGE:xff:steps:rows, got {s}"));
        }
        let xff: f64 = parts[1].parse().map_err(|_| format!("invalid xff {}", parts[1]))?;
        let steps: u32 = parts[2].parse().map_err(|_| format!("invalid steps {}", parts[2]))?;
        let rows: u32 = parts[3].parse().map_err(|_| format!("invalid rows {}", parts[3]))?;
        if steps == 0 || rows == 0 || !(0.0..1.0).contains(&xff) {
            return Err(format!("archive out of range: {s}"));
        }
        Ok(Self::average(xff, steps, rows))
    }
}

/// The whole store as persisted on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRobinStore {
    pub step: u64,
    last_update: i64,
    data_sources: Vec<DataSource>,
    archives: Vec<Archive>,
}

impl RoundRobinStore {
    /// Lay out a new, empty store starting at `start` (unix seconds).
    ///
    /// The part of the first step before `start` is unknown.
    pub fn new(step: u64, start: i64, mut data_sources: Vec<DataSource>, mut archives: Vec<Archive>) -> Self {
        for archive in &mut archives {
            archive.allocate(data_sources.len());
        }
        if step > 0 {
            let before_start = start.rem_euclid(step as i64) as u64;
            for ds in &mut data_sources {
                ds.unknown_secs = before_start;
            }
        }
        Self {
            step,
            last_update: start,
            data_sources,
            archives,
        }
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &str> {
        self.data_sources.iter().map(|ds| ds.name.as_str())
    }

    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    /// Count folded into the step in progress for `name`.
    pub fn pending(&self, name: &str) -> Option<f64> {
        self.data_sources
            .iter()
            .find(|ds| ds.name == name)
            .map(|ds| ds.pdp_sum)
    }

    /// Apply one update at time `at`. Data sources not named get zero.
    ///
    /// Updates in the same second as the previous one add to the same step;
    /// updates going back in time are rejected.
    pub fn update(&mut self, at: i64, values: &[(&str, u64)]) -> Result<(), StatsError> {
        if at < self.last_update {
            return Err(StatsError::IllegalUpdate {
                at,
                last: self.last_update,
            });
        }

        let mut counts = vec![0u64; self.data_sources.len()];
        for (name, count) in values {
            let idx = self
                .data_sources
                .iter()
                .position(|ds| ds.name == *name)
                .ok_or_else(|| StatsError::UnknownDataSource(name.to_string()))?;
            counts[idx] = counts[idx].saturating_add(*count);
        }

        let interval = at - self.last_update;
        if interval == 0 {
            for (ds, count) in self.data_sources.iter_mut().zip(&counts) {
                ds.pdp_sum += *count as f64;
            }
            return Ok(());
        }

        let rates: Vec<Option<f64>> = self
            .data_sources
            .iter()
            .zip(&counts)
            .map(|(ds, count)| {
                let rate = *count as f64 / interval as f64;
                (interval as u64 <= ds.heartbeat && ds.in_range(rate)).then_some(rate)
            })
            .collect();

        let step = self.step as i64;
        let mut cursor = self.last_update;
        while cursor < at {
            let boundary = cursor - cursor.rem_euclid(step) + step;
            let segment_end = boundary.min(at);
            let secs = segment_end - cursor;

            for (ds, rate) in self.data_sources.iter_mut().zip(&rates) {
                match rate {
                    Some(rate) => ds.pdp_sum += rate * secs as f64,
                    None => ds.unknown_secs += secs as u64,
                }
            }

            if segment_end == boundary {
                self.close_step(boundary / step - 1);
            }
            cursor = segment_end;
        }

        self.last_update = at;
        Ok(())
    }

    fn close_step(&mut self, step_index: i64) {
        let step = self.step;
        let pdps: Vec<Option<f64>> = self
            .data_sources
            .iter_mut()
            .map(|ds| {
                let known_secs = step.saturating_sub(ds.unknown_secs);
                let pdp = (ds.unknown_secs * 2 <= step && known_secs > 0)
                    .then(|| ds.pdp_sum / known_secs as f64);
                ds.pdp_sum = 0.0;
                ds.unknown_secs = 0;
                pdp
            })
            .collect();

        for archive in &mut self.archives {
            archive.push(step_index, &pdps);
        }
    }

    pub fn load(path: &Path) -> Result<Self, StatsError> {
        let raw = fs::read(path).map_err(|source| StatsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Persist by writing a uniquely named temp file in the same directory
    /// and renaming it over `path`.
    pub fn save(&self, path: &Path) -> Result<(), StatsError> {
        let io_err = |source| StatsError::Io {
            path: path.to_path_buf(),
            source,
        };
        let body = serde_json::to_vec(self)?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&body).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl fmt::Display for RoundRobinStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step={} sources={} archives={}",
            self.step,
            self.data_sources.len(),
            self.archives.len()
        )
    }
}
