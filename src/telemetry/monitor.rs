//! Read-side helpers for processes watching a run directory.
//!
//! A monitor runs concurrently with the writer, so everything here expects to
//! observe artifacts mid-update: a malformed snapshot is reported as
//! transient, and a truncated final row of a CSV log is ignored.

use super::{CompletionMarker, StatusSnapshot, COMPLETION_MARKER, STATUS_SNAPSHOT};
use crate::core::particle::Metrics;
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle of a run as seen from its output directory.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    /// Neither a snapshot nor a marker exists yet.
    NotStarted,
    /// The latest snapshot of a run still in progress.
    Running(StatusSnapshot),
    /// The run completed.
    Completed(CompletionMarker),
}

impl RunState {
    /// Whether the completion marker was observed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Errors surfaced to a monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Filesystem failure other than a missing file.
    #[error("failed to read run artifacts: {0}")]
    Io(#[from] io::Error),
    /// A JSON artifact could not be parsed; retry later.
    #[error("artifact {path} is incomplete or malformed: {source}")]
    Transient {
        /// Offending file.
        path: PathBuf,
        /// Parse error.
        source: serde_json::Error,
    },
    /// A CSV log could not be read.
    #[error("failed to read log: {0}")]
    Csv(#[from] csv::Error),
}

impl MonitorError {
    /// Whether retrying may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Reads the current state of the run in `dir`.
///
/// The completion marker takes precedence over the snapshot.
///
/// # Errors
/// Returns [`MonitorError::Transient`] when an artifact is malformed and
/// [`MonitorError::Io`] on other read failures.
pub fn read_run_state(dir: impl AsRef<Path>) -> Result<RunState, MonitorError> {
    let dir = dir.as_ref();
    if let Some(marker) = read_json(&dir.join(COMPLETION_MARKER))? {
        return Ok(RunState::Completed(marker));
    }
    Ok(read_json(&dir.join(STATUS_SNAPSHOT))?.map_or(RunState::NotStarted, RunState::Running))
}

/// Like [`read_run_state`], retrying transient errors up to `attempts` times
/// with `backoff` between tries.
///
/// # Errors
/// Returns the last error once the attempts are exhausted, or the first
/// non-transient error.
pub fn poll_run_state(
    dir: impl AsRef<Path>,
    attempts: usize,
    backoff: Duration,
) -> Result<RunState, MonitorError> {
    let dir = dir.as_ref();
    let mut remaining = attempts.max(1);
    loop {
        match read_run_state(dir) {
            Err(err) if err.is_transient() && remaining > 1 => {
                remaining -= 1;
                thread::sleep(backoff);
            }
            other => return other,
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, MonitorError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| MonitorError::Transient {
            path: path.to_path_buf(),
            source,
        })
}

/// One parsed row of the global-best history.
#[derive(Debug, Clone, PartialEq)]
pub struct GbestRecord {
    /// Iteration index.
    pub iteration: usize,
    /// Global best fitness.
    pub gbest_fitness: f64,
    /// Metrics of the global best.
    pub metrics: Metrics,
    /// Decoded design values by column name.
    pub design: Vec<(String, f64)>,
}

/// Parses a `gbest_history.csv` written by the recorder.
///
/// Parsing stops at the first incomplete row, which can only be the row the
/// writer is appending.
///
/// # Errors
/// Returns [`MonitorError`] when the file cannot be opened or has no header.
pub fn read_gbest_history(path: impl AsRef<Path>) -> Result<Vec<GbestRecord>, MonitorError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let mut history = Vec::new();
    for record in reader.records() {
        let Ok(record) = record else { break };
        if record.len() != headers.len() {
            break;
        }
        let Some(parsed) = parse_gbest(&headers, &record) else {
            break;
        };
        history.push(parsed);
    }
    Ok(history)
}

fn parse_gbest(headers: &csv::StringRecord, record: &csv::StringRecord) -> Option<GbestRecord> {
    let float = |idx: usize| record.get(idx)?.parse::<f64>().ok();
    let design = headers
        .iter()
        .enumerate()
        .skip(7)
        .map(|(idx, name)| Some((name.to_owned(), float(idx)?)))
        .collect::<Option<Vec<_>>>()?;
    Some(GbestRecord {
        iteration: record.get(0)?.parse().ok()?,
        gbest_fitness: float(1)?,
        metrics: Metrics::new(float(2)?, float(3)?, float(4)?, float(5)?, float(6)?),
        design,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{GBEST_LOG, STATUS_SNAPSHOT};

    #[test]
    fn empty_directory_has_not_started() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_run_state(dir.path()).unwrap(), RunState::NotStarted);
    }

    #[test]
    fn half_written_snapshot_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STATUS_SNAPSHOT), "{\"phase\": \"runn").unwrap();
        let err = read_run_state(dir.path()).unwrap_err();
        assert!(err.is_transient());
        let err = poll_run_state(dir.path(), 2, Duration::from_millis(1)).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn marker_wins_over_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(STATUS_SNAPSHOT),
            serde_json::to_vec(&StatusSnapshot::initializing(5, 2)).unwrap(),
        )
        .unwrap();
        assert!(matches!(read_run_state(dir.path()).unwrap(), RunState::Running(_)));
        let marker = CompletionMarker::new(f64::INFINITY, Duration::from_secs(1), 5);
        fs::write(
            dir.path().join(COMPLETION_MARKER),
            serde_json::to_vec(&marker).unwrap(),
        )
        .unwrap();
        match read_run_state(dir.path()).unwrap() {
            RunState::Completed(read) => assert!(read.gbest_fitness.is_infinite()),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn truncated_final_row_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GBEST_LOG);
        fs::write(
            &path,
            "iteration,gbest_fitness,cost,safety,co2,comfort,constructability,Lx\n\
             0,inf,inf,0,inf,0,0,10\n\
             1,100,100,2.5,40,8,9,9.5\n\
             2,90,90,2.",
        )
        .unwrap();
        let history = read_gbest_history(&path).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].gbest_fitness.is_infinite());
        assert_eq!(history[1].design, vec![("Lx".to_owned(), 9.5)]);
        assert_eq!(history[1].metrics.safety, 2.5);
    }
}
