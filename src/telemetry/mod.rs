//! Durable run telemetry for external monitors.
//!
//! Three CSV logs are append-only: every row is flushed as soon as it is
//! written and never rewritten. The status snapshot is the only artifact that
//! is replaced in place, and the completion marker is written once. Both go
//! through a temporary sibling file followed by a rename so a reader sees
//! either the previous or the next version. Readers must still tolerate a
//! truncated final CSV row; see [`monitor`].

pub mod monitor;

use crate::core::particle::Metrics;
use crate::core::{DesignMapping, DesignSpace};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Particle-position log file name.
pub const PARTICLE_LOG: &str = "particle_positions.csv";
/// Personal-best log file name.
pub const PBEST_LOG: &str = "pbest_positions.csv";
/// Global-best-history log file name.
pub const GBEST_LOG: &str = "gbest_history.csv";
/// Run settings file name.
pub const SETTINGS_LOG: &str = "settings.csv";
/// Status snapshot file name.
pub const STATUS_SNAPSHOT: &str = "status.json";
/// Completion marker file name.
pub const COMPLETION_MARKER: &str = "completed.json";
/// Minimum spacing between rate-limited snapshot writes.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

const METRIC_COLUMNS: [&str; 5] = ["cost", "safety", "co2", "comfort", "constructability"];

/// Errors raised while writing telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Filesystem failure.
    #[error("telemetry I/O error: {0}")]
    Io(#[from] io::Error),
    /// CSV encoding failure.
    #[error("telemetry CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON encoding failure.
    #[error("telemetry JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The completion marker was requested a second time.
    #[error("completion marker has already been written")]
    AlreadyCompleted,
}

/// One row of the particle-position or personal-best log.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryRow<'a> {
    /// Iteration index.
    pub iteration: usize,
    /// One-based particle id.
    pub particle: usize,
    /// Fitness of the logged position.
    pub fitness: f64,
    /// Metrics of the logged position.
    pub metrics: &'a Metrics,
    /// Decoded logged position.
    pub design: &'a DesignMapping,
}

impl TrajectoryRow<'_> {
    fn fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.iteration.to_string(),
            self.particle.to_string(),
            self.fitness.to_string(),
        ];
        push_metrics(&mut fields, self.metrics);
        fields.extend(self.design.values().map(|value| value.to_string()));
        fields
    }
}

/// One row of the global-best-history log.
#[derive(Debug, Clone, Copy)]
pub struct GbestRow<'a> {
    /// Iteration index.
    pub iteration: usize,
    /// Global best fitness after the iteration.
    pub fitness: f64,
    /// Metrics of the global best.
    pub metrics: &'a Metrics,
    /// Decoded global best position.
    pub design: &'a DesignMapping,
}

impl GbestRow<'_> {
    fn fields(&self) -> Vec<String> {
        let mut fields = vec![self.iteration.to_string(), self.fitness.to_string()];
        push_metrics(&mut fields, self.metrics);
        fields.extend(self.design.values().map(|value| value.to_string()));
        fields
    }
}

fn push_metrics(fields: &mut Vec<String>, metrics: &Metrics) {
    fields.extend(
        [
            metrics.cost,
            metrics.safety,
            metrics.co2,
            metrics.comfort,
            metrics.constructability,
        ]
        .iter()
        .map(f64::to_string),
    );
}

/// Lifecycle phase reported in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// The swarm has not finished its initial evaluation.
    Initializing,
    /// Iterations are in progress.
    Running,
    /// The last iteration is done.
    Finished,
}

/// Compact per-particle state for live plots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleSummary {
    /// Raw position vector.
    pub position: Vec<f64>,
    /// Latest fitness.
    #[serde(with = "non_finite")]
    pub fitness: f64,
    /// Latest safety factor.
    #[serde(with = "non_finite")]
    pub safety: f64,
    /// Latest cost.
    #[serde(with = "non_finite")]
    pub cost: f64,
}

/// The overwritten progress artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Lifecycle phase.
    pub phase: RunPhase,
    /// Iteration the snapshot describes.
    pub iteration: usize,
    /// Configured number of iterations.
    pub max_iteration: usize,
    /// Swarm size.
    pub particle_count: usize,
    /// Global best fitness, `null` while infinite.
    #[serde(with = "non_finite")]
    pub gbest_fitness: f64,
    /// Metrics of the global best, once one exists.
    pub best_metrics: Option<Metrics>,
    /// Percent of iterations completed.
    pub progress_pct: f64,
    /// Seconds since the run started.
    pub elapsed_seconds: f64,
    /// RFC 3339 wall-clock time of the write.
    pub updated_at: String,
    /// Per-particle summaries in index order.
    pub particles: Vec<ParticleSummary>,
}

impl StatusSnapshot {
    /// Snapshot written before any evaluation completes.
    #[must_use]
    pub fn initializing(max_iteration: usize, particle_count: usize) -> Self {
        Self {
            phase: RunPhase::Initializing,
            iteration: 0,
            max_iteration,
            particle_count,
            gbest_fitness: f64::INFINITY,
            best_metrics: None,
            progress_pct: 0.0,
            elapsed_seconds: 0.0,
            updated_at: now_rfc3339(),
            particles: Vec::new(),
        }
    }

    /// Progress after `iteration` of `max_iteration` iterations.
    #[must_use]
    pub fn progress(iteration: usize, max_iteration: usize) -> f64 {
        if max_iteration == 0 {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let progress = (iteration + 1) as f64 / max_iteration as f64 * 100.0;
        progress.min(100.0)
    }
}

/// The write-once terminal artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    /// Final global best fitness, `null` when no evaluation succeeded.
    #[serde(with = "non_finite")]
    pub gbest_fitness: f64,
    /// Total run time in seconds.
    pub elapsed_seconds: f64,
    /// RFC 3339 completion time.
    pub completed_at: String,
    /// Iterations executed.
    pub iterations: usize,
}

impl CompletionMarker {
    /// Marker stamped with the current time.
    #[must_use]
    pub fn new(gbest_fitness: f64, elapsed: Duration, iterations: usize) -> Self {
        Self {
            gbest_fitness,
            elapsed_seconds: elapsed.as_secs_f64(),
            completed_at: now_rfc3339(),
            iterations,
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Writes the artifacts of one run into a directory.
///
/// Snapshot rate limiting is per recorder, so independent runs in one
/// process do not interfere.
pub struct TelemetryRecorder {
    dir: PathBuf,
    particles: csv::Writer<File>,
    pbests: csv::Writer<File>,
    gbests: csv::Writer<File>,
    snapshot_interval: Duration,
    last_snapshot: Option<Instant>,
    completed: bool,
}

impl TelemetryRecorder {
    /// Creates `dir`, truncates the logs of any previous run, writes their
    /// headers and removes a stale snapshot or completion marker.
    ///
    /// # Errors
    /// Returns [`TelemetryError`] when the directory or a log cannot be
    /// created.
    pub fn create(dir: impl AsRef<Path>, space: &DesignSpace) -> Result<Self, TelemetryError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        for stale in [STATUS_SNAPSHOT, COMPLETION_MARKER] {
            match fs::remove_file(dir.join(stale)) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
                _ => {}
            }
        }

        let names: Vec<&str> = space.names().collect();
        let mut trajectory_header = vec!["iteration", "particle", "fitness"];
        trajectory_header.extend(METRIC_COLUMNS);
        trajectory_header.extend(&names);

        let mut pbest_header = vec![
            "iteration".to_owned(),
            "particle".to_owned(),
            "pbest_fitness".to_owned(),
        ];
        pbest_header.extend(METRIC_COLUMNS.iter().map(|column| format!("pbest_{column}")));
        pbest_header.extend(names.iter().map(|name| format!("pbest_{name}")));

        let mut gbest_header = vec!["iteration", "gbest_fitness"];
        gbest_header.extend(METRIC_COLUMNS);
        gbest_header.extend(&names);

        Ok(Self {
            particles: log_writer(&dir.join(PARTICLE_LOG), &trajectory_header)?,
            pbests: log_writer(&dir.join(PBEST_LOG), &pbest_header)?,
            gbests: log_writer(&dir.join(GBEST_LOG), &gbest_header)?,
            dir,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            last_snapshot: None,
            completed: false,
        })
    }

    /// Overrides the minimum spacing between rate-limited snapshots.
    #[must_use]
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the completion marker has been written.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Records run parameters and the design space in `settings.csv`.
    ///
    /// # Errors
    /// Returns [`TelemetryError`] on I/O or encoding failure.
    pub fn write_settings(
        &mut self,
        parameters: &[(&str, String)],
        space: &DesignSpace,
    ) -> Result<(), TelemetryError> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(self.dir.join(SETTINGS_LOG))?;
        writer.write_record(["parameter", "value"])?;
        for (name, value) in parameters {
            writer.write_record([*name, value.as_str()])?;
        }
        writer.write_record(["variable", "kind", "rounding", "lower", "upper"])?;
        for descriptor in space.descriptors() {
            let kind = serde_json::to_value(descriptor.kind)?;
            let rounding = serde_json::to_value(descriptor.rounding)?;
            writer.write_record([
                descriptor.name.clone(),
                kind.as_str().unwrap_or_default().to_owned(),
                rounding.as_str().unwrap_or_default().to_owned(),
                descriptor.lower.to_string(),
                descriptor.upper.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Appends a row to the particle-position log.
    ///
    /// # Errors
    /// Returns [`TelemetryError`] on I/O or encoding failure.
    pub fn append_particle_row(&mut self, row: &TrajectoryRow<'_>) -> Result<(), TelemetryError> {
        append(&mut self.particles, &row.fields())
    }

    /// Appends a row to the personal-best log.
    ///
    /// # Errors
    /// Returns [`TelemetryError`] on I/O or encoding failure.
    pub fn append_pbest_row(&mut self, row: &TrajectoryRow<'_>) -> Result<(), TelemetryError> {
        append(&mut self.pbests, &row.fields())
    }

    /// Appends a row to the global-best-history log.
    ///
    /// # Errors
    /// Returns [`TelemetryError`] on I/O or encoding failure.
    pub fn append_gbest_row(&mut self, row: &GbestRow<'_>) -> Result<(), TelemetryError> {
        append(&mut self.gbests, &row.fields())
    }

    /// Whether a rate-limited snapshot would be written now.
    #[must_use]
    pub fn snapshot_due(&self) -> bool {
        self.last_snapshot
            .map_or(true, |last| last.elapsed() >= self.snapshot_interval)
    }

    /// Replaces the snapshot unless one was written less than the snapshot
    /// interval ago. Returns whether it was written.
    ///
    /// # Errors
    /// Returns [`TelemetryError`] on I/O or encoding failure.
    pub fn write_status_snapshot(
        &mut self,
        snapshot: &StatusSnapshot,
    ) -> Result<bool, TelemetryError> {
        if !self.snapshot_due() {
            return Ok(false);
        }
        self.force_status_snapshot(snapshot)?;
        Ok(true)
    }

    /// Replaces the snapshot regardless of the rate limit.
    ///
    /// # Errors
    /// Returns [`TelemetryError`] on I/O or encoding failure.
    pub fn force_status_snapshot(
        &mut self,
        snapshot: &StatusSnapshot,
    ) -> Result<(), TelemetryError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.dir.join(STATUS_SNAPSHOT), &bytes)?;
        self.last_snapshot = Some(Instant::now());
        Ok(())
    }

    /// Writes the completion marker. Only the first call succeeds.
    ///
    /// # Errors
    /// Returns [`TelemetryError::AlreadyCompleted`] on a second call, or an
    /// I/O or encoding error.
    pub fn write_completion_marker(
        &mut self,
        marker: &CompletionMarker,
    ) -> Result<(), TelemetryError> {
        if self.completed {
            return Err(TelemetryError::AlreadyCompleted);
        }
        let bytes = serde_json::to_vec_pretty(marker)?;
        write_atomic(&self.dir.join(COMPLETION_MARKER), &bytes)?;
        self.completed = true;
        Ok(())
    }
}

fn log_writer<S: AsRef<[u8]>>(
    path: &Path,
    header: &[S],
) -> Result<csv::Writer<File>, TelemetryError> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(header)?;
    writer.flush()?;
    Ok(writer)
}

fn append(writer: &mut csv::Writer<File>, fields: &[String]) -> Result<(), TelemetryError> {
    writer.write_record(fields)?;
    writer.flush()?;
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Serializes non-finite floats as `null` and reads `null` back as `+∞`.
pub(crate) mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}
