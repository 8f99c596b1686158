//! Bounded, contained calls into the evaluation oracle.
//!
//! [`EvaluationAdapter`] turns every way an oracle can misbehave (returning
//! an error, panicking, reporting failure, producing non-finite metrics,
//! running out of time) into [`EvaluationResult::Failure`]. The engine never
//! sees a raw oracle error. [`Oracle::release`] runs before
//! [`EvaluationAdapter::evaluate`] returns on every path.
//!
//! Cancellation is only as strong as the oracle: in-process oracles run to
//! completion and an overrun is logged, while [`CommandOracle`] kills its
//! child process when the budget expires.

mod command;

pub use command::CommandOracle;

use crate::core::particle::Metrics;
use crate::core::DesignMapping;
use crate::ops::{Oracle, OracleError, OracleStatus};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Wall-clock budget used when none is configured.
pub const DEFAULT_EVALUATION_BUDGET: Duration = Duration::from_secs(20);

/// Why an evaluation was discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleFailure {
    /// The oracle returned an error.
    #[error("oracle raised: {0}")]
    Raised(String),
    /// The oracle panicked.
    #[error("oracle panicked: {0}")]
    Panicked(String),
    /// The oracle reported `status = failure`.
    #[error("oracle reported failure: {0}")]
    Rejected(String),
    /// Reported metrics were NaN or infinite.
    #[error("oracle returned non-finite metrics: {0:?}")]
    InvalidMetrics(Metrics),
    /// The budget ran out and the call was cancelled.
    #[error("evaluation exceeded its {0:?} budget")]
    Timeout(Duration),
}

/// Outcome of one adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    /// Finite metrics ready for the fitness policy.
    Success(Metrics),
    /// The evaluation must be scored as `+∞`.
    Failure(OracleFailure),
}

impl EvaluationResult {
    /// Whether the evaluation produced usable metrics.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Metrics of a successful evaluation.
    #[must_use]
    pub fn metrics(&self) -> Option<&Metrics> {
        match self {
            Self::Success(metrics) => Some(metrics),
            Self::Failure(_) => None,
        }
    }

    /// Reason of a failed evaluation.
    #[must_use]
    pub fn failure(&self) -> Option<&OracleFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(reason) => Some(reason),
        }
    }
}

/// Counters maintained by the adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    /// Oracle calls made.
    pub evaluations: usize,
    /// Calls that ended in [`EvaluationResult::Failure`].
    pub failures: usize,
    /// Non-preemptible calls that finished after their budget.
    pub overruns: usize,
}

/// Wraps an [`Oracle`] with failure containment and scoped cleanup.
///
/// # Examples
/// ```
/// use designswarm::evaluation::EvaluationAdapter;
/// use designswarm::ops::{FnOracle, OracleError};
/// use designswarm::DesignMapping;
/// use std::time::Duration;
///
/// let oracle = FnOracle::new(|_: &DesignMapping| Err(OracleError::Failed("mesh".into())));
/// let mut adapter = EvaluationAdapter::new(oracle, Duration::from_secs(1));
/// let result = adapter.evaluate(&DesignMapping::default());
/// assert!(!result.is_success());
/// assert_eq!(adapter.stats().failures, 1);
/// ```
pub struct EvaluationAdapter<O> {
    oracle: O,
    budget: Duration,
    stats: AdapterStats,
}

impl<O: Oracle> EvaluationAdapter<O> {
    /// Creates an adapter with a per-call budget.
    pub fn new(oracle: O, budget: Duration) -> Self {
        Self {
            oracle,
            budget,
            stats: AdapterStats::default(),
        }
    }

    /// Per-call wall-clock budget.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> AdapterStats {
        self.stats
    }

    /// The wrapped oracle.
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Consumes the adapter, returning the oracle.
    pub fn into_inner(self) -> O {
        self.oracle
    }

    /// Calls the oracle exactly once for `design`.
    pub fn evaluate(&mut self, design: &DesignMapping) -> EvaluationResult {
        self.stats.evaluations += 1;
        let budget = self.budget;
        let preemptible = self.oracle.preemptible();
        let started = Instant::now();
        let outcome = {
            let mut guard = ReleaseGuard {
                oracle: &mut self.oracle,
            };
            panic::catch_unwind(AssertUnwindSafe(|| {
                guard.oracle.evaluate_design(design, budget)
            }))
        };
        let elapsed = started.elapsed();
        if !preemptible && elapsed > budget {
            self.stats.overruns += 1;
            warn!(
                elapsed_ms = elapsed.as_millis(),
                budget_ms = budget.as_millis(),
                "oracle overran its budget and cannot be cancelled in-process"
            );
        }

        let classified = match outcome {
            Err(payload) => Err(OracleFailure::Panicked(panic_message(payload.as_ref()))),
            Ok(Err(OracleError::Timeout(limit))) => Err(OracleFailure::Timeout(limit)),
            Ok(Err(err)) => Err(OracleFailure::Raised(err.to_string())),
            Ok(Ok(report)) => match report.status {
                OracleStatus::Failure => Err(OracleFailure::Rejected(
                    report
                        .message
                        .unwrap_or_else(|| "no diagnostic provided".to_owned()),
                )),
                OracleStatus::Success => {
                    let metrics = report.metrics();
                    if metrics.is_finite() {
                        Ok(metrics)
                    } else {
                        Err(OracleFailure::InvalidMetrics(metrics))
                    }
                }
            },
        };

        match classified {
            Ok(metrics) => {
                debug!(elapsed_ms = elapsed.as_millis(), ?metrics, "evaluation succeeded");
                EvaluationResult::Success(metrics)
            }
            Err(reason) => {
                self.stats.failures += 1;
                warn!(elapsed_ms = elapsed.as_millis(), %reason, "evaluation failed");
                EvaluationResult::Failure(reason)
            }
        }
    }
}

struct ReleaseGuard<'a, O: Oracle> {
    oracle: &'a mut O,
}

impl<O: Oracle> Drop for ReleaseGuard<'_, O> {
    fn drop(&mut self) {
        let released = panic::catch_unwind(AssertUnwindSafe(|| self.oracle.release()));
        if released.is_err() {
            warn!("oracle release hook panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{OracleReport, OracleResult};
    use std::thread;

    enum Mode {
        Succeed,
        Raise,
        Panic,
        Reject,
        NonFinite,
        Slow(Duration),
    }

    struct Scripted {
        mode: Mode,
        releases: usize,
        calls: usize,
    }

    impl Scripted {
        fn new(mode: Mode) -> Self {
            Self {
                mode,
                releases: 0,
                calls: 0,
            }
        }
    }

    impl Oracle for Scripted {
        fn evaluate_design(
            &mut self,
            _design: &DesignMapping,
            _budget: Duration,
        ) -> OracleResult<OracleReport> {
            self.calls += 1;
            let metrics = Metrics::new(100.0, 2.5, 50.0, 8.0, 9.0);
            match self.mode {
                Mode::Succeed => Ok(OracleReport::success(metrics)),
                Mode::Raise => Err(OracleError::Failed("solver diverged".to_owned())),
                Mode::Panic => panic!("mesh generator crashed"),
                Mode::Reject => Ok(OracleReport::failure("no convergence")),
                Mode::NonFinite => Ok(OracleReport::success(Metrics::new(
                    f64::NAN,
                    2.5,
                    50.0,
                    8.0,
                    9.0,
                ))),
                Mode::Slow(delay) => {
                    thread::sleep(delay);
                    Ok(OracleReport::success(metrics))
                }
            }
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    fn run(mode: Mode) -> (EvaluationResult, Scripted) {
        let mut adapter = EvaluationAdapter::new(Scripted::new(mode), Duration::from_secs(5));
        let result = adapter.evaluate(&DesignMapping::default());
        (result, adapter.into_inner())
    }

    #[test]
    fn success_passes_metrics_through() {
        let (result, oracle) = run(Mode::Succeed);
        assert_eq!(result.metrics().unwrap().cost, 100.0);
        assert_eq!(oracle.calls, 1);
        assert_eq!(oracle.releases, 1);
    }

    #[test]
    fn raised_errors_become_failures() {
        let (result, oracle) = run(Mode::Raise);
        assert!(matches!(
            result.failure(),
            Some(OracleFailure::Raised(msg)) if msg.contains("diverged")
        ));
        assert_eq!(oracle.releases, 1);
    }

    #[test]
    fn panics_are_contained_and_still_release() {
        let (result, oracle) = run(Mode::Panic);
        assert!(matches!(
            result.failure(),
            Some(OracleFailure::Panicked(msg)) if msg == "mesh generator crashed"
        ));
        assert_eq!(oracle.calls, 1);
        assert_eq!(oracle.releases, 1);
    }

    #[test]
    fn reported_failures_and_bad_metrics_are_rejected() {
        let (rejected, _) = run(Mode::Reject);
        assert!(matches!(rejected.failure(), Some(OracleFailure::Rejected(_))));
        let (invalid, oracle) = run(Mode::NonFinite);
        assert!(matches!(invalid.failure(), Some(OracleFailure::InvalidMetrics(_))));
        assert_eq!(oracle.releases, 1);
    }

    #[test]
    fn in_process_overrun_is_counted_but_accepted() {
        let mut adapter = EvaluationAdapter::new(
            Scripted::new(Mode::Slow(Duration::from_millis(30))),
            Duration::from_millis(1),
        );
        let result = adapter.evaluate(&DesignMapping::default());
        assert!(result.is_success());
        assert_eq!(adapter.stats().overruns, 1);
        assert_eq!(adapter.stats().failures, 0);
    }

    #[test]
    fn stats_count_every_call() {
        let mut adapter =
            EvaluationAdapter::new(Scripted::new(Mode::Raise), Duration::from_secs(1));
        for _ in 0..3 {
            adapter.evaluate(&DesignMapping::default());
        }
        assert_eq!(
            adapter.stats(),
            AdapterStats {
                evaluations: 3,
                failures: 3,
                overruns: 0
            }
        );
    }
}
