//! The evaluation oracle boundary.

use crate::core::particle::Metrics;
use crate::core::DesignMapping;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used by oracle implementations.
pub type OracleResult<T> = Result<T, OracleError>;

/// Errors an oracle may raise instead of returning a report.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The oracle gave up on the design for a domain reason.
    #[error("evaluation failed: {0}")]
    Failed(String),
    /// I/O failure talking to the oracle.
    #[error("oracle I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The oracle produced output that could not be understood.
    #[error("malformed oracle output: {0}")]
    Protocol(String),
    /// An external oracle process exited unsuccessfully.
    #[error("oracle process exited with {status}: {stderr}")]
    Process {
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The evaluation exceeded its wall-clock budget and was cancelled.
    #[error("evaluation exceeded its {0:?} budget")]
    Timeout(Duration),
}

impl From<serde_json::Error> for OracleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Outcome flag reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleStatus {
    /// Metrics are valid.
    #[serde(alias = "Success")]
    Success,
    /// The oracle could not analyse the design.
    #[serde(alias = "Failure", alias = "error", alias = "Error")]
    Failure,
}

/// Raw record returned by an oracle call.
///
/// The JSON form is `{"status": "success", "cost": .., "safety": ..,
/// "co2": .., "comfort": .., "constructability": ..}`; metric fields may be
/// omitted on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleReport {
    /// Whether the metrics are meaningful.
    pub status: OracleStatus,
    /// Diagnostic message accompanying a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Construction cost.
    #[serde(default = "nan")]
    pub cost: f64,
    /// Structural safety factor.
    #[serde(default = "nan")]
    pub safety: f64,
    /// Embodied CO2.
    #[serde(default = "nan")]
    pub co2: f64,
    /// Comfort score.
    #[serde(default = "nan")]
    pub comfort: f64,
    /// Constructability score.
    #[serde(default = "nan")]
    pub constructability: f64,
}

fn nan() -> f64 {
    f64::NAN
}

impl OracleReport {
    /// A successful report carrying `metrics`.
    #[must_use]
    pub fn success(metrics: Metrics) -> Self {
        Self {
            status: OracleStatus::Success,
            message: None,
            cost: metrics.cost,
            safety: metrics.safety,
            co2: metrics.co2,
            comfort: metrics.comfort,
            constructability: metrics.constructability,
        }
    }

    /// A failed report with a diagnostic message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: OracleStatus::Failure,
            message: Some(message.into()),
            cost: f64::NAN,
            safety: f64::NAN,
            co2: f64::NAN,
            comfort: f64::NAN,
            constructability: f64::NAN,
        }
    }

    /// The metric tuple, regardless of status.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        Metrics::new(
            self.cost,
            self.safety,
            self.co2,
            self.comfort,
            self.constructability,
        )
    }
}

/// An expensive, possibly unreliable function that scores a design.
///
/// Implementations are called once per particle per iteration, strictly one
/// call at a time.
///
/// # Examples
/// ```
/// use designswarm::ops::{Oracle, OracleReport, OracleResult};
/// use designswarm::{DesignMapping, Metrics};
/// use std::time::Duration;
///
/// struct Flat;
///
/// impl Oracle for Flat {
///     fn evaluate_design(
///         &mut self,
///         _design: &DesignMapping,
///         _budget: Duration,
///     ) -> OracleResult<OracleReport> {
///         Ok(OracleReport::success(Metrics::new(100.0, 2.5, 50.0, 8.0, 9.0)))
///     }
/// }
///
/// let report = Flat.evaluate_design(&DesignMapping::default(), Duration::from_secs(1)).unwrap();
/// assert_eq!(report.metrics().cost, 100.0);
/// ```
pub trait Oracle {
    /// Evaluates one design.
    ///
    /// `budget` is the wall-clock allowance for this call. Only oracles that
    /// report [`Self::preemptible`] are expected to honour it.
    ///
    /// # Errors
    /// Implementations return [`OracleError`] when the design cannot be
    /// scored.
    fn evaluate_design(
        &mut self,
        design: &DesignMapping,
        budget: Duration,
    ) -> OracleResult<OracleReport>;

    /// Releases anything the last call may have left open.
    ///
    /// Called after every evaluation, whatever its outcome, including panics.
    fn release(&mut self) {}

    /// Whether [`Self::evaluate_design`] cancels itself when `budget` runs out.
    fn preemptible(&self) -> bool {
        false
    }
}

impl<T: Oracle + ?Sized> Oracle for &mut T {
    fn evaluate_design(
        &mut self,
        design: &DesignMapping,
        budget: Duration,
    ) -> OracleResult<OracleReport> {
        (**self).evaluate_design(design, budget)
    }

    fn release(&mut self) {
        (**self).release();
    }

    fn preemptible(&self) -> bool {
        (**self).preemptible()
    }
}

impl<T: Oracle + ?Sized> Oracle for Box<T> {
    fn evaluate_design(
        &mut self,
        design: &DesignMapping,
        budget: Duration,
    ) -> OracleResult<OracleReport> {
        (**self).evaluate_design(design, budget)
    }

    fn release(&mut self) {
        (**self).release();
    }

    fn preemptible(&self) -> bool {
        (**self).preemptible()
    }
}

/// Adapts a closure into an in-process [`Oracle`].
///
/// # Examples
/// ```
/// use designswarm::ops::{FnOracle, Oracle, OracleReport};
/// use designswarm::{DesignMapping, Metrics};
/// use std::time::Duration;
///
/// let mut oracle = FnOracle::new(|_design: &DesignMapping| {
///     Ok(OracleReport::success(Metrics::new(1.0, 3.0, 1.0, 1.0, 1.0)))
/// });
/// let report = oracle.evaluate_design(&DesignMapping::default(), Duration::from_secs(1)).unwrap();
/// assert_eq!(report.metrics().safety, 3.0);
/// ```
pub struct FnOracle<F> {
    function: F,
}

impl<F> FnOracle<F>
where
    F: FnMut(&DesignMapping) -> OracleResult<OracleReport>,
{
    /// Wraps `function`.
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> Oracle for FnOracle<F>
where
    F: FnMut(&DesignMapping) -> OracleResult<OracleReport>,
{
    fn evaluate_design(
        &mut self,
        design: &DesignMapping,
        _budget: Duration,
    ) -> OracleResult<OracleReport> {
        (self.function)(design)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_parses_with_capitalised_status() {
        let report: OracleReport = serde_json::from_str(
            r#"{"status":"Success","cost":100,"safety":2.5,"co2":50,"comfort":8,"constructability":9}"#,
        )
        .unwrap();
        assert_eq!(report.status, OracleStatus::Success);
        assert_eq!(report.metrics(), Metrics::new(100.0, 2.5, 50.0, 8.0, 9.0));
    }

    #[test]
    fn failure_report_may_omit_metrics() {
        let report: OracleReport =
            serde_json::from_str(r#"{"status":"failure","message":"mesh failed"}"#).unwrap();
        assert_eq!(report.status, OracleStatus::Failure);
        assert_eq!(report.message.as_deref(), Some("mesh failed"));
        assert!(report.cost.is_nan());
    }

    #[test]
    fn boxed_oracles_forward_calls() {
        let mut oracle: Box<dyn Oracle> = Box::new(FnOracle::new(|design: &DesignMapping| {
            Ok(OracleReport::success(Metrics::new(
                design.len() as f64,
                2.0,
                0.0,
                0.0,
                0.0,
            )))
        }));
        let report = oracle
            .evaluate_design(&DesignMapping::default(), Duration::from_millis(5))
            .unwrap();
        assert_eq!(report.cost, 0.0);
        assert!(!oracle.preemptible());
    }
}
