//! Per-iteration statistics captured while the swarm runs.
//!
//! These types are plain data so hosts can log or serialize them without
//! touching the engine.

use serde::{Deserialize, Serialize};

/// Summary of one completed iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStats {
    /// Iteration index, `0` being the initial evaluation.
    pub iteration: usize,
    /// Global best fitness after this iteration.
    pub gbest_fitness: f64,
    /// Mean of the finite personal-best fitness values.
    pub pbest_mean: f64,
    /// Population standard deviation of the finite personal-best values.
    pub pbest_std: f64,
    /// Root-mean-square spread of particle positions around their centroid.
    pub diversity: f64,
    /// Number of failed oracle calls during this iteration.
    pub failures: usize,
}

/// Time series of [`IterationStats`].
///
/// # Examples
/// ```
/// use designswarm::RunHistory;
/// let history = RunHistory::new();
/// assert_eq!(history.iterations(), 0);
/// assert!(history.best_fitness().is_infinite());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    records: Vec<IterationStats>,
}

impl RunHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one iteration.
    pub fn push(&mut self, stats: IterationStats) {
        self.records.push(stats);
    }

    /// Number of recorded iterations.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.records.len()
    }

    /// All records in iteration order.
    #[must_use]
    pub fn records(&self) -> &[IterationStats] {
        &self.records
    }

    /// Global best fitness after the latest iteration.
    #[must_use]
    pub fn best_fitness(&self) -> f64 {
        self.records
            .last()
            .map_or(f64::INFINITY, |stats| stats.gbest_fitness)
    }

    /// Global best fitness per iteration.
    pub fn gbest_series(&self) -> impl Iterator<Item = f64> + '_ {
        self.records.iter().map(|stats| stats.gbest_fitness)
    }
}

/// Mean and population standard deviation of the finite values.
///
/// Returns `(+∞, 0)` when no value is finite.
#[must_use]
pub fn finite_mean_std(values: impl IntoIterator<Item = f64>) -> (f64, f64) {
    let finite: Vec<f64> = values.into_iter().filter(|value| value.is_finite()).collect();
    if finite.is_empty() {
        return (f64::INFINITY, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let count = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / count;
    if finite.len() == 1 {
        return (mean, 0.0);
    }
    let variance = finite
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / count;
    (mean, variance.sqrt())
}

pub(crate) fn swarm_diversity_by<'a, F>(size: usize, mut at: F) -> f64
where
    F: FnMut(usize) -> &'a [f64],
{
    if size == 0 {
        return 0.0;
    }
    let dimensions = at(0).len();
    if dimensions == 0 {
        return 0.0;
    }
    let mut means = vec![0.0; dimensions];
    #[allow(clippy::cast_precision_loss)]
    let swarm_size = size as f64;
    for idx in 0..size {
        for (dimension, value) in at(idx).iter().enumerate() {
            means[dimension] += *value;
        }
    }
    for mean in &mut means {
        *mean /= swarm_size;
    }
    let mut total_variance = 0.0;
    for idx in 0..size {
        for (dimension, value) in at(idx).iter().enumerate() {
            let diff = value - means[dimension];
            total_variance += (diff * diff) / swarm_size;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    {
        (total_variance / dimensions as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_ignore_infinite_values() {
        let (mean, std) = finite_mean_std([1.0, 3.0, f64::INFINITY]);
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);
    }

    #[test]
    fn statistics_of_all_failures() {
        let (mean, std) = finite_mean_std([f64::INFINITY, f64::INFINITY]);
        assert!(mean.is_infinite());
        assert_eq!(std, 0.0);
    }

    #[test]
    fn diversity_of_identical_positions_is_zero() {
        let positions = vec![vec![1.0, 2.0]; 4];
        assert_eq!(swarm_diversity_by(positions.len(), |idx| &positions[idx]), 0.0);
        let spread = vec![vec![0.0], vec![2.0]];
        assert_eq!(swarm_diversity_by(spread.len(), |idx| &spread[idx]), 1.0);
    }
}
