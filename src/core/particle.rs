//! Particle state and personal-best bookkeeping.

use crate::core::DesignSpace;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Half-width of the initial velocity interval as a fraction of each range.
pub const INITIAL_VELOCITY_FRACTION: f64 = 0.1;

/// Performance metrics reported by the oracle for one design.
///
/// # Examples
/// ```
/// use designswarm::Metrics;
/// let sentinel = Metrics::failure_sentinel();
/// assert!(sentinel.cost.is_infinite());
/// assert_eq!(sentinel.safety, 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Construction cost per floor area.
    pub cost: f64,
    /// Overall structural safety factor.
    pub safety: f64,
    /// Embodied CO2 per floor area.
    pub co2: f64,
    /// Comfort score, higher is better.
    pub comfort: f64,
    /// Constructability score, higher is better.
    pub constructability: f64,
}

impl Metrics {
    /// Creates a metric tuple.
    #[must_use]
    pub fn new(cost: f64, safety: f64, co2: f64, comfort: f64, constructability: f64) -> Self {
        Self {
            cost,
            safety,
            co2,
            comfort,
            constructability,
        }
    }

    /// Worst-case values assigned when an evaluation fails.
    #[must_use]
    pub fn failure_sentinel() -> Self {
        Self {
            cost: f64::INFINITY,
            safety: 0.0,
            co2: f64::INFINITY,
            comfort: 0.0,
            constructability: 0.0,
        }
    }

    /// Whether every metric is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        [
            self.cost,
            self.safety,
            self.co2,
            self.comfort,
            self.constructability,
        ]
        .iter()
        .all(|value| value.is_finite())
    }
}

/// One candidate solution moving through the design space.
///
/// `pbest_fitness` only ever decreases: [`Particle::record_evaluation`]
/// replaces the personal best on strict improvement, so the oldest position
/// reaching a given fitness keeps ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    position: Vec<f64>,
    velocity: Vec<f64>,
    pbest_position: Vec<f64>,
    pbest_fitness: f64,
    pbest_metrics: Metrics,
    fitness: f64,
    metrics: Metrics,
}

impl Particle {
    /// Samples a particle uniformly inside `space`.
    ///
    /// Positions are drawn from `[lower, upper]` and velocities from
    /// `±0.1·(upper - lower)`, one dimension at a time.
    ///
    /// # Examples
    /// ```
    /// use designswarm::{DesignSpace, Particle};
    /// use rand::SeedableRng;
    ///
    /// let space = DesignSpace::building();
    /// let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    /// let particle = Particle::initialize(&space, &mut rng);
    /// assert!(space.contains(particle.position()));
    /// assert!(particle.pbest_fitness().is_infinite());
    /// ```
    pub fn initialize(space: &DesignSpace, rng: &mut impl Rng) -> Self {
        let mut position = Vec::with_capacity(space.len());
        for (&lower, &upper) in space.lower_bounds().iter().zip(space.upper_bounds()) {
            let sampler = Uniform::new_inclusive(lower, upper);
            position.push(sampler.sample(rng).clamp(lower, upper));
        }
        let mut velocity = Vec::with_capacity(space.len());
        for (&lower, &upper) in space.lower_bounds().iter().zip(space.upper_bounds()) {
            let limit = INITIAL_VELOCITY_FRACTION * (upper - lower);
            velocity.push(Uniform::new_inclusive(-limit, limit).sample(rng));
        }
        Self::from_parts(position, velocity)
    }

    /// Creates an unevaluated particle at an explicit position.
    #[must_use]
    pub fn from_parts(position: Vec<f64>, velocity: Vec<f64>) -> Self {
        Self {
            pbest_position: position.clone(),
            position,
            velocity,
            pbest_fitness: f64::INFINITY,
            pbest_metrics: Metrics::failure_sentinel(),
            fitness: f64::INFINITY,
            metrics: Metrics::failure_sentinel(),
        }
    }

    /// Stores the latest evaluation and updates the personal best on strict
    /// improvement. Returns whether the personal best changed.
    pub fn record_evaluation(&mut self, fitness: f64, metrics: Metrics) -> bool {
        self.fitness = fitness;
        self.metrics = metrics;
        if fitness < self.pbest_fitness {
            self.pbest_fitness = fitness;
            self.pbest_metrics = metrics;
            self.pbest_position.clone_from(&self.position);
            return true;
        }
        false
    }

    /// Marks the latest evaluation as failed.
    pub fn record_failure(&mut self) {
        self.fitness = f64::INFINITY;
        self.metrics = Metrics::failure_sentinel();
    }

    /// Current position.
    #[must_use]
    pub fn position(&self) -> &[f64] {
        &self.position
    }

    /// Current velocity.
    #[must_use]
    pub fn velocity(&self) -> &[f64] {
        &self.velocity
    }

    /// Best position this particle has evaluated.
    #[must_use]
    pub fn pbest_position(&self) -> &[f64] {
        &self.pbest_position
    }

    /// Fitness of [`Self::pbest_position`].
    #[must_use]
    pub fn pbest_fitness(&self) -> f64 {
        self.pbest_fitness
    }

    /// Metrics that produced [`Self::pbest_fitness`].
    #[must_use]
    pub fn pbest_metrics(&self) -> &Metrics {
        &self.pbest_metrics
    }

    /// Fitness of the latest evaluation.
    #[must_use]
    pub fn fitness(&self) -> f64 {
        self.fitness
    }

    /// Metrics of the latest evaluation.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn kinematics_mut(&mut self) -> (&mut [f64], &mut [f64], &[f64]) {
        (&mut self.position, &mut self.velocity, &self.pbest_position)
    }
}
