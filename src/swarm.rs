//! Particle-swarm optimization engine.
//!
//! [`Swarm`] owns the particles, the global best and the seeded random
//! generator of one run. It is configured through [`Swarm::builder`] or
//! [`SwarmBuilder::from_config`] and driven either with [`Swarm::run`] or
//! step by step with [`Swarm::initialize`], [`Swarm::step`] and
//! [`Swarm::terminate`]. Particles are evaluated one at a time in index
//! order, so a run is reproducible under a fixed seed.

use crate::core::experiment::{finite_mean_std, swarm_diversity_by, IterationStats, RunHistory};
use crate::core::particle::{Metrics, Particle};
use crate::core::presets::RangePreset;
use crate::core::{ConfigurationError, DesignMapping, DesignSpace, VariableDescriptor};
use crate::evaluation::{
    AdapterStats, EvaluationAdapter, EvaluationResult, DEFAULT_EVALUATION_BUDGET,
};
use crate::ops::{FitnessPolicy, FitnessRegistry, Oracle};
use crate::telemetry::{
    now_rfc3339, CompletionMarker, GbestRow, ParticleSummary, RunPhase, StatusSnapshot,
    TelemetryError, TelemetryRecorder, TrajectoryRow, DEFAULT_SNAPSHOT_INTERVAL,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const DEFAULT_PARTICLES: usize = 15;
const DEFAULT_ITERATIONS: usize = 20;
const DEFAULT_INERTIA: f64 = 0.7;
const DEFAULT_COGNITIVE: f64 = 1.5;
const DEFAULT_SOCIAL: f64 = 1.5;
const DEFAULT_VELOCITY_LIMIT: f64 = 0.2;
const DEFAULT_SEED: u64 = 123;
const DEFAULT_FITNESS_POLICY: &str = "economic_with_safety_penalty";

/// Lifecycle of a [`Swarm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmState {
    /// Built but not yet evaluated.
    Uninitialized,
    /// Iteration 0 has been evaluated.
    Initialized,
    /// The given iteration was the last one completed.
    Iterating(usize),
    /// The completion marker has been written.
    Terminated,
}

impl Display for SwarmState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Initialized => f.write_str("initialized"),
            Self::Iterating(iteration) => write!(f, "at iteration {iteration}"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// The run was misconfigured. Raised before any evaluation.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The telemetry directory could not be prepared.
    #[error("failed to prepare telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    /// An operation was called in the wrong lifecycle state.
    #[error("cannot {operation} a swarm that is {state}")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// State at the time of the call.
        state: SwarmState,
    },
}

/// PSO hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwarmParameters {
    /// Number of particles.
    pub particles: usize,
    /// Total iterations, counting the initial evaluation as iteration 0.
    pub iterations: usize,
    /// Inertia weight `W`.
    pub inertia: f64,
    /// Cognitive coefficient `C1`.
    pub cognitive: f64,
    /// Social coefficient `C2`.
    pub social: f64,
    /// Velocity clamp as a fraction of each variable's range.
    pub velocity_limit: f64,
    /// Seed of the run's random generator.
    pub seed: u64,
}

impl Default for SwarmParameters {
    fn default() -> Self {
        Self {
            particles: DEFAULT_PARTICLES,
            iterations: DEFAULT_ITERATIONS,
            inertia: DEFAULT_INERTIA,
            cognitive: DEFAULT_COGNITIVE,
            social: DEFAULT_SOCIAL,
            velocity_limit: DEFAULT_VELOCITY_LIMIT,
            seed: DEFAULT_SEED,
        }
    }
}

impl SwarmParameters {
    /// Checks every hyper-parameter against its domain.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::InvalidParameter`] for the first
    /// offending value.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, count) in [("particles", self.particles), ("iterations", self.iterations)] {
            if count == 0 {
                return Err(ConfigurationError::InvalidParameter {
                    name,
                    requirement: "at least 1",
                    value: 0.0,
                });
            }
        }
        for (name, value) in [
            ("inertia", self.inertia),
            ("cognitive", self.cognitive),
            ("social", self.social),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidParameter {
                    name,
                    requirement: "finite and non-negative",
                    value,
                });
            }
        }
        if !self.velocity_limit.is_finite() || self.velocity_limit <= 0.0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "velocity_limit",
                requirement: "finite and positive",
                value: self.velocity_limit,
            });
        }
        Ok(())
    }
}

/// Serializable run configuration.
///
/// Missing fields take their defaults, so `{}` is a valid document.
///
/// # Examples
/// ```
/// use designswarm::SwarmConfig;
///
/// let json = r#"{"particles": 4, "range_preset": "lock_columns_500mm"}"#;
/// let config = SwarmConfig::from_json_str(json).unwrap();
/// assert_eq!(config.particles, 4);
/// assert_eq!(config.iterations, 20);
/// let space = config.design_space().unwrap();
/// let bc = &space.descriptors()[space.position_of("bc").unwrap()];
/// assert_eq!((bc.lower, bc.upper), (500.0, 500.0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Number of particles.
    pub particles: usize,
    /// Total iterations including iteration 0.
    pub iterations: usize,
    /// Inertia weight `W`.
    pub inertia: f64,
    /// Cognitive coefficient `C1`.
    pub cognitive: f64,
    /// Social coefficient `C2`.
    pub social: f64,
    /// Velocity clamp fraction `V_MAX`.
    pub velocity_limit: f64,
    /// Random seed.
    pub seed: u64,
    /// Per-evaluation wall-clock budget in seconds.
    pub evaluation_budget_secs: f64,
    /// Registry name of the fitness policy.
    pub fitness_policy: String,
    /// Design variables; the building design space when absent.
    pub variables: Option<Vec<VariableDescriptor>>,
    /// Built-in range preset applied on top of the variables.
    pub range_preset: Option<String>,
    /// Directory receiving telemetry artifacts.
    pub output_dir: Option<PathBuf>,
    /// Minimum seconds between status snapshot writes.
    pub snapshot_interval_secs: f64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        let parameters = SwarmParameters::default();
        Self {
            particles: parameters.particles,
            iterations: parameters.iterations,
            inertia: parameters.inertia,
            cognitive: parameters.cognitive,
            social: parameters.social,
            velocity_limit: parameters.velocity_limit,
            seed: parameters.seed,
            evaluation_budget_secs: DEFAULT_EVALUATION_BUDGET.as_secs_f64(),
            fitness_policy: DEFAULT_FITNESS_POLICY.to_owned(),
            variables: None,
            range_preset: None,
            output_dir: None,
            snapshot_interval_secs: DEFAULT_SNAPSHOT_INTERVAL.as_secs_f64(),
        }
    }
}

impl SwarmConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::Parse`] on malformed input.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::Io`] or [`ConfigurationError::Parse`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// PSO hyper-parameters of this configuration.
    #[must_use]
    pub fn parameters(&self) -> SwarmParameters {
        SwarmParameters {
            particles: self.particles,
            iterations: self.iterations,
            inertia: self.inertia,
            cognitive: self.cognitive,
            social: self.social,
            velocity_limit: self.velocity_limit,
            seed: self.seed,
        }
    }

    /// Resolves the variables and range preset into a design space.
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] for invalid descriptors or an unknown
    /// preset.
    pub fn design_space(&self) -> Result<DesignSpace, ConfigurationError> {
        let base = match &self.variables {
            Some(variables) => DesignSpace::new(variables.clone())?,
            None => DesignSpace::building(),
        };
        match &self.range_preset {
            Some(name) => RangePreset::builtin(name)?.apply(&base),
            None => Ok(base),
        }
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigurationError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigurationError::InvalidParameter {
        name,
        requirement: "a finite non-negative number of seconds",
        value,
    })
}

/// Builder returned by [`Swarm::builder`].
pub struct SwarmBuilder<O> {
    oracle: O,
    parameters: SwarmParameters,
    space: DesignSpace,
    registry: FitnessRegistry,
    policy: String,
    budget: Duration,
    telemetry_dir: Option<PathBuf>,
    snapshot_interval: Duration,
}

impl<O: Oracle> SwarmBuilder<O> {
    /// Builder pre-populated from a configuration document.
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] when the design space, preset or a
    /// duration cannot be resolved.
    pub fn from_config(oracle: O, config: &SwarmConfig) -> Result<Self, ConfigurationError> {
        let mut builder = Swarm::builder(oracle)
            .parameters(config.parameters())
            .design_space(config.design_space()?)
            .fitness_policy(config.fitness_policy.clone())
            .evaluation_budget(seconds(
                "evaluation_budget_secs",
                config.evaluation_budget_secs,
            )?)
            .snapshot_interval(seconds(
                "snapshot_interval_secs",
                config.snapshot_interval_secs,
            )?);
        if let Some(dir) = &config.output_dir {
            builder = builder.telemetry_dir(dir);
        }
        Ok(builder)
    }

    /// Replaces every hyper-parameter at once.
    #[must_use]
    pub fn parameters(mut self, parameters: SwarmParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Number of particles.
    #[must_use]
    pub fn particles(mut self, count: usize) -> Self {
        self.parameters.particles = count;
        self
    }

    /// Total iterations, iteration 0 included.
    #[must_use]
    pub fn iterations(mut self, count: usize) -> Self {
        self.parameters.iterations = count;
        self
    }

    /// Inertia weight `W`.
    #[must_use]
    pub fn inertia(mut self, value: f64) -> Self {
        self.parameters.inertia = value;
        self
    }

    /// Cognitive coefficient `C1`.
    #[must_use]
    pub fn cognitive(mut self, value: f64) -> Self {
        self.parameters.cognitive = value;
        self
    }

    /// Social coefficient `C2`.
    #[must_use]
    pub fn social(mut self, value: f64) -> Self {
        self.parameters.social = value;
        self
    }

    /// Velocity clamp fraction `V_MAX`.
    #[must_use]
    pub fn velocity_limit(mut self, fraction: f64) -> Self {
        self.parameters.velocity_limit = fraction;
        self
    }

    /// Random seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.parameters.seed = seed;
        self
    }

    /// Design space to search.
    #[must_use]
    pub fn design_space(mut self, space: DesignSpace) -> Self {
        self.space = space;
        self
    }

    /// Registry the fitness policy is resolved from.
    #[must_use]
    pub fn registry(mut self, registry: FitnessRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Name of the fitness policy, resolved during [`Self::build`].
    #[must_use]
    pub fn fitness_policy(mut self, name: impl Into<String>) -> Self {
        self.policy = name.into();
        self
    }

    /// Per-evaluation wall-clock budget.
    #[must_use]
    pub fn evaluation_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Writes telemetry into `dir`.
    #[must_use]
    pub fn telemetry_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.telemetry_dir = Some(dir.into());
        self
    }

    /// Minimum spacing between rate-limited status snapshots.
    #[must_use]
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Validates the configuration and creates the telemetry directory.
    ///
    /// # Errors
    /// Returns [`SwarmError::Configuration`] for invalid settings and
    /// [`SwarmError::Telemetry`] when the output directory cannot be
    /// prepared. No evaluation has happened when this fails.
    pub fn build(self) -> Result<Swarm<O>, SwarmError> {
        self.parameters.validate()?;
        if self.budget.is_zero() {
            return Err(ConfigurationError::InvalidParameter {
                name: "evaluation_budget",
                requirement: "positive",
                value: 0.0,
            }
            .into());
        }
        let policy = self.registry.get(&self.policy)?;
        let telemetry = match &self.telemetry_dir {
            Some(dir) => Some(
                TelemetryRecorder::create(dir, &self.space)?
                    .with_snapshot_interval(self.snapshot_interval),
            ),
            None => None,
        };
        Ok(Swarm {
            adapter: EvaluationAdapter::new(self.oracle, self.budget),
            rng: StdRng::seed_from_u64(self.parameters.seed),
            parameters: self.parameters,
            space: self.space,
            policy,
            particles: Vec::new(),
            gbest_position: Vec::new(),
            gbest_fitness: f64::INFINITY,
            gbest_metrics: Metrics::failure_sentinel(),
            state: SwarmState::Uninitialized,
            history: RunHistory::new(),
            telemetry,
            telemetry_failures: 0,
            started: None,
            finished: None,
        })
    }
}

/// Outcome of a terminated run.
#[derive(Debug, Clone)]
pub struct SwarmReport {
    /// Raw global best position.
    pub best_position: Vec<f64>,
    /// Decoded global best position.
    pub best_design: DesignMapping,
    /// Global best fitness, `+∞` when no evaluation succeeded.
    pub best_fitness: f64,
    /// Metrics of the global best, the failure sentinel when none exists.
    pub best_metrics: Metrics,
    /// Iterations executed, iteration 0 included.
    pub iterations: usize,
    /// Per-iteration statistics.
    pub history: RunHistory,
    /// Oracle calls made.
    pub evaluations: usize,
    /// Oracle calls that failed.
    pub failed_evaluations: usize,
    /// Telemetry writes that failed.
    pub telemetry_failures: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// A particle swarm bound to one oracle.
///
/// # Examples
/// ```
/// use designswarm::ops::{FnOracle, OracleReport};
/// use designswarm::{DesignMapping, DesignSpace, Metrics, Swarm, VariableDescriptor};
///
/// let space = DesignSpace::new(vec![VariableDescriptor::continuous("Lx", 8.0, 12.0)]).unwrap();
/// let oracle = FnOracle::new(|design: &DesignMapping| {
///     let lx = design.get("Lx").map_or(0.0, |value| value.as_f64());
///     Ok(OracleReport::success(Metrics::new(lx * 1000.0, 2.5, 50.0, 8.0, 9.0)))
/// });
/// let mut swarm = Swarm::builder(oracle)
///     .design_space(space)
///     .particles(5)
///     .iterations(4)
///     .seed(7)
///     .build()
///     .unwrap();
/// let report = swarm.run().unwrap();
/// assert_eq!(report.iterations, 4);
/// assert!(report.best_fitness >= 8000.0 && report.best_fitness <= 12000.0);
/// ```
pub struct Swarm<O> {
    adapter: EvaluationAdapter<O>,
    rng: StdRng,
    parameters: SwarmParameters,
    space: DesignSpace,
    policy: FitnessPolicy,
    particles: Vec<Particle>,
    gbest_position: Vec<f64>,
    gbest_fitness: f64,
    gbest_metrics: Metrics,
    state: SwarmState,
    history: RunHistory,
    telemetry: Option<TelemetryRecorder>,
    telemetry_failures: usize,
    started: Option<Instant>,
    finished: Option<Duration>,
}

impl<O: Oracle> Swarm<O> {
    /// Starts a builder with the building design space and default
    /// hyper-parameters.
    pub fn builder(oracle: O) -> SwarmBuilder<O> {
        SwarmBuilder {
            oracle,
            parameters: SwarmParameters::default(),
            space: DesignSpace::building(),
            registry: FitnessRegistry::builtin(),
            policy: DEFAULT_FITNESS_POLICY.to_owned(),
            budget: DEFAULT_EVALUATION_BUDGET,
            telemetry_dir: None,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SwarmState {
        self.state
    }

    /// Particles in index order.
    #[must_use]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Global best position.
    #[must_use]
    pub fn gbest_position(&self) -> &[f64] {
        &self.gbest_position
    }

    /// Global best fitness.
    #[must_use]
    pub fn gbest_fitness(&self) -> f64 {
        self.gbest_fitness
    }

    /// Metrics of the evaluation that set the global best.
    #[must_use]
    pub fn gbest_metrics(&self) -> &Metrics {
        &self.gbest_metrics
    }

    /// Searched design space.
    #[must_use]
    pub fn design_space(&self) -> &DesignSpace {
        &self.space
    }

    /// Validated hyper-parameters.
    #[must_use]
    pub fn parameters(&self) -> &SwarmParameters {
        &self.parameters
    }

    /// Active fitness policy.
    #[must_use]
    pub fn fitness_policy(&self) -> FitnessPolicy {
        self.policy
    }

    /// Statistics of the completed iterations.
    #[must_use]
    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Adapter counters.
    #[must_use]
    pub fn evaluation_stats(&self) -> AdapterStats {
        self.adapter.stats()
    }

    /// Telemetry writes that failed so far.
    #[must_use]
    pub fn telemetry_failures(&self) -> usize {
        self.telemetry_failures
    }

    /// The wrapped oracle.
    pub fn oracle(&self) -> &O {
        self.adapter.oracle()
    }

    /// Wall-clock time since [`Self::initialize`], frozen at termination.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.finished
            .or_else(|| self.started.map(|started| started.elapsed()))
            .unwrap_or_default()
    }

    /// Samples the particles and evaluates each once as iteration 0.
    ///
    /// # Errors
    /// Returns [`SwarmError::InvalidState`] unless the swarm is
    /// uninitialized.
    pub fn initialize(&mut self) -> Result<IterationStats, SwarmError> {
        if self.state != SwarmState::Uninitialized {
            return Err(self.invalid_state("initialize"));
        }
        self.started = Some(Instant::now());
        if let Some(recorder) = self.telemetry.as_mut() {
            let snapshot =
                StatusSnapshot::initializing(self.parameters.iterations, self.parameters.particles);
            note(
                &mut self.telemetry_failures,
                "status snapshot",
                recorder.force_status_snapshot(&snapshot),
            );
        }
        self.write_settings();

        let mut particles = Vec::with_capacity(self.parameters.particles);
        for _ in 0..self.parameters.particles {
            particles.push(Particle::initialize(&self.space, &mut self.rng));
        }
        self.particles = particles;
        self.gbest_position = self.particles[0].position().to_vec();

        let failures_before = self.adapter.stats().failures;
        for idx in 0..self.particles.len() {
            self.evaluate_particle(0, idx, RunPhase::Initializing)?;
        }
        let stats = self.finish_iteration(0, failures_before)?;
        self.state = SwarmState::Initialized;
        Ok(stats)
    }

    /// Runs the next iteration, or returns `None` once every configured
    /// iteration has executed.
    ///
    /// # Errors
    /// Returns [`SwarmError::InvalidState`] before [`Self::initialize`] or
    /// after [`Self::terminate`].
    pub fn step(&mut self) -> Result<Option<IterationStats>, SwarmError> {
        let iteration = match self.state {
            SwarmState::Initialized => 1,
            SwarmState::Iterating(last) => last + 1,
            SwarmState::Uninitialized | SwarmState::Terminated => {
                return Err(self.invalid_state("step"))
            }
        };
        if iteration >= self.parameters.iterations {
            return Ok(None);
        }
        let failures_before = self.adapter.stats().failures;
        for idx in 0..self.particles.len() {
            self.move_particle(idx);
            self.evaluate_particle(iteration, idx, RunPhase::Running)?;
        }
        let stats = self.finish_iteration(iteration, failures_before)?;
        self.state = SwarmState::Iterating(iteration);
        Ok(Some(stats))
    }

    /// Writes the final snapshot and the completion marker.
    ///
    /// May be called before the last iteration to stop early.
    ///
    /// # Errors
    /// Returns [`SwarmError::InvalidState`] before [`Self::initialize`] or
    /// on a second call.
    pub fn terminate(&mut self) -> Result<SwarmReport, SwarmError> {
        let last = match self.state {
            SwarmState::Initialized => 0,
            SwarmState::Iterating(last) => last,
            SwarmState::Uninitialized | SwarmState::Terminated => {
                return Err(self.invalid_state("terminate"))
            }
        };
        let best_design = self.space.decode(&self.gbest_position)?;
        let elapsed = self.elapsed();
        self.finished = Some(elapsed);
        self.write_snapshot(RunPhase::Finished, last, true);
        if let Some(recorder) = self.telemetry.as_mut() {
            let marker =
                CompletionMarker::new(self.gbest_fitness, elapsed, self.history.iterations());
            note(
                &mut self.telemetry_failures,
                "completion marker",
                recorder.write_completion_marker(&marker),
            );
        }
        self.state = SwarmState::Terminated;

        let stats = self.adapter.stats();
        info!(
            gbest_fitness = self.gbest_fitness,
            iterations = self.history.iterations(),
            evaluations = stats.evaluations,
            failures = stats.failures,
            elapsed_s = elapsed.as_secs_f64(),
            "swarm terminated"
        );
        Ok(SwarmReport {
            best_position: self.gbest_position.clone(),
            best_design,
            best_fitness: self.gbest_fitness,
            best_metrics: self.gbest_metrics,
            iterations: self.history.iterations(),
            history: self.history.clone(),
            evaluations: stats.evaluations,
            failed_evaluations: stats.failures,
            telemetry_failures: self.telemetry_failures,
            elapsed,
        })
    }

    /// Runs every remaining phase and returns the report.
    ///
    /// # Errors
    /// Returns [`SwarmError::InvalidState`] on a terminated swarm.
    pub fn run(&mut self) -> Result<SwarmReport, SwarmError> {
        if self.state == SwarmState::Uninitialized {
            self.initialize()?;
        }
        while self.step()?.is_some() {}
        self.terminate()
    }

    fn invalid_state(&self, operation: &'static str) -> SwarmError {
        SwarmError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn move_particle(&mut self, idx: usize) {
        let dimensions = self.space.len();
        let r1: Vec<f64> = (0..dimensions).map(|_| self.rng.gen::<f64>()).collect();
        let r2: Vec<f64> = (0..dimensions).map(|_| self.rng.gen::<f64>()).collect();
        let SwarmParameters {
            inertia,
            cognitive,
            social,
            velocity_limit,
            ..
        } = self.parameters;
        let lower = self.space.lower_bounds();
        let upper = self.space.upper_bounds();
        let (position, velocity, pbest) = self.particles[idx].kinematics_mut();
        for d in 0..dimensions {
            let limit = velocity_limit * (upper[d] - lower[d]);
            let updated = inertia * velocity[d]
                + cognitive * r1[d] * (pbest[d] - position[d])
                + social * r2[d] * (self.gbest_position[d] - position[d]);
            velocity[d] = updated.clamp(-limit, limit);
        }
        for (x, v) in position.iter_mut().zip(velocity.iter()) {
            *x += v;
        }
        reflect_into_bounds(position, velocity, lower, upper);
    }

    fn evaluate_particle(
        &mut self,
        iteration: usize,
        idx: usize,
        phase: RunPhase,
    ) -> Result<(), SwarmError> {
        let design = self.space.decode(self.particles[idx].position())?;
        let result = self.adapter.evaluate(&design);
        let particle = &mut self.particles[idx];
        match result {
            EvaluationResult::Success(metrics) => {
                let mut fitness = self.policy.evaluate(&metrics);
                if fitness.is_nan() {
                    warn!(
                        policy = self.policy.name(),
                        particle = idx + 1,
                        "fitness policy produced NaN; scoring as +inf"
                    );
                    fitness = f64::INFINITY;
                }
                particle.record_evaluation(fitness, metrics);
            }
            EvaluationResult::Failure(_) => particle.record_failure(),
        }
        debug!(
            iteration,
            particle = idx + 1,
            fitness = particle.fitness(),
            pbest_fitness = particle.pbest_fitness(),
            "particle evaluated"
        );
        if particle.fitness() < self.gbest_fitness {
            self.gbest_fitness = particle.fitness();
            self.gbest_metrics = *particle.metrics();
            self.gbest_position.clear();
            self.gbest_position.extend_from_slice(particle.position());
        }

        if let Some(recorder) = self.telemetry.as_mut() {
            let particle = &self.particles[idx];
            let pbest_design = self.space.decode(particle.pbest_position())?;
            let written = recorder
                .append_particle_row(&TrajectoryRow {
                    iteration,
                    particle: idx + 1,
                    fitness: particle.fitness(),
                    metrics: particle.metrics(),
                    design: &design,
                })
                .and_then(|()| {
                    recorder.append_pbest_row(&TrajectoryRow {
                        iteration,
                        particle: idx + 1,
                        fitness: particle.pbest_fitness(),
                        metrics: particle.pbest_metrics(),
                        design: &pbest_design,
                    })
                });
            note(&mut self.telemetry_failures, "particle logs", written);
        }
        self.write_snapshot(phase, iteration, false);
        Ok(())
    }

    fn finish_iteration(
        &mut self,
        iteration: usize,
        failures_before: usize,
    ) -> Result<IterationStats, SwarmError> {
        let (pbest_mean, pbest_std) =
            finite_mean_std(self.particles.iter().map(Particle::pbest_fitness));
        let particles = &self.particles;
        let stats = IterationStats {
            iteration,
            gbest_fitness: self.gbest_fitness,
            pbest_mean,
            pbest_std,
            diversity: swarm_diversity_by(particles.len(), move |idx| particles[idx].position()),
            failures: self.adapter.stats().failures - failures_before,
        };

        if let Some(recorder) = self.telemetry.as_mut() {
            let design = self.space.decode(&self.gbest_position)?;
            let row = GbestRow {
                iteration,
                fitness: self.gbest_fitness,
                metrics: &self.gbest_metrics,
                design: &design,
            };
            if let Err(err) = recorder.append_gbest_row(&row) {
                self.telemetry_failures += 1;
                error!(
                    iteration,
                    error = %err,
                    "failed to append global-best history; this record is lost"
                );
            }
        }
        info!(
            iteration,
            gbest_fitness = stats.gbest_fitness,
            pbest_mean = stats.pbest_mean,
            pbest_std = stats.pbest_std,
            failures = stats.failures,
            "iteration complete"
        );
        self.write_snapshot(RunPhase::Running, iteration, false);
        self.history.push(stats.clone());
        Ok(stats)
    }

    fn write_snapshot(&mut self, phase: RunPhase, iteration: usize, force: bool) {
        let due = match &self.telemetry {
            Some(recorder) => force || recorder.snapshot_due(),
            None => false,
        };
        if !due {
            return;
        }
        let snapshot = self.status_snapshot(phase, iteration);
        if let Some(recorder) = self.telemetry.as_mut() {
            let written = if force {
                recorder.force_status_snapshot(&snapshot)
            } else {
                recorder.write_status_snapshot(&snapshot).map(|_| ())
            };
            note(&mut self.telemetry_failures, "status snapshot", written);
        }
    }

    fn status_snapshot(&self, phase: RunPhase, iteration: usize) -> StatusSnapshot {
        StatusSnapshot {
            phase,
            iteration,
            max_iteration: self.parameters.iterations,
            particle_count: self.particles.len(),
            gbest_fitness: self.gbest_fitness,
            best_metrics: self.gbest_fitness.is_finite().then_some(self.gbest_metrics),
            progress_pct: StatusSnapshot::progress(iteration, self.parameters.iterations),
            elapsed_seconds: self.elapsed().as_secs_f64(),
            updated_at: now_rfc3339(),
            particles: self
                .particles
                .iter()
                .map(|particle| ParticleSummary {
                    position: particle.position().to_vec(),
                    fitness: particle.fitness(),
                    safety: particle.metrics().safety,
                    cost: particle.metrics().cost,
                })
                .collect(),
        }
    }

    fn write_settings(&mut self) {
        let Some(recorder) = self.telemetry.as_mut() else {
            return;
        };
        let p = &self.parameters;
        let settings = [
            ("particles", p.particles.to_string()),
            ("iterations", p.iterations.to_string()),
            ("inertia", p.inertia.to_string()),
            ("cognitive", p.cognitive.to_string()),
            ("social", p.social.to_string()),
            ("velocity_limit", p.velocity_limit.to_string()),
            ("seed", p.seed.to_string()),
            (
                "evaluation_budget_secs",
                self.adapter.budget().as_secs_f64().to_string(),
            ),
            ("fitness_policy", self.policy.name().to_owned()),
        ];
        note(
            &mut self.telemetry_failures,
            "settings",
            recorder.write_settings(&settings, &self.space),
        );
    }
}

fn note(failures: &mut usize, artifact: &'static str, written: Result<(), TelemetryError>) {
    if let Err(err) = written {
        *failures += 1;
        warn!(artifact, error = %err, "telemetry write failed; continuing");
    }
}

/// Mirrors out-of-range coordinates back inside `[lower, upper]`, negating
/// the matching velocity component, then clips as a final guarantee.
///
/// # Examples
/// ```
/// use designswarm::reflect_into_bounds;
///
/// let mut position = [-3.0, 13.0, 5.0];
/// let mut velocity = [-4.0, 2.0, 1.0];
/// reflect_into_bounds(&mut position, &mut velocity, &[0.0; 3], &[10.0; 3]);
/// assert_eq!(position, [3.0, 7.0, 5.0]);
/// assert_eq!(velocity, [4.0, -2.0, 1.0]);
/// ```
pub fn reflect_into_bounds(
    position: &mut [f64],
    velocity: &mut [f64],
    lower: &[f64],
    upper: &[f64],
) {
    for (((x, v), &lo), &hi) in position
        .iter_mut()
        .zip(velocity.iter_mut())
        .zip(lower)
        .zip(upper)
    {
        if *x < lo {
            *x = lo + (lo - *x);
            *v = -*v;
        } else if *x > hi {
            *x = hi - (*x - hi);
            *v = -*v;
        }
        *x = x.clamp(lo, hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{FnOracle, OracleError, OracleReport, OracleResult};

    fn lx_space() -> DesignSpace {
        DesignSpace::new(vec![VariableDescriptor::continuous("Lx", 8.0, 12.0)]).unwrap()
    }

    fn distance_oracle(target: f64) -> impl Oracle {
        FnOracle::new(move |design: &DesignMapping| -> OracleResult<OracleReport> {
            let lx = design.get("Lx").map_or(f64::NAN, |value| value.as_f64());
            Ok(OracleReport::success(Metrics::new(
                (lx - target).abs(),
                2.5,
                1.0,
                5.0,
                5.0,
            )))
        })
    }

    #[test]
    fn reflection_flips_and_clips() {
        let mut position = [-3.0, 13.0, -25.0];
        let mut velocity = [-1.0, 1.0, -50.0];
        reflect_into_bounds(&mut position, &mut velocity, &[0.0; 3], &[10.0; 3]);
        assert_eq!(position, [3.0, 7.0, 10.0]);
        assert_eq!(velocity, [1.0, -1.0, 50.0]);
    }

    #[test]
    fn invalid_parameters_are_rejected_at_build() {
        for builder in [
            Swarm::builder(distance_oracle(10.0)).particles(0),
            Swarm::builder(distance_oracle(10.0)).iterations(0),
            Swarm::builder(distance_oracle(10.0)).inertia(f64::NAN),
            Swarm::builder(distance_oracle(10.0)).velocity_limit(0.0),
            Swarm::builder(distance_oracle(10.0)).evaluation_budget(Duration::ZERO),
        ] {
            assert!(matches!(
                builder.build(),
                Err(SwarmError::Configuration(ConfigurationError::InvalidParameter { .. }))
            ));
        }
        let unknown = Swarm::builder(distance_oracle(10.0))
            .fitness_policy("fastest")
            .build();
        assert!(matches!(
            unknown,
            Err(SwarmError::Configuration(ConfigurationError::UnknownFitnessPolicy(_)))
        ));
    }

    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let mut swarm = Swarm::builder(distance_oracle(10.0))
            .design_space(lx_space())
            .particles(2)
            .iterations(2)
            .build()
            .unwrap();
        assert!(matches!(
            swarm.step(),
            Err(SwarmError::InvalidState { operation: "step", state: SwarmState::Uninitialized })
        ));
        assert!(swarm.terminate().is_err());
        swarm.initialize().unwrap();
        assert!(swarm.initialize().is_err());
        assert!(swarm.step().unwrap().is_some());
        assert!(swarm.step().unwrap().is_none());
        assert_eq!(swarm.state(), SwarmState::Iterating(1));
        swarm.terminate().unwrap();
        assert!(matches!(
            swarm.run(),
            Err(SwarmError::InvalidState { state: SwarmState::Terminated, .. })
        ));
    }

    #[test]
    fn initial_gbest_is_first_best_particle() {
        let mut swarm = Swarm::builder(distance_oracle(10.0))
            .design_space(lx_space())
            .particles(6)
            .iterations(1)
            .seed(3)
            .build()
            .unwrap();
        swarm.initialize().unwrap();
        let best = swarm
            .particles()
            .iter()
            .map(Particle::pbest_fitness)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(swarm.gbest_fitness(), best);
        let owner = swarm
            .particles()
            .iter()
            .position(|particle| particle.pbest_fitness() == best)
            .unwrap();
        assert_eq!(swarm.gbest_position(), swarm.particles()[owner].position());
    }

    #[test]
    fn search_improves_towards_the_target() {
        let mut swarm = Swarm::builder(distance_oracle(9.0))
            .design_space(lx_space())
            .particles(8)
            .iterations(25)
            .seed(11)
            .build()
            .unwrap();
        let report = swarm.run().unwrap();
        assert_eq!(report.history.iterations(), 25);
        assert!(report.best_fitness < 0.1);
        let series: Vec<f64> = report.history.gbest_series().collect();
        assert!(series.windows(2).all(|pair| pair[1] <= pair[0]));
    }

    #[test]
    fn failures_score_infinity_and_keep_running() {
        let mut calls = 0usize;
        let oracle = FnOracle::new(move |_: &DesignMapping| {
            calls += 1;
            if calls % 2 == 0 {
                Err(OracleError::Failed("mesh".to_owned()))
            } else {
                Ok(OracleReport::success(Metrics::new(50.0, 2.5, 1.0, 1.0, 1.0)))
            }
        });
        let mut swarm = Swarm::builder(oracle)
            .design_space(lx_space())
            .particles(4)
            .iterations(3)
            .build()
            .unwrap();
        let report = swarm.run().unwrap();
        assert_eq!(report.evaluations, 12);
        assert_eq!(report.failed_evaluations, 6);
        assert_eq!(report.best_fitness, 50.0);
        assert_eq!(report.history.records()[0].failures, 2);
    }

    #[test]
    fn same_seed_same_trajectory() {
        let trajectory = |seed| {
            let mut swarm = Swarm::builder(distance_oracle(11.0))
                .design_space(DesignSpace::building())
                .particles(3)
                .iterations(4)
                .seed(seed)
                .build()
                .unwrap();
            swarm.run().unwrap();
            swarm
                .particles()
                .iter()
                .map(|particle| particle.position().to_vec())
                .collect::<Vec<_>>()
        };
        assert_eq!(trajectory(5), trajectory(5));
        assert_ne!(trajectory(5), trajectory(6));
    }

    #[test]
    fn config_defaults_match_the_reference_run() {
        let config = SwarmConfig::from_json_str("{}").unwrap();
        assert_eq!(config.parameters(), SwarmParameters::default());
        assert_eq!(config.fitness_policy, "economic_with_safety_penalty");
        assert_eq!(config.design_space().unwrap().len(), 20);
        let negative = SwarmConfig {
            evaluation_budget_secs: -1.0,
            ..SwarmConfig::default()
        };
        assert!(SwarmBuilder::from_config(distance_oracle(1.0), &negative).is_err());
    }
}
