//! Scalar fitness policies and the registry that names them.
//!
//! A policy is a plain `fn` pointer over [`Metrics`], so every policy is pure
//! by construction. Lower fitness is better. Each built-in policy penalises a
//! safety factor below [`SAFETY_THRESHOLD`] strongly enough that infeasible
//! designs rank behind feasible ones.

use crate::core::particle::Metrics;
use crate::core::ConfigurationError;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};

/// Minimum acceptable structural safety factor.
pub const SAFETY_THRESHOLD: f64 = 2.0;
/// Reference cost used to normalise costs.
pub const COST_BASE: f64 = 350_000.0;
/// Reference CO2 used to normalise emissions.
pub const CO2_BASE: f64 = 500.0;
/// Full-scale value of the comfort and constructability scores.
pub const SCORE_BASE: f64 = 10.0;

/// Signature shared by all fitness policies.
pub type FitnessFn = fn(&Metrics) -> f64;

/// A named fitness function.
#[derive(Clone, Copy)]
pub struct FitnessPolicy {
    name: &'static str,
    function: FitnessFn,
}

impl FitnessPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(name: &'static str, function: FitnessFn) -> Self {
        Self { name, function }
    }

    /// Registry name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Scores `metrics`.
    ///
    /// # Examples
    /// ```
    /// use designswarm::ops::FitnessRegistry;
    /// use designswarm::Metrics;
    ///
    /// let policy = FitnessRegistry::builtin().get("economic_with_safety_penalty").unwrap();
    /// let fitness = policy.evaluate(&Metrics::new(100.0, 1.0, 50.0, 8.0, 9.0));
    /// assert_eq!(fitness, 100_100.0);
    /// ```
    #[must_use]
    pub fn evaluate(&self, metrics: &Metrics) -> f64 {
        (self.function)(metrics)
    }
}

impl Debug for FitnessPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FitnessPolicy")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Policies available for selection by name.
#[derive(Debug, Clone)]
pub struct FitnessRegistry {
    policies: BTreeMap<&'static str, FitnessPolicy>,
}

impl FitnessRegistry {
    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in policy.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for policy in BUILTIN_POLICIES.iter().chain(BUILTIN_ALIASES) {
            registry.insert(*policy);
        }
        registry
    }

    /// Adds or replaces a policy, returning the one it replaced.
    pub fn register(&mut self, name: &'static str, function: FitnessFn) -> Option<FitnessPolicy> {
        self.insert(FitnessPolicy::new(name, function))
    }

    /// Adds or replaces a policy value.
    pub fn insert(&mut self, policy: FitnessPolicy) -> Option<FitnessPolicy> {
        self.policies.insert(policy.name, policy)
    }

    /// Looks up a policy by name.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::UnknownFitnessPolicy`] for unknown names.
    pub fn get(&self, name: &str) -> Result<FitnessPolicy, ConfigurationError> {
        self.policies
            .get(name)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownFitnessPolicy(name.to_owned()))
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.policies.keys().copied()
    }
}

impl Default for FitnessRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

const BUILTIN_POLICIES: &[FitnessPolicy] = &[
    FitnessPolicy::new("economic_with_safety_penalty", economic_with_safety_penalty),
    FitnessPolicy::new("weighted_sum_balanced", weighted_sum_balanced),
    FitnessPolicy::new("low_carbon_priority", low_carbon_priority),
    FitnessPolicy::new("comfort_priority", comfort_priority),
    FitnessPolicy::new("robust_safety_margin", robust_safety_margin),
    FitnessPolicy::new("constructability_tradeoff", constructability_tradeoff),
    FitnessPolicy::new("lexicographic_safety_cost_co2", lexicographic_safety_cost_co2),
    FitnessPolicy::new("lightweight_volume_proxy", lightweight_volume_proxy),
];

// Japanese display names accepted by existing run configurations.
const BUILTIN_ALIASES: &[FitnessPolicy] = &[
    FitnessPolicy::new("経済性重視", economic_with_safety_penalty),
    FitnessPolicy::new("重み付き合成(バランス)", weighted_sum_balanced),
    FitnessPolicy::new("低炭素重視", low_carbon_priority),
    FitnessPolicy::new("快適性重視", comfort_priority),
    FitnessPolicy::new("ロバスト安全余裕", robust_safety_margin),
    FitnessPolicy::new("施工性トレードオフ", constructability_tradeoff),
    FitnessPolicy::new("辞書式(安全→コスト→CO2)", lexicographic_safety_cost_co2),
    FitnessPolicy::new("軽量化志向", lightweight_volume_proxy),
];

/// `scale · (SAFETY_THRESHOLD - safety)` when below the threshold, else `0`.
#[must_use]
pub fn safety_penalty(safety: f64, scale: f64) -> f64 {
    if safety < SAFETY_THRESHOLD {
        (SAFETY_THRESHOLD - safety) * scale
    } else {
        0.0
    }
}

fn score_fraction(score: f64) -> f64 {
    (score / SCORE_BASE).clamp(0.0, 1.0)
}

fn cost_overrun(cost: f64) -> f64 {
    if cost > COST_BASE {
        (cost - COST_BASE) * 0.5 / COST_BASE
    } else {
        0.0
    }
}

/// Cost alone, plus 100000 per unit of safety shortfall.
#[must_use]
pub fn economic_with_safety_penalty(m: &Metrics) -> f64 {
    m.cost + safety_penalty(m.safety, 100_000.0)
}

/// 0.4 cost + 0.3 CO2 + 0.3 discomfort, all normalised.
#[must_use]
pub fn weighted_sum_balanced(m: &Metrics) -> f64 {
    0.4 * (m.cost / COST_BASE)
        + 0.3 * (m.co2 / CO2_BASE)
        + 0.3 * (1.0 - score_fraction(m.comfort))
        + safety_penalty(m.safety, 100.0)
}

/// Normalised CO2 with a soft cost cap.
#[must_use]
pub fn low_carbon_priority(m: &Metrics) -> f64 {
    m.co2 / CO2_BASE + safety_penalty(m.safety, 100.0) + cost_overrun(m.cost)
}

/// Discomfort with soft cost and CO2 caps.
#[must_use]
pub fn comfort_priority(m: &Metrics) -> f64 {
    let co2_overrun = if m.co2 > CO2_BASE {
        (m.co2 - CO2_BASE) * 0.1 / CO2_BASE
    } else {
        0.0
    };
    (1.0 - score_fraction(m.comfort))
        + safety_penalty(m.safety, 100.0)
        + cost_overrun(m.cost)
        + co2_overrun
}

/// Cost and CO2, nudged towards a safety factor of 2.2.
#[must_use]
pub fn robust_safety_margin(m: &Metrics) -> f64 {
    const TARGET_SAFETY: f64 = 2.2;
    let margin = if m.safety < TARGET_SAFETY {
        (TARGET_SAFETY - m.safety) * 10.0
    } else {
        0.0
    };
    m.cost / COST_BASE + m.co2 / CO2_BASE + safety_penalty(m.safety, 100.0) + margin
}

/// 0.5 cost + 0.2 CO2 + 0.3 construction difficulty.
#[must_use]
pub fn constructability_tradeoff(m: &Metrics) -> f64 {
    0.5 * (m.cost / COST_BASE)
        + 0.2 * (m.co2 / CO2_BASE)
        + 0.3 * (1.0 - score_fraction(m.constructability))
        + safety_penalty(m.safety, 100.0)
}

/// Safety first, then cost, then CO2.
#[must_use]
pub fn lexicographic_safety_cost_co2(m: &Metrics) -> f64 {
    if m.safety < SAFETY_THRESHOLD {
        return 1e9 + safety_penalty(m.safety, 1e7);
    }
    m.cost + 100.0 * (m.co2 / CO2_BASE)
}

/// Normalised cost as a volume proxy with a small comfort term.
#[must_use]
pub fn lightweight_volume_proxy(m: &Metrics) -> f64 {
    m.cost / COST_BASE + safety_penalty(m.safety, 100.0) + 0.1 * (1.0 - score_fraction(m.comfort))
}
