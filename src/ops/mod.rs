//! Pluggable pieces of the optimizer: the evaluation oracle and the fitness
//! policies that scalarise its metrics.
//!
//! The swarm engine only depends on the traits and registry exposed here, so
//! new oracles and policies plug in without touching the engine.

pub mod fitness;
pub mod oracle;

pub use fitness::{FitnessFn, FitnessPolicy, FitnessRegistry, SAFETY_THRESHOLD};
pub use oracle::{FnOracle, Oracle, OracleError, OracleReport, OracleResult, OracleStatus};
