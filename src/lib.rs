#![warn(missing_docs)]

/*! Particle swarm optimization for mixed continuous/discrete design spaces whose candidates are
scored by an expensive and unreliable external evaluation oracle.

A run is assembled from a [`DesignSpace`], an [`ops::Oracle`] and a fitness policy picked by
name from an [`ops::FitnessRegistry`]. Oracle failures never stop a run: the
[`evaluation::EvaluationAdapter`] scores them as `+∞`. When a telemetry directory is set, the
engine appends CSV logs and keeps a status snapshot that another process can follow with
[`telemetry::monitor`].

```
use designswarm::ops::{FnOracle, OracleReport};
use designswarm::{DesignMapping, DesignSpace, Metrics, Swarm, VariableDescriptor};

let space = DesignSpace::new(vec![
    VariableDescriptor::continuous("Lx", 8.0, 12.0),
    VariableDescriptor::binary("material_walls"),
])
.unwrap();
let oracle = FnOracle::new(|design: &DesignMapping| {
    let timber = design.get("material_walls").map_or(0.0, |value| value.as_f64());
    Ok(OracleReport::success(Metrics::new(100.0 + 10.0 * timber, 2.5, 50.0, 8.0, 9.0)))
});
let mut swarm = Swarm::builder(oracle)
    .design_space(space)
    .particles(5)
    .iterations(3)
    .seed(42)
    .build()
    .unwrap();
let report = swarm.run().unwrap();
assert!(report.best_fitness >= 100.0);
assert_eq!(report.history.iterations(), 3);
```
!*/

pub mod core;
pub mod evaluation;
pub mod ops;
mod swarm;
pub mod telemetry;

pub use crate::core::experiment::{IterationStats, RunHistory};
pub use crate::core::particle::{Metrics, Particle};
pub use crate::core::presets::RangePreset;
pub use crate::core::{
    ConfigurationError, DesignMapping, DesignSpace, DesignValue, Rounding, VariableDescriptor,
    VariableKind,
};
pub use swarm::{
    reflect_into_bounds, Swarm, SwarmBuilder, SwarmConfig, SwarmError, SwarmParameters,
    SwarmReport, SwarmState,
};
