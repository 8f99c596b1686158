//! Named bound overrides that narrow or pin parts of a design space.
//!
//! Overrides are clamped into the base range. Equal bounds pin a variable;
//! a pinned binary switch becomes an integer variable with equal bounds so
//! every remaining binary descriptor still spans `{0, 1}`.

use crate::core::{ConfigurationError, DesignSpace, Rounding, VariableDescriptor, VariableKind};

/// A named set of `(variable, lower, upper)` overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePreset {
    name: String,
    overrides: Vec<(String, f64, f64)>,
}

impl RangePreset {
    /// Creates a preset from explicit overrides.
    #[must_use]
    pub fn new(name: impl Into<String>, overrides: Vec<(String, f64, f64)>) -> Self {
        Self {
            name: name.into(),
            overrides,
        }
    }

    /// Looks up one of the built-in presets.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::UnknownRangePreset`] for unknown names.
    pub fn builtin(name: &str) -> Result<Self, ConfigurationError> {
        let overrides: &[(&str, f64, f64)] = match name {
            "default" => &[],
            "small_footprint_low_height" => &[
                ("Lx", 8.0, 10.0),
                ("Ly", 6.0, 8.0),
                ("H1", 2.6, 3.0),
                ("H2", 2.6, 3.0),
                ("window_ratio_2f", 0.2, 0.6),
                ("wall_tilt_angle", -10.0, 10.0),
            ],
            "lock_columns_500mm" => &[("bc", 500.0, 500.0), ("hc", 500.0, 500.0)],
            "comfort_focused_envelope" => &[
                ("H1", 3.0, 3.5),
                ("H2", 3.0, 3.2),
                ("window_ratio_2f", 0.4, 0.8),
                ("wall_tilt_angle", -10.0, 10.0),
            ],
            "low_carbon_timber_all" => &[
                ("material_columns", 1.0, 1.0),
                ("material_floor1", 1.0, 1.0),
                ("material_floor2", 1.0, 1.0),
                ("material_roof", 1.0, 1.0),
                ("material_walls", 1.0, 1.0),
                ("material_balcony", 1.0, 1.0),
            ],
            "hybrid_columns_rc_others_timber" => &[
                ("material_columns", 0.0, 0.0),
                ("material_floor1", 1.0, 1.0),
                ("material_floor2", 1.0, 1.0),
                ("material_roof", 1.0, 1.0),
                ("material_walls", 1.0, 1.0),
                ("material_balcony", 1.0, 1.0),
            ],
            "lightweight_thin_slabs" => &[
                ("tf", 350.0, 450.0),
                ("tr", 350.0, 450.0),
                ("tw_ext", 300.0, 400.0),
            ],
            other => return Err(ConfigurationError::UnknownRangePreset(other.to_owned())),
        };
        Ok(Self::new(
            name,
            overrides
                .iter()
                .map(|&(variable, lower, upper)| (variable.to_owned(), lower, upper))
                .collect(),
        ))
    }

    /// Names accepted by [`Self::builtin`].
    #[must_use]
    pub fn builtin_names() -> &'static [&'static str] {
        &[
            "default",
            "small_footprint_low_height",
            "lock_columns_500mm",
            "comfort_focused_envelope",
            "low_carbon_timber_all",
            "hybrid_columns_rc_others_timber",
            "lightweight_thin_slabs",
        ]
    }

    /// Preset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the overrides to `base`, returning the narrowed space.
    ///
    /// # Examples
    /// ```
    /// use designswarm::{DesignSpace, RangePreset};
    /// let space = RangePreset::builtin("lock_columns_500mm")
    ///     .unwrap()
    ///     .apply(&DesignSpace::building())
    ///     .unwrap();
    /// let bc = space.position_of("bc").unwrap();
    /// assert_eq!(space.lower_bounds()[bc], 500.0);
    /// assert_eq!(space.upper_bounds()[bc], 500.0);
    /// ```
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] when an override names an unknown
    /// variable or has `lower > upper`.
    pub fn apply(&self, base: &DesignSpace) -> Result<DesignSpace, ConfigurationError> {
        let mut descriptors = base.descriptors().to_vec();
        for (variable, lower, upper) in &self.overrides {
            let idx = base
                .position_of(variable)
                .ok_or_else(|| ConfigurationError::UnknownVariable(variable.clone()))?;
            if lower > upper {
                return Err(ConfigurationError::InvalidRange {
                    name: variable.clone(),
                    lower: *lower,
                    upper: *upper,
                });
            }
            let descriptor = &mut descriptors[idx];
            let lower = lower.clamp(descriptor.lower, descriptor.upper);
            let upper = upper.clamp(descriptor.lower, descriptor.upper);
            if descriptor.kind == VariableKind::BinaryThreshold {
                if lower < upper {
                    continue;
                }
                *descriptor = VariableDescriptor {
                    kind: VariableKind::Continuous,
                    rounding: Rounding::Integer,
                    ..descriptor.clone()
                };
            }
            descriptor.lower = lower;
            descriptor.upper = upper;
        }
        DesignSpace::new(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DesignValue;

    #[test]
    fn every_builtin_applies_to_the_building_space() {
        let base = DesignSpace::building();
        for name in RangePreset::builtin_names() {
            let space = RangePreset::builtin(name).unwrap().apply(&base).unwrap();
            assert_eq!(space.len(), base.len(), "{name}");
        }
    }

    #[test]
    fn pinned_binary_switch_decodes_to_its_value() {
        let space = RangePreset::builtin("hybrid_columns_rc_others_timber")
            .unwrap()
            .apply(&DesignSpace::building())
            .unwrap();
        let columns = space.position_of("material_columns").unwrap();
        assert_eq!(space.descriptors()[columns].kind, VariableKind::Continuous);
        let mid: Vec<f64> = space
            .lower_bounds()
            .iter()
            .zip(space.upper_bounds())
            .map(|(lower, upper)| 0.5 * (lower + upper))
            .collect();
        let design = space.decode(&mid).unwrap();
        assert_eq!(design.get("material_columns"), Some(DesignValue::Integer(0)));
        assert_eq!(design.get("material_roof"), Some(DesignValue::Integer(1)));
    }

    #[test]
    fn overrides_are_clamped_into_the_base_range() {
        let preset = RangePreset::new("wide", vec![("Lx".to_owned(), 0.0, 100.0)]);
        let space = preset.apply(&DesignSpace::building()).unwrap();
        assert_eq!(space.lower_bounds()[0], 8.0);
        assert_eq!(space.upper_bounds()[0], 12.0);
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        assert!(matches!(
            RangePreset::builtin("brutalist"),
            Err(ConfigurationError::UnknownRangePreset(_))
        ));
        let preset = RangePreset::new("bad", vec![("Lz".to_owned(), 0.0, 1.0)]);
        assert!(matches!(
            preset.apply(&DesignSpace::building()),
            Err(ConfigurationError::UnknownVariable(_))
        ));
    }
}
