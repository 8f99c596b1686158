//! Design-space primitives.
//!
//! A [`DesignSpace`] is an ordered list of [`VariableDescriptor`] values. The
//! order fixes the correspondence between indices of the flat real-valued
//! vectors that particles move through and the named parameters handed to the
//! evaluation oracle. Decoding applies each variable's rounding policy and the
//! binary threshold explicitly, so call sites never reinterpret raw values.

pub mod experiment;
pub mod particle;
pub mod presets;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Raw values at or above this threshold decode to `1` for binary variables.
pub const BINARY_THRESHOLD: f64 = 0.5;

/// Widest interval a variable may span. Wider ones overflow velocity and
/// sampling arithmetic.
pub const MAX_RANGE: f64 = f64::MAX / 2.0;

/// How a variable's raw coordinate is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// Any real value within the bounds.
    Continuous,
    /// Searched continuously over `[0, 1]`, decoded as `0` or `1`.
    BinaryThreshold,
}

/// Rounding policy applied to continuous variables on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Keep the raw value (lengths, angles, ratios).
    #[default]
    Float,
    /// Round to the nearest integer (thickness-like variables in mm).
    Integer,
}

/// Name, bounds and kind of one design variable.
///
/// # Examples
/// ```
/// use designswarm::VariableDescriptor;
/// let lx = VariableDescriptor::continuous("Lx", 8.0, 12.0);
/// assert_eq!(lx.range(), 4.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Parameter name passed to the oracle.
    pub name: String,
    /// Inclusive lower bound.
    pub lower: f64,
    /// Inclusive upper bound.
    pub upper: f64,
    /// Continuous or binary-threshold.
    pub kind: VariableKind,
    /// Rounding policy, only meaningful for continuous variables.
    #[serde(default)]
    pub rounding: Rounding,
}

impl VariableDescriptor {
    /// A continuous variable kept as a float.
    #[must_use]
    pub fn continuous(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
            kind: VariableKind::Continuous,
            rounding: Rounding::Float,
        }
    }

    /// A continuous variable rounded to the nearest integer on decode.
    #[must_use]
    pub fn integer(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            rounding: Rounding::Integer,
            ..Self::continuous(name, lower, upper)
        }
    }

    /// A binary switch searched over `[0, 1]`.
    #[must_use]
    pub fn binary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lower: 0.0,
            upper: 1.0,
            kind: VariableKind::BinaryThreshold,
            rounding: Rounding::Integer,
        }
    }

    /// Width of the search interval.
    #[must_use]
    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    /// Decodes one raw coordinate.
    ///
    /// Integer rounding sends halves to the even neighbour, so `450.5`
    /// decodes to `450`.
    #[must_use]
    pub fn decode_value(&self, raw: f64) -> DesignValue {
        match (self.kind, self.rounding) {
            (VariableKind::BinaryThreshold, _) => {
                DesignValue::Integer(i64::from(raw >= BINARY_THRESHOLD))
            }
            #[allow(clippy::cast_possible_truncation)]
            (VariableKind::Continuous, Rounding::Integer) => {
                DesignValue::Integer(raw.round_ties_even() as i64)
            }
            (VariableKind::Continuous, Rounding::Float) => DesignValue::Float(raw),
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.lower.is_finite() && self.upper.is_finite()) {
            return Err(ConfigurationError::NonFiniteBounds {
                name: self.name.clone(),
            });
        }
        if self.lower > self.upper {
            return Err(ConfigurationError::InvalidRange {
                name: self.name.clone(),
                lower: self.lower,
                upper: self.upper,
            });
        }
        if self.range() > MAX_RANGE {
            return Err(ConfigurationError::RangeTooWide {
                name: self.name.clone(),
                lower: self.lower,
                upper: self.upper,
            });
        }
        if self.kind == VariableKind::BinaryThreshold && (self.lower != 0.0 || self.upper != 1.0) {
            return Err(ConfigurationError::InvalidBinaryBounds {
                name: self.name.clone(),
                lower: self.lower,
                upper: self.upper,
            });
        }
        Ok(())
    }
}

/// A decoded parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DesignValue {
    /// Integral units or a binary switch.
    Integer(i64),
    /// Real-valued parameter.
    Float(f64),
}

impl DesignValue {
    /// Returns the value as a float regardless of representation.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(value) => value as f64,
            Self::Float(value) => value,
        }
    }
}

impl Display for DesignValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
        }
    }
}

/// Named parameters in descriptor order, as consumed by the oracle.
///
/// Serializes as a JSON object whose keys keep the descriptor order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesignMapping {
    entries: Vec<(String, DesignValue)>,
}

impl DesignMapping {
    /// Builds a mapping from ordered entries.
    #[must_use]
    pub fn from_entries(entries: Vec<(String, DesignValue)>) -> Self {
        Self { entries }
    }

    /// Looks up a value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<DesignValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    /// Iterates over `(name, value)` pairs in descriptor order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, DesignValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), *value))
    }

    /// Iterates over the values in descriptor order.
    pub fn values(&self) -> impl Iterator<Item = DesignValue> + '_ {
        self.entries.iter().map(|(_, value)| *value)
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for DesignMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Ordered, validated collection of design variables.
///
/// # Examples
/// ```
/// use designswarm::{DesignSpace, DesignValue, VariableDescriptor};
///
/// let space = DesignSpace::new(vec![
///     VariableDescriptor::continuous("Lx", 8.0, 12.0),
///     VariableDescriptor::integer("tf", 350.0, 600.0),
///     VariableDescriptor::binary("material_roof"),
/// ])
/// .unwrap();
/// let design = space.decode(&[9.25, 412.6, 0.7]).unwrap();
/// assert_eq!(design.get("Lx"), Some(DesignValue::Float(9.25)));
/// assert_eq!(design.get("tf"), Some(DesignValue::Integer(413)));
/// assert_eq!(design.get("material_roof"), Some(DesignValue::Integer(1)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DesignSpace {
    descriptors: Vec<VariableDescriptor>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl DesignSpace {
    /// Validates the descriptors and fixes their order.
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] for an empty list, duplicate names,
    /// non-finite bounds, `lower > upper`, a range wider than [`MAX_RANGE`],
    /// or binary variables whose bounds are not exactly `{0, 1}`.
    pub fn new(descriptors: Vec<VariableDescriptor>) -> Result<Self, ConfigurationError> {
        if descriptors.is_empty() {
            return Err(ConfigurationError::EmptyDesignSpace);
        }
        let mut seen = HashSet::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            descriptor.validate()?;
            if !seen.insert(descriptor.name.as_str()) {
                return Err(ConfigurationError::DuplicateVariable(descriptor.name.clone()));
            }
        }
        let lower = descriptors.iter().map(|d| d.lower).collect();
        let upper = descriptors.iter().map(|d| d.upper).collect();
        Ok(Self {
            descriptors,
            lower,
            upper,
        })
    }

    /// The 20-variable two-storey building design.
    #[must_use]
    pub fn building() -> Self {
        let descriptors = building_descriptors();
        let lower = descriptors.iter().map(|d| d.lower).collect();
        let upper = descriptors.iter().map(|d| d.upper).collect();
        Self {
            descriptors,
            lower,
            upper,
        }
    }

    /// Number of design variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Always `false` for a validated space; provided for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors in vector order.
    #[must_use]
    pub fn descriptors(&self) -> &[VariableDescriptor] {
        &self.descriptors
    }

    /// Variable names in vector order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    /// Lower bounds in vector order.
    #[must_use]
    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower
    }

    /// Upper bounds in vector order.
    #[must_use]
    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper
    }

    /// Index of the named variable.
    #[must_use]
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.name == name)
    }

    /// Decodes a raw vector into named parameters.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::DimensionMismatch`] when the vector
    /// length differs from the number of descriptors.
    pub fn decode(&self, vector: &[f64]) -> Result<DesignMapping, ConfigurationError> {
        self.check_len(vector.len())?;
        let entries = self
            .descriptors
            .iter()
            .zip(vector)
            .map(|(descriptor, &raw)| (descriptor.name.clone(), descriptor.decode_value(raw)))
            .collect();
        Ok(DesignMapping { entries })
    }

    /// Encodes named parameters back into a raw vector, clamped into bounds.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::UnknownVariable`] when a descriptor has
    /// no entry in `design`.
    pub fn encode(&self, design: &DesignMapping) -> Result<Vec<f64>, ConfigurationError> {
        let mut vector = Vec::with_capacity(self.len());
        for descriptor in &self.descriptors {
            let value = design
                .get(&descriptor.name)
                .ok_or_else(|| ConfigurationError::UnknownVariable(descriptor.name.clone()))?;
            vector.push(value.as_f64().clamp(descriptor.lower, descriptor.upper));
        }
        Ok(vector)
    }

    /// Returns a copy of `vector` clipped into the bounds.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::DimensionMismatch`] on a length mismatch.
    pub fn clamp(&self, vector: &[f64]) -> Result<Vec<f64>, ConfigurationError> {
        let mut clamped = vector.to_vec();
        self.clamp_in_place(&mut clamped)?;
        Ok(clamped)
    }

    /// Clips `vector` into the bounds in place.
    ///
    /// # Errors
    /// Returns [`ConfigurationError::DimensionMismatch`] on a length mismatch.
    pub fn clamp_in_place(&self, vector: &mut [f64]) -> Result<(), ConfigurationError> {
        self.check_len(vector.len())?;
        for ((value, &lower), &upper) in vector.iter_mut().zip(&self.lower).zip(&self.upper) {
            *value = value.clamp(lower, upper);
        }
        Ok(())
    }

    /// Whether every coordinate lies within its bounds.
    #[must_use]
    pub fn contains(&self, vector: &[f64]) -> bool {
        vector.len() == self.len()
            && vector
                .iter()
                .zip(&self.lower)
                .zip(&self.upper)
                .all(|((value, lower), upper)| lower <= value && value <= upper)
    }

    fn check_len(&self, found: usize) -> Result<(), ConfigurationError> {
        if found != self.len() {
            return Err(ConfigurationError::DimensionMismatch {
                expected: self.len(),
                found,
            });
        }
        Ok(())
    }
}

fn building_descriptors() -> Vec<VariableDescriptor> {
    vec![
        VariableDescriptor::continuous("Lx", 8.0, 12.0),
        VariableDescriptor::continuous("Ly", 6.0, 12.0),
        VariableDescriptor::continuous("H1", 2.6, 3.5),
        VariableDescriptor::continuous("H2", 2.6, 3.2),
        VariableDescriptor::integer("tf", 350.0, 600.0),
        VariableDescriptor::integer("tr", 350.0, 600.0),
        VariableDescriptor::integer("bc", 400.0, 1000.0),
        VariableDescriptor::integer("hc", 400.0, 1000.0),
        VariableDescriptor::integer("tw_ext", 300.0, 500.0),
        VariableDescriptor::continuous("wall_tilt_angle", -30.0, 30.0),
        VariableDescriptor::continuous("window_ratio_2f", 0.1, 1.0),
        VariableDescriptor::continuous("roof_morph", 0.0, 1.0),
        VariableDescriptor::continuous("roof_shift", 0.0, 1.0),
        VariableDescriptor::continuous("balcony_depth", 1.0, 3.0),
        VariableDescriptor::binary("material_columns"),
        VariableDescriptor::binary("material_floor1"),
        VariableDescriptor::binary("material_floor2"),
        VariableDescriptor::binary("material_roof"),
        VariableDescriptor::binary("material_walls"),
        VariableDescriptor::binary("material_balcony"),
    ]
}

/// Invalid configuration detected before any evaluation runs.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No design variables were declared.
    #[error("design space must declare at least one variable")]
    EmptyDesignSpace,
    /// Two descriptors share a name.
    #[error("design variable `{0}` is declared more than once")]
    DuplicateVariable(String),
    /// A bound is NaN or infinite.
    #[error("design variable `{name}` has non-finite bounds")]
    NonFiniteBounds {
        /// Variable name.
        name: String,
    },
    /// `lower > upper`.
    #[error("invalid bounds for `{name}` (lower: {lower}, upper: {upper})")]
    InvalidRange {
        /// Variable name.
        name: String,
        /// Offending lower bound.
        lower: f64,
        /// Offending upper bound.
        upper: f64,
    },
    /// `upper - lower` exceeds [`MAX_RANGE`].
    #[error("bounds of `{name}` span too wide a range (lower: {lower}, upper: {upper})")]
    RangeTooWide {
        /// Variable name.
        name: String,
        /// Declared lower bound.
        lower: f64,
        /// Declared upper bound.
        upper: f64,
    },
    /// A binary variable whose bounds are not `{0, 1}`.
    #[error("binary variable `{name}` must have bounds {{0, 1}} (found {lower}, {upper})")]
    InvalidBinaryBounds {
        /// Variable name.
        name: String,
        /// Declared lower bound.
        lower: f64,
        /// Declared upper bound.
        upper: f64,
    },
    /// A vector does not match the number of descriptors.
    #[error("dimension mismatch: expected {expected} values but found {found}")]
    DimensionMismatch {
        /// Number of descriptors.
        expected: usize,
        /// Length of the provided vector.
        found: usize,
    },
    /// A name that is not part of the design space.
    #[error("unknown design variable `{0}`")]
    UnknownVariable(String),
    /// No fitness policy registered under this name.
    #[error("unknown fitness policy `{0}`")]
    UnknownFitnessPolicy(String),
    /// No range preset registered under this name.
    #[error("unknown range preset `{0}`")]
    UnknownRangePreset(String),
    /// A numeric hyper-parameter is outside its valid domain.
    #[error("{name} must be {requirement} (received {value})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human readable constraint.
        requirement: &'static str,
        /// Offending value.
        value: f64,
    },
    /// A configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// A configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_space() -> DesignSpace {
        DesignSpace::new(vec![
            VariableDescriptor::continuous("Lx", 8.0, 12.0),
            VariableDescriptor::integer("tf", 350.0, 600.0),
            VariableDescriptor::binary("material_walls"),
        ])
        .unwrap()
    }

    #[test]
    fn binary_threshold_is_inclusive() {
        let descriptor = VariableDescriptor::binary("m");
        assert_eq!(descriptor.decode_value(0.5), DesignValue::Integer(1));
        assert_eq!(descriptor.decode_value(0.4999), DesignValue::Integer(0));
        assert_eq!(descriptor.decode_value(1.0), DesignValue::Integer(1));
    }

    #[test]
    fn decode_applies_rounding_policy() {
        let design = small_space().decode(&[10.5, 449.5, 0.2]).unwrap();
        let values: Vec<_> = design.values().collect();
        assert_eq!(
            values,
            vec![
                DesignValue::Float(10.5),
                DesignValue::Integer(450),
                DesignValue::Integer(0)
            ]
        );
    }

    #[test]
    fn integer_rounding_sends_halves_to_even() {
        let tf = VariableDescriptor::integer("tf", 350.0, 600.0);
        assert_eq!(tf.decode_value(450.5), DesignValue::Integer(450));
        assert_eq!(tf.decode_value(451.5), DesignValue::Integer(452));
        assert_eq!(tf.decode_value(450.51), DesignValue::Integer(451));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = small_space().decode(&[10.0]).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DimensionMismatch {
                expected: 3,
                found: 1
            }
        ));
    }

    #[test]
    fn clamp_clips_each_dimension() {
        let clamped = small_space().clamp(&[7.0, 700.0, 0.5]).unwrap();
        assert_eq!(clamped, vec![8.0, 600.0, 0.5]);
    }

    #[test]
    fn encode_inverts_decode_for_representable_values() {
        let space = small_space();
        let design = space.decode(&[9.0, 400.0, 1.0]).unwrap();
        assert_eq!(space.encode(&design).unwrap(), vec![9.0, 400.0, 1.0]);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = DesignSpace::new(vec![VariableDescriptor::continuous("Lx", 12.0, 8.0)])
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidRange { .. }));
    }

    #[test]
    fn overflowing_ranges_are_rejected() {
        let err = DesignSpace::new(vec![VariableDescriptor::continuous("x", -1e308, 1e308)])
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::RangeTooWide { name, .. } if name == "x"));
        let widest = VariableDescriptor::continuous("x", -4e307, 4e307);
        assert!(DesignSpace::new(vec![widest]).is_ok());
    }

    #[test]
    fn binary_bounds_must_be_unit_interval() {
        let mut descriptor = VariableDescriptor::binary("material_roof");
        descriptor.upper = 2.0;
        let err = DesignSpace::new(vec![descriptor]).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidBinaryBounds { .. }));
    }

    #[test]
    fn duplicate_and_empty_spaces_are_rejected() {
        assert!(matches!(
            DesignSpace::new(vec![]),
            Err(ConfigurationError::EmptyDesignSpace)
        ));
        let err = DesignSpace::new(vec![
            VariableDescriptor::continuous("Lx", 0.0, 1.0),
            VariableDescriptor::continuous("Lx", 0.0, 2.0),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateVariable(name) if name == "Lx"));
    }

    #[test]
    fn building_space_is_valid() {
        let space = DesignSpace::building();
        assert_eq!(space.len(), 20);
        assert!(DesignSpace::new(space.descriptors().to_vec()).is_ok());
        assert_eq!(space.position_of("tw_ext"), Some(8));
    }

    #[test]
    fn mapping_serializes_in_descriptor_order() {
        let design = small_space().decode(&[9.5, 400.0, 0.9]).unwrap();
        let json = serde_json::to_string(&design).unwrap();
        assert_eq!(json, r#"{"Lx":9.5,"tf":400,"material_walls":1}"#);
    }
}
