use crate::error::{RecourseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data type of a feature
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    /// Real-valued
    Continuous,
    /// Whole numbers, moved in multiples of the step size
    Integer,
    /// 0/1 indicator
    Binary,
    /// 0/1 indicator belonging to a one-hot group
    Categorical,
}

impl FeatureType {
    /// Parse a feature type from string.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "continuous" | "real" | "float" => Some(Self::Continuous),
            "integer" | "int" => Some(Self::Integer),
            "binary" | "bool" | "boolean" => Some(Self::Binary),
            "categorical" | "one_hot" => Some(Self::Categorical),
            _ => None,
        }
    }

    /// True if actions on this type move in discrete steps.
    pub fn is_discrete(self) -> bool {
        !matches!(self, Self::Continuous)
    }

    /// True for 0/1 indicator types.
    pub fn is_indicator(self) -> bool {
        matches!(self, Self::Binary | Self::Categorical)
    }
}

impl FromStr for FeatureType {
    type Err = RecourseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
            .ok_or_else(|| RecourseError::configuration(format!("unknown feature type '{}'", s)))
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuous => "continuous",
            Self::Integer => "integer",
            Self::Binary => "binary",
            Self::Categorical => "categorical",
        };
        f.write_str(name)
    }
}

/// Allowed direction of change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Feature may only go up
    Increase,
    /// Feature may only go down
    Decrease,
    /// No restriction
    #[default]
    Both,
}

impl Direction {
    /// Parse a direction from string.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "increase" | "up" | "+" => Some(Self::Increase),
            "decrease" | "down" | "-" => Some(Self::Decrease),
            "both" | "any" => Some(Self::Both),
            _ => None,
        }
    }

    /// True if `delta` moves in an allowed direction, within `tolerance`.
    pub fn allows(self, delta: f64, tolerance: f64) -> bool {
        match self {
            Self::Increase => delta >= -tolerance,
            Self::Decrease => delta <= tolerance,
            Self::Both => true,
        }
    }
}

impl FromStr for Direction {
    type Err = RecourseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
            .ok_or_else(|| RecourseError::configuration(format!("unknown direction '{}'", s)))
    }
}

fn default_mutable() -> bool {
    true
}

/// Metadata describing how one feature may be acted upon
///
/// Bounds are optional; a missing bound means unbounded on that side, except for
/// binary and categorical features which always live in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureDescriptor {
    /// Unique feature name
    pub name: String,

    /// Data type
    #[serde(rename = "type")]
    pub feature_type: FeatureType,

    /// Lowest admissible value after the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,

    /// Highest admissible value after the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,

    /// Whether the feature can be changed at all
    #[serde(default = "default_mutable")]
    pub mutable: bool,

    /// Allowed direction of change
    #[serde(default)]
    pub direction: Direction,

    /// Granularity of change; defaults to 1 for integer features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl FeatureDescriptor {
    /// Create a mutable, unbounded descriptor
    pub fn new(name: impl Into<String>, feature_type: FeatureType) -> Self {
        Self {
            name: name.into(),
            feature_type,
            lower: None,
            upper: None,
            mutable: true,
            direction: Direction::Both,
            step: None,
        }
    }

    /// Continuous feature
    pub fn continuous(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Continuous)
    }

    /// Integer feature with unit step
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Integer)
    }

    /// Binary indicator
    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Binary)
    }

    /// One-hot category indicator
    pub fn categorical(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Categorical)
    }

    /// Set both bounds
    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = Some(lower);
        self.upper = Some(upper);
        self
    }

    /// Set the lower bound only
    pub fn with_lower(mut self, lower: f64) -> Self {
        self.lower = Some(lower);
        self
    }

    /// Set the upper bound only
    pub fn with_upper(mut self, upper: f64) -> Self {
        self.upper = Some(upper);
        self
    }

    /// Mark as immutable
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Set the mutability flag
    pub fn with_mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    /// Restrict the direction of change
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the granularity of change
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    /// Effective bounds, with indicator types pinned to `[0, 1]`
    pub fn bounds(&self) -> (f64, f64) {
        let (default_lower, default_upper) = if self.feature_type.is_indicator() {
            (0.0, 1.0)
        } else {
            (f64::NEG_INFINITY, f64::INFINITY)
        };
        (
            self.lower.unwrap_or(default_lower),
            self.upper.unwrap_or(default_upper),
        )
    }

    /// True if both effective bounds are finite
    pub fn is_bounded(&self) -> bool {
        let (lower, upper) = self.bounds();
        lower.is_finite() && upper.is_finite()
    }

    /// Effective step size; `None` means the action is continuous
    pub fn step_size(&self) -> Option<f64> {
        match self.feature_type {
            FeatureType::Continuous => self.step,
            FeatureType::Integer => Some(self.step.unwrap_or(1.0)),
            FeatureType::Binary | FeatureType::Categorical => Some(1.0),
        }
    }

    /// Range of admissible deltas from the current value `value`
    ///
    /// Combines bounds and direction. The range is empty (`lower > upper`) when no
    /// move, not even staying put, keeps the feature admissible.
    pub fn action_range(&self, value: f64) -> (f64, f64) {
        if !self.mutable {
            return (0.0, 0.0);
        }
        let (lower, upper) = self.bounds();
        let mut lo = lower - value;
        let mut hi = upper - value;
        match self.direction {
            Direction::Increase => lo = lo.max(0.0),
            Direction::Decrease => hi = hi.min(0.0),
            Direction::Both => {}
        }
        (lo, hi)
    }

    /// True if `delta` is a whole multiple of the step size
    pub fn is_granular(&self, delta: f64, tolerance: f64) -> bool {
        match self.step_size() {
            Some(step) => {
                let steps = delta / step;
                (steps - steps.round()).abs() <= tolerance * steps.abs().max(1.0)
            }
            None => true,
        }
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| {
            Err(RecourseError::configuration(format!(
                "feature '{}': {}",
                self.name, message
            )))
        };

        if self.name.trim().is_empty() {
            return Err(RecourseError::configuration("feature name must not be empty"));
        }

        for (label, bound) in [("lower", self.lower), ("upper", self.upper)] {
            if let Some(value) = bound {
                if !value.is_finite() {
                    return fail(format!(
                        "{} bound must be finite; omit it to leave the feature unbounded",
                        label
                    ));
                }
            }
        }

        let (lower, upper) = self.bounds();
        if lower > upper {
            return fail(format!("lower bound {} exceeds upper bound {}", lower, upper));
        }

        match self.feature_type {
            FeatureType::Binary | FeatureType::Categorical => {
                if lower < 0.0 || upper > 1.0 {
                    return fail(format!(
                        "{} bounds must lie within [0, 1], got [{}, {}]",
                        self.feature_type, lower, upper
                    ));
                }
                if let Some(step) = self.step {
                    if step != 1.0 {
                        return fail(format!(
                            "{} features move in unit steps, got step {}",
                            self.feature_type, step
                        ));
                    }
                }
            }
            FeatureType::Integer => {
                for bound in [lower, upper] {
                    if bound.is_finite() && bound.fract() != 0.0 {
                        return fail(format!("integer bound {} is not a whole number", bound));
                    }
                }
                if let Some(step) = self.step {
                    if step.fract() != 0.0 {
                        return fail(format!("integer step {} is not a whole number", step));
                    }
                }
            }
            FeatureType::Continuous => {}
        }

        if let Some(step) = self.step {
            if !step.is_finite() || step <= 0.0 {
                return fail(format!("step size must be positive, got {}", step));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_and_direction_parse() {
        assert_eq!(FeatureType::parse("Integer"), Some(FeatureType::Integer));
        assert_eq!(FeatureType::parse("one_hot"), Some(FeatureType::Categorical));
        assert_eq!(FeatureType::parse("ordinal"), None);
        assert!("ordinal".parse::<FeatureType>().is_err());

        assert_eq!(Direction::parse("up"), Some(Direction::Increase));
        assert_eq!(Direction::parse("decrease"), Some(Direction::Decrease));
        assert_eq!(Direction::default(), Direction::Both);
    }

    #[test]
    fn test_indicator_defaults() {
        let flag = FeatureDescriptor::binary("has_loan");
        assert_eq!(flag.bounds(), (0.0, 1.0));
        assert_eq!(flag.step_size(), Some(1.0));
        assert!(flag.is_bounded());
        assert!(flag.validate().is_ok());
    }

    #[test]
    fn test_integer_step_defaults_to_one() {
        let years = FeatureDescriptor::integer("years");
        assert_eq!(years.step_size(), Some(1.0));
        assert_eq!(years.clone().with_step(5.0).step_size(), Some(5.0));
        assert_eq!(FeatureDescriptor::continuous("income").step_size(), None);
    }

    #[test]
    fn test_action_range_combines_bounds_and_direction() {
        let balance = FeatureDescriptor::continuous("balance")
            .with_lower(0.0)
            .with_upper(1000.0)
            .with_direction(Direction::Increase);
        assert_eq!(balance.action_range(-50.0), (50.0, 1050.0));
        assert_eq!(balance.action_range(200.0), (0.0, 800.0));

        let debt = FeatureDescriptor::continuous("debt")
            .with_lower(0.0)
            .with_direction(Direction::Decrease);
        let (lo, hi) = debt.action_range(30.0);
        assert_eq!((lo, hi), (-30.0, 0.0));

        let age = FeatureDescriptor::integer("age").immutable();
        assert_eq!(age.action_range(40.0), (0.0, 0.0));
    }

    #[test]
    fn test_action_range_can_be_empty() {
        let capped = FeatureDescriptor::continuous("x")
            .with_upper(10.0)
            .with_direction(Direction::Increase);
        let (lo, hi) = capped.action_range(12.0);
        assert!(lo > hi);
    }

    #[test]
    fn test_granularity() {
        let months = FeatureDescriptor::integer("months").with_step(3.0);
        assert!(months.is_granular(6.0, 1e-9));
        assert!(months.is_granular(-3.0, 1e-9));
        assert!(!months.is_granular(4.0, 1e-9));
        assert!(FeatureDescriptor::continuous("x").is_granular(0.123, 1e-9));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let err = FeatureDescriptor::continuous("x")
            .with_bounds(5.0, 1.0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_validate_rejects_bad_steps() {
        assert!(FeatureDescriptor::continuous("x").with_step(0.0).validate().is_err());
        assert!(FeatureDescriptor::continuous("x").with_step(-1.0).validate().is_err());
        assert!(FeatureDescriptor::integer("n").with_step(0.5).validate().is_err());
        assert!(FeatureDescriptor::binary("b").with_step(2.0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_type_inconsistent_bounds() {
        assert!(FeatureDescriptor::binary("b").with_bounds(0.0, 2.0).validate().is_err());
        assert!(FeatureDescriptor::integer("n").with_bounds(0.5, 3.0).validate().is_err());
        assert!(FeatureDescriptor::continuous("x")
            .with_upper(f64::INFINITY)
            .validate()
            .is_err());
    }
}
