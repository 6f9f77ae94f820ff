// Cost Functions
//
// *Le Coût* (The Cost) - Pluggable, linearizable action costs

/// Weighted L1 and weighted max costs.
pub mod linear;
/// Percentile-shift costs fitted from sample data.
pub mod percentile;

pub use linear::LinearCost;
pub use percentile::{EmpiricalCdf, PercentileShift};

use crate::action::{ActionSet, FeatureDescriptor};
use crate::error::{RecourseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How per-feature cost terms combine into the action cost
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Sum of terms
    Total,
    /// Largest term
    Max,
}

impl Aggregation {
    /// Combine per-feature terms
    pub fn combine<I: IntoIterator<Item = f64>>(self, terms: I) -> f64 {
        match self {
            Aggregation::Total => terms.into_iter().sum(),
            Aggregation::Max => terms.into_iter().fold(0.0, f64::max),
        }
    }
}

/// Shape of one feature's cost, as the builder linearizes it
#[derive(Debug, Clone, PartialEq)]
pub enum CostTerm {
    /// `weight * |delta|`
    Linear {
        /// Positive, finite weight
        weight: f64,
    },
    /// The feature may only move to one of `targets` (or stay put); the cost of
    /// each point comes from [`CostFunction::contribution`] at fit time.
    Grid {
        /// Admissible target values
        targets: Vec<f64>,
    },
}

/// Maps an action to a non-negative scalar cost
///
/// Implementations must return 0 for the zero action and be non-decreasing in
/// `|delta|` for each feature with the others held fixed. The builder relies on
/// [`CostFunction::term`] to describe each feature's cost as linear constraints.
pub trait CostFunction: Send + Sync + fmt::Debug {
    /// Metric name for logs and reports
    fn name(&self) -> &str;

    /// How terms combine
    fn aggregation(&self) -> Aggregation;

    /// Linearization shape for one mutable feature; independent of the individual
    fn term(&self, feature: &FeatureDescriptor) -> Result<CostTerm>;

    /// Cost of moving `feature` from `value` by `delta`
    fn contribution(&self, feature: &FeatureDescriptor, value: f64, delta: f64) -> f64;

    /// Cost of the whole action `delta` applied to `x`
    fn cost(&self, features: &[FeatureDescriptor], x: &[f64], delta: &[f64]) -> f64 {
        let terms = features
            .iter()
            .zip(x.iter().zip(delta))
            .map(|(feature, (&value, &d))| {
                if d == 0.0 {
                    0.0
                } else {
                    self.contribution(feature, value, d)
                }
            });
        self.aggregation().combine(terms)
    }
}

/// Built-in cost metrics selectable by name
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostMetric {
    /// Weighted sum of absolute changes
    WeightedL1,
    /// Largest weighted absolute change
    WeightedMax,
    /// Sum of percentile shifts
    TotalPercentileShift,
    /// Largest percentile shift
    MaxPercentileShift,
}

impl CostMetric {
    /// Parse a metric name, rejecting metrics that cannot be linearized
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "l1" | "weighted_l1" | "manhattan" => Ok(Self::WeightedL1),
            "max" | "linf" | "weighted_max" => Ok(Self::WeightedMax),
            "total_percentile_shift" | "total_pctl_shift" => Ok(Self::TotalPercentileShift),
            "max_percentile_shift" | "max_pctl_shift" => Ok(Self::MaxPercentileShift),
            "l2" | "euclidean" | "squared" => Err(RecourseError::cost_model(format!(
                "cost metric '{}' is quadratic and has no exact linear form",
                value
            ))),
            other => Err(RecourseError::cost_model(format!(
                "unknown cost metric '{}'",
                other
            ))),
        }
    }

    /// True if the metric needs sample data
    pub fn needs_samples(self) -> bool {
        matches!(self, Self::TotalPercentileShift | Self::MaxPercentileShift)
    }

    /// Build the cost function for an action set
    ///
    /// `samples` are rows aligned with `action_set`; they are required by the
    /// percentile metrics and ignored otherwise.
    pub fn build(
        self,
        action_set: &ActionSet,
        samples: Option<&[Vec<f64>]>,
    ) -> Result<Arc<dyn CostFunction>> {
        match self {
            Self::WeightedL1 => Ok(Arc::new(LinearCost::l1())),
            Self::WeightedMax => Ok(Arc::new(LinearCost::max())),
            Self::TotalPercentileShift | Self::MaxPercentileShift => {
                let samples = samples.ok_or_else(|| {
                    RecourseError::cost_model("percentile-shift cost requires sample data")
                })?;
                let aggregation = if self == Self::TotalPercentileShift {
                    Aggregation::Total
                } else {
                    Aggregation::Max
                };
                Ok(Arc::new(PercentileShift::fit(
                    action_set,
                    samples,
                    aggregation,
                )?))
            }
        }
    }
}

impl FromStr for CostMetric {
    type Err = RecourseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FeatureDescriptor;

    #[test]
    fn test_aggregation_combine() {
        assert_eq!(Aggregation::Total.combine([1.0, 2.5, 0.0]), 3.5);
        assert_eq!(Aggregation::Max.combine([1.0, 2.5, 0.0]), 2.5);
        assert_eq!(Aggregation::Max.combine(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!(CostMetric::parse("L1").unwrap(), CostMetric::WeightedL1);
        assert_eq!(CostMetric::parse("linf").unwrap(), CostMetric::WeightedMax);
        assert!("max_percentile_shift".parse::<CostMetric>().unwrap().needs_samples());
    }

    #[test]
    fn test_quadratic_metric_rejected() {
        let err = CostMetric::parse("l2").unwrap_err();
        assert_eq!(err.kind(), "cost_model");
        assert!(CostMetric::parse("hinge").is_err());
    }

    #[test]
    fn test_percentile_metric_needs_samples() {
        let set = ActionSet::new(vec![FeatureDescriptor::continuous("x")]);
        let err = CostMetric::TotalPercentileShift.build(&set, None).unwrap_err();
        assert_eq!(err.kind(), "cost_model");
        assert!(CostMetric::WeightedL1.build(&set, None).is_ok());
    }

    #[test]
    fn test_zero_action_costs_nothing() {
        let cost = LinearCost::l1();
        let features = vec![
            FeatureDescriptor::continuous("a"),
            FeatureDescriptor::continuous("b"),
        ];
        assert_eq!(cost.cost(&features, &[3.0, -1.0], &[0.0, 0.0]), 0.0);
    }
}
