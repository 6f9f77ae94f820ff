// Percentile-shift costs
//
// Cost of a move is how far it shifts the feature through the population's
// distribution, so moves through dense regions cost more than moves through tails.

use super::{Aggregation, CostFunction, CostTerm};
use crate::action::{ActionSet, FeatureDescriptor};
use crate::error::{RecourseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default number of quantile levels used to build target grids
pub const DEFAULT_QUANTILE_LEVELS: usize = 101;

/// Default floor on the cost of any non-zero move
pub const DEFAULT_MIN_MOVE_COST: f64 = 1e-4;

/// Piecewise-linear empirical CDF
///
/// Serializes as its samples; deserialization refits, so an empty sample list
/// is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "CdfSamples", into = "CdfSamples")]
pub struct EmpiricalCdf {
    /// Sorted finite samples
    samples: Vec<f64>,
    /// Distinct sample values, ascending
    knots: Vec<f64>,
    /// Fraction of samples at or below each knot
    levels: Vec<f64>,
}

/// Wire form of [`EmpiricalCdf`]
#[derive(Serialize, Deserialize)]
struct CdfSamples {
    samples: Vec<f64>,
}

impl TryFrom<CdfSamples> for EmpiricalCdf {
    type Error = RecourseError;

    fn try_from(wire: CdfSamples) -> Result<Self> {
        Self::fit(&wire.samples)
    }
}

impl From<EmpiricalCdf> for CdfSamples {
    fn from(cdf: EmpiricalCdf) -> Self {
        Self {
            samples: cdf.samples,
        }
    }
}

impl EmpiricalCdf {
    /// Fit from raw samples; non-finite values are ignored
    pub fn fit(samples: &[f64]) -> Result<Self> {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return Err(RecourseError::cost_model(
                "percentile distribution needs at least one finite sample",
            ));
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mut knots: Vec<f64> = Vec::new();
        let mut levels: Vec<f64> = Vec::new();
        for (i, &value) in sorted.iter().enumerate() {
            let level = (i + 1) as f64 / n;
            match knots.last() {
                Some(&last) if last == value => {
                    if let Some(top) = levels.last_mut() {
                        *top = level;
                    }
                }
                _ => {
                    knots.push(value);
                    levels.push(level);
                }
            }
        }

        Ok(Self {
            samples: sorted,
            knots,
            levels,
        })
    }

    /// Percentile of `value` in `[0, 1]`
    pub fn cdf(&self, value: f64) -> f64 {
        let first = self.knots[0];
        let last = self.knots[self.knots.len() - 1];
        if value <= first {
            return self.levels[0];
        }
        if value >= last {
            return 1.0;
        }
        // knots[i] <= value < knots[i + 1]
        let i = self.knots.partition_point(|&k| k <= value) - 1;
        let (k0, k1) = (self.knots[i], self.knots[i + 1]);
        let (l0, l1) = (self.levels[i], self.levels[i + 1]);
        l0 + (l1 - l0) * (value - k0) / (k1 - k0)
    }

    /// Nearest-rank quantile; always an observed sample value
    pub fn quantile(&self, q: f64) -> f64 {
        let n = self.samples.len();
        let rank = (q.clamp(0.0, 1.0) * n as f64).ceil() as usize;
        self.samples[rank.saturating_sub(1).min(n - 1)]
    }

    /// Distinct quantiles at `levels` evenly spaced probabilities
    pub fn quantile_grid(&self, levels: usize) -> Vec<f64> {
        let levels = levels.max(2);
        let mut grid: Vec<f64> = (0..levels)
            .map(|i| self.quantile(i as f64 / (levels - 1) as f64))
            .collect();
        grid.dedup();
        grid
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false; a fitted CDF has at least one sample
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// `|F_j(x_j + delta_j) - F_j(x_j)|` per feature, summed or maxed
///
/// Linearized on a grid: each feature may only move to one of its sample
/// quantiles. Any non-zero move costs at least `min_move_cost`, so only the empty
/// action is free.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileShift {
    aggregation: Aggregation,
    distributions: BTreeMap<String, EmpiricalCdf>,
    quantile_levels: usize,
    min_move_cost: f64,
}

impl PercentileShift {
    /// Empty cost; add distributions with [`Self::with_distribution`]
    pub fn new(aggregation: Aggregation) -> Self {
        Self {
            aggregation,
            distributions: BTreeMap::new(),
            quantile_levels: DEFAULT_QUANTILE_LEVELS,
            min_move_cost: DEFAULT_MIN_MOVE_COST,
        }
    }

    /// Fit one distribution per mutable feature from sample rows aligned with `action_set`
    pub fn fit(action_set: &ActionSet, samples: &[Vec<f64>], aggregation: Aggregation) -> Result<Self> {
        if let Some((row, values)) = samples
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != action_set.len())
        {
            return Err(RecourseError::cost_model(format!(
                "sample row {} has {} values, expected {}",
                row,
                values.len(),
                action_set.len()
            )));
        }

        let mut cost = Self::new(aggregation);
        for (j, feature) in action_set.features().iter().enumerate() {
            if !feature.mutable {
                continue;
            }
            let column: Vec<f64> = samples.iter().map(|row| row[j]).collect();
            let cdf = EmpiricalCdf::fit(&column).map_err(|e| {
                RecourseError::cost_model(format!("feature '{}': {}", feature.name, e))
            })?;
            cost.distributions.insert(feature.name.clone(), cdf);
        }

        tracing::debug!(
            features = cost.distributions.len(),
            rows = samples.len(),
            "fitted percentile-shift distributions"
        );

        Ok(cost)
    }

    /// Use a pre-fitted distribution for one feature
    pub fn with_distribution(mut self, feature: impl Into<String>, cdf: EmpiricalCdf) -> Self {
        self.distributions.insert(feature.into(), cdf);
        self
    }

    /// Number of quantile levels in each target grid
    pub fn with_quantile_levels(mut self, levels: usize) -> Self {
        self.quantile_levels = levels.max(2);
        self
    }

    /// Floor on the cost of any non-zero move
    pub fn with_min_move_cost(mut self, min_move_cost: f64) -> Self {
        self.min_move_cost = min_move_cost;
        self
    }

    /// Distribution for a feature, if fitted
    pub fn distribution(&self, feature: &str) -> Option<&EmpiricalCdf> {
        self.distributions.get(feature)
    }
}

impl CostFunction for PercentileShift {
    fn name(&self) -> &str {
        match self.aggregation {
            Aggregation::Total => "total_percentile_shift",
            Aggregation::Max => "max_percentile_shift",
        }
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn term(&self, feature: &FeatureDescriptor) -> Result<CostTerm> {
        if !self.min_move_cost.is_finite() || self.min_move_cost <= 0.0 {
            return Err(RecourseError::cost_model(format!(
                "minimum move cost must be positive, got {}",
                self.min_move_cost
            )));
        }
        let cdf = self.distributions.get(&feature.name).ok_or_else(|| {
            RecourseError::cost_model(format!(
                "no sample distribution for feature '{}'",
                feature.name
            ))
        })?;
        Ok(CostTerm::Grid {
            targets: cdf.quantile_grid(self.quantile_levels),
        })
    }

    fn contribution(&self, feature: &FeatureDescriptor, value: f64, delta: f64) -> f64 {
        if delta == 0.0 {
            return 0.0;
        }
        match self.distributions.get(&feature.name) {
            Some(cdf) => {
                let shift = (cdf.cdf(value + delta) - cdf.cdf(value)).abs();
                shift.max(self.min_move_cost)
            }
            None => f64::INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdf_interpolates_between_knots() {
        let cdf = EmpiricalCdf::fit(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(cdf.cdf(0.0), 0.25);
        assert_eq!(cdf.cdf(1.0), 0.25);
        assert!((cdf.cdf(1.5) - 0.375).abs() < 1e-12);
        assert_eq!(cdf.cdf(4.0), 1.0);
        assert_eq!(cdf.cdf(10.0), 1.0);
    }

    #[test]
    fn test_cdf_handles_ties() {
        let cdf = EmpiricalCdf::fit(&[2.0, 2.0, 2.0, 5.0]).unwrap();
        assert_eq!(cdf.cdf(2.0), 0.75);
        assert!((cdf.cdf(3.5) - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_quantiles_are_samples() {
        let cdf = EmpiricalCdf::fit(&[5.0, 1.0, 3.0, f64::NAN]).unwrap();
        assert_eq!(cdf.len(), 3);
        assert_eq!(cdf.quantile(0.0), 1.0);
        assert_eq!(cdf.quantile(0.5), 3.0);
        assert_eq!(cdf.quantile(1.0), 5.0);
        assert_eq!(cdf.quantile_grid(101), vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_deserialize_refits_samples() {
        let cdf: EmpiricalCdf = serde_json::from_str(r#"{"samples":[3.0,1.0,2.0,2.0]}"#).unwrap();
        assert_eq!(cdf, EmpiricalCdf::fit(&[1.0, 2.0, 2.0, 3.0]).unwrap());
        assert_eq!(cdf.cdf(2.0), 0.75);

        let json = serde_json::to_string(&cdf).unwrap();
        assert_eq!(json, r#"{"samples":[1.0,2.0,2.0,3.0]}"#);
    }

    #[test]
    fn test_deserialize_rejects_empty_samples() {
        let empty = serde_json::from_str::<EmpiricalCdf>(r#"{"samples":[]}"#);
        assert!(empty.unwrap_err().to_string().contains("at least one finite sample"));

        let forged = r#"{"samples":[],"knots":[],"levels":[]}"#;
        assert!(serde_json::from_str::<EmpiricalCdf>(forged).is_err());
    }

    #[test]
    fn test_fit_requires_finite_samples() {
        let err = EmpiricalCdf::fit(&[f64::NAN]).unwrap_err();
        assert_eq!(err.kind(), "cost_model");
    }

    #[test]
    fn test_contribution_is_monotone_in_magnitude() {
        let samples: Vec<f64> = (0..50).map(|v| v as f64).collect();
        let cost = PercentileShift::new(Aggregation::Total)
            .with_distribution("x", EmpiricalCdf::fit(&samples).unwrap());
        let feature = FeatureDescriptor::continuous("x");
        let mut previous = 0.0;
        for step in 1..20 {
            let c = cost.contribution(&feature, 10.0, step as f64);
            assert!(c >= previous);
            previous = c;
        }
        assert_eq!(cost.contribution(&feature, 10.0, 0.0), 0.0);
        assert!(cost.contribution(&feature, 100.0, 1.0) >= DEFAULT_MIN_MOVE_COST);
    }

    #[test]
    fn test_fit_from_action_set_skips_immutable() {
        let set = ActionSet::new(vec![
            FeatureDescriptor::integer("age").immutable(),
            FeatureDescriptor::continuous("income"),
        ]);
        let rows = vec![vec![30.0, 10.0], vec![40.0, 20.0], vec![50.0, 30.0]];
        let cost = PercentileShift::fit(&set, &rows, Aggregation::Max).unwrap();
        assert!(cost.distribution("age").is_none());
        assert!(cost.distribution("income").is_some());
        assert_eq!(cost.name(), "max_percentile_shift");
    }

    #[test]
    fn test_fit_rejects_ragged_rows() {
        let set = ActionSet::new(vec![FeatureDescriptor::continuous("income")]);
        let rows = vec![vec![1.0], vec![1.0, 2.0]];
        assert!(PercentileShift::fit(&set, &rows, Aggregation::Total).is_err());
    }

    #[test]
    fn test_term_requires_distribution() {
        let cost = PercentileShift::new(Aggregation::Total);
        let err = cost.term(&FeatureDescriptor::continuous("x")).unwrap_err();
        assert!(err.to_string().contains("no sample distribution"));
    }
}
