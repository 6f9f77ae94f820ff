// Weighted absolute-change costs

use super::{Aggregation, CostFunction, CostTerm};
use crate::action::FeatureDescriptor;
use crate::error::{RecourseError, Result};
use std::collections::BTreeMap;

/// Weighted absolute change, summed (L1) or maxed (L∞) across features
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCost {
    aggregation: Aggregation,
    default_weight: f64,
    weights: BTreeMap<String, f64>,
}

impl LinearCost {
    /// Weighted L1 cost with unit weights
    pub fn l1() -> Self {
        Self {
            aggregation: Aggregation::Total,
            default_weight: 1.0,
            weights: BTreeMap::new(),
        }
    }

    /// Weighted max cost with unit weights
    pub fn max() -> Self {
        Self {
            aggregation: Aggregation::Max,
            ..Self::l1()
        }
    }

    /// Override the weight of one feature
    pub fn with_weight(mut self, feature: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(feature.into(), weight);
        self
    }

    /// Weight applied to features without an override
    pub fn with_default_weight(mut self, weight: f64) -> Self {
        self.default_weight = weight;
        self
    }

    /// Effective weight for a feature
    pub fn weight(&self, feature: &str) -> f64 {
        self.weights
            .get(feature)
            .copied()
            .unwrap_or(self.default_weight)
    }
}

impl CostFunction for LinearCost {
    fn name(&self) -> &str {
        match self.aggregation {
            Aggregation::Total => "weighted_l1",
            Aggregation::Max => "weighted_max",
        }
    }

    fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    fn term(&self, feature: &FeatureDescriptor) -> Result<CostTerm> {
        let weight = self.weight(&feature.name);
        if !weight.is_finite() || weight <= 0.0 {
            return Err(RecourseError::cost_model(format!(
                "weight for '{}' must be positive and finite, got {}",
                feature.name, weight
            )));
        }
        Ok(CostTerm::Linear { weight })
    }

    fn contribution(&self, feature: &FeatureDescriptor, _value: f64, delta: f64) -> f64 {
        self.weight(&feature.name) * delta.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> Vec<FeatureDescriptor> {
        vec![
            FeatureDescriptor::continuous("income"),
            FeatureDescriptor::integer("open_accounts"),
        ]
    }

    #[test]
    fn test_l1_sums_weighted_changes() {
        let cost = LinearCost::l1().with_weight("income", 0.5);
        let total = cost.cost(&features(), &[100.0, 2.0], &[10.0, -2.0]);
        assert!((total - 7.0).abs() < 1e-12);
        assert_eq!(cost.name(), "weighted_l1");
    }

    #[test]
    fn test_max_takes_largest_term() {
        let cost = LinearCost::max().with_weight("open_accounts", 4.0);
        let total = cost.cost(&features(), &[100.0, 2.0], &[3.0, 1.0]);
        assert!((total - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_term_rejects_non_positive_weight() {
        let cost = LinearCost::l1().with_weight("income", 0.0);
        let err = cost.term(&features()[0]).unwrap_err();
        assert_eq!(err.kind(), "cost_model");

        let nan = LinearCost::l1().with_default_weight(f64::NAN);
        assert!(nan.term(&features()[1]).is_err());
    }

    #[test]
    fn test_term_reports_weight() {
        let cost = LinearCost::l1().with_default_weight(2.0);
        assert_eq!(
            cost.term(&features()[1]).unwrap(),
            CostTerm::Linear { weight: 2.0 }
        );
    }
}
