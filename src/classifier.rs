// Linear classifier collaborator

use crate::error::{RecourseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Outcome of the classifier on one individual
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Score at or above zero
    Approved,
    /// Score below zero
    Denied,
}

/// Fitted linear classifier: `score(x) = coefficients · x + intercept`
///
/// A score of zero or more is the approved class. The coefficients are read-only
/// once the classifier is handed to a builder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearClassifier {
    feature_names: Vec<String>,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearClassifier {
    /// Create a classifier from ordered feature names and matching coefficients
    pub fn new(
        feature_names: Vec<String>,
        coefficients: Vec<f64>,
        intercept: f64,
    ) -> Result<Self> {
        if feature_names.len() != coefficients.len() {
            return Err(RecourseError::configuration(format!(
                "classifier has {} feature names but {} coefficients",
                feature_names.len(),
                coefficients.len()
            )));
        }

        let mut seen = HashSet::new();
        for name in &feature_names {
            if !seen.insert(name.as_str()) {
                return Err(RecourseError::configuration(format!(
                    "classifier feature '{}' appears more than once",
                    name
                )));
            }
        }

        if let Some((name, value)) = feature_names
            .iter()
            .zip(&coefficients)
            .find(|(_, value)| !value.is_finite())
        {
            return Err(RecourseError::configuration(format!(
                "coefficient for '{}' is not finite ({})",
                name, value
            )));
        }

        if !intercept.is_finite() {
            return Err(RecourseError::configuration(format!(
                "intercept is not finite ({})",
                intercept
            )));
        }

        Ok(Self {
            feature_names,
            coefficients,
            intercept,
        })
    }

    /// Create a classifier from `(name, coefficient)` pairs
    pub fn from_pairs<I, S>(pairs: I, intercept: f64) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let (names, coefficients): (Vec<String>, Vec<f64>) = pairs
            .into_iter()
            .map(|(name, coef)| (name.into(), coef))
            .unzip();
        Self::new(names, coefficients, intercept)
    }

    /// Ordered feature names expected by the classifier
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Coefficient vector aligned with [`Self::feature_names`]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Intercept term
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    /// Decision score for `x`
    pub fn score(&self, x: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .zip(x)
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.intercept
    }

    /// Classify `x`
    pub fn predict(&self, x: &[f64]) -> Decision {
        if self.score(x) >= 0.0 {
            Decision::Approved
        } else {
            Decision::Denied
        }
    }

    /// True when `x` falls on the negative side of the boundary
    pub fn is_denied(&self, x: &[f64]) -> bool {
        self.predict(x) == Decision::Denied
    }

    /// Sum of absolute coefficients, used to scale score tolerances
    pub fn coefficient_norm(&self) -> f64 {
        self.coefficients.iter().map(|w| w.abs()).sum()
    }
}
