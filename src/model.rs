//! Mixed-integer model emitted by the builder
//!
//! A [`RecourseModel`] is built for exactly one individual, handed to the solver,
//! then dropped. Columns carry a [`ColumnRole`] so the reporter can decode an
//! assignment without knowing how the builder laid the model out.

use serde::{Deserialize, Serialize};

/// Integrality of a column
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Real-valued
    Continuous,
    /// Whole numbers
    Integer,
    /// 0 or 1
    Binary,
}

impl ColumnKind {
    /// True for integer and binary columns
    pub fn is_integral(self) -> bool {
        !matches!(self, Self::Continuous)
    }
}

/// What a column means in recourse terms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ColumnRole {
    /// Change applied to a feature
    Action {
        /// Feature index
        feature: usize,
    },
    /// Positive part of an action
    PositivePart {
        /// Feature index
        feature: usize,
    },
    /// Negative part of an action
    NegativePart {
        /// Feature index
        feature: usize,
    },
    /// Number of steps taken by a discrete feature
    StepCount {
        /// Feature index
        feature: usize,
    },
    /// Selection of one tabulated move
    GridChoice {
        /// Feature index
        feature: usize,
        /// Delta applied when selected
        delta: f64,
    },
    /// Set when a feature changes
    ChangeIndicator {
        /// Feature index
        feature: usize,
    },
    /// Upper bound on every per-feature cost
    MaxCost,
}

/// Decision variable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    /// Display name
    pub name: String,
    /// Integrality
    pub kind: ColumnKind,
    /// Lower bound; may be `-inf`
    pub lower: f64,
    /// Upper bound; may be `+inf`
    pub upper: f64,
    /// Meaning
    pub role: ColumnRole,
}

/// Relation between a row's activity and its right-hand side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowSense {
    /// `activity <= rhs`
    LessEqual,
    /// `activity >= rhs`
    GreaterEqual,
    /// `activity == rhs`
    Equal,
}

/// Linear constraint over columns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    /// Display name
    pub name: String,
    /// Sparse `(column, coefficient)` terms
    pub terms: Vec<(usize, f64)>,
    /// Sense
    pub sense: RowSense,
    /// Right-hand side
    pub rhs: f64,
}

impl Row {
    /// Left-hand side under `assignment`
    pub fn activity(&self, assignment: &[f64]) -> f64 {
        self.terms.iter().map(|&(j, a)| a * assignment[j]).sum()
    }

    /// True if the row holds within `tolerance`, scaled by the row's magnitude
    pub fn is_satisfied(&self, assignment: &[f64], tolerance: f64) -> bool {
        let activity = self.activity(assignment);
        let scale = 1.0
            + self.rhs.abs()
            + self
                .terms
                .iter()
                .map(|&(j, a)| (a * assignment[j]).abs())
                .fold(0.0, f64::max);
        let slack = tolerance * scale;
        match self.sense {
            RowSense::LessEqual => activity <= self.rhs + slack,
            RowSense::GreaterEqual => activity >= self.rhs - slack,
            RowSense::Equal => (activity - self.rhs).abs() <= slack,
        }
    }
}

/// Recourse MIP for one individual: minimize `objective · y` subject to rows and bounds
#[derive(Debug, Clone)]
pub struct RecourseModel {
    individual: Vec<f64>,
    columns: Vec<Column>,
    rows: Vec<Row>,
    objective: Vec<(usize, f64)>,
    action_columns: Vec<Option<usize>>,
}

impl RecourseModel {
    /// Empty model for the individual `x`
    pub fn new(individual: Vec<f64>) -> Self {
        let n = individual.len();
        Self {
            individual,
            columns: Vec::new(),
            rows: Vec::new(),
            objective: Vec::new(),
            action_columns: vec![None; n],
        }
    }

    /// Declare a column and return its index
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        kind: ColumnKind,
        lower: f64,
        upper: f64,
        role: ColumnRole,
    ) -> usize {
        let index = self.columns.len();
        if let ColumnRole::Action { feature } = role {
            self.action_columns[feature] = Some(index);
        }
        self.columns.push(Column {
            name: name.into(),
            kind,
            lower,
            upper,
            role,
        });
        index
    }

    /// Add a constraint row
    pub fn add_row(
        &mut self,
        name: impl Into<String>,
        terms: Vec<(usize, f64)>,
        sense: RowSense,
        rhs: f64,
    ) {
        self.rows.push(Row {
            name: name.into(),
            terms,
            sense,
            rhs,
        });
    }

    /// Add `coefficient * column` to the minimized objective
    pub fn add_objective_term(&mut self, column: usize, coefficient: f64) {
        if coefficient != 0.0 {
            self.objective.push((column, coefficient));
        }
    }

    /// Individual the model was built for
    pub fn individual(&self) -> &[f64] {
        &self.individual
    }

    /// Declared columns
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Constraint rows
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Sparse objective
    pub fn objective(&self) -> &[(usize, f64)] {
        &self.objective
    }

    /// Number of decision variables
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Number of constraints
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Action column of a feature; `None` for immutable features
    pub fn action_column(&self, feature: usize) -> Option<usize> {
        self.action_columns.get(feature).copied().flatten()
    }

    /// Indices of integer and binary columns
    pub fn integer_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind.is_integral())
            .map(|(j, _)| j)
            .collect()
    }

    /// Column lower bounds
    pub fn lower_bounds(&self) -> Vec<f64> {
        self.columns.iter().map(|c| c.lower).collect()
    }

    /// Column upper bounds
    pub fn upper_bounds(&self) -> Vec<f64> {
        self.columns.iter().map(|c| c.upper).collect()
    }

    /// Objective under `assignment`
    pub fn objective_value(&self, assignment: &[f64]) -> f64 {
        self.objective.iter().map(|&(j, c)| c * assignment[j]).sum()
    }

    /// First row violated by `assignment`, if any
    pub fn first_violated_row(&self, assignment: &[f64], tolerance: f64) -> Option<&Row> {
        self.rows
            .iter()
            .find(|row| !row.is_satisfied(assignment, tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_and_action_lookup() {
        let mut model = RecourseModel::new(vec![25.0, -50.0]);
        let a = model.add_column(
            "a[balance]",
            ColumnKind::Continuous,
            50.0,
            f64::INFINITY,
            ColumnRole::Action { feature: 1 },
        );
        let k = model.add_column(
            "k[balance]",
            ColumnKind::Integer,
            f64::NEG_INFINITY,
            f64::INFINITY,
            ColumnRole::StepCount { feature: 1 },
        );
        assert_eq!(model.n_columns(), 2);
        assert_eq!(model.action_column(1), Some(a));
        assert_eq!(model.action_column(0), None);
        assert_eq!(model.integer_columns(), vec![k]);
    }

    #[test]
    fn test_row_satisfaction() {
        let row = Row {
            name: "flip".into(),
            terms: vec![(0, 1.0), (1, 2.0)],
            sense: RowSense::GreaterEqual,
            rhs: 4.0,
        };
        assert!(row.is_satisfied(&[2.0, 1.0], 1e-9));
        assert!(!row.is_satisfied(&[1.0, 1.0], 1e-9));

        let eq = Row {
            sense: RowSense::Equal,
            ..row
        };
        assert!(eq.is_satisfied(&[2.0, 1.0], 1e-9));
        assert!(!eq.is_satisfied(&[2.0, 1.5], 1e-9));
    }

    #[test]
    fn test_objective_value() {
        let mut model = RecourseModel::new(vec![0.0]);
        let p = model.add_column(
            "pos",
            ColumnKind::Continuous,
            0.0,
            f64::INFINITY,
            ColumnRole::PositivePart { feature: 0 },
        );
        model.add_objective_term(p, 3.0);
        model.add_objective_term(p, 0.0);
        assert_eq!(model.objective().len(), 1);
        assert_eq!(model.objective_value(&[2.0]), 6.0);
    }
}
