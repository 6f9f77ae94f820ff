// good_lp backend
//
// Translates a RecourseModel column-for-column into a good_lp problem. The pure
// Rust microlp engine is always available; CBC joins it with the `coin_cbc`
// feature.

use super::{MipSolver, SolveLimits, SolveStatus, SolverOutcome};
use crate::model::{Column, RecourseModel, Row, RowSense};
use good_lp::{
    variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    VariableDefinition,
};
use std::time::Instant;

/// Slack allowed on rows that reference no column
const EMPTY_ROW_EPS: f64 = 1e-9;

/// Engine behind [`GoodLp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpEngine {
    /// Pure Rust simplex with branch-and-bound on integer columns
    MicroLp,
    /// COIN-OR CBC
    #[cfg(feature = "coin_cbc")]
    CoinCbc,
}

impl LpEngine {
    /// Engine for a `solver_backend` identifier
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "good_lp" | "microlp" => Some(Self::MicroLp),
            #[cfg(feature = "coin_cbc")]
            "coin_cbc" | "cbc" => Some(Self::CoinCbc),
            _ => None,
        }
    }
}

/// [`MipSolver`] on top of `good_lp`
#[derive(Debug, Clone, Copy)]
pub struct GoodLp {
    engine: LpEngine,
}

impl Default for GoodLp {
    fn default() -> Self {
        Self::new(LpEngine::MicroLp)
    }
}

impl GoodLp {
    /// Backend running `engine`
    pub fn new(engine: LpEngine) -> Self {
        Self { engine }
    }

    /// Active engine
    pub fn engine(&self) -> LpEngine {
        self.engine
    }
}

fn definition(column: &Column) -> VariableDefinition {
    let mut def = variable();
    if column.kind.is_integral() {
        def = def.integer();
    }
    if column.lower.is_finite() {
        def = def.min(column.lower);
    }
    if column.upper.is_finite() {
        def = def.max(column.upper);
    }
    def
}

fn expression(row: &Row, vars: &[Variable]) -> Expression {
    let mut lhs = Expression::with_capacity(row.terms.len());
    for &(j, coefficient) in &row.terms {
        lhs.add_mul(coefficient, vars[j]);
    }
    lhs
}

/// A row without terms holds iff `0 sense rhs`
fn empty_row_holds(row: &Row) -> bool {
    match row.sense {
        RowSense::LessEqual => 0.0 <= row.rhs + EMPTY_ROW_EPS,
        RowSense::GreaterEqual => 0.0 >= row.rhs - EMPTY_ROW_EPS,
        RowSense::Equal => row.rhs.abs() <= EMPTY_ROW_EPS,
    }
}

fn infeasible(message: impl Into<String>) -> SolverOutcome {
    SolverOutcome {
        status: SolveStatus::Infeasible,
        assignment: None,
        objective: None,
        message: Some(message.into()),
        nodes: 0,
    }
}

impl MipSolver for GoodLp {
    fn name(&self) -> &'static str {
        match self.engine {
            LpEngine::MicroLp => "good_lp",
            #[cfg(feature = "coin_cbc")]
            LpEngine::CoinCbc => "coin_cbc",
        }
    }

    fn solve(&self, model: &RecourseModel, limits: &SolveLimits) -> SolverOutcome {
        if let Some(row) = model
            .rows()
            .iter()
            .find(|row| row.terms.is_empty() && !empty_row_holds(row))
        {
            return infeasible(format!("row {} cannot hold with no columns", row.name));
        }
        if let Some(column) = model.columns().iter().find(|c| c.lower > c.upper) {
            return infeasible(format!(
                "column {} has empty range [{}, {}]",
                column.name, column.lower, column.upper
            ));
        }

        let mut problem_vars = ProblemVariables::new();
        let vars: Vec<Variable> = model
            .columns()
            .iter()
            .map(|column| problem_vars.add(definition(column)))
            .collect();

        let mut objective = Expression::with_capacity(model.objective().len());
        for &(j, coefficient) in model.objective() {
            objective.add_mul(coefficient, vars[j]);
        }

        let rows = model.rows().iter().filter(|row| !row.terms.is_empty());
        let start = Instant::now();
        let solved: Result<Vec<f64>, ResolutionError> = match self.engine {
            LpEngine::MicroLp => {
                let mut problem = problem_vars.minimise(objective).using(good_lp::microlp);
                for row in rows {
                    problem = problem.with(constraint(row, &vars));
                }
                problem
                    .solve()
                    .map(|solution| vars.iter().map(|&v| solution.value(v)).collect())
            }
            #[cfg(feature = "coin_cbc")]
            LpEngine::CoinCbc => {
                let mut problem = problem_vars.minimise(objective).using(good_lp::coin_cbc);
                problem.set_parameter("log", "0");
                problem.set_parameter("seconds", &limits.time_limit.as_secs_f64().to_string());
                problem.set_parameter("ratioGap", &limits.mip_gap.to_string());
                for row in rows {
                    problem = problem.with(constraint(row, &vars));
                }
                problem
                    .solve()
                    .map(|solution| vars.iter().map(|&v| solution.value(v)).collect())
            }
        };
        let elapsed = start.elapsed();

        match solved {
            Ok(values) => {
                // microlp cannot be interrupted; a late answer is kept but not trusted as optimal
                let status = if elapsed > limits.time_limit {
                    SolveStatus::FeasibleSuboptimal
                } else {
                    SolveStatus::Optimal
                };
                SolverOutcome {
                    status,
                    objective: Some(model.objective_value(&values)),
                    assignment: Some(values),
                    message: (status == SolveStatus::FeasibleSuboptimal)
                        .then(|| format!("finished after the {:?} limit", limits.time_limit)),
                    nodes: 0,
                }
            }
            Err(ResolutionError::Infeasible) => infeasible("good_lp reports the model infeasible"),
            Err(ResolutionError::Unbounded) => {
                SolverOutcome::error("good_lp reports the model unbounded", 0)
            }
            Err(err) => SolverOutcome::error(err.to_string(), 0),
        }
    }
}

fn constraint(row: &Row, vars: &[Variable]) -> good_lp::Constraint {
    let lhs = expression(row, vars);
    match row.sense {
        RowSense::LessEqual => lhs.leq(row.rhs),
        RowSense::GreaterEqual => lhs.geq(row.rhs),
        RowSense::Equal => lhs.eq(row.rhs),
    }
}
