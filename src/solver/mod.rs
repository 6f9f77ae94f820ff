// lesolveur - Solver Adapter
//
// *Le Solveur* (The Solver) - Hands recourse models to a MIP backend under a time limit

mod branch;
mod lp;
mod simplex;

pub use branch::BranchAndBound;
pub use lp::{GoodLp, LpEngine};

use crate::config::SolverConfig;
use crate::error::{RecourseError, Result};
use crate::model::RecourseModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Final state of one solve
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Proven optimal within the configured gap
    Optimal,
    /// Feasible point found but the search stopped early
    FeasibleSuboptimal,
    /// No assignment satisfies the model
    Infeasible,
    /// Stopped before any feasible point was found
    Timeout,
    /// Backend failure
    SolverError,
}

impl SolveStatus {
    /// True if the status carries a usable assignment
    pub fn has_solution(self) -> bool {
        matches!(self, Self::Optimal | Self::FeasibleSuboptimal)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Optimal => "optimal",
            Self::FeasibleSuboptimal => "feasible_suboptimal",
            Self::Infeasible => "infeasible",
            Self::Timeout => "timeout",
            Self::SolverError => "solver_error",
        };
        f.write_str(s)
    }
}

/// Raw result of a backend solve
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    /// Final status
    pub status: SolveStatus,
    /// Column values, present with a solution
    pub assignment: Option<Vec<f64>>,
    /// Objective at `assignment`
    pub objective: Option<f64>,
    /// Backend diagnostic
    pub message: Option<String>,
    /// Explored search nodes
    pub nodes: usize,
}

impl SolverOutcome {
    /// Failure outcome with a diagnostic
    pub fn error(message: impl Into<String>, nodes: usize) -> Self {
        Self {
            status: SolveStatus::SolverError,
            assignment: None,
            objective: None,
            message: Some(message.into()),
            nodes,
        }
    }
}

/// Limits a backend must respect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveLimits {
    /// Wall-clock budget
    pub time_limit: Duration,
    /// Relative optimality gap
    pub mip_gap: f64,
    /// Node cap
    pub max_nodes: usize,
}

/// A mixed-integer backend
pub trait MipSolver: Send + Sync {
    /// Backend identifier
    fn name(&self) -> &'static str;

    /// Minimize the model's objective; never panics on solver trouble
    fn solve(&self, model: &RecourseModel, limits: &SolveLimits) -> SolverOutcome;
}

/// Backend selection plus limits
///
/// Holds no state between calls; one adapter serves any number of solves.
pub struct SolverAdapter {
    backend: Box<dyn MipSolver>,
    config: SolverConfig,
}

impl fmt::Debug for SolverAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverAdapter")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl SolverAdapter {
    /// Adapter for the backend named in `config`
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        let name = config.solver_backend.as_str();
        let backend: Box<dyn MipSolver> = if let Some(engine) = LpEngine::parse(name) {
            Box::new(GoodLp::new(engine))
        } else if matches!(name, "branch_and_bound" | "bnb") {
            Box::new(BranchAndBound::new())
        } else if matches!(name, "coin_cbc" | "cbc") {
            return Err(RecourseError::solver_adapter(
                name,
                "backend requires the coin_cbc cargo feature",
            ));
        } else {
            return Err(RecourseError::solver_adapter(name, "unknown solver backend"));
        };
        Ok(Self { backend, config })
    }

    /// Adapter around a caller-supplied backend
    pub fn with_backend(backend: Box<dyn MipSolver>, config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    /// Active backend identifier
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Configured settings
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve under `time_limit`, or the configured limit when `None`
    pub fn solve(&self, model: &RecourseModel, time_limit: Option<Duration>) -> SolverOutcome {
        let limits = SolveLimits {
            time_limit: time_limit.unwrap_or_else(|| self.config.time_limit()),
            mip_gap: self.config.mip_gap,
            max_nodes: self.config.max_nodes,
        };

        let start = Instant::now();
        let outcome = self.backend.solve(model, &limits);
        tracing::debug!(
            backend = self.backend.name(),
            status = %outcome.status,
            nodes = outcome.nodes,
            columns = model.n_columns(),
            rows = model.n_rows(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "solve finished"
        );
        outcome
    }

    /// Solve and turn every non-solution status into an error
    ///
    /// On success returns the status (optimal or suboptimal) and an assignment
    /// with one value per model column.
    pub fn solve_checked(
        &self,
        model: &RecourseModel,
        time_limit: Option<Duration>,
    ) -> Result<(SolveStatus, Vec<f64>)> {
        let limit = time_limit.unwrap_or_else(|| self.config.time_limit());
        let start = Instant::now();
        let outcome = self.solve(model, Some(limit));

        match outcome.status {
            SolveStatus::Optimal | SolveStatus::FeasibleSuboptimal => {
                let assignment = outcome.assignment.ok_or_else(|| {
                    RecourseError::solver_adapter(
                        self.backend.name(),
                        format!("{} status without an assignment", outcome.status),
                    )
                })?;
                if assignment.len() != model.n_columns() {
                    return Err(RecourseError::solver_adapter(
                        self.backend.name(),
                        format!(
                            "assignment has {} values for {} columns",
                            assignment.len(),
                            model.n_columns()
                        ),
                    ));
                }
                if outcome.status == SolveStatus::FeasibleSuboptimal {
                    tracing::warn!(
                        backend = self.backend.name(),
                        "returning suboptimal recourse: {}",
                        outcome.message.as_deref().unwrap_or("search stopped early")
                    );
                }
                Ok((outcome.status, assignment))
            }
            SolveStatus::Infeasible => Err(RecourseError::infeasible(
                "no action satisfies the constraints and flips the decision",
            )),
            SolveStatus::Timeout => Err(RecourseError::SolverTimeout {
                limit_secs: limit.as_secs_f64(),
                elapsed_secs: start.elapsed().as_secs_f64(),
            }),
            SolveStatus::SolverError => Err(RecourseError::solver_adapter(
                self.backend.name(),
                outcome
                    .message
                    .unwrap_or_else(|| "backend reported an error".to_string()),
            )),
        }
    }
}
