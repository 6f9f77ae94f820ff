// Depth-first branch-and-bound over simplex relaxations
//
// Fallback backend (`solver_backend = "branch_and_bound"`). Unlike the good_lp
// engines it honours `max_nodes` and stops at the time limit mid-search.

use super::simplex::{solve_relaxation, LpOutcome};
use super::{MipSolver, SolveLimits, SolveStatus, SolverOutcome};
use crate::model::RecourseModel;
use std::time::Instant;

const INTEGRALITY_TOL: f64 = 1e-6;

/// Dependency-free MIP backend
///
/// Explores nodes depth-first, nearer branch first, and prunes against the
/// incumbent with the configured relative gap. Stops early on the time limit or
/// node cap; whatever incumbent exists at that point is reported as suboptimal.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchAndBound;

struct Node {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

struct Incumbent {
    values: Vec<f64>,
    objective: f64,
}

impl BranchAndBound {
    /// New backend
    pub fn new() -> Self {
        Self
    }

    /// Fix integer columns at their rounded values and re-solve for the continuous rest
    fn polish(
        model: &RecourseModel,
        integers: &[usize],
        values: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Option<(Vec<f64>, f64)> {
        let mut lo = lower.to_vec();
        let mut hi = upper.to_vec();
        for &j in integers {
            let v = values[j].round();
            lo[j] = v;
            hi[j] = v;
        }
        match solve_relaxation(model, &lo, &hi) {
            LpOutcome::Optimal { values, objective } => Some((values, objective)),
            _ => None,
        }
    }
}

fn most_fractional(values: &[f64], integers: &[usize]) -> Option<(usize, f64)> {
    integers
        .iter()
        .map(|&j| {
            let v = values[j];
            (j, v, (v - v.round()).abs())
        })
        .filter(|&(_, _, frac)| frac > INTEGRALITY_TOL)
        .max_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(j, v, _)| (j, v))
}

impl MipSolver for BranchAndBound {
    fn name(&self) -> &'static str {
        "branch_and_bound"
    }

    fn solve(&self, model: &RecourseModel, limits: &SolveLimits) -> SolverOutcome {
        let start = Instant::now();
        let integers = model.integer_columns();

        let mut root_lower = model.lower_bounds();
        let mut root_upper = model.upper_bounds();
        for &j in &integers {
            root_lower[j] = root_lower[j].ceil();
            root_upper[j] = root_upper[j].floor();
        }

        let mut stack = vec![Node {
            lower: root_lower,
            upper: root_upper,
        }];
        let mut incumbent: Option<Incumbent> = None;
        let mut nodes = 0usize;
        let mut exhausted = true;

        while let Some(node) = stack.pop() {
            if start.elapsed() >= limits.time_limit || nodes >= limits.max_nodes {
                exhausted = false;
                break;
            }
            nodes += 1;

            let (values, objective) = match solve_relaxation(model, &node.lower, &node.upper) {
                LpOutcome::Optimal { values, objective } => (values, objective),
                LpOutcome::Infeasible => continue,
                LpOutcome::Unbounded => {
                    return SolverOutcome::error("relaxation is unbounded", nodes);
                }
                LpOutcome::Failed(message) => {
                    return SolverOutcome::error(message, nodes);
                }
            };

            if let Some(best) = &incumbent {
                let cutoff = best.objective - f64::max(1e-9, limits.mip_gap * best.objective.abs());
                if objective >= cutoff {
                    continue;
                }
            }

            match most_fractional(&values, &integers) {
                None => {
                    let (values, objective) =
                        Self::polish(model, &integers, &values, &node.lower, &node.upper)
                            .unwrap_or((values, objective));
                    let improves = incumbent
                        .as_ref()
                        .map_or(true, |best| objective < best.objective);
                    if improves {
                        tracing::trace!(nodes, objective, "new incumbent");
                        incumbent = Some(Incumbent { values, objective });
                    }
                }
                Some((j, v)) => {
                    let floor = v.floor();
                    let mut down = Node {
                        lower: node.lower.clone(),
                        upper: node.upper.clone(),
                    };
                    down.upper[j] = floor;
                    let mut up = node;
                    up.lower[j] = floor + 1.0;

                    // nearer side explored first
                    if v - floor < 0.5 {
                        stack.push(up);
                        stack.push(down);
                    } else {
                        stack.push(down);
                        stack.push(up);
                    }
                }
            }
        }

        let elapsed = start.elapsed();
        match (incumbent, exhausted) {
            (Some(best), true) => SolverOutcome {
                status: SolveStatus::Optimal,
                assignment: Some(best.values),
                objective: Some(best.objective),
                message: None,
                nodes,
            },
            (Some(best), false) => SolverOutcome {
                status: SolveStatus::FeasibleSuboptimal,
                assignment: Some(best.values),
                objective: Some(best.objective),
                message: Some(format!(
                    "search stopped after {} nodes in {:.3}s",
                    nodes,
                    elapsed.as_secs_f64()
                )),
                nodes,
            },
            (None, true) => SolverOutcome {
                status: SolveStatus::Infeasible,
                assignment: None,
                objective: None,
                message: None,
                nodes,
            },
            (None, false) => SolverOutcome {
                status: SolveStatus::Timeout,
                assignment: None,
                objective: None,
                message: Some(format!(
                    "no feasible point after {} nodes in {:.3}s",
                    nodes,
                    elapsed.as_secs_f64()
                )),
                nodes,
            },
        }
    }
}
