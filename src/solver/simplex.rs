// Dense two-phase simplex for LP relaxations
//
// Columns are shifted or split into non-negative standard variables, finite upper
// bounds become explicit rows, and Bland's rule keeps the pivoting finite.

use crate::model::{RecourseModel, RowSense};

const PIVOT_EPS: f64 = 1e-9;
const PHASE_ONE_EPS: f64 = 1e-7;
const MAX_PIVOTS: usize = 50_000;

/// Result of one LP relaxation
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LpOutcome {
    /// Optimal vertex in model column space
    Optimal {
        /// Column values
        values: Vec<f64>,
        /// Objective at `values`
        objective: f64,
    },
    /// Bounds and rows admit no point
    Infeasible,
    /// Objective decreases without limit
    Unbounded,
    /// Numerical trouble or pivot cap
    Failed(String),
}

/// How a model column maps onto non-negative standard variables
#[derive(Debug, Clone, Copy)]
enum Substitution {
    /// `y = offset + sign * t`
    Shifted { var: usize, offset: f64, sign: f64 },
    /// `y = t_pos - t_neg`
    Free { pos: usize, neg: usize },
}

struct StandardRow {
    coeffs: Vec<f64>,
    sense: RowSense,
    rhs: f64,
}

/// Solve the LP relaxation of `model` under column bounds `lower`/`upper`
pub(crate) fn solve_relaxation(model: &RecourseModel, lower: &[f64], upper: &[f64]) -> LpOutcome {
    let n = model.n_columns();
    let mut subs = Vec::with_capacity(n);
    let mut caps: Vec<(usize, f64)> = Vec::new();
    let mut n_std = 0usize;

    for j in 0..n {
        let (lo, hi) = (lower[j], upper[j]);
        if lo > hi + PIVOT_EPS {
            return LpOutcome::Infeasible;
        }
        if lo.is_finite() {
            if hi.is_finite() {
                caps.push((n_std, (hi - lo).max(0.0)));
            }
            subs.push(Substitution::Shifted {
                var: n_std,
                offset: lo,
                sign: 1.0,
            });
            n_std += 1;
        } else if hi.is_finite() {
            subs.push(Substitution::Shifted {
                var: n_std,
                offset: hi,
                sign: -1.0,
            });
            n_std += 1;
        } else {
            subs.push(Substitution::Free {
                pos: n_std,
                neg: n_std + 1,
            });
            n_std += 2;
        }
    }

    let mut rows = Vec::with_capacity(model.n_rows() + caps.len());
    for row in model.rows() {
        let mut coeffs = vec![0.0; n_std];
        let mut rhs = row.rhs;
        for &(j, a) in &row.terms {
            match subs[j] {
                Substitution::Shifted { var, offset, sign } => {
                    coeffs[var] += a * sign;
                    rhs -= a * offset;
                }
                Substitution::Free { pos, neg } => {
                    coeffs[pos] += a;
                    coeffs[neg] -= a;
                }
            }
        }
        rows.push(StandardRow {
            coeffs,
            sense: row.sense,
            rhs,
        });
    }
    for (var, cap) in caps {
        let mut coeffs = vec![0.0; n_std];
        coeffs[var] = 1.0;
        rows.push(StandardRow {
            coeffs,
            sense: RowSense::LessEqual,
            rhs: cap,
        });
    }

    let mut cost = vec![0.0; n_std];
    for &(j, c) in model.objective() {
        match subs[j] {
            Substitution::Shifted { var, sign, .. } => cost[var] += c * sign,
            Substitution::Free { pos, neg } => {
                cost[pos] += c;
                cost[neg] -= c;
            }
        }
    }

    let standard = match Tableau::solve(rows, &cost, n_std) {
        Ok(values) => values,
        Err(stop) => return stop,
    };

    let values: Vec<f64> = subs
        .iter()
        .enumerate()
        .map(|(j, sub)| {
            let y = match *sub {
                Substitution::Shifted { var, offset, sign } => offset + sign * standard[var],
                Substitution::Free { pos, neg } => standard[pos] - standard[neg],
            };
            clamp_to(y, lower[j], upper[j])
        })
        .collect();

    let objective = model.objective_value(&values);
    LpOutcome::Optimal { values, objective }
}

fn clamp_to(value: f64, lower: f64, upper: f64) -> f64 {
    let mut v = value;
    if lower.is_finite() && v < lower {
        v = lower;
    }
    if upper.is_finite() && v > upper {
        v = upper;
    }
    v
}

/// Dense tableau; column layout is `[standard | slack | artificial | rhs]`
struct Tableau {
    table: Vec<Vec<f64>>,
    basis: Vec<usize>,
    width: usize,
    artificial_start: usize,
    pivots: usize,
}

impl Tableau {
    fn solve(rows: Vec<StandardRow>, cost: &[f64], n_std: usize) -> Result<Vec<f64>, LpOutcome> {
        let rows: Vec<StandardRow> = rows
            .into_iter()
            .map(|mut row| {
                if row.rhs < 0.0 {
                    row.rhs = -row.rhs;
                    row.coeffs.iter_mut().for_each(|c| *c = -*c);
                    row.sense = match row.sense {
                        RowSense::LessEqual => RowSense::GreaterEqual,
                        RowSense::GreaterEqual => RowSense::LessEqual,
                        RowSense::Equal => RowSense::Equal,
                    };
                }
                row
            })
            .collect();

        let m = rows.len();
        let n_slack = rows.iter().filter(|r| r.sense != RowSense::Equal).count();
        let n_art = rows
            .iter()
            .filter(|r| r.sense != RowSense::LessEqual)
            .count();
        let artificial_start = n_std + n_slack;
        let width = artificial_start + n_art;

        let mut table = vec![vec![0.0; width + 1]; m];
        let mut basis = vec![0usize; m];
        let mut next_slack = n_std;
        let mut next_art = artificial_start;
        for (i, row) in rows.into_iter().enumerate() {
            table[i][..n_std].copy_from_slice(&row.coeffs);
            table[i][width] = row.rhs;
            match row.sense {
                RowSense::LessEqual => {
                    table[i][next_slack] = 1.0;
                    basis[i] = next_slack;
                    next_slack += 1;
                }
                RowSense::GreaterEqual => {
                    table[i][next_slack] = -1.0;
                    next_slack += 1;
                    table[i][next_art] = 1.0;
                    basis[i] = next_art;
                    next_art += 1;
                }
                RowSense::Equal => {
                    table[i][next_art] = 1.0;
                    basis[i] = next_art;
                    next_art += 1;
                }
            }
        }

        let mut tableau = Tableau {
            table,
            basis,
            width,
            artificial_start,
            pivots: 0,
        };

        // Phase one: minimize the sum of artificials.
        if n_art > 0 {
            let mut phase_one = vec![0.0; width + 1];
            for j in artificial_start..width {
                phase_one[j] = 1.0;
            }
            for i in 0..m {
                if tableau.basis[i] >= artificial_start {
                    for (k, value) in phase_one.iter_mut().enumerate() {
                        *value -= tableau.table[i][k];
                    }
                }
            }

            match tableau.optimize(&mut phase_one, width) {
                Ok(()) => {}
                Err(LpOutcome::Unbounded) => {
                    return Err(LpOutcome::Failed(
                        "phase one reported an unbounded ray".to_string(),
                    ))
                }
                Err(other) => return Err(other),
            }

            let scale = 1.0
                + tableau
                    .table
                    .iter()
                    .map(|row| row[width].abs())
                    .fold(0.0, f64::max);
            let infeasibility = -phase_one[width];
            if infeasibility > PHASE_ONE_EPS * scale {
                return Err(LpOutcome::Infeasible);
            }

            for r in 0..m {
                if tableau.basis[r] >= artificial_start {
                    if let Some(c) =
                        (0..artificial_start).find(|&j| tableau.table[r][j].abs() > PIVOT_EPS)
                    {
                        tableau.pivot(&mut phase_one, r, c);
                    }
                }
            }
        }

        // Phase two: the real objective, artificials barred from entering.
        let mut phase_two = vec![0.0; width + 1];
        phase_two[..n_std].copy_from_slice(cost);
        for i in 0..m {
            let b = tableau.basis[i];
            let cb = if b < n_std { cost[b] } else { 0.0 };
            if cb != 0.0 {
                for (k, value) in phase_two.iter_mut().enumerate() {
                    *value -= cb * tableau.table[i][k];
                }
            }
        }
        tableau.optimize(&mut phase_two, artificial_start)?;

        let mut values = vec![0.0; n_std];
        for (i, &b) in tableau.basis.iter().enumerate() {
            if b < n_std {
                values[b] = tableau.table[i][width].max(0.0);
            }
        }
        Ok(values)
    }

    /// Pivot until no column below `allowed` has a negative reduced cost
    fn optimize(&mut self, objective: &mut [f64], allowed: usize) -> Result<(), LpOutcome> {
        let rhs = self.width;
        loop {
            let Some(c) = (0..allowed).find(|&j| objective[j] < -PIVOT_EPS) else {
                return Ok(());
            };

            let mut leaving: Option<(usize, f64)> = None;
            for (i, row) in self.table.iter().enumerate() {
                if row[c] > PIVOT_EPS {
                    let ratio = row[rhs].max(0.0) / row[c];
                    leaving = match leaving {
                        None => Some((i, ratio)),
                        Some((li, lr)) => {
                            let better = ratio < lr - 1e-12
                                || ((ratio - lr).abs() <= 1e-12 && self.basis[i] < self.basis[li]);
                            if better {
                                Some((i, ratio))
                            } else {
                                Some((li, lr))
                            }
                        }
                    };
                }
            }

            let Some((r, _)) = leaving else {
                return Err(LpOutcome::Unbounded);
            };

            self.pivots += 1;
            if self.pivots > MAX_PIVOTS {
                return Err(LpOutcome::Failed(format!(
                    "simplex exceeded {} pivots",
                    MAX_PIVOTS
                )));
            }
            self.pivot(objective, r, c);
        }
    }

    fn pivot(&mut self, objective: &mut [f64], r: usize, c: usize) {
        let p = self.table[r][c];
        for value in self.table[r].iter_mut() {
            *value /= p;
        }
        let pivot_row = self.table[r].clone();

        for (i, row) in self.table.iter_mut().enumerate() {
            if i == r {
                continue;
            }
            let factor = row[c];
            if factor != 0.0 {
                for (value, pv) in row.iter_mut().zip(&pivot_row) {
                    *value -= factor * pv;
                }
                row[c] = 0.0;
            }
        }

        let factor = objective[c];
        if factor != 0.0 {
            for (value, pv) in objective.iter_mut().zip(&pivot_row) {
                *value -= factor * pv;
            }
            objective[c] = 0.0;
        }

        self.basis[r] = c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnKind, ColumnRole};

    fn continuous(model: &mut RecourseModel, lower: f64, upper: f64) -> usize {
        let feature = model.n_columns();
        model.add_column(
            format!("y{}", feature),
            ColumnKind::Continuous,
            lower,
            upper,
            ColumnRole::PositivePart { feature: 0 },
        )
    }

    fn solve(model: &RecourseModel) -> LpOutcome {
        solve_relaxation(model, &model.lower_bounds(), &model.upper_bounds())
    }

    #[test]
    fn test_minimizes_with_lower_bound_row() {
        // min y0 + y1  s.t.  y0 + 2 y1 >= 4,  y >= 0
        let mut model = RecourseModel::new(vec![0.0]);
        let y0 = continuous(&mut model, 0.0, f64::INFINITY);
        let y1 = continuous(&mut model, 0.0, f64::INFINITY);
        model.add_row("cover", vec![(y0, 1.0), (y1, 2.0)], RowSense::GreaterEqual, 4.0);
        model.add_objective_term(y0, 1.0);
        model.add_objective_term(y1, 1.0);

        match solve(&model) {
            LpOutcome::Optimal { values, objective } => {
                assert!((objective - 2.0).abs() < 1e-9);
                assert!(values[y0].abs() < 1e-9);
                assert!((values[y1] - 2.0).abs() < 1e-9);
            }
            other => panic!("expected optimum, got {other:?}"),
        }
    }

    #[test]
    fn test_free_column_split() {
        // min p + n  s.t.  a - p + n = 0,  a <= -5
        let mut model = RecourseModel::new(vec![0.0]);
        let a = continuous(&mut model, f64::NEG_INFINITY, -5.0);
        let p = continuous(&mut model, 0.0, f64::INFINITY);
        let n = continuous(&mut model, 0.0, f64::INFINITY);
        model.add_row("split", vec![(a, 1.0), (p, -1.0), (n, 1.0)], RowSense::Equal, 0.0);
        model.add_objective_term(p, 1.0);
        model.add_objective_term(n, 1.0);

        match solve(&model) {
            LpOutcome::Optimal { values, objective } => {
                assert!((objective - 5.0).abs() < 1e-9);
                assert!((values[a] + 5.0).abs() < 1e-9);
                assert!((values[n] - 5.0).abs() < 1e-9);
            }
            other => panic!("expected optimum, got {other:?}"),
        }
    }

    #[test]
    fn test_detects_infeasible_rows() {
        let mut model = RecourseModel::new(vec![0.0]);
        let y = continuous(&mut model, 0.0, 1.0);
        model.add_row("too_high", vec![(y, 1.0)], RowSense::GreaterEqual, 2.0);
        assert_eq!(solve(&model), LpOutcome::Infeasible);
    }

    #[test]
    fn test_detects_crossed_bounds() {
        let mut model = RecourseModel::new(vec![0.0]);
        continuous(&mut model, 2.0, 1.0);
        assert_eq!(solve(&model), LpOutcome::Infeasible);
    }

    #[test]
    fn test_empty_row_with_positive_rhs_is_infeasible() {
        let mut model = RecourseModel::new(vec![0.0]);
        model.add_row("flip", Vec::new(), RowSense::GreaterEqual, 3.0);
        assert_eq!(solve(&model), LpOutcome::Infeasible);
    }

    #[test]
    fn test_detects_unbounded_objective() {
        let mut model = RecourseModel::new(vec![0.0]);
        let y = continuous(&mut model, f64::NEG_INFINITY, f64::INFINITY);
        model.add_objective_term(y, 1.0);
        assert_eq!(solve(&model), LpOutcome::Unbounded);
    }

    #[test]
    fn test_equality_with_redundant_row() {
        // y0 + y1 = 2 twice; min y0 with y1 <= 1.5
        let mut model = RecourseModel::new(vec![0.0]);
        let y0 = continuous(&mut model, 0.0, f64::INFINITY);
        let y1 = continuous(&mut model, 0.0, 1.5);
        for name in ["sum_a", "sum_b"] {
            model.add_row(name, vec![(y0, 1.0), (y1, 1.0)], RowSense::Equal, 2.0);
        }
        model.add_objective_term(y0, 1.0);

        match solve(&model) {
            LpOutcome::Optimal { values, objective } => {
                assert!((objective - 0.5).abs() < 1e-9);
                assert!((values[y1] - 1.5).abs() < 1e-9);
            }
            other => panic!("expected optimum, got {other:?}"),
        }
    }
}
