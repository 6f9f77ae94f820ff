// lerapport - Result Reporter
//
// *Le Rapport* (The Report) - Decodes and re-checks solver assignments

use crate::action::{ActionConstraint, ActionSet};
use crate::classifier::{Decision, LinearClassifier};
use crate::cost::CostFunction;
use crate::error::{RecourseError, Result};
use crate::model::{ColumnRole, RecourseModel};
use crate::solver::SolveStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attempts at closing a round-off shortfall on the flip constraint
const SETTLE_ROUNDS: usize = 4;

fn apply(x: &[f64], actions: &[f64]) -> Vec<f64> {
    x.iter().zip(actions).map(|(v, d)| v + d).collect()
}

/// Delta of the most selected grid choice, per feature with a grid
fn selected_grid_moves(model: &RecourseModel, assignment: &[f64], n_features: usize) -> Vec<Option<f64>> {
    let mut best: Vec<Option<(f64, f64)>> = vec![None; n_features];
    for (column, &value) in model.columns().iter().zip(assignment) {
        if let ColumnRole::GridChoice { feature, delta } = column.role {
            let Some(slot) = best.get_mut(feature) else {
                continue;
            };
            if slot.map_or(true, |(weight, _)| value > weight) {
                *slot = Some((value, delta));
            }
        }
    }
    best.into_iter().map(|b| b.map(|(_, delta)| delta)).collect()
}

/// Minimum-cost action that flips a denial
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecourseResult {
    /// True cost of `actions`; never negative
    pub cost: f64,

    /// Always true for a returned result
    pub feasible: bool,

    /// Per-feature deltas in classifier order
    pub actions: Vec<f64>,

    /// `x + actions`
    pub new_x: Vec<f64>,

    /// Solver status
    pub status: SolveStatus,

    /// Solver objective for the assignment
    pub objective: f64,

    /// Feature names in classifier order
    pub feature_names: Vec<String>,

    /// Classifier score of `x`
    pub score_before: f64,

    /// Classifier score of `new_x`
    pub score_after: f64,
}

/// One changed feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureChange {
    /// Feature name
    pub name: String,
    /// Value before the action
    pub before: f64,
    /// Value after the action
    pub after: f64,
    /// Applied delta
    pub delta: f64,
}

impl RecourseResult {
    /// Features with a non-zero delta
    pub fn changes(&self) -> Vec<FeatureChange> {
        self.feature_names
            .iter()
            .zip(self.actions.iter().zip(&self.new_x))
            .filter(|&(_, (&delta, _))| delta != 0.0)
            .map(|(name, (&delta, &after))| FeatureChange {
                name: name.clone(),
                before: after - delta,
                after,
                delta,
            })
            .collect()
    }

    /// Names of features with a non-zero delta
    pub fn changed_features(&self) -> Vec<&str> {
        self.feature_names
            .iter()
            .zip(&self.actions)
            .filter(|&(_, &delta)| delta != 0.0)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// True if no feature changes
    pub fn is_zero_action(&self) -> bool {
        self.actions.iter().all(|&d| d == 0.0)
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RecourseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "recourse ({}) cost={:.6} score {:.6} -> {:.6}",
            self.status, self.cost, self.score_before, self.score_after
        )?;
        for change in self.changes() {
            writeln!(
                f,
                "  {}: {} -> {} ({:+})",
                change.name, change.before, change.after, change.delta
            )?;
        }
        Ok(())
    }
}

/// Turns a raw assignment into a [`RecourseResult`], re-checking it against the
/// descriptors and classifier rather than trusting the model.
pub struct ResultReporter<'a> {
    classifier: &'a LinearClassifier,
    action_set: &'a ActionSet,
    cost: &'a dyn CostFunction,
    tolerance: f64,
    margin: f64,
}

impl<'a> ResultReporter<'a> {
    /// Reporter for an aligned action set
    pub fn new(
        classifier: &'a LinearClassifier,
        action_set: &'a ActionSet,
        cost: &'a dyn CostFunction,
        tolerance: f64,
        margin: f64,
    ) -> Self {
        Self {
            classifier,
            action_set,
            cost,
            tolerance,
            margin,
        }
    }

    /// Decode, snap and re-check `assignment`
    pub fn build(
        &self,
        model: &RecourseModel,
        assignment: &[f64],
        status: SolveStatus,
    ) -> Result<RecourseResult> {
        self.check_model(model, assignment)?;

        let x = model.individual();
        let actions = self.settled_actions(model, assignment);
        let new_x = apply(x, &actions);

        self.check_actionability(&actions, &new_x)?;
        self.check_constraints(&actions, &new_x)?;

        let score_before = self.classifier.score(x);
        let score_after = self.classifier.score(&new_x);
        if self.classifier.predict(&new_x) != Decision::Approved || score_after < self.margin {
            return Err(RecourseError::inconsistent_solution(format!(
                "action leaves score at {} below margin {}",
                score_after, self.margin
            )));
        }

        let cost = self.cost.cost(self.action_set.features(), x, &actions);
        if !cost.is_finite() || cost < 0.0 {
            return Err(RecourseError::inconsistent_solution(format!(
                "{} cost of the action is {}",
                self.cost.name(),
                cost
            )));
        }

        let objective = model.objective_value(assignment);
        let slack = self.tolerance * (1.0 + objective.abs());
        let too_high = cost > objective + slack;
        let too_low = status == SolveStatus::Optimal && cost < objective - slack;
        if too_high || too_low {
            return Err(RecourseError::inconsistent_solution(format!(
                "{} cost {} disagrees with solver objective {}",
                self.cost.name(),
                cost,
                objective
            )));
        }

        Ok(RecourseResult {
            cost,
            feasible: true,
            actions,
            new_x,
            status,
            objective,
            feature_names: self
                .action_set
                .features()
                .iter()
                .map(|f| f.name.clone())
                .collect(),
            score_before,
            score_after,
        })
    }

    fn check_model(&self, model: &RecourseModel, assignment: &[f64]) -> Result<()> {
        if assignment.len() != model.n_columns() {
            return Err(RecourseError::inconsistent_solution(format!(
                "assignment has {} values for {} columns",
                assignment.len(),
                model.n_columns()
            )));
        }

        let integrality = self.tolerance.max(1e-6);
        for (column, &value) in model.columns().iter().zip(assignment) {
            if !value.is_finite() {
                return Err(RecourseError::inconsistent_solution(format!(
                    "column {} is {}",
                    column.name, value
                )));
            }
            let below = column.lower.is_finite()
                && value < column.lower - self.tolerance * (1.0 + column.lower.abs());
            let above = column.upper.is_finite()
                && value > column.upper + self.tolerance * (1.0 + column.upper.abs());
            if below || above {
                return Err(RecourseError::inconsistent_solution(format!(
                    "column {} = {} outside [{}, {}]",
                    column.name, value, column.lower, column.upper
                )));
            }
            if column.kind.is_integral() && (value - value.round()).abs() > integrality {
                return Err(RecourseError::inconsistent_solution(format!(
                    "column {} = {} is not integral",
                    column.name, value
                )));
            }
        }

        if let Some(row) = model.first_violated_row(assignment, self.tolerance) {
            return Err(RecourseError::inconsistent_solution(format!(
                "row {} violated: activity {} vs rhs {}",
                row.name,
                row.activity(assignment),
                row.rhs
            )));
        }
        Ok(())
    }

    /// True if the assignment passes the model checks but its decoded action,
    /// after settling, still leaves the individual short of the margin
    pub(crate) fn leaves_denied(&self, model: &RecourseModel, assignment: &[f64]) -> bool {
        if self.check_model(model, assignment).is_err() {
            return false;
        }
        let actions = self.settled_actions(model, assignment);
        let new_x = apply(model.individual(), &actions);
        self.classifier.predict(&new_x) != Decision::Approved
            || self.classifier.score(&new_x) < self.margin
    }

    fn settled_actions(&self, model: &RecourseModel, assignment: &[f64]) -> Vec<f64> {
        let grid = selected_grid_moves(model, assignment, self.action_set.len());
        let mut actions = self.decode(model, assignment, &grid);
        self.settle(model.individual(), &mut actions, &grid);
        actions
    }

    /// Read action columns and snap them to exact values
    ///
    /// Grid features take the delta of their selected choice verbatim, so a
    /// small but real move is never rounded away.
    fn decode(&self, model: &RecourseModel, assignment: &[f64], grid: &[Option<f64>]) -> Vec<f64> {
        self.action_set
            .features()
            .iter()
            .enumerate()
            .map(|(j, feature)| {
                if let Some(delta) = grid[j] {
                    return delta;
                }
                let Some(column) = model.action_column(j) else {
                    return 0.0;
                };
                let raw = assignment[column];
                let snapped = match feature.step_size() {
                    Some(step) => (raw / step).round() * step,
                    None => raw,
                };
                if snapped.abs() <= self.tolerance {
                    0.0
                } else {
                    snapped
                }
            })
            .collect()
    }

    /// Close a round-off shortfall on the flip constraint
    ///
    /// Shortfalls larger than the tolerance, scaled by the score's magnitude, are
    /// left alone for the flip check to reject.
    /// Only free continuous features are moved: no step, no grid, not part of a
    /// link, and not a currently unchanged member of a sparsity limit. Features
    /// that already move are preferred, then the largest coefficient.
    fn settle(&self, x: &[f64], actions: &mut [f64], grid: &[Option<f64>]) {
        let features = self.action_set.features();
        let weights = self.classifier.coefficients();
        let mut pinned = vec![false; features.len()];
        let mut counted = vec![false; features.len()];
        for constraint in self.action_set.constraints() {
            match constraint {
                ActionConstraint::Link { source, target, .. } => {
                    for name in [source, target] {
                        if let Some(j) = self.action_set.index_of(name) {
                            pinned[j] = true;
                        }
                    }
                }
                ActionConstraint::MaxChanges { features: members, .. } => {
                    for j in members.iter().filter_map(|n| self.action_set.index_of(n)) {
                        counted[j] = true;
                    }
                }
                ActionConstraint::OneHot { .. } => {}
            }
        }

        for _ in 0..SETTLE_ROUNDS {
            let score = self.classifier.score(&apply(x, actions));
            if score >= self.margin && score >= 0.0 {
                return;
            }
            let gap = self.margin.max(0.0) - score;
            let magnitude: f64 = weights
                .iter()
                .zip(x.iter().zip(actions.iter()))
                .map(|(w, (v, d))| w.abs() * (v.abs() + d.abs()))
                .sum();
            let scale = 1.0 + magnitude + self.classifier.intercept().abs() + self.margin.abs();
            if gap > self.tolerance * scale {
                return;
            }

            let candidate = features
                .iter()
                .enumerate()
                .filter(|&(j, f)| {
                    f.mutable
                        && f.step_size().is_none()
                        && grid[j].is_none()
                        && !pinned[j]
                        && weights[j] != 0.0
                        && (actions[j] != 0.0 || !counted[j])
                })
                .filter_map(|(j, f)| {
                    let w = weights[j];
                    let next = actions[j] + gap / w + w.signum() * f64::EPSILON * (1.0 + actions[j].abs());
                    let (lo, hi) = f.action_range(x[j]);
                    (next >= lo && next <= hi).then_some((j, next))
                })
                .max_by(|a, b| {
                    let moving = |j: usize| actions[j] != 0.0;
                    moving(a.0)
                        .cmp(&moving(b.0))
                        .then(weights[a.0].abs().total_cmp(&weights[b.0].abs()))
                });

            let Some((j, next)) = candidate else {
                return;
            };
            actions[j] = next;
        }
    }

    fn check_actionability(&self, actions: &[f64], new_x: &[f64]) -> Result<()> {
        for ((feature, &delta), &value) in self
            .action_set
            .features()
            .iter()
            .zip(actions)
            .zip(new_x)
        {
            if !feature.mutable {
                if delta != 0.0 {
                    return Err(RecourseError::inconsistent_solution(format!(
                        "immutable feature '{}' changed by {}",
                        feature.name, delta
                    )));
                }
                continue;
            }

            let (lower, upper) = feature.bounds();
            let below = lower.is_finite() && value < lower - self.tolerance * (1.0 + lower.abs());
            let above = upper.is_finite() && value > upper + self.tolerance * (1.0 + upper.abs());
            if below || above {
                return Err(RecourseError::inconsistent_solution(format!(
                    "feature '{}' ends at {} outside [{}, {}]",
                    feature.name, value, lower, upper
                )));
            }
            if !feature.direction.allows(delta, self.tolerance) {
                return Err(RecourseError::inconsistent_solution(format!(
                    "feature '{}' moved by {} against its direction",
                    feature.name, delta
                )));
            }
            if !feature.is_granular(delta, self.tolerance) {
                return Err(RecourseError::inconsistent_solution(format!(
                    "feature '{}' moved by {}, not a multiple of its step",
                    feature.name, delta
                )));
            }
        }
        Ok(())
    }

    fn check_constraints(&self, actions: &[f64], new_x: &[f64]) -> Result<()> {
        let index = |name: &str| self.action_set.index_of(name);

        for constraint in self.action_set.constraints() {
            match constraint {
                ActionConstraint::OneHot { features, .. } => {
                    let total: f64 = features
                        .iter()
                        .filter_map(|name| index(name))
                        .map(|j| new_x[j])
                        .sum();
                    if (total - 1.0).abs() > self.tolerance * features.len() as f64 {
                        return Err(RecourseError::inconsistent_solution(format!(
                            "{} sums to {} after the action",
                            constraint.label(),
                            total
                        )));
                    }
                }
                ActionConstraint::Link {
                    source,
                    target,
                    scale,
                } => {
                    let (Some(s), Some(t)) = (index(source), index(target)) else {
                        continue;
                    };
                    let expected = scale * actions[s];
                    if (actions[t] - expected).abs() > self.tolerance * (1.0 + expected.abs()) {
                        return Err(RecourseError::inconsistent_solution(format!(
                            "{} expects delta {} on '{}', got {}",
                            constraint.label(),
                            expected,
                            target,
                            actions[t]
                        )));
                    }
                }
                ActionConstraint::MaxChanges { features, limit } => {
                    let changed = features
                        .iter()
                        .filter_map(|name| index(name))
                        .filter(|&j| actions[j] != 0.0)
                        .count();
                    if changed > *limit {
                        return Err(RecourseError::inconsistent_solution(format!(
                            "{} allows {} changes, action makes {}",
                            constraint.label(),
                            limit,
                            changed
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FeatureDescriptor;
    use crate::classifier::Decision;
    use crate::cost::LinearCost;
    use crate::model::{ColumnKind, ColumnRole, RowSense};

    struct Fixture {
        classifier: LinearClassifier,
        action_set: ActionSet,
        cost: LinearCost,
    }

    fn fixture() -> Fixture {
        Fixture {
            classifier: LinearClassifier::from_pairs([("age", 0.0), ("balance", 1.0)], -10.0)
                .unwrap(),
            action_set: ActionSet::new(vec![
                FeatureDescriptor::integer("age").immutable(),
                FeatureDescriptor::continuous("balance").with_lower(0.0),
            ]),
            cost: LinearCost::l1(),
        }
    }

    fn balance_model() -> RecourseModel {
        balance_model_needing(60.0)
    }

    /// Columns: a, pos, neg for balance; the flip row asks for `needed`
    fn balance_model_needing(needed: f64) -> RecourseModel {
        let mut model = RecourseModel::new(vec![25.0, -50.0]);
        let a = model.add_column(
            "a[balance]",
            ColumnKind::Continuous,
            50.0,
            f64::INFINITY,
            ColumnRole::Action { feature: 1 },
        );
        let p = model.add_column(
            "pos[balance]",
            ColumnKind::Continuous,
            0.0,
            f64::INFINITY,
            ColumnRole::PositivePart { feature: 1 },
        );
        let n = model.add_column(
            "neg[balance]",
            ColumnKind::Continuous,
            0.0,
            f64::INFINITY,
            ColumnRole::NegativePart { feature: 1 },
        );
        model.add_row(
            "split[balance]",
            vec![(a, 1.0), (p, -1.0), (n, 1.0)],
            RowSense::Equal,
            0.0,
        );
        model.add_row("flip", vec![(a, 1.0)], RowSense::GreaterEqual, needed);
        model.add_objective_term(p, 1.0);
        model.add_objective_term(n, 1.0);
        model
    }

    fn reporter(f: &Fixture) -> ResultReporter<'_> {
        ResultReporter::new(&f.classifier, &f.action_set, &f.cost, 1e-6, 0.0)
    }

    #[test]
    fn test_builds_result_from_valid_assignment() {
        let f = fixture();
        let result = reporter(&f)
            .build(&balance_model(), &[60.0, 60.0, 0.0], SolveStatus::Optimal)
            .unwrap();
        assert_eq!(result.actions, vec![0.0, 60.0]);
        assert_eq!(result.new_x, vec![25.0, 10.0]);
        assert_eq!(result.cost, 60.0);
        assert_eq!(result.changed_features(), vec!["balance"]);
        assert!(result.score_after >= 0.0);
        assert!(result.score_before < 0.0);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let f = fixture();
        let err = reporter(&f)
            .build(&balance_model(), &[60.0], SolveStatus::Optimal)
            .unwrap_err();
        assert_eq!(err.kind(), "inconsistent_solution");
    }

    #[test]
    fn test_rejects_row_violation() {
        let f = fixture();
        let err = reporter(&f)
            .build(&balance_model(), &[60.0, 10.0, 0.0], SolveStatus::Optimal)
            .unwrap_err();
        assert!(err.to_string().contains("split[balance]"));
    }

    #[test]
    fn test_rejects_objective_mismatch_when_optimal() {
        let f = fixture();
        // pos and neg both inflated: objective 80, true cost 60
        let assignment = [60.0, 70.0, 10.0];
        let err = reporter(&f)
            .build(&balance_model(), &assignment, SolveStatus::Optimal)
            .unwrap_err();
        assert!(err.to_string().contains("disagrees"));

        let result = reporter(&f)
            .build(&balance_model(), &assignment, SolveStatus::FeasibleSuboptimal)
            .unwrap();
        assert_eq!(result.cost, 60.0);
        assert_eq!(result.objective, 80.0);
    }

    #[test]
    fn test_snaps_tiny_noise() {
        let f = fixture();
        let result = reporter(&f)
            .build(
                &balance_model(),
                &[60.0 + 1e-12, 60.0 + 1e-12, 0.0],
                SolveStatus::Optimal,
            )
            .unwrap();
        assert!((result.actions[1] - 60.0).abs() < 1e-9);
        assert_eq!(result.actions[0], 0.0);
    }

    #[test]
    fn test_round_off_shortfall_lands_on_approved_side() {
        let classifier =
            LinearClassifier::from_pairs([("age", 0.0), ("balance", 0.49)], -0.7).unwrap();
        let f = fixture();
        let reporter = ResultReporter::new(&classifier, &f.action_set, &f.cost, 1e-6, 0.0);
        let exact = 0.7 / 0.49;

        for ulps in 0..6 {
            let a = exact - ulps as f64 * f64::EPSILON * exact;
            let mut model = RecourseModel::new(vec![25.0, 0.0]);
            let col = model.add_column(
                "a[balance]",
                ColumnKind::Continuous,
                0.0,
                f64::INFINITY,
                ColumnRole::Action { feature: 1 },
            );
            let p = model.add_column(
                "pos[balance]",
                ColumnKind::Continuous,
                0.0,
                f64::INFINITY,
                ColumnRole::PositivePart { feature: 1 },
            );
            let n = model.add_column(
                "neg[balance]",
                ColumnKind::Continuous,
                0.0,
                f64::INFINITY,
                ColumnRole::NegativePart { feature: 1 },
            );
            model.add_row(
                "split[balance]",
                vec![(col, 1.0), (p, -1.0), (n, 1.0)],
                RowSense::Equal,
                0.0,
            );
            model.add_row("flip", vec![(col, 0.49)], RowSense::GreaterEqual, 0.7);
            model.add_objective_term(p, 1.0);
            model.add_objective_term(n, 1.0);

            let result = reporter.build(&model, &[a, a, 0.0], SolveStatus::Optimal).unwrap();
            assert_eq!(classifier.predict(&result.new_x), Decision::Approved);
            assert!(result.score_after >= 0.0);
            assert!((result.actions[1] - exact).abs() < 1e-12);
            assert!(!reporter.leaves_denied(&model, &[a, a, 0.0]));
        }
    }

    #[test]
    fn test_grid_move_is_decoded_from_selected_choice() {
        let classifier = LinearClassifier::from_pairs([("income", 1.0)], -20.0).unwrap();
        let action_set = ActionSet::new(vec![FeatureDescriptor::continuous("income")]);
        let cost = LinearCost::l1();
        let reporter = ResultReporter::new(&classifier, &action_set, &cost, 1e-6, 0.0);

        let x = 19.999_999_5;
        let delta = 20.0 - x;
        let mut model = RecourseModel::new(vec![x]);
        let a = model.add_column(
            "a[income]",
            ColumnKind::Continuous,
            f64::NEG_INFINITY,
            f64::INFINITY,
            ColumnRole::Action { feature: 0 },
        );
        let stay = model.add_column(
            "u[income][0]",
            ColumnKind::Binary,
            0.0,
            1.0,
            ColumnRole::GridChoice { feature: 0, delta: 0.0 },
        );
        let up = model.add_column(
            "u[income][1]",
            ColumnKind::Binary,
            0.0,
            1.0,
            ColumnRole::GridChoice { feature: 0, delta },
        );
        model.add_row("choose[income]", vec![(stay, 1.0), (up, 1.0)], RowSense::Equal, 1.0);
        model.add_row("grid[income]", vec![(a, 1.0), (up, -delta)], RowSense::Equal, 0.0);
        model.add_row("flip", vec![(a, 1.0)], RowSense::GreaterEqual, delta);
        model.add_objective_term(up, delta);

        // the action column sits inside the snapping tolerance
        let result = reporter
            .build(&model, &[delta, 0.0, 1.0], SolveStatus::Optimal)
            .unwrap();
        assert!(!result.is_zero_action());
        assert_eq!(result.actions[0], delta);
        assert_eq!(result.new_x[0], 20.0);
        assert!(result.cost > 0.0);
        assert_eq!(classifier.predict(&result.new_x), Decision::Approved);
    }

    #[test]
    fn test_rejects_action_that_stays_denied() {
        let f = fixture();
        // the model only asks for 59, so balance ends one short at 9
        let model = balance_model_needing(59.0);
        let assignment = [59.0, 59.0, 0.0];
        let err = reporter(&f)
            .build(&model, &assignment, SolveStatus::Optimal)
            .unwrap_err();
        assert_eq!(err.kind(), "inconsistent_solution");
        assert!(err.to_string().contains("below margin"));
        assert!(reporter(&f).leaves_denied(&model, &assignment));
        assert!(!reporter(&f).leaves_denied(&balance_model(), &[60.0, 60.0, 0.0]));
    }

    #[test]
    fn test_json_report() {
        let f = fixture();
        let result = reporter(&f)
            .build(&balance_model(), &[60.0, 60.0, 0.0], SolveStatus::Optimal)
            .unwrap();
        let json = result.to_json().unwrap();
        assert!(json.contains("\"status\": \"optimal\""));
        let back: RecourseResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert!(result.to_string().contains("balance: -50 -> 10"));
    }
}
