// lebatisseur - Recourse Problem Builder
//
// *Le Bâtisseur* (The Builder) - Turns one denied individual into a mixed-integer program

use crate::action::{ActionConstraint, ActionSet, FeatureDescriptor, FeatureType};
use crate::classifier::LinearClassifier;
use crate::config::RecourseConfig;
use crate::cost::{Aggregation, CostFunction, CostTerm};
use crate::error::{RecourseError, Result};
use crate::model::{ColumnKind, ColumnRole, RecourseModel, RowSense};
use crate::report::{RecourseResult, ResultReporter};
use crate::solver::{SolveStatus, SolverAdapter};
use std::sync::Arc;
use std::time::Instant;

/// Per-feature linearization, fixed at construction
#[derive(Debug, Clone, PartialEq)]
enum FeaturePlan {
    /// Immutable: no column
    Fixed,
    /// `weight * |delta|` through a positive/negative split
    Linear { weight: f64, step: Option<f64> },
    /// Choice among tabulated targets
    Grid { targets: Vec<f64>, step: Option<f64> },
}

impl FeaturePlan {
    fn n_columns(&self) -> usize {
        match self {
            FeaturePlan::Fixed => 0,
            // action, positive part, negative part, optional step count
            FeaturePlan::Linear { step, .. } => 3 + usize::from(step.is_some()),
            // action plus one binary per target and one for staying put
            FeaturePlan::Grid { targets, .. } => 2 + targets.len(),
        }
    }
}

/// Builds and solves the minimum-cost recourse problem for one individual at a time
///
/// Construction fixes everything that does not depend on the individual: the
/// aligned action set, each feature's cost linearization and the column count.
/// [`RecourseBuilder::set_x`] then supplies the individual and
/// [`RecourseBuilder::fit`] solves for it.
///
/// # Example
///
/// ```
/// use lerecours::{ActionSet, FeatureDescriptor, LinearClassifier, LinearCost, RecourseBuilder, RecourseConfig};
/// use std::sync::Arc;
///
/// let classifier = LinearClassifier::from_pairs([("age", 0.0), ("balance", 1.0)], -10.0)?;
/// let action_set = ActionSet::new(vec![
///     FeatureDescriptor::integer("age").immutable(),
///     FeatureDescriptor::continuous("balance").with_lower(0.0),
/// ]);
///
/// let builder = RecourseBuilder::initialize(
///     classifier,
///     &action_set,
///     Arc::new(LinearCost::l1()),
///     RecourseConfig::default(),
///     &[25.0, -50.0],
/// )?;
///
/// let result = builder.fit()?;
/// assert!((result.new_x[1] - 10.0).abs() < 1e-6);
/// # Ok::<(), lerecours::RecourseError>(())
/// ```
#[derive(Debug)]
pub struct RecourseBuilder {
    classifier: LinearClassifier,
    action_set: ActionSet,
    cost: Arc<dyn CostFunction>,
    config: RecourseConfig,
    solver: SolverAdapter,
    plans: Vec<FeaturePlan>,
    tracked: Vec<bool>,
    n_variables: usize,
    x: Option<Vec<f64>>,
}

impl RecourseBuilder {
    /// Validate and align the inputs and fix the model layout
    pub fn new(
        classifier: LinearClassifier,
        action_set: &ActionSet,
        cost: Arc<dyn CostFunction>,
        config: RecourseConfig,
    ) -> Result<Self> {
        config.validate()?;
        if !classifier.intercept().is_finite()
            || classifier.coefficients().iter().any(|w| !w.is_finite())
        {
            return Err(RecourseError::configuration(
                "classifier coefficients and intercept must be finite",
            ));
        }

        action_set.validate()?;
        let action_set = action_set.align(classifier.feature_names())?;

        let mut plans = Vec::with_capacity(action_set.len());
        for feature in action_set.features() {
            plans.push(Self::plan_for(feature, cost.as_ref())?);
        }

        let mut tracked = vec![false; action_set.len()];
        for constraint in action_set.constraints() {
            if let ActionConstraint::MaxChanges { features, .. } = constraint {
                for name in features {
                    if let Some(j) = action_set.index_of(name) {
                        tracked[j] = action_set.features()[j].mutable;
                    }
                }
            }
        }

        let n_mutable = action_set.n_mutable();
        let n_variables = plans.iter().map(FeaturePlan::n_columns).sum::<usize>()
            + tracked.iter().filter(|&&t| t).count()
            + usize::from(cost.aggregation() == Aggregation::Max && n_mutable > 0);

        let solver = SolverAdapter::new(config.solver.clone())?;

        tracing::debug!(
            features = action_set.len(),
            mutable = n_mutable,
            n_variables,
            cost = cost.name(),
            backend = solver.backend_name(),
            "recourse builder ready"
        );

        Ok(Self {
            classifier,
            action_set,
            cost,
            config,
            solver,
            plans,
            tracked,
            n_variables,
            x: None,
        })
    }

    /// [`Self::new`] followed by [`Self::set_x`] and the denial check
    pub fn initialize(
        classifier: LinearClassifier,
        action_set: &ActionSet,
        cost: Arc<dyn CostFunction>,
        config: RecourseConfig,
        individual: &[f64],
    ) -> Result<Self> {
        let mut builder = Self::new(classifier, action_set, cost, config)?;
        builder.set_x(individual)?;
        builder.ensure_denied(individual)?;
        Ok(builder)
    }

    /// Replace the solver adapter, e.g. with a custom backend
    pub fn with_solver(mut self, solver: SolverAdapter) -> Self {
        self.solver = solver;
        self
    }

    fn plan_for(feature: &FeatureDescriptor, cost: &dyn CostFunction) -> Result<FeaturePlan> {
        if !feature.mutable {
            return Ok(FeaturePlan::Fixed);
        }
        let step = feature.step_size();
        match cost.term(feature)? {
            CostTerm::Linear { weight } => {
                if !weight.is_finite() || weight <= 0.0 {
                    return Err(RecourseError::cost_model(format!(
                        "weight for '{}' must be positive and finite, got {}",
                        feature.name, weight
                    )));
                }
                Ok(FeaturePlan::Linear { weight, step })
            }
            CostTerm::Grid { targets } => {
                if targets.iter().any(|t| !t.is_finite()) {
                    return Err(RecourseError::cost_model(format!(
                        "grid for '{}' contains non-finite targets",
                        feature.name
                    )));
                }
                Ok(FeaturePlan::Grid { targets, step })
            }
        }
    }

    /// Supply the individual
    ///
    /// On failure the builder is left without an individual.
    pub fn set_x(&mut self, x: &[f64]) -> Result<()> {
        self.x = None;
        self.check_individual(x)?;
        self.x = Some(x.to_vec());
        Ok(())
    }

    fn check_individual(&self, x: &[f64]) -> Result<()> {
        if x.len() != self.action_set.len() {
            return Err(RecourseError::alignment_message(format!(
                "individual has {} values, action set describes {} features",
                x.len(),
                self.action_set.len()
            )));
        }
        for (feature, &value) in self.action_set.features().iter().zip(x) {
            if !value.is_finite() {
                return Err(RecourseError::invalid_individual(format!(
                    "value of '{}' is {}",
                    feature.name, value
                )));
            }
            let fits_type = match feature.feature_type {
                FeatureType::Continuous => true,
                FeatureType::Integer => value.fract() == 0.0,
                FeatureType::Binary | FeatureType::Categorical => value == 0.0 || value == 1.0,
            };
            if !fits_type {
                return Err(RecourseError::invalid_individual(format!(
                    "value {} of '{}' is not a valid {} value",
                    value, feature.name, feature.feature_type
                )));
            }
        }
        Ok(())
    }

    /// Drop the current individual
    pub fn clear_x(&mut self) {
        self.x = None;
    }

    /// Current individual, if set
    pub fn x(&self) -> Option<&[f64]> {
        self.x.as_deref()
    }

    /// True if an individual is set and currently denied
    pub fn is_ready(&self) -> bool {
        self.x
            .as_deref()
            .is_some_and(|x| self.classifier.is_denied(x))
    }

    /// Number of decision variables in every model this builder emits
    pub fn n_variables(&self) -> usize {
        self.n_variables
    }

    /// Action set in classifier order
    pub fn action_set(&self) -> &ActionSet {
        &self.action_set
    }

    /// Classifier
    pub fn classifier(&self) -> &LinearClassifier {
        &self.classifier
    }

    /// Cost function
    pub fn cost_function(&self) -> &Arc<dyn CostFunction> {
        &self.cost
    }

    /// Settings
    pub fn config(&self) -> &RecourseConfig {
        &self.config
    }

    fn ensure_denied(&self, x: &[f64]) -> Result<f64> {
        let score = self.classifier.score(x);
        if !self.classifier.is_denied(x) {
            return Err(RecourseError::not_denied(
                format!("individual is already approved (score {})", score),
                Some(score),
            ));
        }
        Ok(score)
    }

    /// Find the minimum-cost action that flips the current individual's denial
    pub fn fit(&self) -> Result<RecourseResult> {
        let x = self
            .x
            .as_deref()
            .ok_or_else(|| RecourseError::not_denied("no individual has been set", None))?;
        self.solve_for(x)
    }

    /// Fit for `x` without replacing the stored individual
    pub fn fit_individual(&self, x: &[f64]) -> Result<RecourseResult> {
        self.check_individual(x)?;
        self.solve_for(x)
    }

    /// Fit every row of `individuals` independently
    ///
    /// Results keep the input order. With the `parallel` feature rows are solved
    /// on the rayon pool.
    pub fn fit_batch(&self, individuals: &[Vec<f64>]) -> Vec<Result<RecourseResult>> {
        let start = Instant::now();

        #[cfg(feature = "parallel")]
        let results: Vec<Result<RecourseResult>> = {
            use rayon::prelude::*;
            individuals
                .par_iter()
                .map(|x| self.fit_individual(x))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<RecourseResult>> = individuals
            .iter()
            .map(|x| self.fit_individual(x))
            .collect();

        let solved = results.iter().filter(|r| r.is_ok()).count();
        let not_denied = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_not_denied()))
            .count();
        tracing::info!(
            individuals = individuals.len(),
            solved,
            already_approved = not_denied,
            failed = individuals.len() - solved - not_denied,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch recourse finished"
        );

        results
    }

    fn solve_for(&self, x: &[f64]) -> Result<RecourseResult> {
        let score = self.ensure_denied(x)?;

        let reporter = ResultReporter::new(
            &self.classifier,
            &self.action_set,
            self.cost.as_ref(),
            self.config.tolerance,
            self.config.flip_margin,
        );

        let (model, status, assignment) = self.solve_model(x, 0.0, score)?;
        let result = match reporter.build(&model, &assignment, status) {
            Err(err) if reporter.leaves_denied(&model, &assignment) => {
                let clearance =
                    self.config.tolerance * (1.0 + self.classifier.coefficient_norm());
                tracing::debug!(clearance, "action fell short of the boundary, re-solving");
                let (model, status, assignment) = self.solve_model(x, clearance, score)?;
                reporter.build(&model, &assignment, status).map_err(|_| err)?
            }
            built => built?,
        };

        tracing::debug!(
            status = %result.status,
            cost = result.cost,
            changed = result.changed_features().len(),
            "recourse found"
        );
        Ok(result)
    }

    fn solve_model(
        &self,
        x: &[f64],
        clearance: f64,
        score: f64,
    ) -> Result<(RecourseModel, SolveStatus, Vec<f64>)> {
        let model = self.emit_model(x, clearance)?;
        tracing::debug!(
            columns = model.n_columns(),
            rows = model.n_rows(),
            score,
            clearance,
            "built recourse model"
        );

        match self.solver.solve_checked(&model, None) {
            Ok((status, assignment)) => Ok((model, status, assignment)),
            Err(err) => {
                if let RecourseError::SolverTimeout { limit_secs, .. } = &err {
                    tracing::warn!(limit_secs, "recourse solve timed out without an action");
                }
                Err(err)
            }
        }
    }

    /// Emit the mixed-integer model for `x`
    ///
    /// `x` must be aligned with the action set; [`Self::fit`] calls this with the
    /// validated individual.
    pub fn build_model(&self, x: &[f64]) -> Result<RecourseModel> {
        self.emit_model(x, 0.0)
    }

    /// Model whose flip row demands `clearance` beyond the margin
    fn emit_model(&self, x: &[f64], clearance: f64) -> Result<RecourseModel> {
        if x.len() != self.action_set.len() {
            return Err(RecourseError::alignment_message(format!(
                "individual has {} values, action set describes {} features",
                x.len(),
                self.action_set.len()
            )));
        }

        let features = self.action_set.features();
        let mut model = RecourseModel::new(x.to_vec());
        let mut cost_terms: Vec<Vec<(usize, f64)>> = Vec::new();

        for (j, (feature, plan)) in features.iter().zip(&self.plans).enumerate() {
            let (lo, hi) = feature.action_range(x[j]);
            match plan {
                FeaturePlan::Fixed => {}
                FeaturePlan::Linear { weight, step } => {
                    let name = &feature.name;
                    let a = model.add_column(
                        format!("a[{}]", name),
                        ColumnKind::Continuous,
                        lo,
                        hi,
                        ColumnRole::Action { feature: j },
                    );
                    let pos = model.add_column(
                        format!("pos[{}]", name),
                        ColumnKind::Continuous,
                        0.0,
                        f64::INFINITY,
                        ColumnRole::PositivePart { feature: j },
                    );
                    let neg = model.add_column(
                        format!("neg[{}]", name),
                        ColumnKind::Continuous,
                        0.0,
                        f64::INFINITY,
                        ColumnRole::NegativePart { feature: j },
                    );
                    model.add_row(
                        format!("split[{}]", name),
                        vec![(a, 1.0), (pos, -1.0), (neg, 1.0)],
                        RowSense::Equal,
                        0.0,
                    );
                    if let Some(s) = step {
                        Self::add_step_count(&mut model, name, j, a, *s, lo, hi);
                    }
                    cost_terms.push(vec![(pos, *weight), (neg, *weight)]);
                }
                FeaturePlan::Grid { targets, step } => {
                    let terms = self.add_grid(&mut model, feature, j, x[j], targets, *step, lo, hi)?;
                    cost_terms.push(terms);
                }
            }
        }

        self.add_change_indicators(&mut model, x);
        self.add_cross_feature_rows(&mut model, x);

        let flip: Vec<(usize, f64)> = features
            .iter()
            .enumerate()
            .filter_map(|(j, _)| {
                let w = self.classifier.coefficients()[j];
                model.action_column(j).filter(|_| w != 0.0).map(|a| (a, w))
            })
            .collect();
        let needed = self.config.flip_margin - self.classifier.score(x) + clearance;
        model.add_row("flip", flip, RowSense::GreaterEqual, needed);

        match self.cost.aggregation() {
            Aggregation::Total => {
                for (column, coefficient) in cost_terms.into_iter().flatten() {
                    model.add_objective_term(column, coefficient);
                }
            }
            Aggregation::Max if !cost_terms.is_empty() => {
                let z = model.add_column(
                    "z",
                    ColumnKind::Continuous,
                    0.0,
                    f64::INFINITY,
                    ColumnRole::MaxCost,
                );
                for (k, terms) in cost_terms.into_iter().enumerate() {
                    let mut row = vec![(z, 1.0)];
                    row.extend(terms.into_iter().map(|(c, v)| (c, -v)));
                    model.add_row(format!("epigraph[{}]", k), row, RowSense::GreaterEqual, 0.0);
                }
                model.add_objective_term(z, 1.0);
            }
            Aggregation::Max => {}
        }

        if model.n_columns() != self.n_variables {
            return Err(RecourseError::inconsistent_solution(format!(
                "model declares {} columns, layout expects {}",
                model.n_columns(),
                self.n_variables
            )));
        }
        Ok(model)
    }

    /// `a = step * k` with integer `k`
    fn add_step_count(
        model: &mut RecourseModel,
        name: &str,
        feature: usize,
        action: usize,
        step: f64,
        lo: f64,
        hi: f64,
    ) {
        let k = model.add_column(
            format!("k[{}]", name),
            ColumnKind::Integer,
            lo / step,
            hi / step,
            ColumnRole::StepCount { feature },
        );
        model.add_row(
            format!("step[{}]", name),
            vec![(action, 1.0), (k, -step)],
            RowSense::Equal,
            0.0,
        );
    }

    /// One binary per tabulated move; returns the feature's cost expression
    #[allow(clippy::too_many_arguments)]
    fn add_grid(
        &self,
        model: &mut RecourseModel,
        feature: &FeatureDescriptor,
        j: usize,
        value: f64,
        targets: &[f64],
        step: Option<f64>,
        lo: f64,
        hi: f64,
    ) -> Result<Vec<(usize, f64)>> {
        let tol = self.config.tolerance;
        let name = &feature.name;
        let a = model.add_column(
            format!("a[{}]", name),
            ColumnKind::Continuous,
            lo,
            hi,
            ColumnRole::Action { feature: j },
        );

        let deltas: Vec<f64> = std::iter::once(0.0)
            .chain(targets.iter().map(|t| t - value))
            .collect();
        let costs: Vec<f64> = deltas
            .iter()
            .map(|&d| {
                if d == 0.0 {
                    0.0
                } else {
                    self.cost.contribution(feature, value, d)
                }
            })
            .collect();

        let stay_cost = self.cost.contribution(feature, value, 0.0);
        if stay_cost != 0.0 {
            return Err(RecourseError::cost_model(format!(
                "{} charges {} for leaving '{}' unchanged",
                self.cost.name(),
                stay_cost,
                name
            )));
        }

        let admissible: Vec<bool> = deltas
            .iter()
            .map(|&d| {
                let in_range = d >= lo - tol * (1.0 + lo.abs()) && d <= hi + tol * (1.0 + hi.abs());
                let granular = match step {
                    Some(_) => feature.is_granular(d, tol),
                    None => true,
                };
                in_range && granular
            })
            .collect();

        Self::check_grid_costs(self.cost.name(), name, &deltas, &costs, &admissible)?;

        let mut choice = Vec::with_capacity(deltas.len());
        let mut link = vec![(a, 1.0)];
        let mut cost_expr = Vec::new();
        for (k, (&d, &c)) in deltas.iter().zip(&costs).enumerate() {
            let upper = if admissible[k] { 1.0 } else { 0.0 };
            let u = model.add_column(
                format!("u[{}][{}]", name, k),
                ColumnKind::Binary,
                0.0,
                upper,
                ColumnRole::GridChoice { feature: j, delta: d },
            );
            choice.push((u, 1.0));
            if d != 0.0 {
                link.push((u, -d));
            }
            if admissible[k] && c != 0.0 {
                cost_expr.push((u, c));
            }
        }
        model.add_row(format!("choose[{}]", name), choice, RowSense::Equal, 1.0);
        model.add_row(format!("grid[{}]", name), link, RowSense::Equal, 0.0);
        Ok(cost_expr)
    }

    /// Tabulated costs must be finite, non-negative and grow with `|delta|` on each side
    fn check_grid_costs(
        metric: &str,
        feature: &str,
        deltas: &[f64],
        costs: &[f64],
        admissible: &[bool],
    ) -> Result<()> {
        for (&d, &c) in deltas.iter().zip(costs) {
            if !c.is_finite() || c < 0.0 {
                return Err(RecourseError::cost_model(format!(
                    "{} gives cost {} for moving '{}' by {}",
                    metric, c, feature, d
                )));
            }
        }

        for positive in [true, false] {
            let mut side: Vec<(f64, f64)> = deltas
                .iter()
                .zip(costs)
                .zip(admissible)
                .filter(|&((&d, _), &ok)| ok && d != 0.0 && (d > 0.0) == positive)
                .map(|((&d, &c), _)| (d.abs(), c))
                .collect();
            side.sort_by(|a, b| a.0.total_cmp(&b.0));
            for pair in side.windows(2) {
                let (near, far) = (pair[0], pair[1]);
                if far.1 < near.1 - 1e-12 {
                    return Err(RecourseError::cost_model(format!(
                        "{} is not monotone for '{}': |delta| {} costs {} but {} costs {}",
                        metric, feature, near.0, near.1, far.0, far.1
                    )));
                }
            }
        }
        Ok(())
    }

    /// One change indicator per mutable feature counted by a sparsity limit
    fn add_change_indicators(&self, model: &mut RecourseModel, x: &[f64]) {
        let features = self.action_set.features();
        let mut indicators: Vec<Option<usize>> = vec![None; features.len()];

        for (j, feature) in features.iter().enumerate() {
            if !self.tracked[j] {
                continue;
            }
            let Some(a) = model.action_column(j) else {
                continue;
            };
            let (lo, hi) = feature.action_range(x[j]);
            let big_m = lo.abs().max(hi.abs());
            let c = model.add_column(
                format!("c[{}]", feature.name),
                ColumnKind::Binary,
                0.0,
                1.0,
                ColumnRole::ChangeIndicator { feature: j },
            );
            model.add_row(
                format!("change_up[{}]", feature.name),
                vec![(a, 1.0), (c, -big_m)],
                RowSense::LessEqual,
                0.0,
            );
            model.add_row(
                format!("change_down[{}]", feature.name),
                vec![(a, -1.0), (c, -big_m)],
                RowSense::LessEqual,
                0.0,
            );
            indicators[j] = Some(c);
        }

        for constraint in self.action_set.constraints() {
            if let ActionConstraint::MaxChanges { features: members, limit } = constraint {
                let terms: Vec<(usize, f64)> = members
                    .iter()
                    .filter_map(|name| self.action_set.index_of(name))
                    .filter_map(|j| indicators[j])
                    .map(|c| (c, 1.0))
                    .collect();
                if !terms.is_empty() {
                    model.add_row(constraint.label(), terms, RowSense::LessEqual, *limit as f64);
                }
            }
        }
    }

    fn add_cross_feature_rows(&self, model: &mut RecourseModel, x: &[f64]) {
        for constraint in self.action_set.constraints() {
            match constraint {
                ActionConstraint::OneHot { features, .. } => {
                    let members: Vec<usize> = features
                        .iter()
                        .filter_map(|name| self.action_set.index_of(name))
                        .collect();
                    let current: f64 = members.iter().map(|&j| x[j]).sum();
                    let terms: Vec<(usize, f64)> = members
                        .iter()
                        .filter_map(|&j| model.action_column(j))
                        .map(|a| (a, 1.0))
                        .collect();
                    model.add_row(constraint.label(), terms, RowSense::Equal, 1.0 - current);
                }
                ActionConstraint::Link {
                    source,
                    target,
                    scale,
                } => {
                    let column = |name: &str| {
                        self.action_set
                            .index_of(name)
                            .and_then(|j| model.action_column(j))
                    };
                    let mut terms = Vec::new();
                    if let Some(t) = column(target) {
                        terms.push((t, 1.0));
                    }
                    if let Some(s) = column(source) {
                        terms.push((s, -scale));
                    }
                    if !terms.is_empty() {
                        model.add_row(constraint.label(), terms, RowSense::Equal, 0.0);
                    }
                }
                ActionConstraint::MaxChanges { .. } => {}
            }
        }
    }
}
