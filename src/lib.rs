// lerecours - Minimum-Cost Recourse
//
// *Le Recours* (The Recourse) - Smallest actionable change that flips a linear classifier's denial

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

//! Given a linear classifier, a description of which features can move and how,
//! and a cost over moves, find the cheapest action that turns a denied
//! individual into an approved one. The search is posed as a mixed-integer
//! program and handed to `good_lp` (microlp, or CBC with the `coin_cbc`
//! feature), to the fallback branch-and-bound backend, or to any [`MipSolver`]
//! plugged into the [`SolverAdapter`].

/// Feature descriptors, cross-feature constraints and action sets.
pub mod action;
/// Recourse problem construction and solving.
pub mod builder;
/// Linear classifier collaborator.
pub mod classifier;
/// Settings and their loaders.
pub mod config;
/// Cost functions and metric selection.
pub mod cost;
/// Error types.
pub mod error;
/// Mixed-integer model representation.
pub mod model;
/// Decoding and re-checking of solver assignments.
pub mod report;
/// Solver adapter and backends.
pub mod solver;

pub use action::{ActionConstraint, ActionSet, Direction, FeatureDescriptor, FeatureType};
pub use builder::RecourseBuilder;
pub use classifier::{Decision, LinearClassifier};
pub use config::{RecourseConfig, SolverConfig};
pub use cost::{
    Aggregation, CostFunction, CostMetric, CostTerm, EmpiricalCdf, LinearCost, PercentileShift,
};
pub use error::{RecourseError, Result};
pub use model::RecourseModel;
pub use report::{FeatureChange, RecourseResult, ResultReporter};
pub use solver::{
    BranchAndBound, GoodLp, LpEngine, MipSolver, SolveLimits, SolveStatus, SolverAdapter,
    SolverOutcome,
};
