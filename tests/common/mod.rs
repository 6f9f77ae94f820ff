#![allow(dead_code)]

use lerecours::{
    ActionSet, FeatureDescriptor, LinearClassifier, LinearCost, MipSolver, RecourseBuilder,
    RecourseConfig, RecourseModel, SolveLimits, SolveStatus, SolverOutcome,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Route `tracing` output to the test writer; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `0.0*age + 1.0*balance - 10`
pub fn balance_classifier() -> LinearClassifier {
    LinearClassifier::from_pairs([("age", 0.0), ("balance", 1.0)], -10.0).expect("classifier")
}

/// Age is immutable, balance cannot go below zero
pub fn balance_actions() -> ActionSet {
    ActionSet::new(vec![
        FeatureDescriptor::integer("age").immutable(),
        FeatureDescriptor::continuous("balance").with_lower(0.0),
    ])
}

pub fn balance_builder(config: RecourseConfig) -> RecourseBuilder {
    RecourseBuilder::new(
        balance_classifier(),
        &balance_actions(),
        Arc::new(LinearCost::l1()),
        config,
    )
    .expect("builder")
}

/// Backend that replays a fixed outcome and counts calls
pub struct ScriptedSolver {
    pub outcome: SolverOutcome,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedSolver {
    pub fn new(outcome: SolverOutcome) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                outcome,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    pub fn status(status: SolveStatus, assignment: Option<Vec<f64>>) -> (Self, Arc<AtomicUsize>) {
        Self::new(SolverOutcome {
            status,
            assignment,
            objective: None,
            message: Some("scripted".to_string()),
            nodes: 0,
        })
    }
}

impl MipSolver for ScriptedSolver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn solve(&self, _model: &RecourseModel, _limits: &SolveLimits) -> SolverOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}
