// Error Handling
//
// *La Gestion des Erreurs* (The Error Management) - Typed failures for recourse fitting

use thiserror::Error;

/// Result type for recourse operations
pub type Result<T> = std::result::Result<T, RecourseError>;

/// Recourse error types
///
/// Every failure of [`crate::RecourseBuilder::fit`] surfaces as one of these kinds.
/// Nothing is recovered silently, so a failed fit never yields a partial action.
#[derive(Debug, Error)]
pub enum RecourseError {
    /// The action set or a feature descriptor is malformed
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
    },

    /// Descriptor names do not match the classifier's feature names
    #[error("Alignment error: {message}")]
    Alignment {
        /// Summary of the mismatch
        message: String,
        /// Classifier features without a descriptor
        missing: Vec<String>,
        /// Descriptors the classifier does not know about
        unexpected: Vec<String>,
    },

    /// The requested cost cannot be expressed as linear constraints
    #[error("Cost model error: {message}")]
    CostModel {
        /// Why linearization failed
        message: String,
    },

    /// The individual is not currently denied, or no individual was supplied
    #[error("Individual is not denied: {message}")]
    NotDenied {
        /// Precondition that failed
        message: String,
        /// Classifier score of the individual, when one was set
        score: Option<f64>,
    },

    /// The individual vector itself is unusable
    #[error("Invalid individual: {message}")]
    InvalidIndividual {
        /// What is wrong with the vector
        message: String,
    },

    /// No action satisfies every constraint
    #[error("Infeasible: {message}")]
    Infeasible {
        /// Solver or builder diagnostic
        message: String,
    },

    /// The solver ran out of budget before finding any feasible action
    #[error("Solver timed out after {elapsed_secs:.3}s (limit {limit_secs:.3}s)")]
    SolverTimeout {
        /// Configured limit in seconds
        limit_secs: f64,
        /// Time actually spent in seconds
        elapsed_secs: f64,
    },

    /// The solver backend failed
    #[error("Solver adapter error ({backend}): {message}")]
    SolverAdapter {
        /// Backend identifier
        backend: String,
        /// Underlying diagnostic
        message: String,
    },

    /// The solver's assignment fails the post-solve re-check
    #[error("Inconsistent solution: {message}")]
    InconsistentSolution {
        /// Violated constraint
        message: String,
    },
}

impl RecourseError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        RecourseError::Configuration {
            message: message.into(),
        }
    }

    /// Create an alignment error from the two sides of a name mismatch
    pub fn alignment(missing: Vec<String>, unexpected: Vec<String>) -> Self {
        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing descriptors for [{}]", missing.join(", ")));
        }
        if !unexpected.is_empty() {
            parts.push(format!(
                "descriptors not used by classifier [{}]",
                unexpected.join(", ")
            ));
        }
        RecourseError::Alignment {
            message: parts.join("; "),
            missing,
            unexpected,
        }
    }

    /// Create an alignment error that is not a name mismatch (length, duplicates)
    pub fn alignment_message(message: impl Into<String>) -> Self {
        RecourseError::Alignment {
            message: message.into(),
            missing: Vec::new(),
            unexpected: Vec::new(),
        }
    }

    /// Create a cost model error
    pub fn cost_model(message: impl Into<String>) -> Self {
        RecourseError::CostModel {
            message: message.into(),
        }
    }

    /// Create a not-denied error
    pub fn not_denied(message: impl Into<String>, score: Option<f64>) -> Self {
        RecourseError::NotDenied {
            message: message.into(),
            score,
        }
    }

    /// Create an invalid-individual error
    pub fn invalid_individual(message: impl Into<String>) -> Self {
        RecourseError::InvalidIndividual {
            message: message.into(),
        }
    }

    /// Create an infeasibility error
    pub fn infeasible(message: impl Into<String>) -> Self {
        RecourseError::Infeasible {
            message: message.into(),
        }
    }

    /// Create a solver adapter error
    pub fn solver_adapter(backend: impl Into<String>, message: impl Into<String>) -> Self {
        RecourseError::SolverAdapter {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create an inconsistent-solution error
    pub fn inconsistent_solution(message: impl Into<String>) -> Self {
        RecourseError::InconsistentSolution {
            message: message.into(),
        }
    }

    /// True when the individual was already approved or never supplied
    pub fn is_not_denied(&self) -> bool {
        matches!(self, RecourseError::NotDenied { .. })
    }

    /// True for outcomes a caller may address by relaxing constraints and re-invoking
    pub fn is_terminal_outcome(&self) -> bool {
        matches!(
            self,
            RecourseError::Infeasible { .. } | RecourseError::SolverTimeout { .. }
        )
    }

    /// Short machine-readable kind label
    pub fn kind(&self) -> &'static str {
        match self {
            RecourseError::Configuration { .. } => "configuration",
            RecourseError::Alignment { .. } => "alignment",
            RecourseError::CostModel { .. } => "cost_model",
            RecourseError::NotDenied { .. } => "not_denied",
            RecourseError::InvalidIndividual { .. } => "invalid_individual",
            RecourseError::Infeasible { .. } => "infeasible",
            RecourseError::SolverTimeout { .. } => "solver_timeout",
            RecourseError::SolverAdapter { .. } => "solver_adapter",
            RecourseError::InconsistentSolution { .. } => "inconsistent_solution",
        }
    }
}
