// Recourse Configuration
//
// *La Configuration* (The Configuration) - Flip margin, tolerances and solver settings

use crate::error::{RecourseError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default solve time limit in seconds
pub const DEFAULT_TIME_LIMIT_SECS: f64 = 30.0;

/// Default relative MIP gap
pub const DEFAULT_MIP_GAP: f64 = 1e-6;

/// good_lp backend on the microlp engine
pub const DEFAULT_SOLVER_BACKEND: &str = "good_lp";

/// Default cap on branch-and-bound nodes
pub const DEFAULT_MAX_NODES: usize = 200_000;

/// Default feasibility tolerance for post-solve checks
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Solver settings handed to the Solver Adapter at construction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// Wall-clock budget for one solve, in seconds
    pub time_limit_secs: f64,

    /// Relative optimality gap at which the search stops
    pub mip_gap: f64,

    /// Backend identifier
    pub solver_backend: String,

    /// Cap on explored branch-and-bound nodes
    pub max_nodes: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: DEFAULT_TIME_LIMIT_SECS,
            mip_gap: DEFAULT_MIP_GAP,
            solver_backend: DEFAULT_SOLVER_BACKEND.to_string(),
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl SolverConfig {
    /// Time limit as a [`Duration`]
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.time_limit_secs)
    }

    /// Builder-style time limit
    pub fn with_time_limit_secs(mut self, secs: f64) -> Self {
        self.time_limit_secs = secs;
        self
    }

    /// Builder-style node cap
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Builder-style backend selection
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.solver_backend = backend.into();
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !self.time_limit_secs.is_finite() || self.time_limit_secs <= 0.0 {
            return Err(RecourseError::configuration(format!(
                "time_limit_secs must be positive, got {}",
                self.time_limit_secs
            )));
        }
        if !(0.0..1.0).contains(&self.mip_gap) {
            return Err(RecourseError::configuration(format!(
                "mip_gap must lie in [0, 1), got {}",
                self.mip_gap
            )));
        }
        if self.max_nodes == 0 {
            return Err(RecourseError::configuration("max_nodes must be at least 1"));
        }
        if self.solver_backend.trim().is_empty() {
            return Err(RecourseError::configuration("solver_backend must not be empty"));
        }
        Ok(())
    }
}

/// Top-level recourse settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecourseConfig {
    /// Score the action must reach; 0 accepts landing exactly on the boundary
    pub flip_margin: f64,

    /// Tolerance for post-solve consistency checks and delta snapping
    pub tolerance: f64,

    /// Solver settings
    pub solver: SolverConfig,
}

impl Default for RecourseConfig {
    fn default() -> Self {
        Self {
            flip_margin: 0.0,
            tolerance: DEFAULT_TOLERANCE,
            solver: SolverConfig::default(),
        }
    }
}

impl RecourseConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file yields the default configuration.
    #[cfg(feature = "toml-config")]
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        if !path.exists() {
            return Ok(RecourseConfig::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RecourseConfig = toml::from_str(content)
            .map_err(|e| RecourseError::configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    ///
    /// Environment variables:
    /// - `LERECOURS_TIME_LIMIT` - Solve time limit in seconds
    /// - `LERECOURS_MIP_GAP` - Relative MIP gap
    /// - `LERECOURS_BACKEND` - Solver backend identifier
    pub fn from_env(mut self) -> Self {
        if let Some(secs) = env_parse::<f64>("LERECOURS_TIME_LIMIT") {
            self.solver.time_limit_secs = secs;
        }
        if let Some(gap) = env_parse::<f64>("LERECOURS_MIP_GAP") {
            self.solver.mip_gap = gap;
        }
        if let Ok(backend) = std::env::var("LERECOURS_BACKEND") {
            if !backend.trim().is_empty() {
                self.solver.solver_backend = backend;
            }
        }
        self
    }

    /// Builder-style flip margin
    pub fn with_flip_margin(mut self, margin: f64) -> Self {
        self.flip_margin = margin;
        self
    }

    /// Builder-style solver settings
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !self.flip_margin.is_finite() || self.flip_margin < 0.0 {
            return Err(RecourseError::configuration(format!(
                "flip_margin must be finite and non-negative, got {}",
                self.flip_margin
            )));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 || self.tolerance >= 1.0 {
            return Err(RecourseError::configuration(format!(
                "tolerance must lie in (0, 1), got {}",
                self.tolerance
            )));
        }
        self.solver.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
                None
            }
        },
        Err(_) => None,
    }
}
