// Cross-feature relations

use serde::{Deserialize, Serialize};

fn default_scale() -> f64 {
    1.0
}

/// Constraint relating the actions on several features
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionConstraint {
    /// Indicator features encoding one categorical variable; exactly one is set
    /// after the action.
    OneHot {
        /// Name of the categorical variable
        name: String,
        /// Member indicator features
        features: Vec<String>,
    },

    /// `delta[target] = scale * delta[source]`
    Link {
        /// Driving feature
        source: String,
        /// Feature that follows
        target: String,
        /// Ratio between the two deltas
        #[serde(default = "default_scale")]
        scale: f64,
    },

    /// At most `limit` of `features` may change
    MaxChanges {
        /// Features counted against the limit
        features: Vec<String>,
        /// Largest number of changed features
        limit: usize,
    },
}

impl ActionConstraint {
    /// One-hot group
    pub fn one_hot<S: Into<String>>(
        name: impl Into<String>,
        features: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::OneHot {
            name: name.into(),
            features: features.into_iter().map(Into::into).collect(),
        }
    }

    /// Linked pair
    pub fn link(source: impl Into<String>, target: impl Into<String>, scale: f64) -> Self {
        Self::Link {
            source: source.into(),
            target: target.into(),
            scale,
        }
    }

    /// Sparsity limit
    pub fn max_changes<S: Into<String>>(features: impl IntoIterator<Item = S>, limit: usize) -> Self {
        Self::MaxChanges {
            features: features.into_iter().map(Into::into).collect(),
            limit,
        }
    }

    /// Names of all features the constraint mentions
    pub fn features(&self) -> Vec<&str> {
        match self {
            Self::OneHot { features, .. } | Self::MaxChanges { features, .. } => {
                features.iter().map(String::as_str).collect()
            }
            Self::Link { source, target, .. } => vec![source.as_str(), target.as_str()],
        }
    }

    /// Short label used in model row names and error messages
    pub fn label(&self) -> String {
        match self {
            Self::OneHot { name, .. } => format!("one_hot[{}]", name),
            Self::Link { source, target, .. } => format!("link[{}->{}]", source, target),
            Self::MaxChanges { limit, .. } => format!("max_changes[{}]", limit),
        }
    }
}
