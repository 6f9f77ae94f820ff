use super::constraint::ActionConstraint;
use super::feature::{FeatureDescriptor, FeatureType};
use crate::error::{RecourseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Declared space of permissible feature modifications
///
/// An ordered list of [`FeatureDescriptor`]s plus [`ActionConstraint`]s between
/// them. Read-only while solving, so one set can serve many individuals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActionSet {
    #[serde(rename = "feature", default)]
    features: Vec<FeatureDescriptor>,

    #[serde(rename = "constraint", default, skip_serializing_if = "Vec::is_empty")]
    constraints: Vec<ActionConstraint>,
}

impl ActionSet {
    /// Create an action set from ordered descriptors
    pub fn new(features: Vec<FeatureDescriptor>) -> Self {
        Self {
            features,
            constraints: Vec::new(),
        }
    }

    /// Parse and validate an action set from TOML
    ///
    /// Features are `[[feature]]` tables and relations are `[[constraint]]` tables
    /// tagged by `kind`.
    #[cfg(feature = "toml-config")]
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let set: ActionSet = toml::from_str(content)
            .map_err(|e| RecourseError::configuration(format!("invalid action set: {}", e)))?;
        set.validate()?;
        Ok(set)
    }

    /// Add a cross-feature constraint
    pub fn with_constraint(mut self, constraint: ActionConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Add a cross-feature constraint in place
    pub fn add_constraint(&mut self, constraint: ActionConstraint) {
        self.constraints.push(constraint);
    }

    /// Ordered descriptors
    pub fn features(&self) -> &[FeatureDescriptor] {
        &self.features
    }

    /// Cross-feature constraints
    pub fn constraints(&self) -> &[ActionConstraint] {
        &self.constraints
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True when there are no features
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Ordered feature names
    pub fn names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name.as_str()).collect()
    }

    /// Position of a feature by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    /// Look up a descriptor by name
    pub fn get(&self, name: &str) -> Option<&FeatureDescriptor> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Mutable access to a descriptor by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut FeatureDescriptor> {
        self.features.iter_mut().find(|f| f.name == name)
    }

    /// Descriptors of features that can change
    pub fn mutable_features(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.features.iter().filter(|f| f.mutable)
    }

    /// Number of features that can change
    pub fn n_mutable(&self) -> usize {
        self.mutable_features().count()
    }

    /// Check descriptors and cross-feature constraints
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for feature in &self.features {
            feature.validate()?;
            if !seen.insert(feature.name.as_str()) {
                return Err(RecourseError::configuration(format!(
                    "feature '{}' is described more than once",
                    feature.name
                )));
            }
        }

        let mut one_hot_membership: HashMap<&str, &str> = HashMap::new();

        for constraint in &self.constraints {
            let label = constraint.label();
            for name in constraint.features() {
                if self.get(name).is_none() {
                    return Err(RecourseError::configuration(format!(
                        "{} references undefined feature '{}'",
                        label, name
                    )));
                }
            }

            match constraint {
                ActionConstraint::OneHot { name, features } => {
                    if features.is_empty() {
                        return Err(RecourseError::configuration(format!(
                            "{} has no members",
                            label
                        )));
                    }
                    for member in features {
                        let descriptor = self.get(member).ok_or_else(|| {
                            RecourseError::configuration(format!(
                                "{} references undefined feature '{}'",
                                label, member
                            ))
                        })?;
                        if !descriptor.feature_type.is_indicator() {
                            return Err(RecourseError::configuration(format!(
                                "{} member '{}' is {}, expected binary or categorical",
                                label, member, descriptor.feature_type
                            )));
                        }
                        if let Some(previous) = one_hot_membership.insert(member.as_str(), name.as_str()) {
                            return Err(RecourseError::configuration(format!(
                                "feature '{}' belongs to one-hot groups '{}' and '{}'",
                                member, previous, name
                            )));
                        }
                    }
                }
                ActionConstraint::Link {
                    source,
                    target,
                    scale,
                } => {
                    if source == target {
                        return Err(RecourseError::configuration(format!(
                            "{} links a feature to itself",
                            label
                        )));
                    }
                    if !scale.is_finite() || *scale == 0.0 {
                        return Err(RecourseError::configuration(format!(
                            "{} scale must be finite and non-zero, got {}",
                            label, scale
                        )));
                    }
                }
                ActionConstraint::MaxChanges { features, .. } => {
                    if features.is_empty() {
                        return Err(RecourseError::configuration(format!(
                            "{} has no members",
                            label
                        )));
                    }
                    for member in features {
                        if let Some(descriptor) = self.get(member) {
                            if descriptor.mutable && !descriptor.is_bounded() {
                                return Err(RecourseError::configuration(format!(
                                    "{} member '{}' needs finite bounds",
                                    label, member
                                )));
                            }
                        }
                    }
                }
            }
        }

        for feature in &self.features {
            if feature.feature_type == FeatureType::Categorical
                && !one_hot_membership.contains_key(feature.name.as_str())
            {
                return Err(RecourseError::configuration(format!(
                    "categorical feature '{}' does not belong to any one-hot group",
                    feature.name
                )));
            }
        }

        Ok(())
    }

    /// Reorder the set to match the classifier's feature names
    ///
    /// Fails unless both sides name exactly the same features.
    pub fn align(&self, classifier_feature_names: &[String]) -> Result<ActionSet> {
        let mut expected = HashSet::new();
        for name in classifier_feature_names {
            if !expected.insert(name.as_str()) {
                return Err(RecourseError::alignment_message(format!(
                    "classifier lists feature '{}' more than once",
                    name
                )));
            }
        }

        let described: HashSet<&str> = self.features.iter().map(|f| f.name.as_str()).collect();
        if described.len() != self.features.len() {
            return Err(RecourseError::alignment_message(
                "action set describes a feature more than once",
            ));
        }

        let missing: Vec<String> = classifier_feature_names
            .iter()
            .filter(|name| !described.contains(name.as_str()))
            .cloned()
            .collect();
        let unexpected: Vec<String> = self
            .features
            .iter()
            .filter(|f| !expected.contains(f.name.as_str()))
            .map(|f| f.name.clone())
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(RecourseError::alignment(missing, unexpected));
        }

        let features = classifier_feature_names
            .iter()
            .filter_map(|name| self.get(name).cloned())
            .collect();

        Ok(ActionSet {
            features,
            constraints: self.constraints.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Direction;

    fn loan_set() -> ActionSet {
        ActionSet::new(vec![
            FeatureDescriptor::integer("age").immutable(),
            FeatureDescriptor::continuous("balance").with_lower(0.0),
            FeatureDescriptor::categorical("rent"),
            FeatureDescriptor::categorical("own"),
        ])
        .with_constraint(ActionConstraint::one_hot("housing", ["rent", "own"]))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lookup() {
        let set = loan_set();
        assert_eq!(set.len(), 4);
        assert_eq!(set.index_of("balance"), Some(1));
        assert!(set.get("income").is_none());
        assert_eq!(set.n_mutable(), 3);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let set = ActionSet::new(vec![
            FeatureDescriptor::continuous("x"),
            FeatureDescriptor::integer("x"),
        ]);
        assert!(set.validate().unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_undefined_constraint_reference_rejected() {
        let set = ActionSet::new(vec![FeatureDescriptor::continuous("x")])
            .with_constraint(ActionConstraint::link("x", "y", 2.0));
        let err = set.validate().unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("'y'"));
    }

    #[test]
    fn test_one_hot_requires_indicators() {
        let set = ActionSet::new(vec![
            FeatureDescriptor::binary("a"),
            FeatureDescriptor::continuous("b"),
        ])
        .with_constraint(ActionConstraint::one_hot("g", ["a", "b"]));
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_orphan_categorical_rejected() {
        let set = ActionSet::new(vec![FeatureDescriptor::categorical("lonely")]);
        assert!(set.validate().unwrap_err().to_string().contains("one-hot"));
    }

    #[test]
    fn test_max_changes_requires_bounds() {
        let set = ActionSet::new(vec![
            FeatureDescriptor::continuous("x"),
            FeatureDescriptor::binary("b"),
        ])
        .with_constraint(ActionConstraint::max_changes(["x", "b"], 1));
        assert!(set.validate().is_err());

        let bounded = ActionSet::new(vec![
            FeatureDescriptor::continuous("x").with_bounds(0.0, 10.0),
            FeatureDescriptor::binary("b"),
        ])
        .with_constraint(ActionConstraint::max_changes(["x", "b"], 1));
        assert!(bounded.validate().is_ok());
    }

    #[test]
    fn test_link_scale_checked() {
        let set = ActionSet::new(vec![
            FeatureDescriptor::continuous("a"),
            FeatureDescriptor::continuous("b"),
        ])
        .with_constraint(ActionConstraint::link("a", "b", 0.0));
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_align_reorders_to_classifier() {
        let set = loan_set();
        let aligned = set
            .align(&names(&["own", "balance", "age", "rent"]))
            .unwrap();
        assert_eq!(aligned.names(), vec!["own", "balance", "age", "rent"]);
        assert_eq!(aligned.constraints().len(), 1);
    }

    #[test]
    fn test_align_reports_mismatch() {
        let set = loan_set();
        let err = set
            .align(&names(&["age", "balance", "rent", "income"]))
            .unwrap_err();
        match err {
            RecourseError::Alignment {
                missing,
                unexpected,
                ..
            } => {
                assert_eq!(missing, vec!["income".to_string()]);
                assert_eq!(unexpected, vec!["own".to_string()]);
            }
            other => panic!("expected alignment error, got {other:?}"),
        }
    }

    #[test]
    fn test_align_rejects_duplicate_classifier_names() {
        let set = ActionSet::new(vec![FeatureDescriptor::continuous("x")]);
        assert!(set.align(&names(&["x", "x"])).is_err());
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_from_toml() {
        let content = r#"
            [[feature]]
            name = "age"
            type = "integer"
            mutable = false

            [[feature]]
            name = "balance"
            type = "continuous"
            lower = 0.0
            direction = "increase"

            [[feature]]
            name = "rent"
            type = "categorical"

            [[feature]]
            name = "own"
            type = "categorical"

            [[constraint]]
            kind = "one_hot"
            name = "housing"
            features = ["rent", "own"]
        "#;
        let set = ActionSet::from_toml_str(content).unwrap();
        assert_eq!(set.len(), 4);
        assert!(!set.get("age").unwrap().mutable);
        assert_eq!(set.get("balance").unwrap().direction, Direction::Increase);
        assert_eq!(set.constraints().len(), 1);
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_from_toml_rejects_unknown_type() {
        let content = r#"
            [[feature]]
            name = "grade"
            type = "ordinal"
        "#;
        let err = ActionSet::from_toml_str(content).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }
}
