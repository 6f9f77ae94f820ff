// Action Set
//
// *L'Ensemble d'Actions* (The Action Set) - Feature descriptors and the relations between them

/// Cross-feature constraints.
pub mod constraint;
/// Per-feature metadata.
pub mod feature;
/// The ordered, validated descriptor collection.
pub mod set;

pub use constraint::ActionConstraint;
pub use feature::{Direction, FeatureDescriptor, FeatureType};
pub use set::ActionSet;
