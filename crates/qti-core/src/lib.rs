//! Core data model for QTI test delivery.
//!
//! - [`value`]: the typed value lattice used by every runtime comparison
//! - [`part`]: the authored test hierarchy, stored as a pre-order arena
//! - [`definition`] and [`builder`]: serde and fluent authoring front ends

pub mod builder;
pub mod definition;
pub mod part;
pub mod value;

pub use definition::{
    ItemRefDefinition, SectionDefinition, SectionPartDefinition, TestDefinition,
    TestPartDefinition,
};
pub use part::control::{
    jumps_enabled, ItemSessionControl, NavigationMode, Ordering, Selection, SubmissionMode,
    TimeLimits, Weight,
};
pub use part::jump::{BranchRule, BranchTarget, Expression, PreCondition};
pub use part::node::{AbstractPart, PartId, PartKind, PartType};
pub use part::{AssessmentTest, OutcomeDeclaration, PartError};
pub use value::{BaseType, Cardinality, Signature, Single, Value, ValueParseError};
