//! Error types for plan construction and lookup.

use crate::key::TestPlanNodeKey;

/// Errors raised while building or querying a test plan.
///
/// `DuplicateKey`, `GlobalIndexOutOfBounds`, `DanglingKey` and
/// `MalformedPlan` mean the plan itself is broken. They never occur for a
/// plan built by [`crate::TestPlanner`] and callers should treat them as
/// fatal. `PartMismatch` and `TestMismatch` mean a plan was attached to a
/// test other than the one it was built from.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("duplicate plan node key: {0}")]
    DuplicateKey(TestPlanNodeKey),

    #[error("plan node refers to global index {0}, which is outside the test")]
    GlobalIndexOutOfBounds(usize),

    #[error("plan index holds key {0} but the node is missing")]
    DanglingKey(TestPlanNodeKey),

    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    #[error("plan node {key} does not match {found} in the test")]
    PartMismatch { key: TestPlanNodeKey, found: String },

    #[error("plan was built for test {planned}, not {found}")]
    TestMismatch { planned: String, found: String },

    #[error("no plan node with key {0}")]
    UnknownKey(TestPlanNodeKey),

    #[error("invalid plan node key: {0:?}")]
    InvalidKey(String),
}
