//! Session errors.

use qti_plan::{PlanError, TestPlanNodeKey};

/// Errors raised by the navigation controller.
///
/// Every check runs before the operation mutates anything, so an `Err`
/// leaves the session exactly as it was, except for `Evaluation`, which
/// can surface part-way through a navigation step.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("plan node {0} is not an item")]
    NotAnItem(TestPlanNodeKey),

    #[error("no plan node with key {0}")]
    UnknownKey(TestPlanNodeKey),

    #[error("cannot {operation}: {reason}")]
    InvalidState {
        operation: &'static str,
        reason: String,
    },

    #[error("expression evaluation failed: {0}")]
    Evaluation(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl SessionError {
    pub(crate) fn invalid(operation: &'static str, reason: impl Into<String>) -> Self {
        SessionError::InvalidState {
            operation,
            reason: reason.into(),
        }
    }
}
