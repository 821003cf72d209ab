//! Candidate session state and navigation over a QTI test plan.
//!
//! A [`TestSessionState`] holds one record per plan node plus the two
//! navigation cursors. [`TestSessionController`] is its only writer: it
//! enters and leaves parts, runs preconditions and branch rules through an
//! [`ExpressionEvaluator`], buffers or commits responses, and keeps the
//! duration clocks. [`SessionSnapshot`] persists the state between
//! requests.

pub mod clock;
pub mod controller;
pub mod error;
pub mod evaluator;
pub mod snapshot;
pub mod state;

pub use clock::DurationClock;
pub use controller::TestSessionController;
pub use error::SessionError;
pub use evaluator::{
    ExpressionEvaluator, LiteralEvaluator, ProcessingContext, ResponseSubmission,
    UnsupportedExpression,
};
pub use snapshot::{SessionSnapshot, SnapshotError};
pub use state::{
    AbstractPartSessionState, CompletionStatus, ItemSessionState, SectionSessionState,
    TestPartSessionState, TestSessionState,
};
