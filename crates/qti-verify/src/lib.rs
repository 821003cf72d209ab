//! Authoring-time validation for assessment tests.
//!
//! Validation never fails: it returns every problem it finds as a
//! [`Diagnostic`] and leaves the decision to block delivery to the caller.

pub mod report;
pub mod structural;

pub use report::{ReportSummary, ValidationReport};
pub use structural::{validate, Diagnostic, Rule, Severity};
