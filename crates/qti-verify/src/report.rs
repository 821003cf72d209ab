//! Validation report with summary statistics.

use std::fmt;

use qti_core::AssessmentTest;
use serde::Serialize;

use crate::structural::{validate, Diagnostic, Severity};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub parts: usize,
    pub errors: usize,
    pub warnings: usize,
}

/// The result of validating one test.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub test: String,
    pub summary: ReportSummary,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Validate `test` and summarise the outcome.
    pub fn build(test: &AssessmentTest) -> Self {
        let diagnostics = validate(test);
        let errors = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count();
        Self {
            test: test.identifier().to_string(),
            summary: ReportSummary {
                parts: test.part_count(),
                errors,
                warnings: diagnostics.len() - errors,
            },
            diagnostics,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Validation Report ({}) ===", self.test)?;
        writeln!(
            f,
            "Parts: {} | Errors: {} | Warnings: {}",
            self.summary.parts, self.summary.errors, self.summary.warnings
        )?;
        if self.diagnostics.is_empty() {
            writeln!(f, "No diagnostics.")?;
        } else {
            writeln!(f, "--- Diagnostics ---")?;
            for diag in &self.diagnostics {
                match (&diag.part, diag.global_index) {
                    (Some(part), Some(index)) => writeln!(
                        f,
                        "[{}] {} {part}#{index}: {}",
                        diag.severity, diag.rule, diag.message
                    )?,
                    _ => writeln!(f, "[{}] {}: {}", diag.severity, diag.rule, diag.message)?,
                }
                if let Some(s) = &diag.suggestion {
                    writeln!(f, "  Suggestion: {s}")?;
                }
            }
        }
        Ok(())
    }
}
