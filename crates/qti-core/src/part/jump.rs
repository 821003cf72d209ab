//! Preconditions and branch rules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Expression source handed to the external evaluation engine.
///
/// The engine owns the grammar; parts only carry the text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression(String);

impl Expression {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn source(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A part is entered only if all of its preconditions hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreCondition {
    pub expression: Expression,
}

impl PreCondition {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            expression: Expression::new(source),
        }
    }
}

pub const EXIT_TEST: &str = "EXIT_TEST";
pub const EXIT_TESTPART: &str = "EXIT_TESTPART";
pub const EXIT_SECTION: &str = "EXIT_SECTION";

/// Where a fired branch rule sends the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BranchTarget {
    ExitTest,
    ExitTestPart,
    ExitSection,
    /// Identifier of another part.
    Part(String),
}

impl BranchTarget {
    pub fn is_special(&self) -> bool {
        !matches!(self, BranchTarget::Part(_))
    }
}

impl From<String> for BranchTarget {
    fn from(s: String) -> Self {
        match s.as_str() {
            EXIT_TEST => BranchTarget::ExitTest,
            EXIT_TESTPART => BranchTarget::ExitTestPart,
            EXIT_SECTION => BranchTarget::ExitSection,
            _ => BranchTarget::Part(s),
        }
    }
}

impl From<&str> for BranchTarget {
    fn from(s: &str) -> Self {
        BranchTarget::from(s.to_string())
    }
}

impl From<BranchTarget> for String {
    fn from(t: BranchTarget) -> Self {
        t.to_string()
    }
}

impl fmt::Display for BranchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchTarget::ExitTest => f.write_str(EXIT_TEST),
            BranchTarget::ExitTestPart => f.write_str(EXIT_TESTPART),
            BranchTarget::ExitSection => f.write_str(EXIT_SECTION),
            BranchTarget::Part(id) => f.write_str(id),
        }
    }
}

/// Fires when its expression is true on leaving the owning part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRule {
    pub target: BranchTarget,
    pub expression: Expression,
}

impl BranchRule {
    pub fn new(target: impl Into<BranchTarget>, source: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            expression: Expression::new(source),
        }
    }
}
