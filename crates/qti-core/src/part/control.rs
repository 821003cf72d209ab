//! Declarations attached to parts: modes, time limits, item session
//! control, selection, ordering and weights.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether the candidate must move strictly forward through a test part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationMode {
    Linear,
    Nonlinear,
}

/// When responses are committed to response processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    Individual,
    Simultaneous,
}

impl fmt::Display for NavigationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationMode::Linear => write!(f, "linear"),
            NavigationMode::Nonlinear => write!(f, "nonlinear"),
        }
    }
}

impl fmt::Display for SubmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionMode::Individual => write!(f, "individual"),
            SubmissionMode::Simultaneous => write!(f, "simultaneous"),
        }
    }
}

/// Preconditions and branch rules below test-part level only apply in
/// linear, individual test parts.
pub fn jumps_enabled(navigation: NavigationMode, submission: SubmissionMode) -> bool {
    navigation == NavigationMode::Linear && submission == SubmissionMode::Individual
}

/// Optional minimum and maximum durations, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeLimits {
    #[serde(default)]
    pub min_time: Option<f64>,
    #[serde(default)]
    pub max_time: Option<f64>,
    #[serde(default)]
    pub allow_late_submission: bool,
}

impl TimeLimits {
    pub fn with_max(seconds: f64) -> Self {
        Self {
            max_time: Some(seconds),
            ..Self::default()
        }
    }

    /// True when `elapsed` seconds exceeds the maximum, if there is one.
    pub fn is_exceeded(&self, elapsed: f64) -> bool {
        self.max_time.is_some_and(|max| elapsed > max)
    }
}

/// Item session control overrides. Unset fields inherit from the
/// enclosing part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSessionControl {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub show_feedback: Option<bool>,
    #[serde(default)]
    pub allow_review: Option<bool>,
    #[serde(default)]
    pub show_solution: Option<bool>,
    #[serde(default)]
    pub allow_comment: Option<bool>,
    #[serde(default)]
    pub allow_skipping: Option<bool>,
    #[serde(default)]
    pub validate_responses: Option<bool>,
}

impl ItemSessionControl {
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn with_show_feedback(mut self, b: bool) -> Self {
        self.show_feedback = Some(b);
        self
    }

    pub fn with_allow_review(mut self, b: bool) -> Self {
        self.allow_review = Some(b);
        self
    }

    pub fn with_show_solution(mut self, b: bool) -> Self {
        self.show_solution = Some(b);
        self
    }

    pub fn with_allow_comment(mut self, b: bool) -> Self {
        self.allow_comment = Some(b);
        self
    }

    pub fn with_allow_skipping(mut self, b: bool) -> Self {
        self.allow_skipping = Some(b);
        self
    }

    pub fn with_validate_responses(mut self, b: bool) -> Self {
        self.validate_responses = Some(b);
        self
    }
}

/// How many children of a section take part in an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub select: u32,
    #[serde(default)]
    pub with_replacement: bool,
}

/// Whether a section's selected children are shuffled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    #[serde(default)]
    pub shuffle: bool,
}

/// A named scoring weight on an item reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weight {
    pub identifier: String,
    pub value: f64,
}
