//! The seam to the expression engine.
//!
//! The controller never interprets expressions itself. It hands each
//! precondition and branch rule to an [`ExpressionEvaluator`] together with
//! a read-only [`ProcessingContext`], and treats the result as true only
//! when it is exactly a single boolean `true`.

use std::collections::{BTreeMap, BTreeSet};

use qti_core::{AssessmentTest, BaseType, Expression, Value};
use qti_plan::TestPlanNodeKey;

use crate::error::SessionError;
use crate::state::{ItemSessionState, TestSessionState};

/// Read-only view handed to the evaluator.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingContext<'a> {
    pub test: &'a AssessmentTest,
    pub state: &'a TestSessionState,
    /// The node whose precondition or branch rule is being evaluated.
    pub node: Option<&'a TestPlanNodeKey>,
}

impl<'a> ProcessingContext<'a> {
    /// A test-level outcome, or a variable of the item the context is
    /// positioned on.
    pub fn variable(&self, identifier: &str) -> Option<Value> {
        if let Some(value) = self.state.outcome(identifier) {
            return Some(value.clone());
        }
        self.node
            .and_then(|key| self.state.item_state(key))
            .and_then(|item| item.variable(identifier))
    }
}

/// The expression-evaluation collaborator.
pub trait ExpressionEvaluator {
    type Error: std::error::Error + Send + Sync + 'static;

    fn evaluate(
        &mut self,
        expression: &Expression,
        context: &ProcessingContext<'_>,
    ) -> Result<Value, Self::Error>;

    /// Response processing for one item, run when its responses are
    /// committed. The default leaves outcomes untouched.
    fn process_responses(
        &mut self,
        _item: &TestPlanNodeKey,
        _state: &mut ItemSessionState,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Evaluate `expression` and read the result as a condition.
pub(crate) fn holds<E: ExpressionEvaluator>(
    evaluator: &mut E,
    expression: &Expression,
    context: &ProcessingContext<'_>,
) -> Result<bool, SessionError> {
    evaluator
        .evaluate(expression, context)
        .map(|value| value.is_true())
        .map_err(|e| SessionError::Evaluation(Box::new(e)))
}

/// Responses submitted for the current item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSubmission {
    pub values: BTreeMap<String, Value>,
    /// Responses that bound but failed validation.
    pub invalid: BTreeSet<String>,
    /// Responses whose raw data could not be bound to a value.
    pub unbound: BTreeSet<String>,
}

impl ResponseSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, identifier: &str, value: Value) -> Self {
        self.values.insert(identifier.to_string(), value);
        self
    }

    pub fn with_invalid(mut self, identifier: &str) -> Self {
        self.invalid.insert(identifier.to_string());
        self
    }

    pub fn with_unbound(mut self, identifier: &str) -> Self {
        self.unbound.insert(identifier.to_string());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty() && self.unbound.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unsupported expression {0:?}")]
pub struct UnsupportedExpression(pub String);

/// Evaluates boolean literals and bare variable references.
///
/// `true`, `false`, `1` and `0` evaluate to themselves; anything else is
/// taken as a variable identifier and looked up through the context. An
/// unknown variable evaluates to `Null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralEvaluator;

impl ExpressionEvaluator for LiteralEvaluator {
    type Error = UnsupportedExpression;

    fn evaluate(
        &mut self,
        expression: &Expression,
        context: &ProcessingContext<'_>,
    ) -> Result<Value, Self::Error> {
        let source = expression.source().trim();
        if let Ok(value) = Value::parse_single(BaseType::Boolean, source) {
            return Ok(value);
        }
        if qti_core::value::is_valid_identifier(source) {
            return Ok(context.variable(source).unwrap_or_default());
        }
        Err(UnsupportedExpression(source.to_string()))
    }
}
