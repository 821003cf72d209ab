//! Literal parsing for single values.

use super::{BaseType, Single, Value};

/// Errors from parsing literals or assembling values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueParseError {
    #[error("unknown base type: {0}")]
    UnknownBaseType(String),

    #[error("unknown cardinality: {0}")]
    UnknownCardinality(String),

    #[error("empty literal is not a valid {0}")]
    Empty(BaseType),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid boolean: {0:?}")]
    InvalidBoolean(String),

    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    #[error("invalid float: {0:?}")]
    InvalidFloat(String),

    #[error("invalid point (expected two integers): {0:?}")]
    InvalidPoint(String),

    #[error("invalid {base_type} (expected two identifiers): {literal:?}")]
    InvalidPair { base_type: BaseType, literal: String },

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("duration must not be negative: {0}")]
    NegativeDuration(f64),

    #[error("container mixes base types: expected {expected}, found {found}")]
    MixedBaseTypes { expected: BaseType, found: BaseType },

    #[error("multiple/ordered containers must not be empty")]
    EmptyContainer,
}

/// Check the QTI identifier lexical form: a letter or underscore followed by
/// letters, digits, `_`, `-` or `.`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn parse_identifier(literal: &str) -> Result<String, ValueParseError> {
    if is_valid_identifier(literal) {
        Ok(literal.to_string())
    } else {
        Err(ValueParseError::InvalidIdentifier(literal.to_string()))
    }
}

pub(super) fn parse_float(literal: &str) -> Result<f64, ValueParseError> {
    match literal {
        "INF" => Ok(f64::INFINITY),
        "-INF" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => literal
            .parse::<f64>()
            .map_err(|_| ValueParseError::InvalidFloat(literal.to_string())),
    }
}

fn split_two(literal: &str) -> Option<(&str, &str)> {
    let mut parts = literal.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => Some((a, b)),
        _ => None,
    }
}

impl Single {
    /// Parse a literal of the given base type.
    pub fn parse(base_type: BaseType, literal: &str) -> Result<Single, ValueParseError> {
        let trimmed = literal.trim();
        if trimmed.is_empty() && base_type != BaseType::String {
            return Err(ValueParseError::Empty(base_type));
        }
        match base_type {
            BaseType::Identifier => parse_identifier(trimmed).map(Single::Identifier),
            BaseType::Boolean => match trimmed {
                "true" | "1" => Ok(Single::Boolean(true)),
                "false" | "0" => Ok(Single::Boolean(false)),
                other => Err(ValueParseError::InvalidBoolean(other.to_string())),
            },
            BaseType::Integer => trimmed
                .parse::<i64>()
                .map(Single::Integer)
                .map_err(|_| ValueParseError::InvalidInteger(trimmed.to_string())),
            BaseType::Float => parse_float(trimmed).map(Single::Float),
            BaseType::String => Ok(Single::String(literal.to_string())),
            BaseType::Point => {
                let (x, y) = split_two(trimmed)
                    .ok_or_else(|| ValueParseError::InvalidPoint(trimmed.to_string()))?;
                match (x.parse::<i32>(), y.parse::<i32>()) {
                    (Ok(x), Ok(y)) => Ok(Single::Point(x, y)),
                    _ => Err(ValueParseError::InvalidPoint(trimmed.to_string())),
                }
            }
            BaseType::Pair | BaseType::DirectedPair => {
                let invalid = || ValueParseError::InvalidPair {
                    base_type,
                    literal: trimmed.to_string(),
                };
                let (a, b) = split_two(trimmed).ok_or_else(invalid)?;
                if !is_valid_identifier(a) || !is_valid_identifier(b) {
                    return Err(invalid());
                }
                if base_type == BaseType::Pair {
                    Ok(Single::Pair(a.to_string(), b.to_string()))
                } else {
                    Ok(Single::DirectedPair(a.to_string(), b.to_string()))
                }
            }
            BaseType::Duration => {
                let seconds = trimmed
                    .parse::<f64>()
                    .map_err(|_| ValueParseError::InvalidDuration(trimmed.to_string()))?;
                if !seconds.is_finite() {
                    return Err(ValueParseError::InvalidDuration(trimmed.to_string()));
                }
                if seconds < 0.0 {
                    return Err(ValueParseError::NegativeDuration(seconds));
                }
                Ok(Single::Duration(seconds))
            }
            BaseType::File => Ok(Single::File(trimmed.to_string())),
            BaseType::Uri => Ok(Single::Uri(trimmed.to_string())),
        }
    }
}

impl Value {
    /// Parse one literal into a single-cardinality value.
    pub fn parse_single(base_type: BaseType, literal: &str) -> Result<Value, ValueParseError> {
        Single::parse(base_type, literal).map(Value::Single)
    }

    /// Parse each literal and collect them into a multiple value.
    pub fn parse_multiple(base_type: BaseType, literals: &[&str]) -> Result<Value, ValueParseError> {
        let values = literals
            .iter()
            .map(|l| Single::parse(base_type, l))
            .collect::<Result<Vec<_>, _>>()?;
        Value::multiple(base_type, values)
    }

    /// Parse each literal and collect them, in order, into an ordered value.
    pub fn parse_ordered(base_type: BaseType, literals: &[&str]) -> Result<Value, ValueParseError> {
        let values = literals
            .iter()
            .map(|l| Single::parse(base_type, l))
            .collect::<Result<Vec<_>, _>>()?;
        Value::ordered(base_type, values)
    }
}
