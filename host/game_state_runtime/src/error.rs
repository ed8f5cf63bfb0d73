use crate::schema::SemanticType;
use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// Why a patch was refused. Any variant discards the whole patch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown field '{field}'; allowed fields: {}", .allowed.join(", "))]
    UnknownField { field: String, allowed: Vec<String> },

    #[error("required field '{field}' is null")]
    RequiredFieldNull { field: String },

    #[error("field '{field}' expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: SemanticType,
        actual: &'static str,
    },

    #[error("field '{field}' value {value} is not one of [{}]", display_list(.allowed))]
    DisallowedValue {
        field: String,
        value: Value,
        allowed: Vec<Value>,
    },

    #[error("field '{field}' value {value} violates {bound}")]
    OutOfRange {
        field: String,
        value: Value,
        bound: RangeBound,
    },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            ValidationError::UnknownField { field, .. }
            | ValidationError::RequiredFieldNull { field }
            | ValidationError::TypeMismatch { field, .. }
            | ValidationError::DisallowedValue { field, .. }
            | ValidationError::OutOfRange { field, .. } => field,
        }
    }
}

/// The inclusive bound a numeric value fell outside of.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeBound {
    Min(f64),
    Max(f64),
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeBound::Min(min) => write!(f, "minimum {min}"),
            RangeBound::Max(max) => write!(f, "maximum {max}"),
        }
    }
}

/// Rejected field table definitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("field name must not be empty")]
    EmptyName,

    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("field '{field}' of type {semantic_type} cannot carry numeric bounds")]
    BoundsOnNonNumeric {
        field: String,
        semantic_type: SemanticType,
    },

    #[error("field '{field}' has min {min} greater than max {max}")]
    InvertedRange { field: String, min: f64, max: f64 },

    #[error("field '{0}' declares an empty allowed-value set")]
    EmptyAllowedValues(String),

    #[error("field '{0}' is neither required nor nullable and has no default")]
    MissingDefault(String),

    #[error("field '{field}' default value is invalid: {source}")]
    InvalidDefault {
        field: String,
        #[source]
        source: Box<ValidationError>,
    },
}

/// Refusals from `enqueue`; only reachable when a queue bound or strict sink
/// mode is configured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("state queue is full (cap={capacity})")]
    QueueFull { capacity: usize },

    #[error("no state sink registered")]
    NoSink,
}

/// Failure reported by a sink while applying a validated patch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("state sink failed: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

fn display_list(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
