//! Pure checks a field value goes through before it may reach the sink.

use crate::error::{RangeBound, ValidationError};
use crate::schema::{FieldSpec, SemanticType};
use crate::value::Value;

/// Whether `value`'s shape matches `semantic_type`. Integers are accepted
/// where a floating value is declared; `Null` matches nothing.
pub fn is_valid_type(value: &Value, semantic_type: SemanticType) -> bool {
    matches!(
        (value, semantic_type),
        (Value::Str(_), SemanticType::String)
            | (Value::Bool(_), SemanticType::Boolean)
            | (Value::Int(_), SemanticType::Integer)
            | (Value::Int(_) | Value::Float(_), SemanticType::Floating)
            | (Value::List(_), SemanticType::List)
            | (Value::Map(_), SemanticType::Map)
    )
}

/// Membership test. Callers skip this when the field has no allowed set;
/// an empty slice here means nothing is allowed.
pub fn is_allowed_value(value: &Value, allowed: &[Value]) -> bool {
    allowed.iter().any(|candidate| candidate.literal_eq(value))
}

/// Inclusive bounds check. Non-numeric values are never out of range; NaN
/// is outside any declared bound.
pub fn is_in_range(value: &Value, min: Option<f64>, max: Option<f64>) -> Result<(), RangeBound> {
    let Some(n) = value.as_f64() else {
        return Ok(());
    };

    if n.is_nan() {
        return match (min, max) {
            (Some(min), _) => Err(RangeBound::Min(min)),
            (None, Some(max)) => Err(RangeBound::Max(max)),
            (None, None) => Ok(()),
        };
    }

    if let Some(min) = min {
        if n < min {
            return Err(RangeBound::Min(min));
        }
    }

    if let Some(max) = max {
        if n > max {
            return Err(RangeBound::Max(max));
        }
    }

    Ok(())
}

pub fn in_range(value: &Value, min: Option<f64>, max: Option<f64>) -> bool {
    is_in_range(value, min, max).is_ok()
}

/// Applies one field's contract, returning the value to hand downstream
/// (the input itself, or the declared default for a substituted null).
pub fn validate_field(spec: &FieldSpec, value: &Value) -> Result<Value, ValidationError> {
    if value.is_null() {
        if spec.required {
            return Err(ValidationError::RequiredFieldNull {
                field: spec.name.clone(),
            });
        }
        if spec.nullable {
            return Ok(Value::Null);
        }
        return Ok(spec.default_value.clone());
    }

    if !is_valid_type(value, spec.semantic_type) {
        return Err(ValidationError::TypeMismatch {
            field: spec.name.clone(),
            expected: spec.semantic_type,
            actual: value.kind_name(),
        });
    }

    // NaN and infinities have no JSON form and would reach the sink as null.
    if matches!(value, Value::Float(x) if !x.is_finite()) {
        return Err(ValidationError::TypeMismatch {
            field: spec.name.clone(),
            expected: spec.semantic_type,
            actual: "non-finite floating",
        });
    }

    if let Some(allowed) = &spec.allowed_values {
        if !is_allowed_value(value, allowed) {
            return Err(ValidationError::DisallowedValue {
                field: spec.name.clone(),
                value: value.clone(),
                allowed: allowed.clone(),
            });
        }
    }

    is_in_range(value, spec.min, spec.max).map_err(|bound| ValidationError::OutOfRange {
        field: spec.name.clone(),
        value: value.clone(),
        bound,
    })?;

    Ok(value.clone())
}
