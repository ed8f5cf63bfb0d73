//! Property tests for the per-field contract (pure, no queue).

use proptest::prelude::*;

use crate::error::{RangeBound, ValidationError};
use crate::schema::{FieldSpec, SemanticType};
use crate::validation::{in_range, is_in_range, is_valid_type, validate_field};
use crate::value::Value;

fn semantic_type() -> impl Strategy<Value = SemanticType> {
    prop_oneof![
        Just(SemanticType::String),
        Just(SemanticType::Boolean),
        Just(SemanticType::Integer),
        Just(SemanticType::Floating),
        Just(SemanticType::List),
        Just(SemanticType::Map),
    ]
}

fn scalar_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1e6f64..1e6).prop_map(Value::Float),
        "[a-z_]{0,12}".prop_map(Value::Str),
        Just(Value::List(vec![])),
        Just(Value::Map(Default::default())),
    ]
}

fn declared_shape(value: &Value) -> Option<SemanticType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(SemanticType::Boolean),
        Value::Int(_) => Some(SemanticType::Integer),
        Value::Float(_) => Some(SemanticType::Floating),
        Value::Str(_) => Some(SemanticType::String),
        Value::List(_) => Some(SemanticType::List),
        Value::Map(_) => Some(SemanticType::Map),
    }
}

proptest! {
    /// Property: a value is accepted only by its own shape, plus integers
    /// standing in for floating values.
    #[test]
    fn prop_type_check_is_shape_exact(value in scalar_value(), ty in semantic_type()) {
        let own = declared_shape(&value);
        let expected = own == Some(ty)
            || (ty == SemanticType::Floating && own == Some(SemanticType::Integer));

        prop_assert_eq!(is_valid_type(&value, ty), expected);
    }

    /// Property: a mismatched shape always fails the field with TypeMismatch.
    #[test]
    fn prop_mismatched_type_is_rejected(value in scalar_value(), ty in semantic_type()) {
        prop_assume!(!is_valid_type(&value, ty));
        let spec = FieldSpec::new("field", ty);

        let result = validate_field(&spec, &value);
        prop_assert!(
            matches!(result, Err(ValidationError::TypeMismatch { .. })),
            "expected type mismatch, got {:?}",
            result
        );
    }

    /// Property: bounds are inclusive on both sides.
    #[test]
    fn prop_range_is_inclusive(min in -1000i64..1000, span in 0i64..1000, n in -3000i64..3000) {
        let max = min + span;
        let value = Value::Int(n);

        prop_assert_eq!(
            in_range(&value, Some(min as f64), Some(max as f64)),
            n >= min && n <= max
        );
        prop_assert!(in_range(&Value::Int(min), Some(min as f64), Some(max as f64)));
        prop_assert!(in_range(&Value::Int(max), Some(min as f64), Some(max as f64)));
    }

    /// Property: the reported bound is the side that was crossed.
    #[test]
    fn prop_reports_crossed_bound(n in -500i64..500) {
        match is_in_range(&Value::Int(n), Some(0.0), Some(100.0)) {
            Ok(()) => prop_assert!((0..=100).contains(&n)),
            Err(RangeBound::Min(_)) => prop_assert!(n < 0),
            Err(RangeBound::Max(_)) => prop_assert!(n > 100),
        }
    }

    /// Property: a defaulted field always yields its default for null input.
    #[test]
    fn prop_null_becomes_default(default in any::<i64>()) {
        let spec = FieldSpec::new("myScore", SemanticType::Integer).default_value(default);
        prop_assert_eq!(validate_field(&spec, &Value::Null), Ok(Value::Int(default)));
    }

    /// Property: accepted values come back unchanged.
    #[test]
    fn prop_valid_value_is_returned_verbatim(value in scalar_value()) {
        let Some(ty) = declared_shape(&value) else {
            return Ok(());
        };
        let spec = FieldSpec::new("field", ty);
        prop_assert_eq!(validate_field(&spec, &value), Ok(value.clone()));
    }

    /// Property: NaN and infinities never pass a floating field, whatever
    /// its bounds.
    #[test]
    fn prop_non_finite_float_is_rejected(
        x in prop_oneof![Just(f64::NAN), Just(f64::INFINITY), Just(f64::NEG_INFINITY)],
        min in proptest::option::of(-1e3f64..0.0),
        max in proptest::option::of(0.0f64..1e3),
    ) {
        let mut spec = FieldSpec::new("timerProgress", SemanticType::Floating);
        spec.min = min;
        spec.max = max;

        let result = validate_field(&spec, &Value::Float(x));
        prop_assert!(
            matches!(result, Err(ValidationError::TypeMismatch { .. })),
            "expected rejection of {}, got {:?}",
            x,
            result
        );
        if min.is_some() && max.is_some() {
            prop_assert!(!in_range(&Value::Float(x), min, max));
        }
    }
}
