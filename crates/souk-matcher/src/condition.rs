// Condition evaluation with the coercion rules of the protocol: string
// fields compare with EQ/NE only, numeric fields compare in f64, and any
// coercion failure makes the condition false rather than failing the event.
use souk_wire::{ComparisonOperator, FilterCondition};

use crate::fields::FieldValue;

// Aggregates are f64 arithmetic; equality on them keeps a small tolerance.
const AGGREGATE_EQ_EPSILON: f64 = 0.01;

fn operator(condition: &FilterCondition) -> Option<ComparisonOperator> {
    ComparisonOperator::try_from(condition.operator).ok()
}

fn compare_f64(op: ComparisonOperator, left: f64, right: f64) -> bool {
    match op {
        ComparisonOperator::Eq => left == right,
        ComparisonOperator::Ne => left != right,
        ComparisonOperator::Gt => left > right,
        ComparisonOperator::Ge => left >= right,
        ComparisonOperator::Lt => left < right,
        ComparisonOperator::Le => left <= right,
    }
}

/// Evaluates one non-windowed condition against an extracted field value.
pub fn evaluate_condition(condition: &FilterCondition, field: FieldValue<'_>) -> bool {
    let Some(op) = operator(condition) else {
        return false;
    };
    match field {
        FieldValue::Str(actual) => match op {
            ComparisonOperator::Eq => actual == condition.value,
            ComparisonOperator::Ne => actual != condition.value,
            // Ordered operators are not defined for string fields.
            _ => false,
        },
        FieldValue::Int(_) | FieldValue::Float(_) => {
            let Some(actual) = field.as_f64() else {
                return false;
            };
            let Ok(expected) = condition.value.parse::<f64>() else {
                return false;
            };
            compare_f64(op, actual, expected)
        }
    }
}

/// Evaluates a windowed condition against a closed window's aggregate.
pub fn evaluate_windowed(condition: &FilterCondition, aggregated: f64) -> bool {
    let Some(op) = operator(condition) else {
        return false;
    };
    let Ok(expected) = condition.value.parse::<f64>() else {
        return false;
    };
    match op {
        ComparisonOperator::Eq => (aggregated - expected).abs() < AGGREGATE_EQ_EPSILON,
        ComparisonOperator::Ne => (aggregated - expected).abs() >= AGGREGATE_EQ_EPSILON,
        _ => compare_f64(op, aggregated, expected),
    }
}
