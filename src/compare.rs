//! Polymorphic ordering over dynamic values.
//!
//! Comparison resolves in a fixed order: built-in rules for matching kinds,
//! then a per-field comparator registered on the schema, then a canonical
//! text comparison when both sides share a kind, and finally a type
//! mismatch. Times order correctly under the string rule because they
//! serialize as RFC 3339.

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::error::{Result, StoreError};
use crate::schema::CompareFn;

/// Compares two dynamic values, consulting `custom` before giving up on
/// pairs the built-in rules cannot order.
pub(crate) fn compare(custom: Option<&CompareFn>, a: &Value, b: &Value) -> Result<Ordering> {
    if let Some(ord) = builtin(a, b) {
        return Ok(ord);
    }

    if let Some(cmp) = custom {
        if let Some(ord) = cmp(a, b) {
            return Ok(ord);
        }
    }

    // Same-kind values without a built-in ordering (objects, mostly)
    // fall back to their canonical text form.
    if same_kind(a, b) {
        return Ok(a.to_string().cmp(&b.to_string()));
    }

    Err(StoreError::TypeMismatch(format!(
        "cannot compare {} with {}",
        kind_name(a),
        kind_name(b)
    )))
}

/// Equality via [`compare`]. Two values are equal when they compare equal.
pub(crate) fn values_equal(custom: Option<&CompareFn>, a: &Value, b: &Value) -> Result<bool> {
    Ok(compare(custom, a, b)? == Ordering::Equal)
}

fn builtin(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                match builtin(ex, ey)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Option<Ordering> {
    // Pure integers compare exactly regardless of signedness.
    if let (Some(ix), Some(iy)) = (as_i128(x), as_i128(y)) {
        return Some(ix.cmp(&iy));
    }
    // Anything involving a float compares as f64; NaN is unordered.
    x.as_f64()?.partial_cmp(&y.as_f64()?)
}

fn as_i128(n: &Number) -> Option<i128> {
    if let Some(i) = n.as_i64() {
        Some(i128::from(i))
    } else {
        n.as_u64().map(i128::from)
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    kind_name(a) == kind_name(b)
}

pub(crate) fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
