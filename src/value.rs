//! Dynamic field access over decoded records.
//!
//! The executor works on records decoded into [`serde_json::Value`]; this
//! module navigates them by field name (including dotted paths into nested
//! structs) and recognizes zero values for key-field injection.

use serde_json::Value;

/// Navigates a dotted field path inside a decoded record.
///
/// Returns `None` when any segment of the path does not exist, which the
/// caller reports as a bad-field error.
pub(crate) fn field_at<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sets a dotted field path inside a decoded record.
///
/// Returns false when the path does not resolve to an existing field.
pub(crate) fn set_field_at(record: &mut Value, path: &str, new_value: Value) -> bool {
    let mut current = record;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(object) = current.as_object_mut() else {
            return false;
        };
        let Some(slot) = object.get_mut(segment) else {
            return false;
        };
        if segments.peek().is_none() {
            *slot = new_value;
            return true;
        }
        current = slot;
    }
    false
}

/// Reports whether a value is the zero value of its kind: null, `0`, the
/// empty string, `false`, or an empty array. Key-field injection only
/// overwrites zero values.
pub(crate) fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => {
            n.as_i64() == Some(0) || n.as_u64() == Some(0) || n.as_f64() == Some(0.0)
        }
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_at_top_level() {
        let record = json!({"name": "car", "id": 3});
        assert_eq!(field_at(&record, "name"), Some(&json!("car")));
        assert_eq!(field_at(&record, "id"), Some(&json!(3)));
        assert_eq!(field_at(&record, "missing"), None);
    }

    #[test]
    fn test_field_at_nested_path() {
        let record = json!({"account": {"owner": {"name": "ann"}}});
        assert_eq!(field_at(&record, "account.owner.name"), Some(&json!("ann")));
        assert_eq!(field_at(&record, "account.missing.name"), None);
        // Paths cannot descend through scalars.
        assert_eq!(field_at(&record, "account.owner.name.deeper"), None);
    }

    #[test]
    fn test_set_field_at() {
        let mut record = json!({"id": 0, "nested": {"seq": 0}});
        assert!(set_field_at(&mut record, "id", json!(9)));
        assert!(set_field_at(&mut record, "nested.seq", json!(4)));
        assert!(!set_field_at(&mut record, "nested.missing", json!(1)));
        assert_eq!(record, json!({"id": 9, "nested": {"seq": 4}}));
    }

    #[test]
    fn test_is_zero() {
        assert!(is_zero(&json!(null)));
        assert!(is_zero(&json!(0)));
        assert!(is_zero(&json!(0.0)));
        assert!(is_zero(&json!("")));
        assert!(is_zero(&json!(false)));
        assert!(is_zero(&json!([])));

        assert!(!is_zero(&json!(1)));
        assert!(!is_zero(&json!(-2)));
        assert!(!is_zero(&json!("x")));
        assert!(!is_zero(&json!(true)));
        assert!(!is_zero(&json!(["a"])));
        assert!(!is_zero(&json!({})));
    }
}
