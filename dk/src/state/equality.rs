//! Structural equality used for change suppression

use chrono::DateTime;
use serde_json::{Number, Value};

/// True when `a` and `b` hold the same data
///
/// - numbers compare by value, so `1` equals `1.0`
/// - two RFC 3339 timestamps are equal when they denote the same millisecond
/// - `null` is only equal to `null`; differing kinds are never equal
/// - objects compare key by key regardless of order, arrays element-wise
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y || same_instant(x, y),
        (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r)),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(key, l)| y.get(key).is_some_and(|r| deep_equal(l, r)))
        }
        _ => false,
    }
}

/// Optional-aware variant: an absent value only equals another absent value
pub fn deep_equal_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => deep_equal(a, b),
        _ => false,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn same_instant(x: &str, y: &str) -> bool {
    match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
        (Ok(a), Ok(b)) => a.timestamp_millis() == b.timestamp_millis(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_nested_objects() {
        assert!(deep_equal(&json!({"x": {"y": 1}}), &json!({"x": {"y": 1}})));
        assert!(!deep_equal(&json!({"x": {"y": 1}}), &json!({"x": {"y": 2}})));
    }

    #[test]
    fn test_key_count_differs() {
        assert!(!deep_equal(&json!({}), &json!({"a": 1})));
        assert!(!deep_equal(&json!({"a": 1, "b": 2}), &json!({"a": 1})));
    }

    #[test]
    fn test_dates_compare_by_instant() {
        let epoch = json!("1970-01-01T00:00:00Z");
        assert!(deep_equal(&epoch, &json!("1970-01-01T00:00:00.000Z")));
        assert!(deep_equal(&epoch, &json!("1970-01-01T01:00:00+01:00")));
        assert!(!deep_equal(&epoch, &json!("1970-01-01T00:00:00.001Z")));
    }

    #[test]
    fn test_null_never_equals_defined() {
        assert!(deep_equal(&Value::Null, &Value::Null));
        for other in [json!(0), json!(false), json!(""), json!({}), json!([])] {
            assert!(!deep_equal(&Value::Null, &other));
            assert!(!deep_equal(&other, &Value::Null));
        }
    }

    #[test]
    fn test_kinds_and_numbers() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(!deep_equal(&json!(1), &json!("1")));
        assert!(!deep_equal(&json!([1]), &json!({"0": 1})));
        assert!(!deep_equal(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn test_optional_values() {
        assert!(deep_equal_opt(None, None));
        assert!(!deep_equal_opt(None, Some(&Value::Null)));
        assert!(deep_equal_opt(Some(&json!(3)), Some(&json!(3))));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_reflexive(v in arb_json()) {
            prop_assert!(deep_equal(&v, &v.clone()));
        }

        #[test]
        fn prop_symmetric(a in arb_json(), b in arb_json()) {
            prop_assert_eq!(deep_equal(&a, &b), deep_equal(&b, &a));
        }
    }
}
