//! Conversions between typed protocol values and the JSON scalars stored in the config tree.

use crate::error::{self, Result};
use crate::schema::{local_name, ScalarKind};
use apitypes::TypedValue;
use serde_json::{Number, Value};
use snafu::{ensure, OptionExt};

/// The stringified form of a stored value, used to match list keys.  A number prints in its
/// shortest form, so the stored `10` matches the key `"10"`, while a stored `10.5` matches only
/// `"10.5"`.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The stored form of a key given in a path.  Keys whose leaf is numeric become numbers; any
/// other key keeps the text of the path, so `007` stays `"007"`.
pub fn key_value(s: &str, kind: Option<&ScalarKind>) -> Value {
    let number = match kind {
        Some(ScalarKind::Int { .. }) => s.parse::<i64>().ok().map(Value::from),
        Some(ScalarKind::Uint { .. }) => s.parse::<u64>().ok().map(Value::from),
        Some(ScalarKind::Decimal) => s
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    };
    number.unwrap_or_else(|| Value::String(s.to_string()))
}

/// Converts a scalar (or leaf-list) typed value to its stored JSON form.
pub fn to_scalar(value: &TypedValue, at: &str) -> Result<Value> {
    Ok(match value {
        TypedValue::StringVal(s) => Value::String(s.clone()),
        TypedValue::IntVal(i) => Value::from(*i),
        TypedValue::UintVal(u) => Value::from(*u),
        TypedValue::BoolVal(b) => Value::Bool(*b),
        TypedValue::BytesVal(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        TypedValue::FloatVal(f) => {
            Value::Number(Number::from_f64(*f).context(error::InvalidValueSnafu {
                path: at,
                msg: format!("float value {} has no JSON form", f),
            })?)
        }
        TypedValue::LeafListVal(items) => Value::Array(
            items
                .iter()
                .map(|item| {
                    ensure!(
                        !matches!(item, TypedValue::LeafListVal(_)),
                        error::InvalidValueSnafu {
                            path: at,
                            msg: "nested leaf-list value",
                        }
                    );
                    to_scalar(item, at)
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        TypedValue::JsonVal(_) | TypedValue::JsonIetfVal(_) => {
            return error::InvalidValueSnafu {
                path: at,
                msg: "expected a scalar value, got a JSON document",
            }
            .fail()
        }
    })
}

/// Converts a stored leaf (or leaf-list) to a typed value; enumerations give their name.
pub fn from_scalar(value: &Value, kind: &ScalarKind, at: &str) -> Result<TypedValue> {
    if let Value::Array(items) = value {
        return items
            .iter()
            .map(|item| from_scalar(item, kind, at))
            .collect::<Result<Vec<_>>>()
            .map(TypedValue::LeafListVal);
    }

    let typed = match kind {
        ScalarKind::String | ScalarKind::Enumeration { .. } | ScalarKind::Binary => {
            value.as_str().map(|s| TypedValue::StringVal(s.to_string()))
        }
        ScalarKind::Int { .. } => value.as_i64().map(TypedValue::IntVal),
        ScalarKind::Uint { .. } => value.as_u64().map(TypedValue::UintVal),
        ScalarKind::Bool => value.as_bool().map(TypedValue::BoolVal),
        ScalarKind::Decimal => value.as_f64().map(TypedValue::FloatVal),
    };
    typed.context(error::InvalidValueSnafu {
        path: at,
        msg: format!("stored value {} doesn't match type {:?}", value, kind),
    })
}

/// Coerces a raw JSON scalar to the canonical stored form for its type.  Numeric leaves accept
/// numeric strings; string leaves accept numbers and booleans.
pub fn canonical_scalar(raw: Value, kind: &ScalarKind, at: &str) -> Result<Value> {
    let canonical = match (kind, raw) {
        (ScalarKind::String, Value::String(s)) => Some(Value::String(s)),
        (ScalarKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ScalarKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (ScalarKind::Int { .. }, Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral_f64).map(|f| f as i64))
            .map(Value::from),
        (ScalarKind::Int { .. }, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (ScalarKind::Uint { .. }, Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .and_then(integral_f64)
                    .filter(|f| *f >= 0.0)
                    .map(|f| f as u64)
            })
            .map(Value::from),
        (ScalarKind::Uint { .. }, Value::String(s)) => s.trim().parse::<u64>().ok().map(Value::from),
        (ScalarKind::Bool, Value::Bool(b)) => Some(Value::Bool(b)),
        (ScalarKind::Bool, Value::String(s)) => s.parse::<bool>().ok().map(Value::Bool),
        (ScalarKind::Decimal, Value::Number(n)) => Some(Value::Number(n)),
        (ScalarKind::Decimal, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (ScalarKind::Enumeration { .. }, Value::String(s)) => {
            Some(Value::String(local_name(&s).to_string()))
        }
        (ScalarKind::Binary, Value::String(s)) => Some(Value::String(s)),
        (kind, raw) => {
            return error::InvalidValueSnafu {
                path: at,
                msg: format!("{} is not a valid {:?}", raw, kind),
            }
            .fail()
        }
    };
    canonical.context(error::InvalidValueSnafu {
        path: at,
        msg: format!("value is not a valid {:?}", kind),
    })
}

fn integral_f64(f: f64) -> Option<f64> {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= u64::MAX as f64 {
        Some(f)
    } else {
        None
    }
}

/// Checks a stored scalar against its type: ranges by bit width, and enumeration membership.
pub fn check_scalar(value: &Value, kind: &ScalarKind, at: &str) -> Result<()> {
    let ok = match kind {
        ScalarKind::String | ScalarKind::Binary => value.is_string(),
        ScalarKind::Int { bits } => value
            .as_i64()
            .map(|i| {
                let bits = u32::from((*bits).clamp(1, 64));
                let max = (1i128 << (bits - 1)) - 1;
                let min = -(1i128 << (bits - 1));
                (min..=max).contains(&i128::from(i))
            })
            .unwrap_or(false),
        ScalarKind::Uint { bits } => value
            .as_u64()
            .map(|u| {
                let bits = u32::from((*bits).clamp(1, 64));
                let max = (1u128 << bits) - 1;
                u128::from(u) <= max
            })
            .unwrap_or(false),
        ScalarKind::Bool => value.is_boolean(),
        ScalarKind::Decimal => value.is_number(),
        ScalarKind::Enumeration { values } => value
            .as_str()
            .map(|s| values.iter().any(|v| v == s))
            .unwrap_or(false),
    };
    ensure!(
        ok,
        error::ValidationSnafu {
            path: at,
            msg: format!("{} is not a valid {:?}", value, kind),
        }
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_values() {
        let int = ScalarKind::Int { bits: 32 };
        let uint = ScalarKind::Uint { bits: 64 };
        assert_eq!(key_value("10", Some(&uint)), json!(10));
        assert_eq!(key_value("-3", Some(&int)), json!(-3));
        assert_eq!(key_value("18446744073709551615", Some(&uint)), json!(u64::MAX));
        assert_eq!(key_value("1.5", Some(&ScalarKind::Decimal)), json!(1.5));
        assert_eq!(key_value("nan", Some(&ScalarKind::Decimal)), json!("nan"));
        // Not a number, so validation gets to reject it.
        assert_eq!(key_value("eth0", Some(&uint)), json!("eth0"));
    }

    #[test]
    fn string_keys_keep_their_text() {
        for key in &["007", "1e3", "+5", "1.50", "10", "eth0"] {
            assert_eq!(key_value(key, Some(&ScalarKind::String)), json!(key));
            assert_eq!(key_string(&key_value(key, Some(&ScalarKind::String))), *key);
        }
        // A key the schema doesn't describe is kept as text too.
        assert_eq!(key_value("007", None), json!("007"));
    }

    #[test]
    fn key_strings_match_stored_numbers() {
        let uint = ScalarKind::Uint { bits: 8 };
        assert_eq!(key_string(&key_value("10", Some(&uint))), "10");
        assert_eq!(key_string(&json!("10")), "10");
        assert_eq!(key_string(&key_value("1.5", Some(&ScalarKind::Decimal))), "1.5");
        // Stored 10.0 doesn't match "10"; matching is by the stringified form.
        assert_eq!(key_string(&json!(10.0)), "10.0");
        assert_eq!(key_string(&json!(true)), "true");
    }

    #[test]
    fn scalars_to_json() {
        assert_eq!(to_scalar(&TypedValue::UintVal(7), "/x").unwrap(), json!(7));
        assert_eq!(
            to_scalar(
                &TypedValue::LeafListVal(vec![
                    TypedValue::StringVal("a".to_string()),
                    TypedValue::StringVal("b".to_string())
                ]),
                "/x"
            )
            .unwrap(),
            json!(["a", "b"])
        );
        assert!(to_scalar(&TypedValue::JsonVal(b"{}".to_vec()), "/x").is_err());
        assert!(to_scalar(&TypedValue::FloatVal(f64::NAN), "/x").is_err());
    }

    #[test]
    fn json_to_typed() {
        let enumeration = ScalarKind::Enumeration {
            values: vec!["SECURE".to_string(), "STANDALONE".to_string()],
        };
        assert_eq!(
            from_scalar(&json!("SECURE"), &enumeration, "/x").unwrap(),
            TypedValue::StringVal("SECURE".to_string())
        );
        assert_eq!(
            from_scalar(&json!(10), &ScalarKind::Uint { bits: 32 }, "/x").unwrap(),
            TypedValue::UintVal(10)
        );
        assert_eq!(
            from_scalar(&json!(["a"]), &ScalarKind::String, "/x").unwrap(),
            TypedValue::LeafListVal(vec![TypedValue::StringVal("a".to_string())])
        );
        assert!(from_scalar(&json!("x"), &ScalarKind::Bool, "/x").is_err());
    }

    #[test]
    fn canonical_forms() {
        let uint = ScalarKind::Uint { bits: 16 };
        assert_eq!(canonical_scalar(json!("80"), &uint, "/x").unwrap(), json!(80));
        assert_eq!(canonical_scalar(json!(80.0), &uint, "/x").unwrap(), json!(80));
        assert!(canonical_scalar(json!(-1), &uint, "/x").is_err());
        assert!(canonical_scalar(json!(1.5), &uint, "/x").is_err());
        assert!(canonical_scalar(json!({}), &uint, "/x").is_err());

        assert_eq!(
            canonical_scalar(json!(10), &ScalarKind::String, "/x").unwrap(),
            json!("10")
        );
        assert_eq!(
            canonical_scalar(json!("true"), &ScalarKind::Bool, "/x").unwrap(),
            json!(true)
        );
    }

    #[test]
    fn ranges() {
        let int8 = ScalarKind::Int { bits: 8 };
        assert!(check_scalar(&json!(127), &int8, "/x").is_ok());
        assert!(check_scalar(&json!(-128), &int8, "/x").is_ok());
        assert!(check_scalar(&json!(128), &int8, "/x").is_err());
        assert!(check_scalar(&json!(-129), &int8, "/x").is_err());

        let uint64 = ScalarKind::Uint { bits: 64 };
        assert!(check_scalar(&json!(u64::MAX), &uint64, "/x").is_ok());
        assert!(check_scalar(&json!(-1), &uint64, "/x").is_err());

        assert!(check_scalar(&json!(1.5), &ScalarKind::Decimal, "/x").is_ok());
        assert!(check_scalar(&json!("1.5"), &ScalarKind::Decimal, "/x").is_err());
    }
}
