//! Conversions between the value domain, the host-native JSON tree, and the
//! canonical AST string form used for error formatting and cache keys.

use std::fmt::Write;
use std::sync::Arc;

use super::{sorted_entries, Number, Object, Value};

/// Convert a host-native JSON tree into the value domain. Objects become
/// the immutable parsed form with interned string keys.
pub fn from_native(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(number_from_native(n)),
        serde_json::Value::String(s) => Value::String(Arc::from(s.as_str())),
        serde_json::Value::Array(a) => {
            Value::Array(Arc::new(a.iter().map(from_native).collect()))
        }
        serde_json::Value::Object(o) => Value::Object(Object::from_parsed(
            o.iter()
                .map(|(k, v)| (Arc::from(k.as_str()), from_native(v)))
                .collect(),
        )),
    }
}

fn number_from_native(n: &serde_json::Number) -> Number {
    if let Some(i) = n.as_i64() {
        Number::Int(i)
    } else if n.as_u64().is_some() {
        // Above i64::MAX: keep the text to avoid a lossy float round-trip.
        Number::Big(Arc::from(n.to_string().as_str()))
    } else if let Some(f) = n.as_f64() {
        Number::Float(f)
    } else {
        Number::Big(Arc::from(n.to_string().as_str()))
    }
}

/// Convert a value into the host-native JSON tree. Sets render as sorted
/// arrays; externals render through iteration.
pub fn to_native(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number_to_native(n),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Array(a) => serde_json::Value::Array(a.iter().map(to_native).collect()),
        Value::Set(s) => {
            serde_json::Value::Array(s.sorted().iter().map(to_native).collect())
        }
        Value::Object(o) => {
            let mut out = serde_json::Map::with_capacity(o.len());
            for (k, v) in o.iter() {
                out.insert(native_key(&k), to_native(&v));
            }
            serde_json::Value::Object(out)
        }
        Value::External(x) => {
            let mut out = serde_json::Map::new();
            let _ = x.iter(&mut |k, v| {
                out.insert(native_key(&k), to_native(&v));
                Ok(false)
            });
            serde_json::Value::Object(out)
        }
    }
}

/// JSON object keys must be strings; non-string keys use the canonical
/// form.
fn native_key(k: &Value) -> String {
    match k {
        Value::String(s) => s.to_string(),
        other => ast_string(other),
    }
}

fn number_to_native(n: &Number) -> serde_json::Value {
    match n {
        Number::Int(i) => serde_json::Value::from(*i),
        Number::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Number::Big(s) => {
            if let Ok(i) = s.parse::<i64>() {
                serde_json::Value::from(i)
            } else if let Ok(u) = s.parse::<u64>() {
                serde_json::Value::from(u)
            } else {
                s.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            }
        }
    }
}

/// Canonical, deterministic rendition of a value. Object keys print in
/// sorted order; sets print sorted inside braces; strings are JSON-quoted.
pub fn ast_string(v: &Value) -> String {
    let mut out = String::new();
    write_ast(&mut out, v);
    out
}

fn write_ast(out: &mut String, v: &Value) {
    match v {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => {
            let quoted = serde_json::to_string(s.as_ref()).unwrap_or_default();
            out.push_str(&quoted);
        }
        Value::Array(a) => {
            out.push('[');
            for (i, elem) in a.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_ast(out, elem);
            }
            out.push(']');
        }
        Value::Set(s) => {
            if s.is_empty() {
                out.push_str("set()");
                return;
            }
            out.push('{');
            for (i, elem) in s.sorted().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_ast(out, elem);
            }
            out.push('}');
        }
        Value::Object(_) | Value::External(_) => {
            out.push('{');
            for (i, (k, val)) in sorted_entries(v).iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_ast(out, k);
                out.push_str(": ");
                write_ast(out, val);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_round_trip_preserves_structure() {
        let native = serde_json::json!({
            "user": {"id": "u1", "roles": ["admin", "dev"]},
            "count": 3,
            "ratio": 0.5,
            "ok": true,
            "missing": null,
        });
        let value = from_native(&native);
        assert!(value.is_object());
        assert_eq!(to_native(&value), native);
    }

    #[test]
    fn parsed_objects_intern_string_keys() {
        let value = from_native(&serde_json::json!({"a": 1}));
        let Value::Object(o) = &value else {
            panic!("expected object")
        };
        assert!(o.is_parsed());
        assert_eq!(o.get_str("a"), Some(&Value::from(1i64)));
    }

    #[test]
    fn ast_form_sorts_object_keys() {
        let v = from_native(&serde_json::json!({"b": 2, "a": {"k": 1}}));
        assert_eq!(ast_string(&v), r#"{"a": {"k": 1}, "b": 2}"#);
    }

    #[test]
    fn ast_form_renders_sets_sorted() {
        let mut s = super::super::Set::new();
        s.insert(Value::from(3i64));
        s.insert(Value::from(1i64));
        s.insert(Value::from(2i64));
        assert_eq!(ast_string(&Value::Set(s)), "{1, 2, 3}");
        assert_eq!(ast_string(&Value::new_set()), "set()");
    }

    #[test]
    fn sets_convert_to_sorted_native_arrays() {
        let mut s = super::super::Set::new();
        s.insert(Value::from(true));
        let native = to_native(&Value::Set(s));
        assert_eq!(native, serde_json::json!([true]));
    }
}
