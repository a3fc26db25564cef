//! Object built-ins.

use crate::error::{BuiltinError, EvalError};
use crate::value::{Object, Set, Value};

use super::BuiltinContext;

fn object_operand<'v>(
    ctx: &mut BuiltinContext<'_>,
    name: &str,
    v: &'v Value,
) -> Result<Option<&'v Value>, EvalError> {
    if v.is_object() {
        Ok(Some(v))
    } else {
        ctx.error(BuiltinError::type_error(name, "object", v.type_name()));
        Ok(None)
    }
}

/// `object.get(obj, path, default)`: a non-array `path` is a single key;
/// an empty path returns `obj`; any missing step yields `default`.
pub fn get(
    ctx: &mut BuiltinContext<'_>,
    obj: &Value,
    path: &Value,
    default: &Value,
) -> Result<Option<Value>, EvalError> {
    let Some(obj) = object_operand(ctx, "object.get", obj)? else {
        return Ok(None);
    };
    let steps: Vec<Value> = match path {
        Value::Array(p) => p.iter().cloned().collect(),
        single => vec![single.clone()],
    };
    let mut current = obj.clone();
    for step in &steps {
        match current.get_key(step)? {
            Some(next) => current = next,
            None => return Ok(Some(default.clone())),
        }
    }
    Ok(Some(current))
}

/// `object.keys(obj)`: the set of keys.
pub fn keys(ctx: &mut BuiltinContext<'_>, obj: &Value) -> Result<Option<Value>, EvalError> {
    let Some(obj) = object_operand(ctx, "object.keys", obj)? else {
        return Ok(None);
    };
    let mut out = Set::new();
    obj.iter_entries(&mut |k, _| {
        out.insert(k);
        Ok(false)
    })?;
    Ok(Some(Value::Set(out)))
}

/// Keys named by a removal/filter collection: an object contributes its
/// keys, arrays and sets their elements.
fn key_collection(
    ctx: &mut BuiltinContext<'_>,
    name: &str,
    coll: &Value,
) -> Result<Option<Set>, EvalError> {
    match coll {
        Value::Object(_) | Value::External(_) => {
            let mut out = Set::new();
            coll.iter_entries(&mut |k, _| {
                out.insert(k);
                Ok(false)
            })?;
            Ok(Some(out))
        }
        Value::Array(_) | Value::Set(_) => {
            let mut out = Set::new();
            coll.iter_entries(&mut |_, v| {
                out.insert(v);
                Ok(false)
            })?;
            Ok(Some(out))
        }
        other => {
            ctx.error(BuiltinError::type_error(
                name,
                "object, set, or array",
                other.type_name(),
            ));
            Ok(None)
        }
    }
}

/// `object.remove(obj, coll)`: drop the named keys.
pub fn remove(
    ctx: &mut BuiltinContext<'_>,
    obj: &Value,
    coll: &Value,
) -> Result<Option<Value>, EvalError> {
    let Some(obj) = object_operand(ctx, "object.remove", obj)? else {
        return Ok(None);
    };
    let Some(drop) = key_collection(ctx, "object.remove", coll)? else {
        return Ok(None);
    };
    let mut out = Object::new();
    obj.iter_entries(&mut |k, v| {
        if !drop.contains(&k) {
            out.insert(k, v);
        }
        Ok(false)
    })?;
    Ok(Some(Value::Object(out)))
}

/// `object.filter(obj, coll)`: keep only the named keys.
pub fn filter(
    ctx: &mut BuiltinContext<'_>,
    obj: &Value,
    coll: &Value,
) -> Result<Option<Value>, EvalError> {
    let Some(obj) = object_operand(ctx, "object.filter", obj)? else {
        return Ok(None);
    };
    let Some(keep) = key_collection(ctx, "object.filter", coll)? else {
        return Ok(None);
    };
    let mut out = Object::new();
    obj.iter_entries(&mut |k, v| {
        if keep.contains(&k) {
            out.insert(k, v);
        }
        Ok(false)
    })?;
    Ok(Some(Value::Object(out)))
}

/// `object.union(a, b)`: deep merge; object-valued conflicts merge
/// recursively, anything else resolves to `b`.
pub fn union(
    ctx: &mut BuiltinContext<'_>,
    a: &Value,
    b: &Value,
) -> Result<Option<Value>, EvalError> {
    if object_operand(ctx, "object.union", a)?.is_none() {
        return Ok(None);
    }
    if object_operand(ctx, "object.union", b)?.is_none() {
        return Ok(None);
    }
    Ok(Some(merge(a, b)?))
}

/// Deep merge of two object-shaped values, shared with the `object-merge`
/// statement.
pub(crate) fn merge(a: &Value, b: &Value) -> Result<Value, EvalError> {
    let mut out = Object::new();
    a.iter_entries(&mut |k, v| {
        out.insert(k, v);
        Ok(false)
    })?;
    let mut err = None;
    b.iter_entries(&mut |k, bv| {
        let merged = match (out.get(&k), bv.is_object()) {
            (Some(av), true) if av.is_object() => match merge(&av.clone(), &bv) {
                Ok(m) => m,
                Err(e) => {
                    err = Some(e);
                    return Ok(true);
                }
            },
            _ => bv,
        };
        out.insert(k, merged);
        Ok(false)
    })?;
    match err {
        Some(e) => Err(e),
        None => Ok(Value::Object(out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::test_ctx;
    use crate::value::{from_native, to_native};

    fn v(src: serde_json::Value) -> Value {
        from_native(&src)
    }

    #[test]
    fn get_walks_array_paths() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let obj = v(serde_json::json!({"a": {"b": 7}}));
        let zero = Value::from(0i64);

        let hit = get(&mut ctx, &obj, &v(serde_json::json!(["a", "b"])), &zero)
            .unwrap()
            .unwrap();
        assert_eq!(hit, Value::from(7i64));

        let miss = get(&mut ctx, &obj, &v(serde_json::json!(["a", "c"])), &zero)
            .unwrap()
            .unwrap();
        assert_eq!(miss, zero);

        let single = get(
            &mut ctx,
            &v(serde_json::json!({"a": 1})),
            &Value::from("a"),
            &zero,
        )
        .unwrap()
        .unwrap();
        assert_eq!(single, Value::from(1i64));

        let whole = get(&mut ctx, &obj, &v(serde_json::json!([])), &zero)
            .unwrap()
            .unwrap();
        assert_eq!(whole, obj);
        assert!(errors.is_empty());
    }

    #[test]
    fn keys_returns_a_set() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let out = keys(&mut ctx, &v(serde_json::json!({"a": 1, "b": 2})))
            .unwrap()
            .unwrap();
        let Value::Set(s) = &out else { panic!() };
        assert_eq!(s.len(), 2);
        assert!(s.contains(&Value::from("a")));
        assert!(s.contains(&Value::from("b")));
    }

    #[test]
    fn remove_and_filter_accept_any_key_collection() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let obj = v(serde_json::json!({"a": 1, "b": 2, "c": 3}));

        let removed = remove(&mut ctx, &obj, &v(serde_json::json!(["a", "c"])))
            .unwrap()
            .unwrap();
        assert_eq!(to_native(&removed), serde_json::json!({"b": 2}));

        let kept = filter(&mut ctx, &obj, &v(serde_json::json!({"a": true})))
            .unwrap()
            .unwrap();
        assert_eq!(to_native(&kept), serde_json::json!({"a": 1}));

        let res = remove(&mut ctx, &obj, &Value::from(1i64)).unwrap();
        assert_eq!(res, None);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn union_merges_recursively_with_b_winning() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let a = v(serde_json::json!({"x": {"p": 1, "q": 2}, "y": 1}));
        let b = v(serde_json::json!({"x": {"q": 9}, "y": {"z": 1}}));
        let out = union(&mut ctx, &a, &b).unwrap().unwrap();
        assert_eq!(
            to_native(&out),
            serde_json::json!({"x": {"p": 1, "q": 9}, "y": {"z": 1}})
        );
    }

    #[test]
    fn union_with_empty_is_identity_and_associative() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let a = v(serde_json::json!({"x": {"p": 1}}));
        let b = v(serde_json::json!({"x": {"q": 2}}));
        let c = v(serde_json::json!({"y": 3}));
        let empty = Value::new_object();

        assert_eq!(union(&mut ctx, &a, &empty).unwrap().unwrap(), a);

        let ab = union(&mut ctx, &a, &b).unwrap().unwrap();
        let ab_c = union(&mut ctx, &ab, &c).unwrap().unwrap();
        let bc = union(&mut ctx, &b, &c).unwrap().unwrap();
        let a_bc = union(&mut ctx, &a, &bc).unwrap().unwrap();
        assert_eq!(ab_c, a_bc);
    }
}
