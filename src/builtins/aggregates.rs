//! Membership, set algebra and structural traversal.

use std::sync::Arc;

use crate::error::{BuiltinError, EvalError};
use crate::value::{Set, Value};

use super::BuiltinContext;

/// `internal.member_2(x, coll)`: true iff some element of `coll` equals
/// `x`. Iteration order is irrelevant.
pub fn member(
    ctx: &mut BuiltinContext<'_>,
    x: &Value,
    coll: &Value,
) -> Result<Option<Value>, EvalError> {
    match coll {
        Value::Set(s) => Ok(Some(Value::Bool(s.contains(x)))),
        Value::Array(_) | Value::Object(_) | Value::External(_) => {
            let found = coll.iter_entries(&mut |_, v| Ok(v == *x))?;
            Ok(Some(Value::Bool(found)))
        }
        other => {
            ctx.error(BuiltinError::type_error(
                "internal.member_2",
                "collection",
                other.type_name(),
            ));
            Ok(None)
        }
    }
}

/// `internal.member_3(k, v, coll)`: true iff `coll[k]` equals `v`.
pub fn member_with_key(
    ctx: &mut BuiltinContext<'_>,
    key: &Value,
    value: &Value,
    coll: &Value,
) -> Result<Option<Value>, EvalError> {
    match coll {
        Value::Array(_) | Value::Object(_) | Value::Set(_) | Value::External(_) => {
            let found = coll.get_key(key)?.map(|v| v == *value).unwrap_or(false);
            Ok(Some(Value::Bool(found)))
        }
        other => {
            ctx.error(BuiltinError::type_error(
                "internal.member_3",
                "collection",
                other.type_name(),
            ));
            Ok(None)
        }
    }
}

/// `union(a, b)` over sets.
pub fn set_union(
    ctx: &mut BuiltinContext<'_>,
    a: &Value,
    b: &Value,
) -> Result<Option<Value>, EvalError> {
    let (Value::Set(a), Value::Set(b)) = (a, b) else {
        let offender = if a.is_set() { b } else { a };
        ctx.error(BuiltinError::type_error(
            "union",
            "set",
            offender.type_name(),
        ));
        return Ok(None);
    };
    let mut out = a.clone();
    for v in b.iter() {
        out.insert(v.clone());
    }
    Ok(Some(Value::Set(out)))
}

/// `walk(x)`: all `[path, subvalue]` pairs reachable from `x`, in
/// pre-order. The root pairs with the empty path.
pub fn walk(x: &Value) -> Result<Option<Value>, EvalError> {
    let mut pairs = Vec::new();
    let mut path = Vec::new();
    collect(x, &mut path, &mut pairs)?;
    Ok(Some(Value::Array(Arc::new(pairs))))
}

fn collect(
    v: &Value,
    path: &mut Vec<Value>,
    pairs: &mut Vec<Value>,
) -> Result<(), EvalError> {
    pairs.push(Value::Array(Arc::new(vec![
        Value::Array(Arc::new(path.clone())),
        v.clone(),
    ])));
    let mut children = Vec::new();
    v.iter_entries(&mut |k, child| {
        children.push((k, child));
        Ok(false)
    })?;
    for (k, child) in children {
        path.push(k);
        collect(&child, path, pairs)?;
        path.pop();
    }
    Ok(())
}

/// Shared with the `scan`-free membership property: true iff `target` is
/// reachable from `v`.
#[cfg(test)]
pub(crate) fn reaches(v: &Value, target: &Value) -> bool {
    if v == target {
        return true;
    }
    let mut found = false;
    let _ = v.iter_entries(&mut |_, child| {
        found = reaches(&child, target);
        Ok(found)
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::test_ctx;
    use crate::value::from_native;

    #[test]
    fn member_over_arrays_and_sets() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let arr = from_native(&serde_json::json!([1, 2, 3]));
        assert_eq!(
            member(&mut ctx, &Value::from(3i64), &arr).unwrap(),
            Some(Value::from(true))
        );
        assert_eq!(
            member(&mut ctx, &Value::from(4i64), &arr).unwrap(),
            Some(Value::from(false))
        );
        let set: Set = [Value::from("a")].into_iter().collect();
        assert_eq!(
            member(&mut ctx, &Value::from("a"), &Value::Set(set)).unwrap(),
            Some(Value::from(true))
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn member_collects_type_errors_on_scalars() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let res = member(&mut ctx, &Value::from(1i64), &Value::from("nope")).unwrap();
        assert_eq!(res, None);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn member_with_key_checks_the_mapping() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let obj = from_native(&serde_json::json!({"a": 1}));
        assert_eq!(
            member_with_key(&mut ctx, &Value::from("a"), &Value::from(1i64), &obj).unwrap(),
            Some(Value::from(true))
        );
        assert_eq!(
            member_with_key(&mut ctx, &Value::from("a"), &Value::from(2i64), &obj).unwrap(),
            Some(Value::from(false))
        );
        assert_eq!(
            member_with_key(&mut ctx, &Value::from("b"), &Value::from(1i64), &obj).unwrap(),
            Some(Value::from(false))
        );
    }

    #[test]
    fn walk_yields_preorder_paths() {
        let v = from_native(&serde_json::json!({"a": {"b": 7}}));
        let Some(Value::Array(pairs)) = walk(&v).unwrap() else {
            panic!("expected array")
        };
        assert_eq!(pairs.len(), 3);
        // Root first.
        let Value::Array(root) = &pairs[0] else {
            panic!()
        };
        assert_eq!(root[0], Value::Array(Arc::new(vec![])));
        assert_eq!(root[1], v);
        // Every walked subvalue is reachable, and vice versa.
        for pair in pairs.iter() {
            let Value::Array(kv) = pair else { panic!() };
            assert!(reaches(&v, &kv[1]));
        }
        let leaf = Value::from(7i64);
        assert!(pairs.iter().any(|p| {
            let Value::Array(kv) = p else { return false };
            kv[1] == leaf
        }));
    }

    #[test]
    fn set_union_requires_sets() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let a: Set = [Value::from(1i64)].into_iter().collect();
        let b: Set = [Value::from(2i64)].into_iter().collect();
        let out = set_union(&mut ctx, &Value::Set(a), &Value::Set(b))
            .unwrap()
            .unwrap();
        assert_eq!(out.len(), Some(2));

        let res = set_union(&mut ctx, &Value::from(1i64), &Value::new_set()).unwrap();
        assert_eq!(res, None);
        assert_eq!(errors.len(), 1);
    }
}
