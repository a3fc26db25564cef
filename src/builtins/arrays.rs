//! Array built-ins.

use std::sync::Arc;

use crate::error::{BuiltinError, EvalError};
use crate::value::Value;

use super::BuiltinContext;

/// `array.concat(a, b)`: element-wise append with shallow copies.
pub fn concat(
    ctx: &mut BuiltinContext<'_>,
    a: &Value,
    b: &Value,
) -> Result<Option<Value>, EvalError> {
    let (Value::Array(a), Value::Array(b)) = (a, b) else {
        let offender = if a.is_array() { b } else { a };
        ctx.error(BuiltinError::type_error(
            "array.concat",
            "array",
            offender.type_name(),
        ));
        return Ok(None);
    };
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend(a.iter().cloned());
    out.extend(b.iter().cloned());
    Ok(Some(Value::Array(Arc::new(out))))
}

/// `array.slice(a, start, stop)`: `start` clamps to 0, `stop` to the
/// length; an inverted range yields the empty array.
pub fn slice(
    ctx: &mut BuiltinContext<'_>,
    a: &Value,
    start: &Value,
    stop: &Value,
) -> Result<Option<Value>, EvalError> {
    let Value::Array(elems) = a else {
        ctx.error(BuiltinError::type_error(
            "array.slice",
            "array",
            a.type_name(),
        ));
        return Ok(None);
    };
    let Some(start) = int_operand(ctx, "array.slice", start) else {
        return Ok(None);
    };
    let Some(stop) = int_operand(ctx, "array.slice", stop) else {
        return Ok(None);
    };
    let start = start.max(0) as usize;
    let stop = (stop.max(0) as usize).min(elems.len());
    if stop <= start {
        return Ok(Some(Value::new_array(0)));
    }
    Ok(Some(Value::Array(Arc::new(elems[start..stop].to_vec()))))
}

fn int_operand(ctx: &mut BuiltinContext<'_>, name: &str, v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => match n.as_int() {
            Some(i) => Some(i),
            None => {
                ctx.error(BuiltinError::operand(name, "operand must be an integer"));
                None
            }
        },
        other => {
            ctx.error(BuiltinError::type_error(name, "number", other.type_name()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::test_ctx;
    use crate::value::from_native;

    fn arr(src: serde_json::Value) -> Value {
        from_native(&src)
    }

    #[test]
    fn concat_appends_in_order() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let out = concat(
            &mut ctx,
            &arr(serde_json::json!([1, 2])),
            &arr(serde_json::json!([3])),
        )
        .unwrap()
        .unwrap();
        assert_eq!(out, arr(serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn slice_clamps_both_ends() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let a = arr(serde_json::json!([0, 1, 2, 3]));

        let full = slice(&mut ctx, &a, &Value::from(0i64), &Value::from(4i64))
            .unwrap()
            .unwrap();
        assert_eq!(full, a);

        let clamped = slice(&mut ctx, &a, &Value::from(-2i64), &Value::from(99i64))
            .unwrap()
            .unwrap();
        assert_eq!(clamped, a);

        let inverted = slice(&mut ctx, &a, &Value::from(3i64), &Value::from(1i64))
            .unwrap()
            .unwrap();
        assert_eq!(inverted, arr(serde_json::json!([])));
        assert!(errors.is_empty());
    }

    #[test]
    fn slice_rejects_fractional_bounds() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let a = arr(serde_json::json!([0, 1]));
        let res = slice(&mut ctx, &a, &Value::from(0.5f64), &Value::from(1i64)).unwrap();
        assert_eq!(res, None);
        assert_eq!(errors.len(), 1);
    }
}
