//! Integer range generation.
//!
//! Generation is cancellation-checked every iteration: a cancelled range
//! never returns a truncated array, it fails with the cancel error.

use std::sync::Arc;

use crate::error::{BuiltinError, EvalError};
use crate::value::Value;

use super::BuiltinContext;

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

/// `numbers.range(start, stop)`: inclusive integer range, ascending or
/// descending by one.
pub fn range(
    ctx: &mut BuiltinContext<'_>,
    start: &Value,
    stop: &Value,
) -> Result<Option<Value>, EvalError> {
    generate(ctx, "numbers.range", start, stop, None)
}

/// `numbers.range_step(start, stop, step)`: like `range` with an explicit
/// positive step.
pub fn range_step(
    ctx: &mut BuiltinContext<'_>,
    start: &Value,
    stop: &Value,
    step: &Value,
) -> Result<Option<Value>, EvalError> {
    generate(ctx, "numbers.range_step", start, stop, Some(step))
}

fn generate(
    ctx: &mut BuiltinContext<'_>,
    name: &str,
    start: &Value,
    stop: &Value,
    step: Option<&Value>,
) -> Result<Option<Value>, EvalError> {
    let Some(start) = int_operand(ctx, name, start) else {
        return Ok(None);
    };
    let Some(stop) = int_operand(ctx, name, stop) else {
        return Ok(None);
    };
    let step = match step {
        None => 1,
        Some(v) => {
            let Some(step) = int_operand(ctx, name, v) else {
                return Ok(None);
            };
            if step <= 0 {
                ctx.error(BuiltinError::operand(
                    name,
                    "step must be a positive integer",
                ));
                return Ok(None);
            }
            step
        }
    };

    let ascending = start <= stop;
    let mut out = Vec::new();
    let mut current = start;
    loop {
        ctx.cancel.check()?;
        if ascending {
            if current > stop {
                break;
            }
        } else if current < stop {
            break;
        }
        out.push(Value::from(current));
        current = match if ascending {
            current.checked_add(step)
        } else {
            current.checked_sub(step)
        } {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Some(Value::Array(Arc::new(out))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::test_ctx;
    use crate::state::Cancel;
    use crate::value::from_native;

    #[test]
    fn ranges_are_inclusive_both_directions() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let out = range(&mut ctx, &Value::from(0i64), &Value::from(3i64))
            .unwrap()
            .unwrap();
        assert_eq!(out, from_native(&serde_json::json!([0, 1, 2, 3])));

        let out = range(&mut ctx, &Value::from(2i64), &Value::from(-1i64))
            .unwrap()
            .unwrap();
        assert_eq!(out, from_native(&serde_json::json!([2, 1, 0, -1])));
    }

    #[test]
    fn range_step_length_matches_the_arithmetic() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        for (start, stop, step) in [(0i64, 10i64, 3i64), (1, 1, 1), (0, 9, 2)] {
            let out = range_step(
                &mut ctx,
                &Value::from(start),
                &Value::from(stop),
                &Value::from(step),
            )
            .unwrap()
            .unwrap();
            let expected_len = ((stop - start) / step + 1) as usize;
            assert_eq!(out.len(), Some(expected_len));
            let Value::Array(elems) = &out else { panic!() };
            for (i, v) in elems.iter().enumerate() {
                assert_eq!(*v, Value::from(start + step * i as i64));
            }
        }
    }

    #[test]
    fn zero_or_negative_steps_are_operand_errors() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let res = range_step(
            &mut ctx,
            &Value::from(0i64),
            &Value::from(5i64),
            &Value::from(0i64),
        )
        .unwrap();
        assert_eq!(res, None);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn cancellation_fails_the_whole_generation() {
        let cancel = Cancel::new();
        cancel.cancel();
        let mut errors = Vec::new();
        let mut ctx = super::super::BuiltinContext {
            cancel: &cancel,
            errors: &mut errors,
            now: std::time::SystemTime::now(),
            rng: None,
            runtime: None,
            print_hook: None,
            metrics: None,
            value_cache: None,
            ndb_cache: None,
            location: 0,
        };
        let res = range(&mut ctx, &Value::from(0i64), &Value::from(1_000_000i64));
        assert!(matches!(res, Err(EvalError::Cancel)));
        assert!(errors.is_empty());
    }
}
