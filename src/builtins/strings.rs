//! String built-ins, including the sprintf formatter.

use num_bigint::BigInt;

use crate::error::{BuiltinError, EvalError};
use crate::value::{ast_string, Value};

use super::BuiltinContext;

fn string_operand<'v>(
    ctx: &mut BuiltinContext<'_>,
    name: &str,
    v: &'v Value,
) -> Option<&'v str> {
    match v {
        Value::String(s) => Some(s),
        other => {
            ctx.error(BuiltinError::type_error(name, "string", other.type_name()));
            None
        }
    }
}

/// `concat(sep, coll)`: join string elements. Arrays preserve order, sets
/// join in ascending order.
pub fn concat(
    ctx: &mut BuiltinContext<'_>,
    sep: &Value,
    coll: &Value,
) -> Result<Option<Value>, EvalError> {
    let Some(sep) = string_operand(ctx, "concat", sep) else {
        return Ok(None);
    };
    let elems: Vec<Value> = match coll {
        Value::Array(a) => a.iter().cloned().collect(),
        Value::Set(s) => s.sorted(),
        other => {
            ctx.error(BuiltinError::type_error(
                "concat",
                "array or set",
                other.type_name(),
            ));
            return Ok(None);
        }
    };
    let mut parts = Vec::with_capacity(elems.len());
    for elem in &elems {
        match elem {
            Value::String(s) => parts.push(s.as_ref()),
            other => {
                ctx.error(BuiltinError::type_error(
                    "concat",
                    "string element",
                    other.type_name(),
                ));
                return Ok(None);
            }
        }
    }
    Ok(Some(Value::from(parts.join(sep))))
}

/// `startswith(s, prefix)`.
pub fn starts_with(
    ctx: &mut BuiltinContext<'_>,
    s: &Value,
    prefix: &Value,
) -> Result<Option<Value>, EvalError> {
    let (Some(s), Some(prefix)) = (
        string_operand(ctx, "startswith", s),
        string_operand(ctx, "startswith", prefix),
    ) else {
        return Ok(None);
    };
    Ok(Some(Value::Bool(s.starts_with(prefix))))
}

/// `endswith(s, suffix)`.
pub fn ends_with(
    ctx: &mut BuiltinContext<'_>,
    s: &Value,
    suffix: &Value,
) -> Result<Option<Value>, EvalError> {
    let (Some(s), Some(suffix)) = (
        string_operand(ctx, "endswith", s),
        string_operand(ctx, "endswith", suffix),
    ) else {
        return Ok(None);
    };
    Ok(Some(Value::Bool(s.ends_with(suffix))))
}

/// The numeric form a value coerces to for formatting: int64, then bigint,
/// then float64, falling back to the canonical string.
enum FormatArg {
    Int(i64),
    Big(BigInt),
    Float(f64),
    Str(String),
    Bool(bool),
    Composite(String),
}

fn format_arg(v: &Value) -> FormatArg {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_int() {
                FormatArg::Int(i)
            } else if let Some(b) = n.as_big_int() {
                FormatArg::Big(b)
            } else {
                let f = n.as_f64();
                if f.is_finite() {
                    FormatArg::Float(f)
                } else {
                    FormatArg::Str(n.to_string())
                }
            }
        }
        Value::String(s) => FormatArg::Str(s.to_string()),
        Value::Bool(b) => FormatArg::Bool(*b),
        other => FormatArg::Composite(ast_string(other)),
    }
}

/// `sprintf(format, args)`: Go-flavored verbs over an argument array.
pub fn sprintf(
    ctx: &mut BuiltinContext<'_>,
    format: &Value,
    args: &Value,
) -> Result<Option<Value>, EvalError> {
    let Some(format) = string_operand(ctx, "sprintf", format) else {
        return Ok(None);
    };
    let Value::Array(args) = args else {
        ctx.error(BuiltinError::type_error(
            "sprintf",
            "array",
            args.type_name(),
        ));
        return Ok(None);
    };

    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    let mut next_arg = 0usize;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut left_align = false;
        let mut zero_pad = false;
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left_align = true,
                '0' => zero_pad = true,
                '+' | ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0usize;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = p * 10 + d as usize;
                chars.next();
            }
            precision = Some(p);
        }
        let Some(verb) = chars.next() else {
            ctx.error(BuiltinError::operand("sprintf", "missing verb after %"));
            return Ok(None);
        };

        let Some(arg) = args.get(next_arg) else {
            ctx.error(BuiltinError::operand(
                "sprintf",
                format!("not enough arguments for verb %{verb}"),
            ));
            return Ok(None);
        };
        next_arg += 1;

        let Some(rendered) = render(ctx, verb, precision, arg) else {
            return Ok(None);
        };
        pad(&mut out, &rendered, width, left_align, zero_pad);
    }
    Ok(Some(Value::from(out)))
}

fn render(
    ctx: &mut BuiltinContext<'_>,
    verb: char,
    precision: Option<usize>,
    arg: &Value,
) -> Option<String> {
    let coerced = format_arg(arg);
    let rendered = match verb {
        'v' => match &coerced {
            FormatArg::Str(s) => s.clone(),
            FormatArg::Bool(b) => b.to_string(),
            FormatArg::Int(i) => i.to_string(),
            FormatArg::Big(b) => b.to_string(),
            FormatArg::Float(f) => f.to_string(),
            FormatArg::Composite(s) => s.clone(),
        },
        't' => match &coerced {
            FormatArg::Bool(b) => b.to_string(),
            _ => return type_mismatch(ctx, verb, arg),
        },
        's' | 'q' => {
            let s = match &coerced {
                FormatArg::Str(s) => s.clone(),
                FormatArg::Composite(s) => s.clone(),
                FormatArg::Bool(b) => b.to_string(),
                FormatArg::Int(i) => i.to_string(),
                FormatArg::Big(b) => b.to_string(),
                FormatArg::Float(f) => f.to_string(),
            };
            if verb == 'q' {
                serde_json::to_string(&s).unwrap_or(s)
            } else {
                s
            }
        }
        'd' => match &coerced {
            FormatArg::Int(i) => i.to_string(),
            FormatArg::Big(b) => b.to_string(),
            _ => return type_mismatch(ctx, verb, arg),
        },
        'x' | 'X' | 'o' | 'b' => match &coerced {
            FormatArg::Int(i) => match verb {
                'x' => format!("{i:x}"),
                'X' => format!("{i:X}"),
                'o' => format!("{i:o}"),
                _ => format!("{i:b}"),
            },
            _ => return type_mismatch(ctx, verb, arg),
        },
        'f' | 'F' => {
            let Some(f) = float_of(&coerced) else {
                return type_mismatch(ctx, verb, arg);
            };
            format!("{:.*}", precision.unwrap_or(6), f)
        }
        'e' | 'E' => {
            let Some(f) = float_of(&coerced) else {
                return type_mismatch(ctx, verb, arg);
            };
            let s = format!("{:.*e}", precision.unwrap_or(6), f);
            if verb == 'E' {
                s.to_uppercase()
            } else {
                s
            }
        }
        'g' | 'G' => {
            let Some(f) = float_of(&coerced) else {
                return type_mismatch(ctx, verb, arg);
            };
            f.to_string()
        }
        other => {
            ctx.error(BuiltinError::operand(
                "sprintf",
                format!("unsupported verb %{other}"),
            ));
            return None;
        }
    };
    Some(rendered)
}

fn float_of(arg: &FormatArg) -> Option<f64> {
    match arg {
        FormatArg::Int(i) => Some(*i as f64),
        FormatArg::Float(f) => Some(*f),
        FormatArg::Big(b) => {
            use num_traits::ToPrimitive;
            b.to_f64()
        }
        _ => None,
    }
}

fn type_mismatch(ctx: &mut BuiltinContext<'_>, verb: char, arg: &Value) -> Option<String> {
    ctx.error(BuiltinError::type_error(
        "sprintf",
        match verb {
            't' => "boolean",
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => "number",
            _ => "integer",
        },
        arg.type_name(),
    ));
    None
}

fn pad(out: &mut String, rendered: &str, width: usize, left_align: bool, zero_pad: bool) {
    let len = rendered.chars().count();
    if len >= width {
        out.push_str(rendered);
        return;
    }
    let fill = if zero_pad && !left_align { '0' } else { ' ' };
    if left_align {
        out.push_str(rendered);
        out.extend(std::iter::repeat(' ').take(width - len));
    } else {
        out.extend(std::iter::repeat(fill).take(width - len));
        out.push_str(rendered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::test_ctx;
    use crate::value::{from_native, Set};

    #[test]
    fn concat_joins_arrays_in_order_and_sets_sorted() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let arr = from_native(&serde_json::json!(["b", "a"]));
        let out = concat(&mut ctx, &Value::from("/"), &arr).unwrap().unwrap();
        assert_eq!(out, Value::from("b/a"));

        let set: Set = ["c", "a", "b"].into_iter().map(Value::from).collect();
        let out = concat(&mut ctx, &Value::from(","), &Value::Set(set))
            .unwrap()
            .unwrap();
        assert_eq!(out, Value::from("a,b,c"));
    }

    #[test]
    fn affix_checks() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        assert_eq!(
            starts_with(&mut ctx, &Value::from("abc"), &Value::from("ab"))
                .unwrap()
                .unwrap(),
            Value::from(true)
        );
        assert_eq!(
            ends_with(&mut ctx, &Value::from("abc"), &Value::from("ab"))
                .unwrap()
                .unwrap(),
            Value::from(false)
        );
    }

    #[test]
    fn sprintf_mixes_verbs() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let args = from_native(&serde_json::json!([1, "x"]));
        let out = sprintf(&mut ctx, &Value::from("%d/%s"), &args)
            .unwrap()
            .unwrap();
        assert_eq!(out, Value::from("1/x"));
    }

    #[test]
    fn sprintf_formats_composites_canonically() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let args = from_native(&serde_json::json!([{"k": 1}]));
        let out = sprintf(&mut ctx, &Value::from("%v"), &args)
            .unwrap()
            .unwrap();
        assert_eq!(out, Value::from(r#"{"k": 1}"#));
    }

    #[test]
    fn sprintf_handles_width_precision_and_escapes() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let args = from_native(&serde_json::json!([3.14159, 42, "hi"]));
        let out = sprintf(&mut ctx, &Value::from("%.2f %04d %s%%"), &args)
            .unwrap()
            .unwrap();
        assert_eq!(out, Value::from("3.14 0042 hi%"));
    }

    #[test]
    fn sprintf_reports_missing_arguments() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let args = from_native(&serde_json::json!([]));
        let res = sprintf(&mut ctx, &Value::from("%d"), &args).unwrap();
        assert_eq!(res, None);
        assert_eq!(errors.len(), 1);
    }
}
