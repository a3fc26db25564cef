//! JSON parsing into the value domain.

use crate::error::{BuiltinError, EvalError};
use crate::value::{from_native, Value};

use super::BuiltinContext;

/// `json.unmarshal(s)`: parse `s` as JSON. Parse failures surface as
/// collected builtin errors.
pub fn unmarshal(ctx: &mut BuiltinContext<'_>, s: &Value) -> Result<Option<Value>, EvalError> {
    let Value::String(s) = s else {
        ctx.error(BuiltinError::type_error(
            "json.unmarshal",
            "string",
            s.type_name(),
        ));
        return Ok(None);
    };
    match serde_json::from_str::<serde_json::Value>(s) {
        Ok(parsed) => Ok(Some(from_native(&parsed))),
        Err(e) => {
            ctx.error(BuiltinError::generic("json.unmarshal", e.to_string()));
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::test_ctx;
    use crate::value::to_native;

    #[test]
    fn parses_into_the_value_domain() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let out = unmarshal(&mut ctx, &Value::from(r#"{"a": [1, true, null]}"#))
            .unwrap()
            .unwrap();
        assert_eq!(to_native(&out), serde_json::json!({"a": [1, true, null]}));
    }

    #[test]
    fn parse_errors_are_collected() {
        let mut errors = Vec::new();
        let mut ctx = test_ctx(&mut errors);
        let res = unmarshal(&mut ctx, &Value::from("{not json")).unwrap();
        assert_eq!(res, None);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("key"));
    }
}
