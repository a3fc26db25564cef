//! Specialized built-ins and the host builtin interface.
//!
//! Every built-in observes one convention: when any operand is undefined
//! the call returns without binding a result; type and operand errors are
//! appended to the per-evaluation error buffer and the call returns
//! unbound; otherwise the result binds into the scratch register chosen by
//! the calling statement.

use std::time::SystemTime;

use rand::rngs::StdRng;

use crate::cache::ValueCache;
use crate::context::{Metrics, PrintHook};
use crate::error::{BuiltinError, EvalError};
use crate::state::Cancel;
use crate::value::Value;

mod aggregates;
mod arrays;
mod glob;
mod json;
mod numbers;
mod objects;
mod strings;

pub(crate) use objects::merge as merge_objects;

/// Natively implemented built-ins, selected by opcode in the executable's
/// function table. Opcodes are part of the wire contract for version 0 and
/// form a closed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u32)]
pub enum SpecializedBuiltin {
    /// `equal(a, b)`.
    Equal = 0,
    /// `neq(a, b)`.
    NotEqual = 1,
    /// `internal.member_2(x, coll)`.
    Member = 2,
    /// `internal.member_3(k, v, coll)`.
    MemberWithKey = 3,
    /// `object.get(obj, path, default)`.
    ObjectGet = 4,
    /// `object.keys(obj)`.
    ObjectKeys = 5,
    /// `object.remove(obj, keys)`.
    ObjectRemove = 6,
    /// `object.filter(obj, keys)`.
    ObjectFilter = 7,
    /// `object.union(a, b)`.
    ObjectUnion = 8,
    /// `concat(sep, coll)`.
    Concat = 9,
    /// `startswith(s, prefix)`.
    StartsWith = 10,
    /// `endswith(s, suffix)`.
    EndsWith = 11,
    /// `sprintf(format, args)`.
    Sprintf = 12,
    /// `array.concat(a, b)`.
    ArrayConcat = 13,
    /// `array.slice(a, start, stop)`.
    ArraySlice = 14,
    /// `walk(x)`.
    Walk = 15,
    /// `numbers.range(start, stop)`.
    NumbersRange = 16,
    /// `numbers.range_step(start, stop, step)`.
    NumbersRangeStep = 17,
    /// `union(a, b)` over sets.
    SetUnion = 18,
    /// `is_array(x)`.
    IsArray = 19,
    /// `is_boolean(x)`.
    IsBoolean = 20,
    /// `is_null(x)`.
    IsNull = 21,
    /// `is_number(x)`.
    IsNumber = 22,
    /// `is_object(x)`.
    IsObject = 23,
    /// `is_set(x)`.
    IsSet = 24,
    /// `is_string(x)`.
    IsString = 25,
    /// `type_name(x)`.
    TypeName = 26,
    /// `glob.match(pattern, delimiters, text)`.
    GlobMatch = 27,
    /// `json.unmarshal(s)`.
    JsonUnmarshal = 28,
}

impl SpecializedBuiltin {
    /// Wire opcode of this built-in.
    pub const fn opcode(self) -> u32 {
        self as u32
    }

    /// Declared builtin name this implementation serves.
    pub const fn name(self) -> &'static str {
        use SpecializedBuiltin::*;
        match self {
            Equal => "equal",
            NotEqual => "neq",
            Member => "internal.member_2",
            MemberWithKey => "internal.member_3",
            ObjectGet => "object.get",
            ObjectKeys => "object.keys",
            ObjectRemove => "object.remove",
            ObjectFilter => "object.filter",
            ObjectUnion => "object.union",
            Concat => "concat",
            StartsWith => "startswith",
            EndsWith => "endswith",
            Sprintf => "sprintf",
            ArrayConcat => "array.concat",
            ArraySlice => "array.slice",
            Walk => "walk",
            NumbersRange => "numbers.range",
            NumbersRangeStep => "numbers.range_step",
            SetUnion => "union",
            IsArray => "is_array",
            IsBoolean => "is_boolean",
            IsNull => "is_null",
            IsNumber => "is_number",
            IsObject => "is_object",
            IsSet => "is_set",
            IsString => "is_string",
            TypeName => "type_name",
            GlobMatch => "glob.match",
            JsonUnmarshal => "json.unmarshal",
        }
    }

    /// Expected operand count.
    pub const fn arity(self) -> usize {
        use SpecializedBuiltin::*;
        match self {
            Walk | ObjectKeys | JsonUnmarshal | TypeName | IsArray | IsBoolean | IsNull
            | IsNumber | IsObject | IsSet | IsString => 1,
            MemberWithKey | ObjectGet | NumbersRangeStep | GlobMatch => 3,
            _ => 2,
        }
    }

    /// Resolve a declared builtin name to its specialized implementation.
    pub fn from_name(name: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|b| b.name() == name)
    }

    /// Resolve a wire opcode.
    pub fn from_opcode(opcode: u32) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|b| b.opcode() == opcode)
    }

    /// Invoke the built-in. All operands are defined; the interpreter
    /// short-circuits undefined arguments before dispatch.
    pub fn call(
        self,
        ctx: &mut BuiltinContext<'_>,
        args: &[Value],
    ) -> Result<Option<Value>, EvalError> {
        use SpecializedBuiltin::*;
        if args.len() != self.arity() {
            ctx.error(BuiltinError::operand(
                self.name(),
                format!("expected {} operands, got {}", self.arity(), args.len()),
            ));
            return Ok(None);
        }
        match self {
            Equal => Ok(Some(Value::Bool(args[0] == args[1]))),
            NotEqual => Ok(Some(Value::Bool(args[0] != args[1]))),
            Member => aggregates::member(ctx, &args[0], &args[1]),
            MemberWithKey => aggregates::member_with_key(ctx, &args[0], &args[1], &args[2]),
            ObjectGet => objects::get(ctx, &args[0], &args[1], &args[2]),
            ObjectKeys => objects::keys(ctx, &args[0]),
            ObjectRemove => objects::remove(ctx, &args[0], &args[1]),
            ObjectFilter => objects::filter(ctx, &args[0], &args[1]),
            ObjectUnion => objects::union(ctx, &args[0], &args[1]),
            Concat => strings::concat(ctx, &args[0], &args[1]),
            StartsWith => strings::starts_with(ctx, &args[0], &args[1]),
            EndsWith => strings::ends_with(ctx, &args[0], &args[1]),
            Sprintf => strings::sprintf(ctx, &args[0], &args[1]),
            ArrayConcat => arrays::concat(ctx, &args[0], &args[1]),
            ArraySlice => arrays::slice(ctx, &args[0], &args[1], &args[2]),
            Walk => aggregates::walk(&args[0]),
            NumbersRange => numbers::range(ctx, &args[0], &args[1]),
            NumbersRangeStep => numbers::range_step(ctx, &args[0], &args[1], &args[2]),
            SetUnion => aggregates::set_union(ctx, &args[0], &args[1]),
            IsArray => Ok(Some(Value::Bool(args[0].is_array()))),
            IsBoolean => Ok(Some(Value::Bool(args[0].is_boolean()))),
            IsNull => Ok(Some(Value::Bool(args[0].is_null()))),
            IsNumber => Ok(Some(Value::Bool(args[0].is_number()))),
            IsObject => Ok(Some(Value::Bool(args[0].is_object()))),
            IsSet => Ok(Some(Value::Bool(args[0].is_set()))),
            IsString => Ok(Some(Value::Bool(args[0].is_string()))),
            TypeName => Ok(Some(Value::from(args[0].type_name()))),
            GlobMatch => glob::matches(ctx, &args[0], &args[1], &args[2]),
            JsonUnmarshal => json::unmarshal(ctx, &args[0]),
        }
    }
}

/// Host-implemented builtin.
pub trait Builtin: Send + Sync {
    /// Declared builtin name.
    fn name(&self) -> &str;

    /// Invoke with defined operands; same conventions as specialized
    /// built-ins.
    fn call(
        &self,
        ctx: &mut BuiltinContext<'_>,
        args: &[Value],
    ) -> Result<Option<Value>, EvalError>;
}

/// Evaluation-scoped context handed to every builtin invocation.
pub struct BuiltinContext<'a> {
    /// Cancellation flag, polled by long-running built-ins.
    pub cancel: &'a Cancel,
    /// Collected builtin errors, in insertion order.
    pub errors: &'a mut Vec<BuiltinError>,
    /// Frozen or wall clock for time-dependent built-ins.
    pub now: SystemTime,
    /// Seeded RNG for non-deterministic built-ins.
    pub rng: Option<&'a mut StdRng>,
    /// Runtime information value, when the host provided one.
    pub runtime: Option<&'a Value>,
    /// Debug print sink.
    pub print_hook: Option<&'a dyn PrintHook>,
    /// Counter sink.
    pub metrics: Option<&'a dyn Metrics>,
    /// Host-provided intra-evaluation value cache slot.
    pub value_cache: Option<&'a ValueCache>,
    /// Non-deterministic builtin result cache slot.
    pub ndb_cache: Option<&'a ValueCache>,
    /// Byte offset of the calling statement, stamped into errors.
    pub location: u32,
}

impl BuiltinContext<'_> {
    /// Append a collected error, stamping the call site.
    pub fn error(&mut self, mut err: BuiltinError) {
        err.location = self.location;
        self.errors.push(err);
    }
}

/// Host builtin feeding the debug print sink. Arguments render in their
/// canonical form, joined by spaces; without a sink the call is a no-op.
/// Always returns `true` so print calls can guard result-producing blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintBuiltin;

impl Builtin for PrintBuiltin {
    fn name(&self) -> &str {
        "internal.print"
    }

    fn call(
        &self,
        ctx: &mut BuiltinContext<'_>,
        args: &[Value],
    ) -> Result<Option<Value>, EvalError> {
        if let Some(hook) = ctx.print_hook {
            let msg = args
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.to_string(),
                    other => crate::value::ast_string(other),
                })
                .collect::<Vec<_>>()
                .join(" ");
            hook.print(&msg);
        }
        Ok(Some(Value::Bool(true)))
    }
}

#[cfg(test)]
pub(crate) fn test_ctx(errors: &mut Vec<BuiltinError>) -> BuiltinContext<'_> {
    static CANCEL: std::sync::OnceLock<Cancel> = std::sync::OnceLock::new();
    BuiltinContext {
        cancel: CANCEL.get_or_init(Cancel::new),
        errors,
        now: SystemTime::now(),
        rng: None,
        runtime: None,
        print_hook: None,
        metrics: None,
        value_cache: None,
        ndb_cache: None,
        location: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn names_and_opcodes_are_unique() {
        let builtins: Vec<_> = SpecializedBuiltin::iter().collect();
        for (i, a) in builtins.iter().enumerate() {
            for b in &builtins[i + 1..] {
                assert_ne!(a.name(), b.name());
                assert_ne!(a.opcode(), b.opcode());
            }
        }
    }

    #[test]
    fn name_resolution_round_trips() {
        for b in SpecializedBuiltin::iter() {
            assert_eq!(SpecializedBuiltin::from_name(b.name()), Some(b));
            assert_eq!(SpecializedBuiltin::from_opcode(b.opcode()), Some(b));
        }
        assert_eq!(SpecializedBuiltin::from_name("no.such.builtin"), None);
    }
}
