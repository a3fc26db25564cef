//! The evaluation engine: statement dispatch over an executable buffer.
//!
//! One [`Evaluator`] serves one plan or function invocation and is
//! single-threaded. Every statement boundary checks the instruction meter
//! and the cancellation flag; there is no other preemption.

use std::sync::Arc;
use std::time::SystemTime;

use rand::rngs::StdRng;

use crate::builtins::{Builtin, BuiltinContext};
use crate::bytecode::{Executable, Opcode, Operand};
use crate::cache::ValueCache;
use crate::consts::RETURN_UNDEFINED;
use crate::context::{Metrics, PrintHook};
use crate::error::{BuiltinError, EvalError};
use crate::pool::PagePool;
use crate::state::{Cancel, Locals, MemoStack, Meter};
use crate::value::{Number, Set, Value};

mod call;
mod flow;

/// Control-flow outcome of a statement or block.
///
/// `Break(0)` exits the innermost enclosing block; larger indexes unwind
/// further. A statement whose guard fails (or whose result is undefined)
/// behaves as `Break(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next statement.
    Ok,
    /// Unwind this many blocks beyond the current one.
    Break(u32),
}

/// Per-invocation frame state: the register selected by `return-local`.
#[derive(Debug)]
pub struct Frame {
    return_slot: i32,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            return_slot: RETURN_UNDEFINED,
        }
    }
}

/// Single-evaluation interpreter over one executable.
pub struct Evaluator<'vm> {
    exe: &'vm Executable,
    /// Host builtin implementations, parallel to the function table.
    host_builtins: &'vm [Option<Arc<dyn Builtin>>],
    pool: PagePool,
    meter: Meter,
    cancel: Cancel,
    memo: MemoStack,
    errors: Vec<BuiltinError>,
    result_set: Set,
    now: SystemTime,
    rng: Option<StdRng>,
    runtime: Option<Value>,
    print_hook: Option<&'vm dyn PrintHook>,
    metrics: Option<&'vm dyn Metrics>,
    value_cache: Option<&'vm ValueCache>,
    ndb_cache: Option<&'vm ValueCache>,
}

impl<'vm> Evaluator<'vm> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        exe: &'vm Executable,
        host_builtins: &'vm [Option<Arc<dyn Builtin>>],
        pool: PagePool,
        meter: Meter,
        cancel: Cancel,
        now: SystemTime,
        rng: Option<StdRng>,
        runtime: Option<Value>,
        print_hook: Option<&'vm dyn PrintHook>,
        metrics: Option<&'vm dyn Metrics>,
        value_cache: Option<&'vm ValueCache>,
        ndb_cache: Option<&'vm ValueCache>,
    ) -> Self {
        Self {
            exe,
            host_builtins,
            pool,
            meter,
            cancel,
            memo: MemoStack::new(),
            errors: Vec::new(),
            result_set: Set::new(),
            now,
            rng,
            runtime,
            print_hook,
            metrics,
            value_cache,
            ndb_cache,
        }
    }

    /// Fresh register file for a frame.
    pub(crate) fn new_locals(&self) -> Locals {
        Locals::new(self.pool.clone())
    }

    /// Statements executed so far.
    pub(crate) fn instructions(&self) -> u64 {
        self.meter.used()
    }

    /// Collected builtin errors, in insertion order.
    pub(crate) fn take_errors(&mut self) -> Vec<BuiltinError> {
        std::mem::take(&mut self.errors)
    }

    /// Result set accumulated by `result-set-add`.
    pub(crate) fn take_result_set(&mut self) -> Set {
        std::mem::take(&mut self.result_set)
    }

    /// Run a plan's blocks against the given globals.
    pub(crate) fn eval_plan(
        &mut self,
        locals: &mut Locals,
        blocks_off: usize,
    ) -> Result<(), EvalError> {
        let mut frame = Frame::default();
        self.exec_blocks(locals, &mut frame, blocks_off)?;
        Ok(())
    }

    /// Resolve an operand against the frame's registers. `None` is the
    /// undefined sentinel.
    fn operand(&self, locals: &Locals, word: u32) -> Result<Option<Value>, EvalError> {
        match Operand::decode(word) {
            Operand::Local(i) => Ok(locals.get(i).cloned()),
            Operand::Bool(b) => Ok(Some(Value::Bool(b))),
            Operand::StringIndex(i) => Ok(Some(Value::String(self.exe.string(i)?))),
        }
    }

    fn read(&self, cur: &mut usize) -> Result<u32, EvalError> {
        let v = self.exe.u32_at(*cur)?;
        *cur += 4;
        Ok(v)
    }

    fn read_i64(&self, cur: &mut usize) -> Result<i64, EvalError> {
        let v = self.exe.i64_at(*cur)?;
        *cur += 8;
        Ok(v)
    }

    /// Execute a blocks record: each block in order, consuming one unwind
    /// level per aborted block.
    pub(crate) fn exec_blocks(
        &mut self,
        locals: &mut Locals,
        frame: &mut Frame,
        off: usize,
    ) -> Result<Flow, EvalError> {
        let count = self.exe.u32_at(off)?;
        let mut cur = off + 4;
        for _ in 0..count {
            let len = self.exe.u32_at(cur)? as usize;
            match self.exec_block(locals, frame, cur)? {
                Flow::Ok | Flow::Break(0) => {}
                Flow::Break(n) => return Ok(Flow::Break(n - 1)),
            }
            cur += len;
        }
        Ok(Flow::Ok)
    }

    /// Execute one block record. `Break(0)` means this block aborted.
    pub(crate) fn exec_block(
        &mut self,
        locals: &mut Locals,
        frame: &mut Frame,
        off: usize,
    ) -> Result<Flow, EvalError> {
        let count = self.exe.u32_at(off + 4)?;
        let mut cur = off + 8;
        for _ in 0..count {
            let len = self.exe.u32_at(cur)? as usize;
            match self.exec_stmt(locals, frame, cur)? {
                Flow::Ok => {}
                brk => return Ok(brk),
            }
            cur += len;
        }
        Ok(Flow::Ok)
    }

    /// Execute the statement at `off`. This is the dispatch point and the
    /// per-statement suspension point: meter and cancel first, then the
    /// opcode match.
    fn exec_stmt(
        &mut self,
        locals: &mut Locals,
        frame: &mut Frame,
        off: usize,
    ) -> Result<Flow, EvalError> {
        self.meter.tick()?;
        self.cancel.check()?;

        let tag = self.exe.u32_at(off + 4)?;
        let op = Opcode::try_from(tag)
            .map_err(|_| EvalError::InvalidExecutable("unknown statement opcode"))?;
        tracing::trace!(offset = off, ?op, "statement");

        let mut cur = off + 8;
        match op {
            Opcode::ArrayAppend => {
                let array = self.read(&mut cur)?;
                let value = self.read(&mut cur)?;
                let Some(value) = self.operand(locals, value)? else {
                    return Ok(Flow::Break(0));
                };
                match locals.get_mut(array) {
                    Some(Value::Array(elems)) => {
                        Arc::make_mut(elems).push(value);
                        Ok(Flow::Ok)
                    }
                    _ => Ok(Flow::Break(0)),
                }
            }
            Opcode::AssignInt => {
                let value = self.read_i64(&mut cur)?;
                let target = self.read(&mut cur)?;
                locals.set(target, Value::from(value));
                Ok(Flow::Ok)
            }
            Opcode::AssignVar => {
                let source = self.read(&mut cur)?;
                let target = self.read(&mut cur)?;
                match self.operand(locals, source)? {
                    Some(v) => locals.set(target, v),
                    None => locals.unset(target),
                }
                Ok(Flow::Ok)
            }
            Opcode::AssignVarOnce => {
                let source = self.read(&mut cur)?;
                let target = self.read(&mut cur)?;
                let Some(v) = self.operand(locals, source)? else {
                    return Ok(Flow::Ok);
                };
                if let Some(existing) = locals.get(target) {
                    if *existing != v {
                        return Err(EvalError::VarAssignConflict);
                    }
                    return Ok(Flow::Ok);
                }
                locals.set(target, v);
                Ok(Flow::Ok)
            }
            Opcode::Block => self.exec_blocks(locals, frame, cur),
            Opcode::Break => {
                let index = self.read(&mut cur)?;
                Ok(Flow::Break(index))
            }
            Opcode::Call => self.exec_call(locals, off, cur),
            Opcode::CallDynamic => self.exec_call_dynamic(locals, off, cur),
            Opcode::Dot => self.exec_dot(locals, cur),
            Opcode::Equal => {
                let a = self.read(&mut cur)?;
                let b = self.read(&mut cur)?;
                match (self.operand(locals, a)?, self.operand(locals, b)?) {
                    (Some(a), Some(b)) if a == b => Ok(Flow::Ok),
                    _ => Ok(Flow::Break(0)),
                }
            }
            Opcode::IsArray => {
                let source = self.read(&mut cur)?;
                match self.operand(locals, source)? {
                    Some(v) if v.is_array() => Ok(Flow::Ok),
                    _ => Ok(Flow::Break(0)),
                }
            }
            Opcode::IsDefined => {
                let source = self.read(&mut cur)?;
                if locals.is_defined(source) {
                    Ok(Flow::Ok)
                } else {
                    Ok(Flow::Break(0))
                }
            }
            Opcode::IsObject => {
                let source = self.read(&mut cur)?;
                match self.operand(locals, source)? {
                    Some(v) if v.is_object() => Ok(Flow::Ok),
                    _ => Ok(Flow::Break(0)),
                }
            }
            Opcode::IsUndefined => {
                let source = self.read(&mut cur)?;
                if locals.is_defined(source) {
                    Ok(Flow::Break(0))
                } else {
                    Ok(Flow::Ok)
                }
            }
            Opcode::Len => {
                let source = self.read(&mut cur)?;
                let target = self.read(&mut cur)?;
                let Some(v) = self.operand(locals, source)? else {
                    return Ok(Flow::Break(0));
                };
                match v.len() {
                    Some(len) => {
                        locals.set(target, Value::from(len as i64));
                        Ok(Flow::Ok)
                    }
                    None => Ok(Flow::Break(0)),
                }
            }
            Opcode::MakeArray => {
                let capacity = self.read(&mut cur)?;
                let target = self.read(&mut cur)?;
                locals.set(target, Value::new_array(capacity as usize));
                Ok(Flow::Ok)
            }
            Opcode::MakeNull => {
                let target = self.read(&mut cur)?;
                locals.set(target, Value::Null);
                Ok(Flow::Ok)
            }
            Opcode::MakeNumberInt => {
                let value = self.read_i64(&mut cur)?;
                let target = self.read(&mut cur)?;
                locals.set(target, Value::from(value));
                Ok(Flow::Ok)
            }
            Opcode::MakeNumberRef => {
                let index = self.read(&mut cur)?;
                let target = self.read(&mut cur)?;
                let text = self.exe.string(index)?;
                // Integer fast path; anything else keeps the lexed text so
                // the number round-trips exactly.
                let number = match text.parse::<i64>() {
                    Ok(i) => Number::Int(i),
                    Err(_) => Number::Big(text),
                };
                locals.set(target, Value::Number(number));
                Ok(Flow::Ok)
            }
            Opcode::MakeObject => {
                let target = self.read(&mut cur)?;
                locals.set(target, Value::new_object());
                Ok(Flow::Ok)
            }
            Opcode::MakeSet => {
                let target = self.read(&mut cur)?;
                locals.set(target, Value::new_set());
                Ok(Flow::Ok)
            }
            Opcode::Nop => Ok(Flow::Ok),
            Opcode::Not => self.exec_not(locals, frame, cur),
            Opcode::NotEqual => {
                let a = self.read(&mut cur)?;
                let b = self.read(&mut cur)?;
                match (self.operand(locals, a)?, self.operand(locals, b)?) {
                    (Some(a), Some(b)) if a != b => Ok(Flow::Ok),
                    _ => Ok(Flow::Break(0)),
                }
            }
            Opcode::ObjectInsert => {
                let key = self.read(&mut cur)?;
                let value = self.read(&mut cur)?;
                let object = self.read(&mut cur)?;
                let (Some(key), Some(value)) =
                    (self.operand(locals, key)?, self.operand(locals, value)?)
                else {
                    return Ok(Flow::Break(0));
                };
                match locals.get_mut(object) {
                    Some(Value::Object(o)) => {
                        o.insert(key, value);
                        Ok(Flow::Ok)
                    }
                    _ => Ok(Flow::Break(0)),
                }
            }
            Opcode::ObjectInsertOnce => {
                let key = self.read(&mut cur)?;
                let value = self.read(&mut cur)?;
                let object = self.read(&mut cur)?;
                let (Some(key), Some(value)) =
                    (self.operand(locals, key)?, self.operand(locals, value)?)
                else {
                    return Ok(Flow::Break(0));
                };
                match locals.get_mut(object) {
                    Some(Value::Object(o)) => {
                        if let Some(existing) = o.get(&key) {
                            if *existing != value {
                                return Err(EvalError::ObjectInsertConflict);
                            }
                            return Ok(Flow::Ok);
                        }
                        o.insert(key, value);
                        Ok(Flow::Ok)
                    }
                    _ => Ok(Flow::Break(0)),
                }
            }
            Opcode::ObjectMerge => {
                let a = self.read(&mut cur)?;
                let b = self.read(&mut cur)?;
                let target = self.read(&mut cur)?;
                let (Some(a), Some(b)) = (locals.get(a).cloned(), locals.get(b).cloned())
                else {
                    return Ok(Flow::Break(0));
                };
                if !a.is_object() || !b.is_object() {
                    return Ok(Flow::Break(0));
                }
                let merged = crate::builtins::merge_objects(&a, &b)?;
                locals.set(target, merged);
                Ok(Flow::Ok)
            }
            Opcode::ResetLocal => {
                let target = self.read(&mut cur)?;
                locals.unset(target);
                Ok(Flow::Ok)
            }
            Opcode::ResultSetAdd => {
                let value = self.read(&mut cur)?;
                match locals.get(value) {
                    Some(v) => {
                        let v = v.clone();
                        self.result_set.insert(v);
                        Ok(Flow::Ok)
                    }
                    None => Ok(Flow::Break(0)),
                }
            }
            Opcode::ReturnLocal => {
                let source = self.read(&mut cur)?;
                frame.return_slot = source as i32;
                Ok(Flow::Ok)
            }
            Opcode::Scan => self.exec_scan(locals, frame, cur),
            Opcode::SetAdd => {
                let value = self.read(&mut cur)?;
                let set = self.read(&mut cur)?;
                let Some(value) = self.operand(locals, value)? else {
                    return Ok(Flow::Break(0));
                };
                match locals.get_mut(set) {
                    Some(Value::Set(s)) => {
                        s.insert(value);
                        Ok(Flow::Ok)
                    }
                    _ => Ok(Flow::Break(0)),
                }
            }
            Opcode::With => self.exec_with(locals, frame, cur),
        }
    }

    /// `dot`: single-step subscription with the data-path number/string
    /// fallthrough.
    fn exec_dot(&mut self, locals: &mut Locals, mut cur: usize) -> Result<Flow, EvalError> {
        let source_word = self.read(&mut cur)?;
        let key_word = self.read(&mut cur)?;
        let target = self.read(&mut cur)?;

        let Some(source) = self.operand(locals, source_word)? else {
            return Ok(Flow::Break(0));
        };
        let Some(key) = self.operand(locals, key_word)? else {
            return Ok(Flow::Break(0));
        };

        let from_data = match Operand::decode(source_word) {
            Operand::Local(i) => locals.is_data(i),
            _ => false,
        };

        let mut hit = source.get_key(&key)?;
        if hit.is_none() && from_data {
            // Immutable parsed documents key exclusively by strings, so a
            // numeric subscription retries against the lexed form.
            if let (Value::Object(o), Value::Number(n)) = (&source, &key) {
                if o.is_parsed() {
                    hit = source.get_key(&Value::from(n.to_string()))?;
                }
            }
        }

        match hit {
            Some(v) => {
                locals.set(target, v);
                if from_data {
                    locals.set_data_flag(target, true);
                }
                Ok(Flow::Ok)
            }
            None => Ok(Flow::Break(0)),
        }
    }

    fn builtin_ctx(&mut self, location: u32) -> BuiltinContext<'_> {
        BuiltinContext {
            cancel: &self.cancel,
            errors: &mut self.errors,
            now: self.now,
            rng: self.rng.as_mut(),
            runtime: self.runtime.as_ref(),
            print_hook: self.print_hook,
            metrics: self.metrics,
            value_cache: self.value_cache,
            ndb_cache: self.ndb_cache,
            location,
        }
    }
}
