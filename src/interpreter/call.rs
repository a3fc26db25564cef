//! Function calls: static, dynamic, builtin dispatch and memoization.

use itertools::Itertools;

use crate::builtins::SpecializedBuiltin;
use crate::bytecode::{FuncInfo, FunctionInfo, Operand};
use crate::consts::{LOCAL_DATA, LOCAL_INPUT};
use crate::error::EvalError;
use crate::state::Locals;
use crate::value::Value;

use super::{Evaluator, Flow, Frame};

impl Evaluator<'_> {
    /// `call(func, args, result)`.
    pub(super) fn exec_call(
        &mut self,
        locals: &mut Locals,
        stmt_off: usize,
        mut cur: usize,
    ) -> Result<Flow, EvalError> {
        let func_idx = self.read(&mut cur)?;
        let result = self.read(&mut cur)?;
        let argc = self.read(&mut cur)?;
        let mut arg_words = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            arg_words.push(self.read(&mut cur)?);
        }
        self.invoke(locals, stmt_off, func_idx, &arg_words, result, true)
    }

    /// `call-dynamic(args, path, result)`: the callee name is assembled
    /// from the path operands at runtime.
    pub(super) fn exec_call_dynamic(
        &mut self,
        locals: &mut Locals,
        stmt_off: usize,
        mut cur: usize,
    ) -> Result<Flow, EvalError> {
        let result = self.read(&mut cur)?;
        let argc = self.read(&mut cur)?;
        let mut arg_words = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            arg_words.push(self.read(&mut cur)?);
        }
        let path_count = self.read(&mut cur)?;
        let mut segments = Vec::with_capacity(path_count as usize);
        for _ in 0..path_count {
            let word = self.read(&mut cur)?;
            match self.operand(locals, word)? {
                Some(Value::String(s)) => segments.push(s),
                Some(_) | None => return Ok(Flow::Break(0)),
            }
        }
        let name = segments.iter().map(|s| s.as_ref()).join(".");

        let Some((idx, _)) = self.exe.function_by_name(&name) else {
            // The assembled path names a data document entry, not a
            // compiled function.
            return Err(EvalError::FunctionCallToData(name));
        };
        self.invoke(locals, stmt_off, idx as u32, &arg_words, result, false)
    }

    fn invoke(
        &mut self,
        locals: &mut Locals,
        stmt_off: usize,
        func_idx: u32,
        arg_words: &[u32],
        result: u32,
        memoizable: bool,
    ) -> Result<Flow, EvalError> {
        match self.exe.function(func_idx as usize)? {
            FunctionInfo::Func(f) => {
                let f = FuncView::from(f);
                self.invoke_func(locals, func_idx, f, arg_words, result, memoizable)
            }
            FunctionInfo::Builtin(b) => {
                let specialized = b.specialized;
                self.invoke_builtin(locals, stmt_off, func_idx, specialized, arg_words, result)
            }
        }
    }

    fn invoke_func(
        &mut self,
        locals: &mut Locals,
        func_idx: u32,
        f: FuncView,
        arg_words: &[u32],
        result: u32,
        memoizable: bool,
    ) -> Result<Flow, EvalError> {
        // Calls in the `f(input, data)` shape are pure within one scope;
        // only those hit the memoization frame.
        let memoizable = memoizable
            && arg_words.len() == 2
            && Operand::decode(arg_words[0]) == Operand::Local(LOCAL_INPUT)
            && Operand::decode(arg_words[1]) == Operand::Local(LOCAL_DATA);
        if memoizable {
            if let Some(memoized) = self.memo.get(func_idx) {
                return Ok(bind_result(locals, result, memoized.clone()));
            }
        }

        let mut args = Vec::with_capacity(arg_words.len());
        for word in arg_words {
            match self.operand(locals, *word)? {
                Some(v) => {
                    let from_data = match Operand::decode(*word) {
                        Operand::Local(i) => locals.is_data(i),
                        _ => false,
                    };
                    args.push((v, from_data));
                }
                None => {
                    if memoizable {
                        self.memo.insert(func_idx, None);
                    }
                    return Ok(bind_result(locals, result, None));
                }
            }
        }

        let mut callee = self.new_locals();
        for (param, (arg, from_data)) in f.params.iter().zip(args) {
            callee.set(*param, arg);
            if from_data {
                callee.set_data_flag(*param, true);
            }
        }
        let mut frame = Frame::default();
        self.exec_blocks(&mut callee, &mut frame, f.blocks_off)?;

        let returned = if frame.return_slot >= 0 {
            callee.get(frame.return_slot as u32).cloned()
        } else {
            None
        };
        if memoizable {
            self.memo.insert(func_idx, returned.clone());
        }
        Ok(bind_result(locals, result, returned))
    }

    /// Invoke a compiled function directly with pre-resolved arguments, as
    /// the top-level `Function` API does. Undefined arguments leave their
    /// parameter unbound; the flagged parameter is treated as data-origin.
    pub(crate) fn call_function_direct(
        &mut self,
        params: &[u32],
        blocks_off: usize,
        args: Vec<Option<Value>>,
        data_param: Option<usize>,
    ) -> Result<Option<Value>, EvalError> {
        let mut callee = self.new_locals();
        for (i, (param, arg)) in params.iter().zip(args).enumerate() {
            if let Some(v) = arg {
                callee.set(*param, v);
                if data_param == Some(i) {
                    callee.set_data_flag(*param, true);
                }
            }
        }
        let mut frame = Frame::default();
        self.exec_blocks(&mut callee, &mut frame, blocks_off)?;
        Ok(if frame.return_slot >= 0 {
            callee.get(frame.return_slot as u32).cloned()
        } else {
            None
        })
    }

    fn invoke_builtin(
        &mut self,
        locals: &mut Locals,
        stmt_off: usize,
        func_idx: u32,
        specialized: Option<u32>,
        arg_words: &[u32],
        result: u32,
    ) -> Result<Flow, EvalError> {
        let mut args = Vec::with_capacity(arg_words.len());
        for word in arg_words {
            match self.operand(locals, *word)? {
                Some(v) => args.push(v),
                // Undefined operand: short-circuit without a result and
                // without collecting an error.
                None => return Ok(bind_result(locals, result, None)),
            }
        }

        let returned = match specialized.and_then(SpecializedBuiltin::from_opcode) {
            Some(spec) => {
                let mut ctx = self.builtin_ctx(stmt_off as u32);
                spec.call(&mut ctx, &args)?
            }
            None => {
                let host = self
                    .host_builtins
                    .get(func_idx as usize)
                    .and_then(|h| h.clone())
                    .ok_or(EvalError::Internal("unresolved host builtin"))?;
                let mut ctx = self.builtin_ctx(stmt_off as u32);
                host.call(&mut ctx, &args)?
            }
        };
        Ok(bind_result(locals, result, returned))
    }
}

/// Owned view of the function record fields the call path needs, detaching
/// the borrow of the executable's table.
struct FuncView {
    params: Vec<u32>,
    blocks_off: usize,
}

impl From<&FuncInfo> for FuncView {
    fn from(f: &FuncInfo) -> Self {
        Self {
            params: f.params.clone(),
            blocks_off: f.blocks_off,
        }
    }
}

/// Bind a call result: a defined value continues, an undefined one resets
/// the register and aborts the enclosing block.
fn bind_result(locals: &mut Locals, result: u32, value: Option<Value>) -> Flow {
    match value {
        Some(v) => {
            locals.set(result, v);
            Flow::Ok
        }
        None => {
            locals.unset(result);
            Flow::Break(0)
        }
    }
}
