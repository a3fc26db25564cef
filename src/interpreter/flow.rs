//! Scoped control flow: `scan`, `not` and `with`.

use std::sync::Arc;

use crate::error::EvalError;
use crate::state::Locals;
use crate::value::{Object, Value};

use super::{Evaluator, Flow, Frame};

impl Evaluator<'_> {
    /// `scan(src, key, value, body)`: iterate the collection in natural
    /// order, running the body per element. An aborting body moves to the
    /// next element; deeper breaks unwind through the scan.
    pub(super) fn exec_scan(
        &mut self,
        locals: &mut Locals,
        frame: &mut Frame,
        mut cur: usize,
    ) -> Result<Flow, EvalError> {
        let source = self.read(&mut cur)?;
        let key_local = self.read(&mut cur)?;
        let value_local = self.read(&mut cur)?;
        let block_off = cur;

        let Some(collection) = locals.get(source).cloned() else {
            return Ok(Flow::Break(0));
        };
        if !collection.is_array()
            && !collection.is_object()
            && !collection.is_set()
        {
            return Ok(Flow::Break(0));
        }
        let from_data = locals.is_data(source);

        let mut entries = Vec::new();
        collection.iter_entries(&mut |k, v| {
            entries.push((k, v));
            Ok(false)
        })?;

        for (k, v) in entries {
            locals.set(key_local, k);
            locals.set(value_local, v);
            if from_data {
                locals.set_data_flag(value_local, true);
            }
            match self.exec_block(locals, frame, block_off)? {
                Flow::Ok | Flow::Break(0) => {}
                Flow::Break(n) => return Ok(Flow::Break(n - 1)),
            }
        }
        Ok(Flow::Ok)
    }

    /// `not(body)`: succeeds iff the body aborts. The body runs against a
    /// forked register file and a fresh memoization frame, so assignments
    /// and memo entries inside the negation are discarded.
    pub(super) fn exec_not(
        &mut self,
        locals: &mut Locals,
        frame: &mut Frame,
        cur: usize,
    ) -> Result<Flow, EvalError> {
        let mut inner = locals.fork();
        self.memo.push();
        let flow = self.exec_block(&mut inner, frame, cur);
        self.memo.pop();
        match flow? {
            Flow::Ok => Ok(Flow::Break(0)),
            Flow::Break(0) => Ok(Flow::Ok),
            Flow::Break(n) => Ok(Flow::Break(n - 1)),
        }
    }

    /// `with(local, path, value, body)`: overlay `value` at `path` inside
    /// the local for the body's duration, restoring the register after.
    pub(super) fn exec_with(
        &mut self,
        locals: &mut Locals,
        frame: &mut Frame,
        mut cur: usize,
    ) -> Result<Flow, EvalError> {
        let local = self.read(&mut cur)?;
        let path_count = self.read(&mut cur)?;
        let mut path = Vec::with_capacity(path_count as usize);
        for _ in 0..path_count {
            let idx = self.read(&mut cur)?;
            path.push(self.exe.string(idx)?);
        }
        let value_word = self.read(&mut cur)?;
        let block_off = cur;

        let Some(value) = self.operand(locals, value_word)? else {
            return Ok(Flow::Break(0));
        };

        let saved = locals.snapshot(local);
        let was_data = locals.is_data(local);
        let overlaid = overlay(saved.as_ref().map(|(v, _)| v), &path, value)?;
        locals.set(local, overlaid);
        locals.set_data_flag(local, was_data);

        let flow = self.exec_block(locals, frame, block_off);
        locals.restore(local, saved);
        match flow? {
            Flow::Ok => Ok(Flow::Ok),
            Flow::Break(0) => Ok(Flow::Break(0)),
            Flow::Break(n) => Ok(Flow::Break(n - 1)),
        }
    }
}

/// Rebuild `base` with `value` grafted at `path`, creating intermediate
/// objects where the path runs off the existing tree.
fn overlay(base: Option<&Value>, path: &[Arc<str>], value: Value) -> Result<Value, EvalError> {
    let Some((seg, rest)) = path.split_first() else {
        return Ok(value);
    };
    let key = Value::String(seg.clone());
    let mut obj = match base {
        Some(Value::Object(o)) => o.clone(),
        Some(Value::External(x)) => {
            // Externals are read-only; the overlay works on a materialized
            // copy for the body's duration.
            let mut copy = Object::new();
            let ext = Value::External(x.clone());
            ext.iter_entries(&mut |k, v| {
                copy.insert(k, v);
                Ok(false)
            })?;
            copy
        }
        _ => Object::new(),
    };
    let child = obj.get(&key).cloned();
    let grafted = overlay(child.as_ref(), rest, value)?;
    obj.insert(key, grafted);
    Ok(Value::Object(obj))
}
