//! Builders for authoring IR policies in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::builtins::{Builtin, BuiltinContext};
use crate::error::EvalError;
use crate::ir::{Block, BuiltinFunc, Func, Operand, Plan, Policy, Static, Stmt, StringConst};
use crate::value::Value;
use crate::vm::{Vm, VmOptions};

pub fn local(i: u32) -> Operand {
    Operand::Local(i)
}

pub fn konst(b: bool) -> Operand {
    Operand::Bool(b)
}

pub fn sidx(i: u32) -> Operand {
    Operand::StringIndex(i)
}

pub fn block(stmts: Vec<Stmt>) -> Block {
    Block {
        stmts,
    }
}

pub fn statics(strings: &[&str], builtins: &[&str]) -> Static {
    Static {
        strings: strings
            .iter()
            .map(|s| StringConst {
                value: s.to_string(),
            })
            .collect(),
        builtin_funcs: builtins
            .iter()
            .map(|name| BuiltinFunc {
                name: name.to_string(),
                relation: false,
            })
            .collect(),
        files: Vec::new(),
    }
}

/// Policy with a single plan named `"test"`.
pub fn plan_policy(static_: Static, blocks: Vec<Block>) -> Policy {
    Policy {
        static_,
        plans: vec![Plan {
            name: "test".to_string(),
            blocks,
        }],
        funcs: Vec::new(),
    }
}

pub fn func(name: &str, params: Vec<u32>, return_: u32, blocks: Vec<Block>) -> Func {
    Func {
        name: name.to_string(),
        path: name.split('.').map(str::to_string).collect(),
        params,
        return_,
        blocks,
    }
}

pub fn vm(policy: &Policy) -> Vm {
    Vm::new(policy, VmOptions::default()).expect("policy compiles")
}

pub fn vm_with_builtins(policy: &Policy, builtins: Vec<Arc<dyn Builtin>>) -> Vm {
    Vm::new(
        policy,
        VmOptions {
            builtins,
            capabilities: None,
        },
    )
    .expect("policy compiles")
}

/// Host builtin counting its invocations and returning the running count.
pub struct CountBuiltin {
    name: String,
    hits: Arc<AtomicUsize>,
}

impl CountBuiltin {
    pub fn new(name: &str) -> (Arc<dyn Builtin>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let builtin = Arc::new(Self {
            name: name.to_string(),
            hits: hits.clone(),
        });
        (builtin, hits)
    }
}

impl Builtin for CountBuiltin {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(
        &self,
        _ctx: &mut BuiltinContext<'_>,
        _args: &[Value],
    ) -> Result<Option<Value>, EvalError> {
        let count = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(Value::from(count as i64)))
    }
}
