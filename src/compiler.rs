//! IR → bytecode lowering.
//!
//! A deterministic single pass over the policy tree. Records are emitted
//! with placeholder length/offset words that are patched once their
//! children have been appended. Builtin declarations resolve to a
//! specialized native implementation when one exists, otherwise to the
//! host-provided builtin table.

use std::collections::{HashMap, HashSet};

use crate::builtins::SpecializedBuiltin;
use crate::bytecode::executable::{RECORD_BUILTIN, RECORD_FUNCTION, SPECIALIZED_PREFIX};
use crate::bytecode::{Opcode, Operand, Writer};
use crate::consts::{HEADER_SIZE, MAGIC, VERSION};
use crate::error::CompileError;
use crate::ir;

/// IR compiler with builtin resolution state.
pub struct Compiler<'a> {
    policy: &'a ir::Policy,
    host_builtins: HashSet<String>,
    capabilities: Option<HashSet<String>>,
    /// Function-table index by compiled name, for `call` targets.
    func_index: HashMap<&'a str, u32>,
}

impl<'a> Compiler<'a> {
    /// Compiler over `policy` with no host builtins.
    pub fn new(policy: &'a ir::Policy) -> Self {
        Self {
            policy,
            host_builtins: HashSet::new(),
            capabilities: None,
            func_index: HashMap::new(),
        }
    }

    /// Declare the builtin names the host implements.
    pub fn with_host_builtins<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_builtins = names.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict declared builtins to a capability set.
    pub fn with_capabilities<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Lower the policy into an executable buffer.
    pub fn compile(mut self) -> Result<Vec<u8>, CompileError> {
        // The function table lists compiled functions first, then declared
        // builtins, so `call` targets can be resolved to table indexes in
        // one pass.
        for (i, func) in self.policy.funcs.iter().enumerate() {
            if func.params.is_empty() {
                return Err(CompileError::IllegalFunction(func.name.clone()));
            }
            self.func_index.insert(func.name.as_str(), i as u32);
        }
        let base = self.policy.funcs.len() as u32;
        for (i, decl) in self.policy.static_.builtin_funcs.iter().enumerate() {
            self.resolve_builtin(&decl.name)?;
            self.func_index.insert(decl.name.as_str(), base + i as u32);
        }

        let mut w = Writer::new();
        w.bytes(&MAGIC);
        w.u32(VERSION);
        let total_len = w.placeholder();
        let strings_off = w.placeholder();
        let funcs_off = w.placeholder();
        let plans_off = w.placeholder();
        debug_assert_eq!(w.pos(), HEADER_SIZE);

        w.patch_offset_from(strings_off, HEADER_SIZE);
        self.emit_strings(&mut w);

        w.patch_offset_from(funcs_off, HEADER_SIZE);
        self.emit_functions(&mut w)?;

        w.patch_offset_from(plans_off, HEADER_SIZE);
        self.emit_plans(&mut w)?;

        w.patch_len_from(total_len, 0);
        Ok(w.into_bytes())
    }

    /// Check that a declared builtin has some implementation and is inside
    /// the capability gate.
    fn resolve_builtin(&self, name: &str) -> Result<Option<SpecializedBuiltin>, CompileError> {
        if let Some(caps) = &self.capabilities {
            if !caps.contains(name) {
                return Err(CompileError::BuiltinNotPermitted(name.to_string()));
            }
        }
        if let Some(spec) = SpecializedBuiltin::from_name(name) {
            return Ok(Some(spec));
        }
        if self.host_builtins.contains(name) {
            return Ok(None);
        }
        Err(CompileError::BuiltinNotFound(name.to_string()))
    }

    fn emit_strings(&self, w: &mut Writer) {
        let strings = &self.policy.static_.strings;
        w.u32(strings.len() as u32);
        let table: Vec<_> = strings.iter().map(|_| w.placeholder()).collect();
        let base = w.pos();
        for (s, patch) in strings.iter().zip(table) {
            w.patch_offset_from(patch, base);
            w.str(&s.value);
        }
    }

    fn emit_functions(&self, w: &mut Writer) -> Result<(), CompileError> {
        let funcs = &self.policy.funcs;
        let builtins = &self.policy.static_.builtin_funcs;
        w.u32((funcs.len() + builtins.len()) as u32);
        let table: Vec<_> = (0..funcs.len() + builtins.len())
            .map(|_| w.placeholder())
            .collect();
        let base = w.pos();
        let mut entries = table.into_iter();

        for func in funcs {
            let patch = entries.next().expect("table sized above");
            w.patch_offset_from(patch, base);
            self.emit_function(w, func)?;
        }
        for decl in builtins {
            let patch = entries.next().expect("table sized above");
            w.patch_offset_from(patch, base);
            if let Some(spec) = self.resolve_builtin(&decl.name)? {
                w.u32(SPECIALIZED_PREFIX | spec.opcode());
            }
            let start = w.pos();
            let len = w.placeholder();
            w.u32(RECORD_BUILTIN);
            w.u8(decl.relation as u8);
            w.str(&decl.name);
            w.patch_len_from(len, start);
        }
        Ok(())
    }

    fn emit_function(&self, w: &mut Writer, func: &ir::Func) -> Result<(), CompileError> {
        let start = w.pos();
        let len = w.placeholder();
        w.u32(RECORD_FUNCTION);
        w.i32(self.func_index[func.name.as_str()] as i32);
        w.u32(func.return_);
        let params_off = w.placeholder();
        let name_off = w.placeholder();
        let path_off = w.placeholder();
        let blocks_off = w.placeholder();

        w.patch_offset_from(params_off, start);
        w.u32(func.params.len() as u32);
        for p in &func.params {
            w.u32(*p);
        }

        w.patch_offset_from(name_off, start);
        w.str(&func.name);

        w.patch_offset_from(path_off, start);
        w.u32(func.path.len() as u32);
        for seg in &func.path {
            w.str(seg);
        }

        w.patch_offset_from(blocks_off, start);
        self.emit_blocks(w, &func.blocks)?;

        w.patch_len_from(len, start);
        Ok(())
    }

    fn emit_plans(&self, w: &mut Writer) -> Result<(), CompileError> {
        let plans = &self.policy.plans;
        w.u32(plans.len() as u32);
        let table: Vec<_> = plans.iter().map(|_| w.placeholder()).collect();
        let base = w.pos();
        for (plan, patch) in plans.iter().zip(table) {
            w.patch_offset_from(patch, base);
            let start = w.pos();
            let len = w.placeholder();
            let name_off = w.placeholder();
            let blocks_off = w.placeholder();
            w.patch_offset_from(name_off, start);
            w.str(&plan.name);
            w.patch_offset_from(blocks_off, start);
            self.emit_blocks(w, &plan.blocks)?;
            w.patch_len_from(len, start);
        }
        Ok(())
    }

    fn emit_blocks(&self, w: &mut Writer, blocks: &[ir::Block]) -> Result<(), CompileError> {
        w.u32(blocks.len() as u32);
        for block in blocks {
            self.emit_block(w, block)?;
        }
        Ok(())
    }

    fn emit_block(&self, w: &mut Writer, block: &ir::Block) -> Result<(), CompileError> {
        let start = w.pos();
        let len = w.placeholder();
        w.u32(block.stmts.len() as u32);
        for stmt in &block.stmts {
            self.emit_stmt(w, stmt)?;
        }
        w.patch_len_from(len, start);
        Ok(())
    }

    fn operand(&self, op: ir::Operand) -> Result<u32, CompileError> {
        if let ir::Operand::StringIndex(i) = op {
            self.check_string(i)?;
        }
        Operand::from(op).encode()
    }

    fn check_string(&self, idx: u32) -> Result<(), CompileError> {
        if (idx as usize) < self.policy.static_.strings.len() {
            Ok(())
        } else {
            Err(CompileError::StringIndexOutOfRange(idx))
        }
    }

    fn emit_stmt(&self, w: &mut Writer, stmt: &ir::Stmt) -> Result<(), CompileError> {
        use ir::Stmt;

        let start = w.pos();
        let len = w.placeholder();
        match stmt {
            Stmt::ArrayAppend {
                array,
                value,
            } => {
                w.u32(Opcode::ArrayAppend.tag());
                w.u32(*array);
                let v = self.operand(*value)?;
                w.u32(v);
            }
            Stmt::AssignInt {
                value,
                target,
            } => {
                w.u32(Opcode::AssignInt.tag());
                w.i64(*value);
                w.u32(*target);
            }
            Stmt::AssignVar {
                source,
                target,
            } => {
                w.u32(Opcode::AssignVar.tag());
                let s = self.operand(*source)?;
                w.u32(s);
                w.u32(*target);
            }
            Stmt::AssignVarOnce {
                source,
                target,
            } => {
                w.u32(Opcode::AssignVarOnce.tag());
                let s = self.operand(*source)?;
                w.u32(s);
                w.u32(*target);
            }
            Stmt::Block {
                blocks,
            } => {
                w.u32(Opcode::Block.tag());
                self.emit_blocks(w, blocks)?;
            }
            Stmt::Break {
                index,
            } => {
                w.u32(Opcode::Break.tag());
                w.u32(*index);
            }
            Stmt::Call {
                func,
                args,
                result,
            } => {
                w.u32(Opcode::Call.tag());
                let target = self
                    .func_index
                    .get(func.as_str())
                    .copied()
                    .ok_or_else(|| CompileError::FunctionNotFound(func.clone()))?;
                w.u32(target);
                w.u32(*result);
                w.u32(args.len() as u32);
                for arg in args {
                    let a = self.operand(*arg)?;
                    w.u32(a);
                }
            }
            Stmt::CallDynamic {
                args,
                path,
                result,
            } => {
                w.u32(Opcode::CallDynamic.tag());
                w.u32(*result);
                w.u32(args.len() as u32);
                for arg in args {
                    let a = self.operand(*arg)?;
                    w.u32(a);
                }
                w.u32(path.len() as u32);
                for seg in path {
                    let s = self.operand(*seg)?;
                    w.u32(s);
                }
            }
            Stmt::Dot {
                source,
                key,
                target,
            } => {
                w.u32(Opcode::Dot.tag());
                let s = self.operand(*source)?;
                w.u32(s);
                let k = self.operand(*key)?;
                w.u32(k);
                w.u32(*target);
            }
            Stmt::Equal {
                a,
                b,
            } => {
                w.u32(Opcode::Equal.tag());
                let a = self.operand(*a)?;
                w.u32(a);
                let b = self.operand(*b)?;
                w.u32(b);
            }
            Stmt::IsArray {
                source,
            } => {
                w.u32(Opcode::IsArray.tag());
                let s = self.operand(*source)?;
                w.u32(s);
            }
            Stmt::IsDefined {
                source,
            } => {
                w.u32(Opcode::IsDefined.tag());
                w.u32(*source);
            }
            Stmt::IsObject {
                source,
            } => {
                w.u32(Opcode::IsObject.tag());
                let s = self.operand(*source)?;
                w.u32(s);
            }
            Stmt::IsUndefined {
                source,
            } => {
                w.u32(Opcode::IsUndefined.tag());
                w.u32(*source);
            }
            Stmt::Len {
                source,
                target,
            } => {
                w.u32(Opcode::Len.tag());
                let s = self.operand(*source)?;
                w.u32(s);
                w.u32(*target);
            }
            Stmt::MakeArray {
                capacity,
                target,
            } => {
                w.u32(Opcode::MakeArray.tag());
                w.u32((*capacity).max(0) as u32);
                w.u32(*target);
            }
            Stmt::MakeNull {
                target,
            } => {
                w.u32(Opcode::MakeNull.tag());
                w.u32(*target);
            }
            Stmt::MakeNumberInt {
                value,
                target,
            } => {
                w.u32(Opcode::MakeNumberInt.tag());
                w.i64(*value);
                w.u32(*target);
            }
            Stmt::MakeNumberRef {
                index,
                target,
            } => {
                w.u32(Opcode::MakeNumberRef.tag());
                self.check_string(*index)?;
                w.u32(*index);
                w.u32(*target);
            }
            Stmt::MakeObject {
                target,
            } => {
                w.u32(Opcode::MakeObject.tag());
                w.u32(*target);
            }
            Stmt::MakeSet {
                target,
            } => {
                w.u32(Opcode::MakeSet.tag());
                w.u32(*target);
            }
            Stmt::Nop => {
                w.u32(Opcode::Nop.tag());
            }
            Stmt::Not {
                block,
            } => {
                w.u32(Opcode::Not.tag());
                self.emit_block(w, block)?;
            }
            Stmt::NotEqual {
                a,
                b,
            } => {
                w.u32(Opcode::NotEqual.tag());
                let a = self.operand(*a)?;
                w.u32(a);
                let b = self.operand(*b)?;
                w.u32(b);
            }
            Stmt::ObjectInsert {
                key,
                value,
                object,
            } => {
                w.u32(Opcode::ObjectInsert.tag());
                let k = self.operand(*key)?;
                w.u32(k);
                let v = self.operand(*value)?;
                w.u32(v);
                w.u32(*object);
            }
            Stmt::ObjectInsertOnce {
                key,
                value,
                object,
            } => {
                w.u32(Opcode::ObjectInsertOnce.tag());
                let k = self.operand(*key)?;
                w.u32(k);
                let v = self.operand(*value)?;
                w.u32(v);
                w.u32(*object);
            }
            Stmt::ObjectMerge {
                a,
                b,
                target,
            } => {
                w.u32(Opcode::ObjectMerge.tag());
                w.u32(*a);
                w.u32(*b);
                w.u32(*target);
            }
            Stmt::ResetLocal {
                target,
            } => {
                w.u32(Opcode::ResetLocal.tag());
                w.u32(*target);
            }
            Stmt::ResultSetAdd {
                value,
            } => {
                w.u32(Opcode::ResultSetAdd.tag());
                w.u32(*value);
            }
            Stmt::ReturnLocal {
                source,
            } => {
                w.u32(Opcode::ReturnLocal.tag());
                w.u32(*source);
            }
            Stmt::Scan {
                source,
                key,
                value,
                block,
            } => {
                w.u32(Opcode::Scan.tag());
                w.u32(*source);
                w.u32(*key);
                w.u32(*value);
                self.emit_block(w, block)?;
            }
            Stmt::SetAdd {
                value,
                set,
            } => {
                w.u32(Opcode::SetAdd.tag());
                let v = self.operand(*value)?;
                w.u32(v);
                w.u32(*set);
            }
            Stmt::With {
                local,
                path,
                value,
                block,
            } => {
                w.u32(Opcode::With.tag());
                w.u32(*local);
                w.u32(path.len() as u32);
                for seg in path {
                    self.check_string(*seg)?;
                    w.u32(*seg);
                }
                let v = self.operand(*value)?;
                w.u32(v);
                self.emit_block(w, block)?;
            }
        }
        w.patch_len_from(len, start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Executable, FunctionInfo};

    fn policy_json(src: &str) -> ir::Policy {
        ir::Policy::from_json(src).expect("valid IR")
    }

    #[test]
    fn compiled_header_validates() {
        let policy = policy_json(
            r#"{
                "static": {"strings": [{"value": "hello"}]},
                "plans": {"plans": [{"name": "p", "blocks": [{"stmts": [
                    {"type": "NopStmt", "stmt": {}}
                ]}]}]}
            }"#,
        );
        let bytes = Compiler::new(&policy).compile().expect("compiles");
        assert_eq!(&bytes[0..4], b"rego");
        let exe = Executable::from_bytes(bytes).expect("valid executable");
        assert_eq!(exe.string_count(), 1);
        assert_eq!(exe.string(0).unwrap().as_ref(), "hello");
        assert!(exe.plan_by_name("p").is_some());
    }

    #[test]
    fn zero_parameter_functions_are_illegal() {
        let policy = policy_json(
            r#"{
                "funcs": {"funcs": [{"name": "g0.data.f", "path": ["g0", "data", "f"],
                    "params": [], "return": 2, "blocks": []}]}
            }"#,
        );
        let err = Compiler::new(&policy).compile().unwrap_err();
        assert_eq!(err, CompileError::IllegalFunction("g0.data.f".into()));
    }

    #[test]
    fn unknown_call_targets_fail() {
        let policy = policy_json(
            r#"{
                "plans": {"plans": [{"name": "p", "blocks": [{"stmts": [
                    {"type": "CallStmt", "stmt": {"func": "g0.data.missing", "args": [], "result": 2}}
                ]}]}]}
            }"#,
        );
        let err = Compiler::new(&policy).compile().unwrap_err();
        assert_eq!(err, CompileError::FunctionNotFound("g0.data.missing".into()));
    }

    #[test]
    fn undeclared_builtins_fail() {
        let policy = policy_json(
            r#"{
                "static": {"builtin_funcs": [{"name": "custom.fn"}]}
            }"#,
        );
        let err = Compiler::new(&policy).compile().unwrap_err();
        assert_eq!(err, CompileError::BuiltinNotFound("custom.fn".into()));

        let policy = policy_json(
            r#"{
                "static": {"builtin_funcs": [{"name": "custom.fn"}]}
            }"#,
        );
        Compiler::new(&policy)
            .with_host_builtins(["custom.fn"])
            .compile()
            .expect("host-implemented builtin compiles");
    }

    #[test]
    fn capability_gate_rejects_builtins() {
        let policy = policy_json(
            r#"{
                "static": {"builtin_funcs": [{"name": "json.unmarshal"}]}
            }"#,
        );
        let err = Compiler::new(&policy)
            .with_capabilities(["sprintf"])
            .compile()
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::BuiltinNotPermitted("json.unmarshal".into())
        );
    }

    #[test]
    fn specialized_builtins_carry_prefix_records() {
        let policy = policy_json(
            r#"{
                "static": {"builtin_funcs": [{"name": "sprintf"}]}
            }"#,
        );
        let bytes = Compiler::new(&policy).compile().expect("compiles");
        let exe = Executable::from_bytes(bytes).expect("valid executable");
        let FunctionInfo::Builtin(b) = &exe.functions()[0] else {
            panic!("expected builtin entry");
        };
        assert_eq!(b.name.as_ref(), "sprintf");
        assert!(b.specialized.is_some());
    }
}
