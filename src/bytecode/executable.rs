//! Offset-indexed access to a compiled executable buffer.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::consts::{HEADER_SIZE, MAGIC, VERSION};
use crate::error::EvalError;

/// Tag of a builtin record in the function table.
pub const RECORD_BUILTIN: u32 = 0;
/// Tag of a function record in the function table.
pub const RECORD_FUNCTION: u32 = 1;
/// High bit marking a specialized-builtin prefix word. Record lengths never
/// reach this bit, which keeps the prefix distinguishable.
pub const SPECIALIZED_PREFIX: u32 = 0x8000_0000;

/// A compiled, validated executable.
///
/// The buffer is the single source of truth; the indexes below are derived
/// views used to resolve names and entry offsets. Statement execution reads
/// the buffer directly.
#[derive(Debug)]
pub struct Executable {
    buf: Vec<u8>,
    string_offsets: Vec<u32>,
    interned: Box<[OnceLock<Arc<str>>]>,
    functions: Vec<FunctionInfo>,
    plans: Vec<PlanInfo>,
    func_index: HashMap<Arc<str>, usize>,
    plan_index: HashMap<Arc<str>, usize>,
}

/// A function-table entry.
#[derive(Debug)]
pub enum FunctionInfo {
    /// A compiled function body.
    Func(FuncInfo),
    /// A declared builtin, possibly specialized.
    Builtin(BuiltinInfo),
}

/// Parsed function record.
#[derive(Debug)]
pub struct FuncInfo {
    /// Position in the function table.
    pub index: i32,
    /// Local holding the return value.
    pub return_reg: u32,
    /// Locals receiving arguments.
    pub params: Vec<u32>,
    /// Compiled function name.
    pub name: Arc<str>,
    /// Dotted path components.
    pub path: Vec<Arc<str>>,
    /// Absolute offset of the body blocks record.
    pub blocks_off: usize,
}

/// Parsed builtin record.
#[derive(Debug)]
pub struct BuiltinInfo {
    /// Declared builtin name.
    pub name: Arc<str>,
    /// True for relation builtins.
    pub relation: bool,
    /// Specialized-builtin opcode, when natively implemented.
    pub specialized: Option<u32>,
}

/// Parsed plan record.
#[derive(Debug)]
pub struct PlanInfo {
    /// Plan name as addressed by `Eval`.
    pub name: Arc<str>,
    /// Absolute offset of the plan blocks record.
    pub blocks_off: usize,
}

impl Executable {
    /// Validate the buffer and build the derived indexes.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self, EvalError> {
        if buf.len() < HEADER_SIZE {
            return Err(EvalError::InvalidExecutable("buffer shorter than header"));
        }
        if buf[0..4] != MAGIC {
            return Err(EvalError::InvalidExecutable("bad magic"));
        }
        let version = u32::from_be_bytes(buf[4..8].try_into().expect("4 bytes"));
        if version != VERSION {
            return Err(EvalError::InvalidExecutable("unsupported version"));
        }
        let total = u32::from_be_bytes(buf[8..12].try_into().expect("4 bytes")) as usize;
        if total > buf.len() {
            return Err(EvalError::InvalidExecutable("declared length exceeds buffer"));
        }

        let mut exe = Self {
            buf,
            string_offsets: Vec::new(),
            interned: Box::new([]),
            functions: Vec::new(),
            plans: Vec::new(),
            func_index: HashMap::new(),
            plan_index: HashMap::new(),
        };

        let strings_off = exe.u32_at(12)? as usize;
        let funcs_off = exe.u32_at(16)? as usize;
        let plans_off = exe.u32_at(20)? as usize;

        exe.parse_strings(HEADER_SIZE + strings_off)?;
        exe.parse_functions(HEADER_SIZE + funcs_off)?;
        exe.parse_plans(HEADER_SIZE + plans_off)?;
        Ok(exe)
    }

    /// Raw bytes of the executable.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Checked big-endian `u32` read.
    pub fn u32_at(&self, off: usize) -> Result<u32, EvalError> {
        self.buf
            .get(off..off + 4)
            .map(|b| u32::from_be_bytes(b.try_into().expect("4 bytes")))
            .ok_or(EvalError::InvalidExecutable("offset out of bounds"))
    }

    /// Checked big-endian `i64` read.
    pub fn i64_at(&self, off: usize) -> Result<i64, EvalError> {
        self.buf
            .get(off..off + 8)
            .map(|b| i64::from_be_bytes(b.try_into().expect("8 bytes")))
            .ok_or(EvalError::InvalidExecutable("offset out of bounds"))
    }

    fn u8_at(&self, off: usize) -> Result<u8, EvalError> {
        self.buf
            .get(off)
            .copied()
            .ok_or(EvalError::InvalidExecutable("offset out of bounds"))
    }

    fn str_at(&self, off: usize) -> Result<(Arc<str>, usize), EvalError> {
        let len = self.u32_at(off)? as usize;
        let start = off + 4;
        let bytes = self
            .buf
            .get(start..start + len)
            .ok_or(EvalError::InvalidExecutable("string out of bounds"))?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| EvalError::InvalidExecutable("string not UTF-8"))?;
        Ok((Arc::from(s), start + len))
    }

    /// Number of pooled strings.
    pub fn string_count(&self) -> usize {
        self.string_offsets.len()
    }

    /// Resolve a string-pool index through the per-VM intern cache. A given
    /// index allocates at most once per VM instance.
    pub fn string(&self, idx: u32) -> Result<Arc<str>, EvalError> {
        let slot = self
            .interned
            .get(idx as usize)
            .ok_or(EvalError::InvalidExecutable("string index out of range"))?;
        if let Some(s) = slot.get() {
            return Ok(s.clone());
        }
        let (s, _) = self.str_at(self.string_offsets[idx as usize] as usize)?;
        Ok(slot.get_or_init(|| s).clone())
    }

    /// Function-table entries.
    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }

    /// Function-table entry by index.
    pub fn function(&self, idx: usize) -> Result<&FunctionInfo, EvalError> {
        self.functions
            .get(idx)
            .ok_or(EvalError::InvalidExecutable("function index out of range"))
    }

    /// Look up a compiled function by name.
    pub fn function_by_name(&self, name: &str) -> Option<(usize, &FuncInfo)> {
        let idx = *self.func_index.get(name)?;
        match &self.functions[idx] {
            FunctionInfo::Func(f) => Some((idx, f)),
            FunctionInfo::Builtin(_) => None,
        }
    }

    /// Plan records in declaration order.
    pub fn plans(&self) -> &[PlanInfo] {
        &self.plans
    }

    /// Look up a plan by name.
    pub fn plan_by_name(&self, name: &str) -> Option<(usize, &PlanInfo)> {
        let idx = *self.plan_index.get(name)?;
        Some((idx, &self.plans[idx]))
    }

    fn parse_strings(&mut self, off: usize) -> Result<(), EvalError> {
        let count = self.u32_at(off)? as usize;
        let table = off + 4;
        let base = table + 4 * count;
        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let rel = self.u32_at(table + 4 * i)? as usize;
            offsets.push((base + rel) as u32);
        }
        self.string_offsets = offsets;
        self.interned = (0..count).map(|_| OnceLock::new()).collect();
        Ok(())
    }

    fn parse_functions(&mut self, off: usize) -> Result<(), EvalError> {
        let count = self.u32_at(off)? as usize;
        let table = off + 4;
        let base = table + 4 * count;
        for i in 0..count {
            let rel = self.u32_at(table + 4 * i)? as usize;
            let entry = self.parse_function_entry(base + rel)?;
            if let FunctionInfo::Func(f) = &entry {
                self.func_index.insert(f.name.clone(), i);
            }
            self.functions.push(entry);
        }
        Ok(())
    }

    fn parse_function_entry(&self, mut off: usize) -> Result<FunctionInfo, EvalError> {
        let mut specialized = None;
        let head = self.u32_at(off)?;
        if head & SPECIALIZED_PREFIX != 0 {
            specialized = Some(head & !SPECIALIZED_PREFIX);
            off += 4;
        }
        let record = off;
        let _len = self.u32_at(record)?;
        let tag = self.u32_at(record + 4)?;
        match tag {
            RECORD_BUILTIN => {
                let relation = self.u8_at(record + 8)? != 0;
                let (name, _) = self.str_at(record + 9)?;
                Ok(FunctionInfo::Builtin(BuiltinInfo {
                    name,
                    relation,
                    specialized,
                }))
            }
            RECORD_FUNCTION => {
                let index = self.u32_at(record + 8)? as i32;
                let return_reg = self.u32_at(record + 12)?;
                let params_off = record + self.u32_at(record + 16)? as usize;
                let name_off = record + self.u32_at(record + 20)? as usize;
                let path_off = record + self.u32_at(record + 24)? as usize;
                let blocks_off = record + self.u32_at(record + 28)? as usize;

                let param_count = self.u32_at(params_off)? as usize;
                let mut params = Vec::with_capacity(param_count);
                for p in 0..param_count {
                    params.push(self.u32_at(params_off + 4 + 4 * p)?);
                }

                let (name, _) = self.str_at(name_off)?;

                let path_count = self.u32_at(path_off)? as usize;
                let mut path = Vec::with_capacity(path_count);
                let mut cursor = path_off + 4;
                for _ in 0..path_count {
                    let (seg, next) = self.str_at(cursor)?;
                    path.push(seg);
                    cursor = next;
                }

                Ok(FunctionInfo::Func(FuncInfo {
                    index,
                    return_reg,
                    params,
                    name,
                    path,
                    blocks_off,
                }))
            }
            _ => Err(EvalError::InvalidExecutable("unknown function record tag")),
        }
    }

    fn parse_plans(&mut self, off: usize) -> Result<(), EvalError> {
        let count = self.u32_at(off)? as usize;
        let table = off + 4;
        let base = table + 4 * count;
        for i in 0..count {
            let rel = self.u32_at(table + 4 * i)? as usize;
            let record = base + rel;
            let _len = self.u32_at(record)?;
            let name_off = record + self.u32_at(record + 4)? as usize;
            let blocks_off = record + self.u32_at(record + 8)? as usize;
            let (name, _) = self.str_at(name_off)?;
            self.plan_index.insert(name.clone(), i);
            self.plans.push(PlanInfo {
                name,
                blocks_off,
            });
        }
        Ok(())
    }
}
