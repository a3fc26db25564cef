//! Intermediate representation accepted by the compiler.
//!
//! The IR is produced by an external planner and exchanged as JSON. The
//! typed tree below mirrors that contract; statements arrive as
//! `{"type": ..., "stmt": {...}}` records and anything outside the known
//! statement set is rejected at compile time rather than silently dropped.

use serde::Deserialize;

use crate::error::CompileError;

/// A complete policy: shared static data plus plans and functions.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Shared constants.
    pub static_: Static,
    /// Named top-level executable units.
    pub plans: Vec<Plan>,
    /// Named callable units.
    pub funcs: Vec<Func>,
}

/// Constants shared by all plans and functions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Static {
    /// String pool; statements reference strings by index.
    #[serde(default)]
    pub strings: Vec<StringConst>,
    /// Builtin declarations referenced by call statements.
    #[serde(default)]
    pub builtin_funcs: Vec<BuiltinFunc>,
    /// Source file names, retained for diagnostics.
    #[serde(default)]
    pub files: Vec<StringConst>,
}

/// A pooled string constant.
#[derive(Debug, Clone, Deserialize)]
pub struct StringConst {
    /// The string value.
    pub value: String,
}

/// A declared builtin function.
#[derive(Debug, Clone, Deserialize)]
pub struct BuiltinFunc {
    /// Dotted builtin name, e.g. `object.get`.
    pub name: String,
    /// True for relation builtins that may enumerate results.
    #[serde(default)]
    pub relation: bool,
}

/// A named top-level executable unit producing a result set.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Plan name as addressed by `Eval`.
    pub name: String,
    /// Sequentially executed blocks.
    pub blocks: Vec<Block>,
}

/// A named callable unit returning a single (possibly undefined) value.
#[derive(Debug, Clone)]
pub struct Func {
    /// Compiled function name, e.g. `g0.data.example.allow`.
    pub name: String,
    /// Dotted path components of the function.
    pub path: Vec<String>,
    /// Locals receiving the call arguments.
    pub params: Vec<u32>,
    /// Local holding the return value.
    pub return_: u32,
    /// Function body.
    pub blocks: Vec<Block>,
}

/// A sequence of statements executed in order.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Statements in source order.
    pub stmts: Vec<Stmt>,
}

/// A statement operand: a register, a boolean constant, or a string-pool
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Operand {
    /// Register index.
    Local(u32),
    /// Boolean constant.
    Bool(bool),
    /// String-pool index.
    StringIndex(u32),
}

/// The statement set understood by the compiler.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Append a value to an array local.
    ArrayAppend {
        /// Target array local.
        array: u32,
        /// Appended value.
        value: Operand,
    },
    /// Assign an integer constant.
    AssignInt {
        /// Constant value.
        value: i64,
        /// Target local.
        target: u32,
    },
    /// Copy an operand into a local.
    AssignVar {
        /// Source operand.
        source: Operand,
        /// Target local.
        target: u32,
    },
    /// Copy an operand into a local; conflicting re-assignment is fatal.
    AssignVarOnce {
        /// Source operand.
        source: Operand,
        /// Target local.
        target: u32,
    },
    /// Execute nested blocks in order.
    Block {
        /// Nested blocks.
        blocks: Vec<Block>,
    },
    /// Unwind `index + 1` enclosing frames.
    Break {
        /// Number of extra frames to unwind.
        index: u32,
    },
    /// Invoke a function or builtin by name.
    Call {
        /// Compiled function or builtin name.
        func: String,
        /// Argument operands.
        args: Vec<Operand>,
        /// Local receiving the result.
        result: u32,
    },
    /// Invoke a function whose name is assembled at runtime.
    CallDynamic {
        /// Argument operands.
        args: Vec<Operand>,
        /// Operand path forming the dotted callee name.
        path: Vec<Operand>,
        /// Local receiving the result.
        result: u32,
    },
    /// Single-step subscription.
    Dot {
        /// Collection operand.
        source: Operand,
        /// Key operand.
        key: Operand,
        /// Local receiving the element.
        target: u32,
    },
    /// Guard: succeed iff both operands are defined and equal.
    Equal {
        /// Left operand.
        a: Operand,
        /// Right operand.
        b: Operand,
    },
    /// Guard on the array variant.
    IsArray {
        /// Checked operand.
        source: Operand,
    },
    /// Guard: succeed iff the local is defined.
    IsDefined {
        /// Checked local.
        source: u32,
    },
    /// Guard on the object variant.
    IsObject {
        /// Checked operand.
        source: Operand,
    },
    /// Guard: succeed iff the local is undefined.
    IsUndefined {
        /// Checked local.
        source: u32,
    },
    /// Collection length.
    Len {
        /// Collection operand.
        source: Operand,
        /// Local receiving the length.
        target: u32,
    },
    /// Allocate an array with capacity.
    MakeArray {
        /// Preallocated capacity.
        capacity: i32,
        /// Target local.
        target: u32,
    },
    /// Assign null.
    MakeNull {
        /// Target local.
        target: u32,
    },
    /// Assign an integer.
    MakeNumberInt {
        /// Constant value.
        value: i64,
        /// Target local.
        target: u32,
    },
    /// Assign a number lexed into the string pool.
    MakeNumberRef {
        /// String-pool index of the decimal text.
        index: u32,
        /// Target local.
        target: u32,
    },
    /// Allocate an empty object.
    MakeObject {
        /// Target local.
        target: u32,
    },
    /// Allocate an empty set.
    MakeSet {
        /// Target local.
        target: u32,
    },
    /// No operation.
    Nop,
    /// Succeed iff the nested block produces no result.
    Not {
        /// Negated block.
        block: Block,
    },
    /// Guard: succeed iff both operands are defined and unequal.
    NotEqual {
        /// Left operand.
        a: Operand,
        /// Right operand.
        b: Operand,
    },
    /// Insert into an object, replacing an equal key.
    ObjectInsert {
        /// Key operand.
        key: Operand,
        /// Value operand.
        value: Operand,
        /// Target object local.
        object: u32,
    },
    /// Insert into an object; a conflicting existing value is fatal.
    ObjectInsertOnce {
        /// Key operand.
        key: Operand,
        /// Value operand.
        value: Operand,
        /// Target object local.
        object: u32,
    },
    /// Deep-merge two object locals.
    ObjectMerge {
        /// Base object local.
        a: u32,
        /// Overlay object local.
        b: u32,
        /// Target local.
        target: u32,
    },
    /// Reset a local to undefined.
    ResetLocal {
        /// Target local.
        target: u32,
    },
    /// Add a local's value to the plan result set.
    ResultSetAdd {
        /// Source local.
        value: u32,
    },
    /// Select the function return register.
    ReturnLocal {
        /// Source local.
        source: u32,
    },
    /// Iterate a collection, binding key/value per element.
    Scan {
        /// Collection local.
        source: u32,
        /// Key binding local.
        key: u32,
        /// Value binding local.
        value: u32,
        /// Per-element body.
        block: Block,
    },
    /// Insert into a set.
    SetAdd {
        /// Inserted value operand.
        value: Operand,
        /// Target set local.
        set: u32,
    },
    /// Overlay a value at a path inside a local for the body's duration.
    With {
        /// Overlaid local.
        local: u32,
        /// String-pool indexes forming the overlay path.
        path: Vec<u32>,
        /// Overlay value operand.
        value: Operand,
        /// Body run under the overlay.
        block: Block,
    },
}

// Wire-shape mirrors. The public tree stays serde-free so unknown statement
// kinds surface as a compile error instead of a serde parse error.

#[derive(Debug, Deserialize)]
struct RawPolicy {
    #[serde(rename = "static", default)]
    static_: Static,
    #[serde(default)]
    plans: RawPlans,
    #[serde(default)]
    funcs: RawFuncs,
}

#[derive(Debug, Default, Deserialize)]
struct RawPlans {
    #[serde(default)]
    plans: Vec<RawPlan>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    name: String,
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFuncs {
    #[serde(default)]
    funcs: Vec<RawFunc>,
}

#[derive(Debug, Deserialize)]
struct RawFunc {
    name: String,
    #[serde(default)]
    path: Vec<String>,
    #[serde(default)]
    params: Vec<u32>,
    #[serde(rename = "return", default)]
    return_: u32,
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBlock {
    #[serde(default)]
    stmts: Vec<RawStmt>,
}

#[derive(Debug, Deserialize)]
struct RawStmt {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    stmt: serde_json::Value,
}

impl Policy {
    /// Parse the JSON interchange form of the IR.
    pub fn from_json(src: &str) -> Result<Self, CompileError> {
        let raw: RawPolicy = serde_json::from_str(src)
            .map_err(|e| CompileError::MalformedIr(e.to_string()))?;
        raw.try_into()
    }
}

impl TryFrom<RawPolicy> for Policy {
    type Error = CompileError;

    fn try_from(raw: RawPolicy) -> Result<Self, CompileError> {
        Ok(Policy {
            static_: raw.static_,
            plans: raw
                .plans
                .plans
                .into_iter()
                .map(|p| {
                    Ok(Plan {
                        name: p.name,
                        blocks: convert_blocks(p.blocks)?,
                    })
                })
                .collect::<Result<_, CompileError>>()?,
            funcs: raw
                .funcs
                .funcs
                .into_iter()
                .map(|f| {
                    Ok(Func {
                        name: f.name,
                        path: f.path,
                        params: f.params,
                        return_: f.return_,
                        blocks: convert_blocks(f.blocks)?,
                    })
                })
                .collect::<Result<_, CompileError>>()?,
        })
    }
}

fn convert_blocks(raw: Vec<RawBlock>) -> Result<Vec<Block>, CompileError> {
    raw.into_iter().map(convert_block).collect()
}

fn convert_block(raw: RawBlock) -> Result<Block, CompileError> {
    Ok(Block {
        stmts: raw
            .stmts
            .into_iter()
            .map(convert_stmt)
            .collect::<Result<_, CompileError>>()?,
    })
}

fn field<T: serde::de::DeserializeOwned>(raw: serde_json::Value) -> Result<T, CompileError> {
    serde_json::from_value(raw).map_err(|e| CompileError::MalformedIr(e.to_string()))
}

fn convert_stmt(raw: RawStmt) -> Result<Stmt, CompileError> {
    macro_rules! fields {
        ($ty:ty) => {
            field::<$ty>(raw.stmt)?
        };
    }

    #[derive(Deserialize)]
    struct ArrayAppendF {
        array: u32,
        value: Operand,
    }
    #[derive(Deserialize)]
    struct AssignIntF {
        value: i64,
        target: u32,
    }
    #[derive(Deserialize)]
    struct AssignVarF {
        source: Operand,
        target: u32,
    }
    #[derive(Deserialize)]
    struct BlockF {
        #[serde(default)]
        blocks: Vec<RawBlock>,
    }
    #[derive(Deserialize)]
    struct BreakF {
        #[serde(default)]
        index: u32,
    }
    #[derive(Deserialize)]
    struct CallF {
        func: String,
        #[serde(default)]
        args: Vec<Operand>,
        result: u32,
    }
    #[derive(Deserialize)]
    struct CallDynamicF {
        #[serde(default)]
        args: Vec<Operand>,
        #[serde(default)]
        path: Vec<Operand>,
        result: u32,
    }
    #[derive(Deserialize)]
    struct DotF {
        source: Operand,
        key: Operand,
        target: u32,
    }
    #[derive(Deserialize)]
    struct PairF {
        a: Operand,
        b: Operand,
    }
    #[derive(Deserialize)]
    struct SourceOperandF {
        source: Operand,
    }
    #[derive(Deserialize)]
    struct SourceLocalF {
        source: u32,
    }
    #[derive(Deserialize)]
    struct LenF {
        source: Operand,
        target: u32,
    }
    #[derive(Deserialize)]
    struct MakeArrayF {
        #[serde(default)]
        capacity: i32,
        target: u32,
    }
    #[derive(Deserialize)]
    struct TargetF {
        target: u32,
    }
    #[derive(Deserialize)]
    struct MakeNumberRefF {
        index: u32,
        target: u32,
    }
    #[derive(Deserialize)]
    struct NotF {
        block: RawBlock,
    }
    #[derive(Deserialize)]
    struct ObjectInsertF {
        key: Operand,
        value: Operand,
        object: u32,
    }
    #[derive(Deserialize)]
    struct ObjectMergeF {
        a: u32,
        b: u32,
        target: u32,
    }
    #[derive(Deserialize)]
    struct ResultSetAddF {
        value: u32,
    }
    #[derive(Deserialize)]
    struct ScanF {
        source: u32,
        key: u32,
        value: u32,
        block: RawBlock,
    }
    #[derive(Deserialize)]
    struct SetAddF {
        value: Operand,
        set: u32,
    }
    #[derive(Deserialize)]
    struct WithF {
        local: u32,
        #[serde(default)]
        path: Vec<u32>,
        value: Operand,
        block: RawBlock,
    }

    Ok(match raw.type_.as_str() {
        "ArrayAppendStmt" => {
            let f = fields!(ArrayAppendF);
            Stmt::ArrayAppend {
                array: f.array,
                value: f.value,
            }
        }
        "AssignIntStmt" => {
            let f = fields!(AssignIntF);
            Stmt::AssignInt {
                value: f.value,
                target: f.target,
            }
        }
        "AssignVarStmt" => {
            let f = fields!(AssignVarF);
            Stmt::AssignVar {
                source: f.source,
                target: f.target,
            }
        }
        "AssignVarOnceStmt" => {
            let f = fields!(AssignVarF);
            Stmt::AssignVarOnce {
                source: f.source,
                target: f.target,
            }
        }
        "BlockStmt" => {
            let f = fields!(BlockF);
            Stmt::Block {
                blocks: convert_blocks(f.blocks)?,
            }
        }
        "BreakStmt" => {
            let f = fields!(BreakF);
            Stmt::Break {
                index: f.index,
            }
        }
        "CallStmt" => {
            let f = fields!(CallF);
            Stmt::Call {
                func: f.func,
                args: f.args,
                result: f.result,
            }
        }
        "CallDynamicStmt" => {
            let f = fields!(CallDynamicF);
            Stmt::CallDynamic {
                args: f.args,
                path: f.path,
                result: f.result,
            }
        }
        "DotStmt" => {
            let f = fields!(DotF);
            Stmt::Dot {
                source: f.source,
                key: f.key,
                target: f.target,
            }
        }
        "EqualStmt" => {
            let f = fields!(PairF);
            Stmt::Equal {
                a: f.a,
                b: f.b,
            }
        }
        "IsArrayStmt" => {
            let f = fields!(SourceOperandF);
            Stmt::IsArray {
                source: f.source,
            }
        }
        "IsDefinedStmt" => {
            let f = fields!(SourceLocalF);
            Stmt::IsDefined {
                source: f.source,
            }
        }
        "IsObjectStmt" => {
            let f = fields!(SourceOperandF);
            Stmt::IsObject {
                source: f.source,
            }
        }
        "IsUndefinedStmt" => {
            let f = fields!(SourceLocalF);
            Stmt::IsUndefined {
                source: f.source,
            }
        }
        "LenStmt" => {
            let f = fields!(LenF);
            Stmt::Len {
                source: f.source,
                target: f.target,
            }
        }
        "MakeArrayStmt" => {
            let f = fields!(MakeArrayF);
            Stmt::MakeArray {
                capacity: f.capacity,
                target: f.target,
            }
        }
        "MakeNullStmt" => {
            let f = fields!(TargetF);
            Stmt::MakeNull {
                target: f.target,
            }
        }
        "MakeNumberIntStmt" => {
            let f = fields!(AssignIntF);
            Stmt::MakeNumberInt {
                value: f.value,
                target: f.target,
            }
        }
        "MakeNumberRefStmt" => {
            let f = fields!(MakeNumberRefF);
            Stmt::MakeNumberRef {
                index: f.index,
                target: f.target,
            }
        }
        "MakeObjectStmt" => {
            let f = fields!(TargetF);
            Stmt::MakeObject {
                target: f.target,
            }
        }
        "MakeSetStmt" => {
            let f = fields!(TargetF);
            Stmt::MakeSet {
                target: f.target,
            }
        }
        "NopStmt" => Stmt::Nop,
        "NotStmt" => {
            let f = fields!(NotF);
            Stmt::Not {
                block: convert_block(f.block)?,
            }
        }
        "NotEqualStmt" => {
            let f = fields!(PairF);
            Stmt::NotEqual {
                a: f.a,
                b: f.b,
            }
        }
        "ObjectInsertStmt" => {
            let f = fields!(ObjectInsertF);
            Stmt::ObjectInsert {
                key: f.key,
                value: f.value,
                object: f.object,
            }
        }
        "ObjectInsertOnceStmt" => {
            let f = fields!(ObjectInsertF);
            Stmt::ObjectInsertOnce {
                key: f.key,
                value: f.value,
                object: f.object,
            }
        }
        "ObjectMergeStmt" => {
            let f = fields!(ObjectMergeF);
            Stmt::ObjectMerge {
                a: f.a,
                b: f.b,
                target: f.target,
            }
        }
        "ResetLocalStmt" => {
            let f = fields!(TargetF);
            Stmt::ResetLocal {
                target: f.target,
            }
        }
        "ResultSetAddStmt" => {
            let f = fields!(ResultSetAddF);
            Stmt::ResultSetAdd {
                value: f.value,
            }
        }
        "ReturnLocalStmt" => {
            let f = fields!(SourceLocalF);
            Stmt::ReturnLocal {
                source: f.source,
            }
        }
        "ScanStmt" => {
            let f = fields!(ScanF);
            Stmt::Scan {
                source: f.source,
                key: f.key,
                value: f.value,
                block: convert_block(f.block)?,
            }
        }
        "SetAddStmt" => {
            let f = fields!(SetAddF);
            Stmt::SetAdd {
                value: f.value,
                set: f.set,
            }
        }
        "WithStmt" => {
            let f = fields!(WithF);
            Stmt::With {
                local: f.local,
                path: f.path,
                value: f.value,
                block: convert_block(f.block)?,
            }
        }
        other => return Err(CompileError::UnsupportedStatement(other.to_string())),
    })
}
