//! Stable statement opcode tags.

/// Statement opcode, stored as a `u32` tag at offset 4 of every encoded
/// statement. Tags are part of the wire contract and never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u32)]
pub enum Opcode {
    /// Append to an array local.
    ArrayAppend = 0,
    /// Assign an integer constant.
    AssignInt = 1,
    /// Copy an operand into a local.
    AssignVar = 2,
    /// Copy with conflict detection.
    AssignVarOnce = 3,
    /// Nested block sequence.
    Block = 4,
    /// Unwind enclosing frames.
    Break = 5,
    /// Static function or builtin call.
    Call = 6,
    /// Dynamically resolved call.
    CallDynamic = 7,
    /// Single-step subscription.
    Dot = 8,
    /// Equality guard.
    Equal = 9,
    /// Array variant guard.
    IsArray = 10,
    /// Definedness guard.
    IsDefined = 11,
    /// Object variant guard.
    IsObject = 12,
    /// Undefinedness guard.
    IsUndefined = 13,
    /// Collection length.
    Len = 14,
    /// Array allocation.
    MakeArray = 15,
    /// Null assignment.
    MakeNull = 16,
    /// Integer assignment.
    MakeNumberInt = 17,
    /// Pooled-text number assignment.
    MakeNumberRef = 18,
    /// Object allocation.
    MakeObject = 19,
    /// Set allocation.
    MakeSet = 20,
    /// No operation.
    Nop = 21,
    /// Negation block.
    Not = 22,
    /// Inequality guard.
    NotEqual = 23,
    /// Object insert, replacing.
    ObjectInsert = 24,
    /// Object insert with conflict detection.
    ObjectInsertOnce = 25,
    /// Deep object merge.
    ObjectMerge = 26,
    /// Reset a local to undefined.
    ResetLocal = 27,
    /// Add to the plan result set.
    ResultSetAdd = 28,
    /// Select the return register.
    ReturnLocal = 29,
    /// Collection iteration.
    Scan = 30,
    /// Set insertion.
    SetAdd = 31,
    /// Scoped value overlay.
    With = 32,
}

impl Opcode {
    /// Wire tag of the opcode.
    pub const fn tag(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Opcode {
    type Error = u32;

    fn try_from(tag: u32) -> Result<Self, u32> {
        use Opcode::*;
        Ok(match tag {
            0 => ArrayAppend,
            1 => AssignInt,
            2 => AssignVar,
            3 => AssignVarOnce,
            4 => Block,
            5 => Break,
            6 => Call,
            7 => CallDynamic,
            8 => Dot,
            9 => Equal,
            10 => IsArray,
            11 => IsDefined,
            12 => IsObject,
            13 => IsUndefined,
            14 => Len,
            15 => MakeArray,
            16 => MakeNull,
            17 => MakeNumberInt,
            18 => MakeNumberRef,
            19 => MakeObject,
            20 => MakeSet,
            21 => Nop,
            22 => Not,
            23 => NotEqual,
            24 => ObjectInsert,
            25 => ObjectInsertOnce,
            26 => ObjectMerge,
            27 => ResetLocal,
            28 => ResultSetAdd,
            29 => ReturnLocal,
            30 => Scan,
            31 => SetAdd,
            32 => With,
            other => return Err(other),
        })
    }
}
