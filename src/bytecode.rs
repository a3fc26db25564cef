//! The self-describing executable format.
//!
//! An executable is one contiguous big-endian buffer the VM runs directly.
//!
//! ```text
//! header    magic "rego" | version u32 | total length u32
//!           | strings off u32 | functions off u32 | plans off u32
//!           (section offsets are relative to the end of the header)
//! strings   count u32 | offset table u32×count | (len u32 | bytes)×count
//!           (entry offsets are relative to the end of the offset table)
//! functions count u32 | offset table u32×count | records
//!   builtin  [specialized prefix u32, high bit set]
//!            len u32 | tag 0 u32 | relation u8 | name (len u32 | bytes)
//!   function len u32 | tag 1 u32 | index i32 | return u32
//!            | offset index u32×4 (params, name, path, blocks,
//!              relative to the record start)
//!            | params: count u32 | locals u32×count
//!            | name: len u32 | bytes
//!            | path: count u32 | (len u32 | bytes)×count
//!            | blocks record
//! plans     count u32 | offset table u32×count | records
//!   plan     len u32 | offset index u32×2 (name, blocks) | name | blocks
//! blocks    count u32 | block×count
//! block     len u32 | statement count u32 | statements
//! statement len u32 | opcode tag u32 | payload words
//! ```
//!
//! Statement payloads are sequences of `u32` words — encoded operands,
//! register indexes and counts — except the two integer-constant statements
//! which embed a big-endian `i64`. Nested blocks (`block`, `not`, `scan`,
//! `with`) embed complete block records in the payload.

pub mod executable;
pub mod opcode;
pub mod operand;
pub mod writer;

pub use executable::{BuiltinInfo, Executable, FuncInfo, FunctionInfo, PlanInfo};
pub use opcode::Opcode;
pub use operand::Operand;
pub use writer::Writer;
