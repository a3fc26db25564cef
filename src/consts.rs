//! Constants shared across the VM, bytecode format and compiler.

/// Magic bytes at the start of every executable.
pub const MAGIC: [u8; 4] = *b"rego";

/// Bytecode format version understood by this implementation.
pub const VERSION: u32 = 0;

/// Size of the fixed executable header in bytes: magic, version, total
/// length, and the three section offsets.
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 3 * 4;

/// Number of register slots per page.
pub const PAGE_SIZE: usize = 32;

/// Local holding the input document.
pub const LOCAL_INPUT: u32 = 0;

/// Local holding the data document.
pub const LOCAL_DATA: u32 = 1;

/// Scratch local receiving builtin results.
pub const LOCAL_UNUSED: u32 = 2;

/// Default instruction limit for an evaluation.
pub const DEFAULT_INSTRUCTION_LIMIT: u64 = 100_000_000;

/// Default TTL applied when the eval cache config omits one.
pub const DEFAULT_EVAL_CACHE_TTL_SECS: u64 = 10;

/// Compact set representations hold at most this many entries before
/// switching to hash buckets.
pub const SET_COMPACT_MAX: usize = 16;

/// Capacity of the process-wide compiled glob pattern cache.
pub const GLOB_CACHE_CAPACITY: usize = 100;

/// Return-slot value marking an undefined function result.
pub const RETURN_UNDEFINED: i32 = -1;
