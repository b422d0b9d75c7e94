pub mod bytecode;
pub mod chunk;
pub mod errors;
pub mod tokens;
pub mod values;

pub use bytecode::OpCode;
pub use chunk::Chunk;
pub use errors::{Diagnostic, InterpretResult, LinkError, RuntimeFault, TraceFrame};
pub use tokens::{Token, TokenKind};
pub use values::Value;

/// Fixed capacity of the virtual machine's operand stack.
pub const STACK_MAX: usize = 512;

/// The reserved entry-point symbol every compiled program links under.
/// Names beginning with `!` are reserved for compiler-generated scratch
/// (e.g. `!<counter>` for a counted loop's upper-bound slot).
pub const ENTRY_SYMBOL: &str = "!main";
