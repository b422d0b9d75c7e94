use num_derive::{FromPrimitive, ToPrimitive};

/// The set of instructions supported by the virtual machine.
///
/// **NOTE:** Changing the order in which members are declared creates
/// incompatibilities between chunks compiled by different versions of the
/// toolchain -- bytecode is never persisted to disk in this implementation,
/// but the linker and disassembler both decode raw bytes back into `OpCode`
/// via `FromPrimitive`, so the declaration order here doubles as the binary
/// encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum OpCode {
    // -- Literals / constants pool (one operand: 1 or 2 bytes) --
    Constant,
    ConstantLong,

    // -- Arithmetic / comparison / logical (zero operands) --
    Add,
    Subtract,
    Multiply,
    Divide,
    Exponent,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Equal,
    NotEqual,
    LogicalAnd,
    LogicalOr,
    LogicalNot,
    Negate,

    // -- Conversions (zero operands) --
    AsDouble,
    AsLong,
    AsString,

    // -- Stack manipulation (zero operands) --
    Duplicate,
    Pop,

    // -- Output (zero operands) --
    Print,
    PrintLn,
    Trace,
    ShowTraceLog,
    ClearTraceLog,

    // -- Globals (one operand: 1 or 2 byte string-constant index) --
    Store,
    StoreLong,
    Load,
    LoadLong,
    Del,
    DelLong,
    Create,
    CreateLong,

    // -- Control flow --
    /// Unconditional relative jump. Operand: signed 16-bit displacement.
    Jump,
    /// Pops a bool; jumps if false. Operand: signed 16-bit displacement.
    JumpIfFalse,
    /// No-op marker emitted at the head of a `while` loop for disassembly.
    None,

    // -- Function calls (zero operands; the call target is baked into the
    //    following `Jump`'s operand by the linker) --
    PushJumpAddress,
    JumpToCallStackAddress,

    /// Halts execution with an Ok result.
    Return,
}

impl OpCode {
    /// Decodes a raw opcode byte. Returns `None` for bytes that don't name a
    /// known instruction -- this can only happen if the chunk was hand
    /// assembled incorrectly, since the compiler and linker never emit an
    /// unrecognized byte in an opcode position.
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        num_traits::FromPrimitive::from_u8(byte)
    }

    pub fn to_byte(self) -> u8 {
        num_traits::ToPrimitive::to_u8(&self).expect("OpCode always fits in a byte")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_byte() {
        for op in [OpCode::Constant, OpCode::Jump, OpCode::Return, OpCode::JumpToCallStackAddress] {
            assert_eq!(OpCode::from_byte(op.to_byte()), Some(op));
        }
    }

    #[test]
    fn unknown_byte_decodes_to_none() {
        assert_eq!(OpCode::from_byte(255), None);
    }
}
