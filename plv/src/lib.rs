use core::{Chunk, OpCode};

/// Opcodes that carry a 1- or 2-byte operand immediately after themselves.
/// Everything not listed here is a bare, zero-operand instruction.
fn operand_width(op: OpCode) -> usize {
    match op {
        OpCode::Constant | OpCode::Store | OpCode::Load | OpCode::Del | OpCode::Create => 1,
        OpCode::ConstantLong
        | OpCode::StoreLong
        | OpCode::LoadLong
        | OpCode::DelLong
        | OpCode::CreateLong
        | OpCode::Jump
        | OpCode::JumpIfFalse => 2,
        _ => 0,
    }
}

fn is_constant_op(op: OpCode) -> bool {
    matches!(op, OpCode::Constant | OpCode::ConstantLong)
}

fn is_name_op(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Store | OpCode::StoreLong | OpCode::Load | OpCode::LoadLong | OpCode::Del | OpCode::DelLong | OpCode::Create | OpCode::CreateLong
    )
}

fn is_jump_op(op: OpCode) -> bool {
    matches!(op, OpCode::Jump | OpCode::JumpIfFalse)
}

/// Writes a human-readable disassembly of `chunk` to stderr: one line per
/// instruction, showing its offset, source line (blank when it repeats the
/// line above, matching the reference disassembler's run-length display),
/// the opcode's hex byte and name, and -- for instructions that carry one --
/// the decoded operand.
///
/// Disassembly is diagnostic output, so it always goes to stderr, never
/// stdout (the latter is reserved for the program's own `Print`/`PrintLn`).
pub fn disassemble(chunk: &Chunk, name: &str) {
    eprintln!("==== {} ====", name);
    let mut last_line: Option<usize> = None;
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset, &mut last_line);
    }
}

/// Disassembles exactly one instruction starting at `offset`, returning the
/// offset of the instruction that follows it. Used directly by `plv` and by
/// tests that want to inspect a single instruction without a full listing.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize, last_line: &mut Option<usize>) -> usize {
    eprint!("\x1b[2m{:>04}\x1b[0m ", offset);

    let line = chunk.read_line(offset);
    match line {
        Some(l) if *last_line == Some(l) => eprint!("   | "),
        Some(l) => {
            eprint!("{:>4} ", l);
            *last_line = Some(l);
        }
        None => eprint!("   ? "),
    }

    let byte = chunk.read(offset);
    let op = match OpCode::from_byte(byte) {
        Some(op) => op,
        None => {
            eprintln!("\x1b[31mUnknown opcode {:#04x}\x1b[0m", byte);
            return offset + 1;
        }
    };

    eprint!("\x1b[32m{:#04x}\x1b[0m \x1b[36m{:?}\x1b[0m", byte, op);

    let width = operand_width(op);
    let operand_offset = offset + 1;
    if width == 0 {
        eprintln!();
        return offset + 1;
    }

    let index = if width == 1 {
        chunk.read(operand_offset) as u16
    } else {
        chunk.read_long(operand_offset)
    };

    if is_constant_op(op) || is_name_op(op) {
        eprintln!("  {:<5} -> {}", index, chunk.read_constant(index));
    } else if is_jump_op(op) {
        let displacement = index as i16;
        let target = (operand_offset as i64 + width as i64 + displacement as i64) as usize;
        eprintln!("  {:<5} -> offset {}", displacement, target);
    } else {
        eprintln!("  {}", index);
    }

    offset + 1 + width
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::Value;

    #[test]
    fn single_instruction_advances_past_its_operand() {
        let mut chunk = Chunk::new();
        chunk.add_constant(Value::from(1i64), 1, OpCode::Constant, OpCode::ConstantLong);
        let mut last_line = None;
        let next = disassemble_instruction(&chunk, 0, &mut last_line);
        assert_eq!(next, 2);
    }

    #[test]
    fn long_form_instruction_advances_past_two_byte_operand() {
        let mut chunk = Chunk::new();
        for i in 0..257 {
            chunk.add_constant(Value::from(i as i64), 1, OpCode::Constant, OpCode::ConstantLong);
        }
        let mut last_line = None;
        let mut offset = 0;
        let mut last_width = 0;
        while offset < chunk.len() {
            let next = disassemble_instruction(&chunk, offset, &mut last_line);
            last_width = next - offset;
            offset = next;
        }
        assert_eq!(last_width, 3);
    }

    #[test]
    fn bare_opcode_advances_by_one() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Add, 1);
        let mut last_line = None;
        assert_eq!(disassemble_instruction(&chunk, 0, &mut last_line), 1);
    }
}
