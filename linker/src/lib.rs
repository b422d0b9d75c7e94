use hashbrown::HashMap;

use core::{Chunk, LinkError, Value, ENTRY_SYMBOL};

/// Supplies synthetic chunks for builtin symbols on demand -- the seam an
/// embedder (e.g. a graphics/input binding) plugs into. The default
/// provider, [`NoBuiltins`], installs nothing; this crate defines no
/// concrete builtin opcodes or symbol names.
pub trait BuiltinProvider {
    /// Returns a one- or two-instruction chunk for `name`, or `None` if this
    /// provider doesn't recognize it.
    fn resolve(&self, name: &str) -> Option<Chunk>;
}

/// The provider used when an embedder doesn't supply one.
pub struct NoBuiltins;

impl BuiltinProvider for NoBuiltins {
    fn resolve(&self, _name: &str) -> Option<Chunk> {
        None
    }
}

const CONSTANT_TAG: &str = "!constant";

/// Concatenates a compiled symbol table into a single runnable chunk.
///
/// `!main`'s bytes go first (so execution starts at offset 0 without a
/// prelude jump), then every other symbol in iteration order, recording each
/// symbol's start offset. A second pass over the merged chunk's metadata then
/// resolves every `!constant` tag into the merged constants pool and every
/// call-site jump operand into a signed displacement to its target symbol.
pub fn link(symbols: HashMap<String, Chunk>, builtins: &dyn BuiltinProvider) -> Result<Chunk, LinkError> {
    let mut symbols = symbols;
    let main = symbols.remove(ENTRY_SYMBOL).unwrap_or_default();

    let mut output = Chunk::new();
    let mut locs: HashMap<String, usize> = HashMap::new();
    locs.insert(ENTRY_SYMBOL.to_string(), 0);
    append(&mut output, &main, 0);

    for (name, chunk) in symbols {
        let base = output.len();
        locs.insert(name, base);
        append(&mut output, &chunk, base);
    }

    resolve_metadata(&mut output, &mut locs, builtins)?;
    Ok(output)
}

/// Copies `chunk`'s bytes, line table, and metadata (offsets shifted by
/// `base`) onto the end of `output`.
fn append(output: &mut Chunk, chunk: &Chunk, base: usize) {
    for offset in 0..chunk.len() {
        let line = chunk.read_line(offset).unwrap_or(0);
        output.write(chunk.read(offset), line);
    }
    for (offset, value) in chunk.meta_entries() {
        output.add_meta(base + offset, value.clone());
    }
}

/// Second pass: walks every metadata entry in ascending offset order,
/// resolving `!constant` tags and call-site symbol references in place.
fn resolve_metadata(
    output: &mut Chunk,
    locs: &mut HashMap<String, usize>,
    builtins: &dyn BuiltinProvider,
) -> Result<(), LinkError> {
    let mut offsets: Vec<usize> = output.meta_entries().map(|(offset, _)| offset).collect();
    offsets.sort_unstable();

    let mut i = 0;
    while i < offsets.len() {
        let offset = offsets[i];
        let tag = output.get_meta(offset).cloned();
        match tag {
            Some(Value::Str(s)) if s == CONSTANT_TAG => {
                let operand_offset = offset + 1;
                if let Some(value) = output.get_meta(operand_offset).cloned() {
                    output.modify_constant(operand_offset, value);
                }
                // Advance past the two-byte operand this tag described.
                while i < offsets.len() && offsets[i] <= operand_offset {
                    i += 1;
                }
            }
            Some(Value::Str(name)) => {
                resolve_call_site(output, locs, builtins, offset, &name)?;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }
    Ok(())
}

fn resolve_call_site(
    output: &mut Chunk,
    locs: &mut HashMap<String, usize>,
    builtins: &dyn BuiltinProvider,
    offset: usize,
    name: &str,
) -> Result<(), LinkError> {
    if let Some(&target) = locs.get(name) {
        patch_displacement(output, offset, target);
        return Ok(());
    }

    match builtins.resolve(name) {
        Some(builtin_chunk) => {
            if locs.contains_key(name) {
                return Err(LinkError::SymbolCollision(name.to_string()));
            }
            let base = output.len();
            locs.insert(name.to_string(), base);
            append(output, &builtin_chunk, base);
            patch_displacement(output, offset, base);
            Ok(())
        }
        None => Err(LinkError::Undefined(name.to_string())),
    }
}

fn patch_displacement(output: &mut Chunk, operand_offset: usize, target: usize) {
    let displacement = target as i64 - operand_offset as i64 - 2;
    output.modify_long(operand_offset, displacement as u16);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::OpCode;

    fn main_only(mut chunk: Chunk) -> HashMap<String, Chunk> {
        let mut table = HashMap::new();
        chunk.write_op(OpCode::Return, 1);
        table.insert(ENTRY_SYMBOL.to_string(), chunk);
        table
    }

    #[test]
    fn links_a_bare_main_symbol() {
        let table = main_only(Chunk::new());
        let linked = link(table, &NoBuiltins).unwrap();
        assert_eq!(linked.read(0), OpCode::Return.to_byte());
    }

    #[test]
    fn resolves_a_constant_tag_into_the_merged_pool() {
        let mut chunk = Chunk::new();
        let opcode_offset = chunk.write_op(OpCode::ConstantLong, 1);
        let operand_offset = chunk.write_long(0, 1);
        chunk.add_meta(opcode_offset, Value::from("!constant"));
        chunk.add_meta(operand_offset, Value::from(42i64));

        let linked = link(main_only(chunk), &NoBuiltins).unwrap();
        let index = linked.read_long(operand_offset);
        assert_eq!(linked.read_constant(index), Value::from(42i64));
    }

    #[test]
    fn resolves_a_call_site_to_a_later_symbol() {
        let mut main = Chunk::new();
        main.write_op(OpCode::PushJumpAddress, 1);
        let jump_offset = main.write_op(OpCode::Jump, 1);
        let operand_offset = main.write_long(0xFFFF, 1);
        main.add_meta(operand_offset, Value::from("greet"));

        let mut greet = Chunk::new();
        greet.write_op(OpCode::JumpToCallStackAddress, 2);

        let mut table = main_only(main);
        table.insert("greet".to_string(), greet);

        let linked = link(table, &NoBuiltins).unwrap();
        let displacement = linked.read_long(operand_offset) as i16;
        let target = (jump_offset as i64 + 1 + 2 + displacement as i64) as usize;
        assert_eq!(linked.read(target), OpCode::JumpToCallStackAddress.to_byte());
    }

    #[test]
    fn undefined_call_site_is_a_link_error() {
        let mut main = Chunk::new();
        main.write_op(OpCode::PushJumpAddress, 1);
        let operand_offset = main.write_long(0xFFFF, 1);
        main.add_meta(operand_offset, Value::from("nope"));

        let err = link(main_only(main), &NoBuiltins).unwrap_err();
        assert_eq!(err, LinkError::Undefined("nope".to_string()));
    }
}
