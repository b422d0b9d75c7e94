use hashbrown::HashMap;

use core::{Chunk, Diagnostic, OpCode, Token, TokenKind, Value, ENTRY_SYMBOL};
use lexer::Lexer;

/// One chunk per declared symbol, entry point under [`core::ENTRY_SYMBOL`].
pub type SymbolTable = HashMap<String, Chunk>;

/// Single-pass compiler: tokens in, a table of per-symbol chunks out.
///
/// Holds exactly three tokens at a time -- `previous` (just consumed),
/// `current`, and `next` -- which is as far as any grammar production here
/// needs to look.
///
/// A counted loop's header (`name ++ <upper-bound expr> do ... loop`) is not
/// resolved by lookahead: `name ++` emits its `Create` immediately and
/// records `name` as `pending_loop`, then the upper-bound expression that
/// follows is compiled exactly like any other instruction. Reaching a bare
/// `do` token with a `pending_loop` set is what turns it into a counted
/// loop's terminator; a `do` with no pending loop is an error.
struct Compiler<'a> {
    lexer: Lexer<'a>,
    previous: Token,
    current: Token,
    next: Token,
    had_error: bool,
    diagnostics: Vec<Diagnostic>,
    symbols: SymbolTable,
    current_symbol: String,
    pending_loop: Option<(String, usize)>,
}

/// Compiles `source` into a symbol table, or the diagnostics collected along
/// the way if any instruction failed to compile. Compilation does not stop
/// at the first error -- it keeps going so a caller (or a test) can see as
/// many diagnostics as possible in one pass.
pub fn compile(source: &str) -> Result<SymbolTable, Vec<Diagnostic>> {
    let mut compiler = Compiler::new(source);
    compiler.run();
    if compiler.had_error {
        Err(compiler.diagnostics)
    } else {
        Ok(compiler.symbols)
    }
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str) -> Self {
        let lexer = Lexer::new(source);
        let mut symbols = SymbolTable::new();
        symbols.insert(ENTRY_SYMBOL.to_string(), Chunk::new());

        let mut compiler = Compiler {
            current: Token::default(),
            next: Token::default(),
            previous: Token::default(),
            lexer,
            had_error: false,
            diagnostics: Vec::new(),
            symbols,
            current_symbol: ENTRY_SYMBOL.to_string(),
            pending_loop: None,
        };
        // Prime the two-token lookahead window.
        compiler.current = compiler.pump();
        compiler.next = compiler.pump();
        compiler
    }

    /// Pulls the next non-error token out of the lexer, reporting (and
    /// skipping past) any scanner `Error` tokens along the way.
    fn pump(&mut self) -> Token {
        loop {
            let tok = self.lexer.next_token();
            if tok.kind == TokenKind::Error {
                self.had_error = true;
                let message = tok.lexeme.clone();
                self.diagnostics.push(Diagnostic::new(tok.line, None, message));
                eprintln!("{}", self.diagnostics.last().unwrap());
                continue;
            }
            return tok;
        }
    }

    fn advance(&mut self) {
        let fresh = self.pump();
        self.previous = std::mem::replace(&mut self.current, std::mem::replace(&mut self.next, fresh));
    }

    fn error_at(&mut self, token: &Token, message: impl Into<String>) {
        self.had_error = true;
        let at = if token.kind == TokenKind::Error {
            None
        } else {
            Some(token.lexeme.clone())
        };
        self.diagnostics.push(Diagnostic::new(token.line, at, message));
        eprintln!("{}", self.diagnostics.last().unwrap());
    }

    fn error_at_current(&mut self, message: impl Into<String>) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        self.symbols.entry(self.current_symbol.clone()).or_insert_with(Chunk::new)
    }

    fn current_chunk_len(&mut self) -> usize {
        self.current_chunk_mut().len()
    }

    /// Appends `value` as a long-form constant operand and tags it so the
    /// linker can remap it into the merged chunk's pool. Always emits the
    /// `*Long` opcode variant -- the per-symbol chunk's local pool index is
    /// thrown away at link time regardless, since `modify_constant` always
    /// rewrites a 2-byte operand, so a short-form 1-byte operand here would
    /// get half-overwritten.
    fn emit_constant(&mut self, value: Value, line: usize, op_long: OpCode) {
        let chunk = self.current_chunk_mut();
        let opcode_offset = chunk.write_op(op_long, line);
        let operand_offset = chunk.write_long(0, line);
        chunk.add_meta(opcode_offset, Value::from("!constant"));
        chunk.add_meta(operand_offset, value);
    }

    fn emit_variable(&mut self, op_long: OpCode, name: &str, line: usize) {
        self.emit_constant(Value::from(name), line, op_long);
    }

    fn emit_jump(&mut self, op: OpCode, line: usize) -> usize {
        let chunk = self.current_chunk_mut();
        chunk.write_op(op, line);
        chunk.write_long(0xFFFF, line)
    }

    fn patch_jump(&mut self, operand_offset: usize) {
        let chunk = self.current_chunk_mut();
        let target = chunk.len() as i64;
        let displacement = target - operand_offset as i64 - 2;
        chunk.modify_long(operand_offset, displacement as u16);
    }

    fn emit_loop(&mut self, loop_start: usize, line: usize) {
        let operand_offset = self.emit_jump(OpCode::Jump, line);
        let chunk = self.current_chunk_mut();
        let displacement = loop_start as i64 - operand_offset as i64 - 2;
        chunk.modify_long(operand_offset, displacement as u16);
    }

    fn end_symbol(&mut self, line: usize) {
        let op = if self.current_symbol == ENTRY_SYMBOL {
            OpCode::Return
        } else {
            OpCode::JumpToCallStackAddress
        };
        self.current_chunk_mut().write_op(op, line);
    }

    fn run(&mut self) {
        while self.current.kind != TokenKind::End {
            self.instruction();
        }
        let line = self.current.line;
        self.end_symbol(line);
    }

    fn instruction(&mut self) {
        use TokenKind::*;
        match self.current.kind {
            Long | Double | String | True | False => self.literal(),
            Identifier => self.identifier_instruction(),
            Load => self.variable_op(Load),
            Store => self.variable_op(Store),
            FunctionHeader => self.function_header(),
            FunctionCall => self.function_call(),
            If => self.if_instruction(),
            While => self.while_instruction(),
            Do => self.finish_counted_loop(),
            Add | Subtract | Multiply | Divide | Exponent | LessThan | LessThanEqual | GreaterThan
            | GreaterThanEqual | Equal | NotEqual | LogicalAnd | LogicalOr | LogicalNot | AsDouble | AsLong
            | AsString | Duplicate | Pop | Print | PrintLn | Trace | ShowTraceLog | ClearTraceLog => {
                self.direct_emit()
            }
            End => {}
            Loop | Else | EndIf | Error => {
                self.advance();
                let token = self.previous.clone();
                self.error_at(&token, "Unexpected token outside of its enclosing construct");
            }
            Create | Delete => {
                self.advance();
                let token = self.previous.clone();
                self.error_at(&token, "Expected an identifier before this operator");
            }
        }
    }

    fn literal(&mut self) {
        self.advance();
        let token = self.previous.clone();
        let value = match token.kind {
            TokenKind::Long => match token.lexeme.parse::<i64>() {
                Ok(v) => Value::from(v),
                Err(_) => return self.error_at(&token, "Invalid integer literal"),
            },
            TokenKind::Double => match token.lexeme.parse::<f64>() {
                Ok(v) => Value::from(v),
                Err(_) => return self.error_at(&token, "Invalid double literal"),
            },
            TokenKind::String => {
                let inner = &token.lexeme[1..token.lexeme.len() - 1];
                Value::from(inner.to_string())
            }
            TokenKind::True => Value::from(true),
            TokenKind::False => Value::from(false),
            _ => unreachable!("instruction() only dispatches literal() for literal kinds"),
        };
        self.emit_constant(value, token.line, OpCode::ConstantLong);
    }

    fn direct_emit(&mut self) {
        use TokenKind::*;
        self.advance();
        let token = self.previous.clone();
        let op = match token.kind {
            Add => OpCode::Add,
            Subtract => OpCode::Subtract,
            Multiply => OpCode::Multiply,
            Divide => OpCode::Divide,
            Exponent => OpCode::Exponent,
            LessThan => OpCode::LessThan,
            LessThanEqual => OpCode::LessThanEqual,
            GreaterThan => OpCode::GreaterThan,
            GreaterThanEqual => OpCode::GreaterThanEqual,
            Equal => OpCode::Equal,
            NotEqual => OpCode::NotEqual,
            LogicalAnd => OpCode::LogicalAnd,
            LogicalOr => OpCode::LogicalOr,
            LogicalNot => OpCode::LogicalNot,
            AsDouble => OpCode::AsDouble,
            AsLong => OpCode::AsLong,
            AsString => OpCode::AsString,
            Duplicate => OpCode::Duplicate,
            Pop => OpCode::Pop,
            Print => OpCode::Print,
            PrintLn => OpCode::PrintLn,
            Trace => OpCode::Trace,
            ShowTraceLog => OpCode::ShowTraceLog,
            ClearTraceLog => OpCode::ClearTraceLog,
            _ => unreachable!("instruction() only dispatches direct_emit() for direct-emission kinds"),
        };
        self.current_chunk_mut().write_op(op, token.line);
    }

    /// `-> name` / `<- name`: the operator token is current, the identifier
    /// must follow it with no intervening whitespace.
    fn variable_op(&mut self, kind: TokenKind) {
        self.advance();
        let op_token = self.previous.clone();
        if self.current.kind != TokenKind::Identifier {
            return self.error_at_current("Expect identifier after variable operator");
        }
        if self.current.had_whitespace {
            self.error_at(&op_token.clone(), "Invalid trailing whitespace");
        }
        self.advance();
        let name = self.previous.lexeme.clone();
        let op_long = if kind == TokenKind::Load { OpCode::LoadLong } else { OpCode::StoreLong };
        self.emit_variable(op_long, &name, op_token.line);
    }

    /// `name ++` / `name --`: the identifier is current, the operator
    /// follows it. Unlike the prefix `Load`/`Store` forms, ordinary
    /// whitespace between `name` and the operator is allowed -- every worked
    /// `name ++`/counted-loop example in the source material writes it with
    /// a space, so the "no whitespace between the two pieces" rule is taken
    /// to bind only the prefix forms, where it's unambiguous. A bare
    /// `name ++` just creates `name`; whether it's the head of a counted
    /// loop is decided later, when (and if) a bare `do` is reached (see
    /// `finish_counted_loop`).
    fn identifier_instruction(&mut self) {
        self.advance();
        let name_token = self.previous.clone();
        match self.current.kind {
            TokenKind::Create => {
                self.advance();
                self.emit_variable(OpCode::CreateLong, &name_token.lexeme, name_token.line);
                self.pending_loop = Some((name_token.lexeme, name_token.line));
            }
            TokenKind::Delete => {
                self.advance();
                self.emit_variable(OpCode::DelLong, &name_token.lexeme, name_token.line);
            }
            _ => self.error_at(&name_token, "Identifier used outside of a recognized instruction"),
        }
    }

    /// `name ++ <upper-bound expr> do <body> loop`. The `<upper-bound expr>`
    /// was already compiled as ordinary instructions by the time control
    /// reaches this bare `do` -- all that's left on the stack is the upper
    /// bound it pushed. Synthesizes the implicit initial counter of `0`,
    /// then lowers the rest of the construct per the counted-loop steps.
    fn finish_counted_loop(&mut self) {
        self.advance(); // consume `do`
        let line = self.previous.line;

        let (name, _) = match self.pending_loop.take() {
            Some(pending) => pending,
            None => {
                let token = self.previous.clone();
                return self.error_at(&token, "'do' without a preceding 'name ++'");
            }
        };
        let counter_bound = format!("!{}", name);

        self.emit_constant(Value::from(0i64), line, OpCode::ConstantLong);
        self.emit_variable(OpCode::CreateLong, &counter_bound, line);
        self.emit_variable(OpCode::StoreLong, &name, line);
        self.emit_variable(OpCode::StoreLong, &counter_bound, line);

        let loop_start = self.current_chunk_len();
        self.emit_variable(OpCode::LoadLong, &counter_bound, line);
        self.emit_variable(OpCode::LoadLong, &name, line);
        self.current_chunk_mut().write_op(OpCode::GreaterThan, line);
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, line);

        while self.current.kind != TokenKind::Loop {
            if self.current.kind == TokenKind::End {
                let token = self.previous.clone();
                return self.error_at(&token, "Unterminated counted loop");
            }
            self.instruction();
        }
        self.advance(); // consume `loop`

        self.emit_variable(OpCode::LoadLong, &name, line);
        self.emit_constant(Value::from(1i64), line, OpCode::ConstantLong);
        self.current_chunk_mut().write_op(OpCode::Add, line);
        self.emit_variable(OpCode::StoreLong, &name, line);

        self.emit_loop(loop_start, line);
        self.patch_jump(exit_jump);
        self.emit_variable(OpCode::DelLong, &counter_bound, line);
    }

    /// `while <header> do <body> loop`.
    fn while_instruction(&mut self) {
        self.advance(); // consume `while`
        let line = self.previous.line;
        let head = self.current_chunk_len();
        self.current_chunk_mut().write_op(OpCode::None, line);

        while self.current.kind != TokenKind::Do {
            if self.current.kind == TokenKind::End {
                let token = self.previous.clone();
                return self.error_at(&token, "Unterminated while header");
            }
            self.instruction();
        }
        self.advance(); // consume `do`

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, line);
        while self.current.kind != TokenKind::Loop {
            if self.current.kind == TokenKind::End {
                let token = self.previous.clone();
                return self.error_at(&token, "Unterminated loop");
            }
            self.instruction();
        }
        self.advance(); // consume `loop`

        self.emit_loop(head, line);
        self.patch_jump(exit_jump);
    }

    /// `if <then...> [else <else...>] endif`. The condition is expected to
    /// already be on the stack by the time `if` is reached.
    fn if_instruction(&mut self) {
        self.advance(); // consume `if`
        let line = self.previous.line;
        let else_jump = self.emit_jump(OpCode::JumpIfFalse, line);

        while !matches!(self.current.kind, TokenKind::Else | TokenKind::EndIf) {
            if self.current.kind == TokenKind::End {
                let token = self.previous.clone();
                return self.error_at(&token, "Unterminated if");
            }
            self.instruction();
        }

        if self.current.kind == TokenKind::Else {
            self.advance(); // consume `else`
            let end_jump = self.emit_jump(OpCode::Jump, line);
            self.patch_jump(else_jump);

            while self.current.kind != TokenKind::EndIf {
                if self.current.kind == TokenKind::End {
                    let token = self.previous.clone();
                    return self.error_at(&token, "Unterminated if");
                }
                if self.current.kind == TokenKind::Else {
                    let token = self.current.clone();
                    self.error_at(&token, "'else' already used for this 'if'");
                    self.advance();
                    continue;
                }
                self.instruction();
            }
            self.advance(); // consume `endif`
            self.patch_jump(end_jump);
        } else {
            self.advance(); // consume `endif`
            self.patch_jump(else_jump);
        }
    }

    /// `:` either closes the current symbol and reopens `!main` (a bare
    /// closing `:`), or closes it and opens a new symbol named by the
    /// identifier immediately following.
    ///
    /// `!main` itself is never terminated here, only reopened: it isn't one
    /// contiguous run of tokens like a declared function's body is (code
    /// before the first `:` and code after the matching closing `:` both
    /// belong to it), so emitting its `Return` this early would halt the
    /// program the moment a function is declared. `run()` emits `!main`'s
    /// one and only `Return` once, at actual end of input.
    fn function_header(&mut self) {
        self.advance(); // consume `:`
        let line = self.previous.line;
        if self.current_symbol != ENTRY_SYMBOL {
            self.end_symbol(line);
        }

        if self.current.kind == TokenKind::Identifier {
            self.advance();
            let name = self.previous.lexeme.clone();
            self.current_symbol = name.clone();
            self.symbols.entry(name).or_insert_with(Chunk::new);
        } else {
            self.current_symbol = ENTRY_SYMBOL.to_string();
        }
    }

    /// `@ name`: pushes a return address, then an unconditional jump whose
    /// target is resolved at link time against the symbol table.
    fn function_call(&mut self) {
        self.advance(); // consume `@`
        let line = self.previous.line;
        if self.current.kind != TokenKind::Identifier {
            return self.error_at_current("Expect function name after '@'");
        }
        self.advance();
        let name = self.previous.lexeme.clone();

        self.current_chunk_mut().write_op(OpCode::PushJumpAddress, line);
        let operand_offset = self.emit_jump(OpCode::Jump, line);
        self.current_chunk_mut().add_meta(operand_offset, Value::from(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_chunk(source: &str) -> Chunk {
        compile(source).expect("expected successful compilation").remove(ENTRY_SYMBOL).unwrap()
    }

    #[test]
    fn literal_addition_emits_two_constants_and_add() {
        let chunk = main_chunk("1 2 add");
        assert_eq!(chunk.read(0), OpCode::ConstantLong.to_byte());
        assert_eq!(chunk.get_meta(0), Some(&Value::from("!constant")));
        assert_eq!(chunk.get_meta(1), Some(&Value::from(1i64)));
        assert_eq!(chunk.read(3), OpCode::ConstantLong.to_byte());
        assert_eq!(chunk.read(6), OpCode::Add.to_byte());
        assert_eq!(chunk.read(7), OpCode::Return.to_byte());
    }

    #[test]
    fn store_requires_no_whitespace_before_identifier() {
        let diagnostics = compile("1 <-  name").unwrap_err();
        assert!(diagnostics.iter().any(|d| d.message.contains("trailing whitespace")));
    }

    #[test]
    fn load_emits_long_load_with_name_constant() {
        let chunk = main_chunk("-> greeting println");
        assert_eq!(chunk.read(0), OpCode::LoadLong.to_byte());
        assert_eq!(chunk.get_meta(1), Some(&Value::from("greeting")));
    }

    #[test]
    fn counted_loop_deletes_the_scratch_upper_bound() {
        let chunk = main_chunk(r#"count ++ 3 do "x" println loop"#);
        let last_real_op = chunk.read(chunk.len() - 4);
        assert_eq!(last_real_op, OpCode::DelLong.to_byte());
    }

    #[test]
    fn bare_do_without_pending_loop_is_an_error() {
        let diagnostics = compile("true do 1 println loop").unwrap_err();
        assert!(diagnostics.iter().any(|d| d.message.contains("without a preceding")));
    }

    #[test]
    fn if_without_else_patches_a_single_jump() {
        let chunk = main_chunk("true if 1 println endif");
        assert_eq!(chunk.read(0), OpCode::JumpIfFalse.to_byte());
    }

    #[test]
    fn unterminated_loop_is_an_error() {
        let diagnostics = compile("0 10 n ++ do 1 println").unwrap_err();
        assert!(diagnostics.iter().any(|d| d.message.contains("Unterminated")));
    }

    #[test]
    fn function_declaration_reopens_main_after_bare_colon() {
        let table = compile(": greet println : 1 println").unwrap();
        assert!(table.contains_key("greet"));
        assert!(table.contains_key(ENTRY_SYMBOL));
    }

    #[test]
    fn function_call_tags_meta_with_symbol_name() {
        let chunk = main_chunk("@ greet");
        assert_eq!(chunk.read(0), OpCode::PushJumpAddress.to_byte());
        assert_eq!(chunk.read(1), OpCode::Jump.to_byte());
        assert_eq!(chunk.get_meta(2), Some(&Value::from("greet")));
    }

    #[test]
    fn non_main_symbol_ends_with_jump_to_call_stack_address() {
        let table = compile(": greet println :").unwrap();
        let greet = &table["greet"];
        assert_eq!(greet.read(greet.len() - 1), OpCode::JumpToCallStackAddress.to_byte());
    }
}
