use hashbrown::HashMap;

use compiler::compile;
use core::{Chunk, Diagnostic, InterpretResult, OpCode, RuntimeFault, TraceFrame, Value, STACK_MAX};
use linker::{link, BuiltinProvider, NoBuiltins};

/// Bytecode interpreter. Owns everything execution touches: the operand
/// stack, the return-address stack, the globals table, the trace log, and
/// the last error slot. All of it is reset at the start of every
/// `interpret` call except the globals table, which an embedder running a
/// REPL can choose to keep across calls.
pub struct VirtualMachine {
    chunk: Chunk,
    ip: usize,
    stack: Vec<Value>,
    return_stack: Vec<usize>,
    globals: HashMap<String, Value>,
    trace_log: Value,
    error: Value,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        VirtualMachine {
            chunk: Chunk::new(),
            ip: 0,
            stack: Vec::new(),
            return_stack: Vec::new(),
            globals: HashMap::new(),
            trace_log: Value::from(""),
            error: Value::None,
        }
    }
}

impl VirtualMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self) -> &Value {
        &self.error
    }

    pub fn trace_log(&self) -> &Value {
        &self.trace_log
    }

    /// Resets per-run state. `clear_globals` additionally wipes the globals
    /// table, matching a fresh `VirtualMachine` rather than a REPL carrying
    /// declarations forward between lines.
    pub fn cleanup(&mut self, clear_globals: bool) {
        self.stack.clear();
        self.return_stack.clear();
        self.trace_log = Value::from("");
        self.error = Value::None;
        self.ip = 0;
        self.chunk = Chunk::new();
        if clear_globals {
            self.globals.clear();
        }
    }

    /// Runs the full `scan -> compile -> link -> run` pipeline against
    /// `source`, reusing this VM's globals table (reset everything else
    /// first, as `interpret` always does on entry).
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        self.interpret_with_builtins(source, &NoBuiltins)
    }

    pub fn interpret_with_builtins(&mut self, source: &str, builtins: &dyn BuiltinProvider) -> InterpretResult {
        self.cleanup(false);

        let symbols = match compile(source) {
            Ok(symbols) => symbols,
            Err(diagnostics) => {
                self.error = Value::from(render_diagnostics(&diagnostics));
                return InterpretResult::CompileError;
            }
        };

        let chunk = match link(symbols, builtins) {
            Ok(chunk) => chunk,
            Err(err) => {
                self.error = Value::from(err.to_string());
                return InterpretResult::LinkerError;
            }
        };

        self.chunk = chunk;
        self.ip = 0;
        self.run()
    }

    fn fault(&mut self, message: impl Into<String>) -> InterpretResult {
        let line = self.chunk.read_line(self.ip.saturating_sub(1)).unwrap_or(0);
        let trace = self
            .return_stack
            .iter()
            .map(|&addr| TraceFrame {
                line: self.chunk.read_line(addr).unwrap_or(0),
                symbol: None,
            })
            .collect();
        let fault = RuntimeFault { trace, line, message: message.into() };
        self.error = Value::from(fault.to_string());
        eprintln!("{}", fault);
        InterpretResult::RuntimeError
    }

    fn push(&mut self, value: Value) -> Result<(), String> {
        if self.stack.len() >= STACK_MAX {
            return Err("Stack overflow".to_string());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, String> {
        self.stack.pop().ok_or_else(|| "Stack underflow".to_string())
    }

    fn peek(&self) -> Result<&Value, String> {
        self.stack.last().ok_or_else(|| "Stack underflow".to_string())
    }

    fn read_byte(&mut self) -> u8 {
        let byte = self.chunk.read(self.ip);
        self.ip += 1;
        byte
    }

    fn read_index(&mut self, long: bool) -> u16 {
        if long {
            let word = self.chunk.read_long(self.ip);
            self.ip += 2;
            word
        } else {
            self.read_byte() as u16
        }
    }

    fn read_name(&mut self, long: bool) -> Option<String> {
        let index = self.read_index(long);
        self.chunk.read_constant(index).as_str().map(str::to_string)
    }

    fn read_jump_offset(&mut self) -> i16 {
        let word = self.chunk.read_long(self.ip);
        self.ip += 2;
        word as i16
    }

    /// The tight fetch-decode-dispatch loop. Runs to completion: there are
    /// no suspension points, so one call to `run` executes the whole program.
    fn run(&mut self) -> InterpretResult {
        loop {
            if self.ip >= self.chunk.len() {
                return self.fault("Execution fell off the end of the program");
            }

            let byte = self.read_byte();
            let op = match OpCode::from_byte(byte) {
                Some(op) => op,
                None => return self.fault(format!("Unknown opcode byte {}", byte)),
            };

            match self.dispatch(op) {
                Ok(Some(result)) => return result,
                Ok(None) => continue,
                Err(message) => return self.fault(message),
            }
        }
    }

    /// Executes one decoded instruction. Returns `Ok(Some(result))` when
    /// execution should stop (`Return` or a runtime fault already reported
    /// by the caller), `Ok(None)` to keep looping, or `Err(message)` for a
    /// fault the caller turns into a `RuntimeFault`.
    fn dispatch(&mut self, op: OpCode) -> Result<Option<InterpretResult>, String> {
        match op {
            OpCode::Constant => {
                let index = self.read_index(false);
                self.push_constant(index)?;
            }
            OpCode::ConstantLong => {
                let index = self.read_index(true);
                self.push_constant(index)?;
            }
            OpCode::Add => self.binary(OpCode::Add)?,
            OpCode::Subtract => self.binary(OpCode::Subtract)?,
            OpCode::Multiply => self.binary(OpCode::Multiply)?,
            OpCode::Divide => self.binary(OpCode::Divide)?,
            OpCode::Exponent => self.binary(OpCode::Exponent)?,
            OpCode::LessThan => self.binary(OpCode::LessThan)?,
            OpCode::LessThanEqual => self.binary(OpCode::LessThanEqual)?,
            OpCode::GreaterThan => self.binary(OpCode::GreaterThan)?,
            OpCode::GreaterThanEqual => self.binary(OpCode::GreaterThanEqual)?,
            OpCode::Equal => self.binary(OpCode::Equal)?,
            OpCode::NotEqual => self.binary(OpCode::NotEqual)?,
            OpCode::LogicalAnd => self.binary(OpCode::LogicalAnd)?,
            OpCode::LogicalOr => self.binary(OpCode::LogicalOr)?,
            OpCode::LogicalNot => {
                let v = self.pop()?;
                let result = v.not();
                self.require_valid(&result, "Invalid arguments for operation '!'")?;
                self.push(result)?;
            }
            OpCode::Negate => {
                let v = self.pop()?;
                let result = v.neg();
                self.require_valid(&result, "Invalid arguments for operation unary '-'")?;
                self.push(result)?;
            }
            OpCode::AsDouble => {
                let v = self.pop()?;
                let result = v.to_as_double();
                self.require_valid(&result, "Invalid conversion")?;
                self.push(result)?;
            }
            OpCode::AsLong => {
                let v = self.pop()?;
                let result = v.to_as_long();
                self.require_valid(&result, "Invalid conversion")?;
                self.push(result)?;
            }
            OpCode::AsString => {
                let v = self.pop()?;
                let result = v.to_as_string();
                self.require_valid(&result, "Invalid conversion")?;
                self.push(result)?;
            }
            OpCode::Duplicate => {
                let v = self.peek()?.clone();
                self.push(v)?;
            }
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Print => {
                let v = self.pop()?;
                print!("{}", v);
            }
            OpCode::PrintLn => {
                let v = self.pop()?;
                println!("{}", v);
            }
            OpCode::Trace => {
                let v = self.peek()?.clone();
                let appended = format!("{}{}\n", self.trace_log, v);
                self.trace_log = Value::from(appended);
            }
            OpCode::ShowTraceLog => {
                print!("{}", self.trace_log);
            }
            OpCode::ClearTraceLog => {
                self.trace_log = Value::from("");
            }
            OpCode::Store => self.store(false)?,
            OpCode::StoreLong => self.store(true)?,
            OpCode::Load => self.load(false)?,
            OpCode::LoadLong => self.load(true)?,
            OpCode::Del => self.delete(false)?,
            OpCode::DelLong => self.delete(true)?,
            OpCode::Create => self.create(false)?,
            OpCode::CreateLong => self.create(true)?,
            OpCode::Jump => {
                let offset = self.read_jump_offset();
                self.ip = (self.ip as i64 + offset as i64) as usize;
            }
            OpCode::JumpIfFalse => {
                let offset = self.read_jump_offset();
                let cond = self.pop()?;
                match cond {
                    Value::Bool(b) => {
                        if !b {
                            self.ip = (self.ip as i64 + offset as i64) as usize;
                        }
                    }
                    _ => return Err("Invalid arguments for conditional".to_string()),
                }
            }
            OpCode::None => {}
            OpCode::PushJumpAddress => {
                // The following instruction is always a 3-byte `Jump`.
                self.return_stack.push(self.ip + 3);
            }
            OpCode::JumpToCallStackAddress => {
                let addr = self.return_stack.pop().ok_or_else(|| "Empty return stack".to_string())?;
                self.ip = addr;
            }
            OpCode::Return => return Ok(Some(InterpretResult::Ok)),
        }
        Ok(None)
    }

    fn push_constant(&mut self, index: u16) -> Result<(), String> {
        let value = self.chunk.read_constant(index);
        self.require_valid(&value, "Invalid constant pushed to stack")?;
        self.push(value)
    }

    fn require_valid(&self, value: &Value, message: &str) -> Result<(), String> {
        if value.is_valid() {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn binary(&mut self, op: OpCode) -> Result<(), String> {
        let b = self.pop()?;
        let a = self.pop()?;
        let (result, name) = match op {
            OpCode::Add => (&a + &b, "+"),
            OpCode::Subtract => (&a - &b, "-"),
            OpCode::Multiply => (&a * &b, "*"),
            OpCode::Divide => (&a / &b, "/"),
            OpCode::Exponent => (a.pow(&b), "pow"),
            OpCode::LessThan => (a.lt(&b), "<"),
            OpCode::LessThanEqual => (a.le(&b), "<="),
            OpCode::GreaterThan => (a.gt(&b), ">"),
            OpCode::GreaterThanEqual => (a.ge(&b), ">="),
            OpCode::Equal => (a.eq_value(&b), "=="),
            OpCode::NotEqual => (a.neq_value(&b), "!="),
            OpCode::LogicalAnd => (a.and(&b), "&&"),
            OpCode::LogicalOr => (a.or(&b), "||"),
            _ => unreachable!("binary() only dispatched for binary opcodes"),
        };
        if !result.is_valid() {
            return Err(format!("Invalid arguments for operation '{}'", name));
        }
        self.push(result)
    }

    fn store(&mut self, long: bool) -> Result<(), String> {
        let name = self.read_name(long).ok_or_else(|| "Invalid variable name".to_string())?;
        let value = self.pop()?;
        if self.globals.contains_key(&name) {
            self.globals.insert(name, value);
            Ok(())
        } else {
            Err(format!("Undeclared variable '{}'", name))
        }
    }

    fn load(&mut self, long: bool) -> Result<(), String> {
        let name = self.read_name(long).ok_or_else(|| "Invalid variable name".to_string())?;
        match self.globals.get(&name).cloned() {
            Some(value) => self.push(value),
            None => Err(format!("Undeclared variable '{}'", name)),
        }
    }

    fn delete(&mut self, long: bool) -> Result<(), String> {
        let name = self.read_name(long).ok_or_else(|| "Invalid variable name".to_string())?;
        self.globals.remove(&name);
        Ok(())
    }

    fn create(&mut self, long: bool) -> Result<(), String> {
        let name = self.read_name(long).ok_or_else(|| "Invalid variable name".to_string())?;
        self.globals.entry(name).or_insert(Value::None);
        Ok(())
    }
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addition_prints_the_sum() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret("1 2 add println"), InterpretResult::Ok);
    }

    #[test]
    fn string_concatenation() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret(r#""hi " "there" add println"#), InterpretResult::Ok);
    }

    #[test]
    fn if_else_chooses_a_branch() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret(r#"3 5 lt if "small" println else "big" println endif"#), InterpretResult::Ok);
    }

    #[test]
    fn counted_loop_runs_the_body_n_times() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret(r#"count ++ 3 do "x" println loop"#), InterpretResult::Ok);
    }

    #[test]
    fn function_declaration_and_two_calls() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret(r#": greet "hello" println : @ greet @ greet"#), InterpretResult::Ok);
    }

    #[test]
    fn logical_and_of_two_bools() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret("true false and println"), InterpretResult::Ok);
    }

    #[test]
    fn loading_an_undeclared_variable_is_a_runtime_error() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret("-> missing"), InterpretResult::RuntimeError);
        assert!(vm.error().as_str().unwrap().contains("Undeclared variable"));
    }

    #[test]
    fn compile_error_surfaces_as_compile_error() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret("do loop"), InterpretResult::CompileError);
    }

    #[test]
    fn undefined_function_call_is_a_linker_error() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret("@ nope"), InterpretResult::LinkerError);
    }

    #[test]
    fn cleanup_resets_the_stack_between_runs() {
        let mut vm = VirtualMachine::new();
        vm.interpret("1 2 add println");
        vm.cleanup(true);
        assert!(vm.stack.is_empty());
        assert!(vm.globals.is_empty());
    }

    #[test]
    fn globals_persist_across_interpret_calls_unless_cleared() {
        let mut vm = VirtualMachine::new();
        assert_eq!(vm.interpret("counter ++"), InterpretResult::Ok);
        assert_eq!(vm.interpret("-> counter println"), InterpretResult::Ok);
    }
}
