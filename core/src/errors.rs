use std::fmt;

/// A single compiler/scanner diagnostic: `error_at` captures the offending
/// token's line, its lexeme (omitted for scanner `Error` tokens, which carry
/// the message as their own lexeme), and the human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub at: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: usize, at: Option<String>, message: impl Into<String>) -> Self {
        Diagnostic {
            line,
            at,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    /// `[Line L] Error at '<lexeme>': <message>`, or `[Line L] Error:
    /// <message>` when `at` is `None` (scanner `Error` tokens).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Line {}] Error", self.line)?;
        if let Some(lexeme) = &self.at {
            write!(f, " at '{}'", lexeme)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// The two ways linking a compiled symbol table into one chunk can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// A builtin-symbol provider tried to install a name that already exists
    /// as a user-defined symbol.
    SymbolCollision(String),
    /// A call site (`@ name`) or builtin reference named a symbol that
    /// neither user code nor the builtin provider could resolve.
    Undefined(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::SymbolCollision(name) => write!(f, "Function '{}' already exists", name),
            LinkError::Undefined(name) => write!(f, "Undefined function '{}'", name),
        }
    }
}

/// One frame of a runtime error's call-stack trace: the line of the pending
/// return address, and the symbol it will resume in, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: usize,
    pub symbol: Option<String>,
}

impl fmt::Display for TraceFrame {
    /// `[Line L] @<name>`, or `[Line L]` when the symbol at this return
    /// address couldn't be resolved (should not happen for well-formed
    /// linked chunks, but the formatter degrades gracefully rather than
    /// panicking).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Line {}]", self.line)?;
        if let Some(symbol) = &self.symbol {
            write!(f, " @{}", symbol)?;
        }
        Ok(())
    }
}

/// A runtime fault: the call-stack trace of pending return addresses at the
/// moment of the fault, followed by the faulting instruction's own line and
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFault {
    pub trace: Vec<TraceFrame>,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.trace {
            writeln!(f, "{}", frame)?;
        }
        write!(f, "[Line {}] {}", self.line, self.message)
    }
}

/// The result of a full `scan -> compile -> link -> run` pipeline
/// invocation, mirroring the reference workspace's own `InterpretResult`
/// enum rather than a bare process-exit code buried in library code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    LinkerError,
    RuntimeError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_formats_with_lexeme() {
        let d = Diagnostic::new(3, Some("+".to_string()), "Invalid use of an identifier");
        assert_eq!(d.to_string(), "[Line 3] Error at '+': Invalid use of an identifier");
    }

    #[test]
    fn diagnostic_formats_without_lexeme_for_scanner_errors() {
        let d = Diagnostic::new(1, None, "Unexpected character 'c'");
        assert_eq!(d.to_string(), "[Line 1] Error: Unexpected character 'c'");
    }

    #[test]
    fn runtime_fault_renders_trace_then_fault_line() {
        let fault = RuntimeFault {
            trace: vec![TraceFrame { line: 4, symbol: Some("greet".to_string()) }],
            line: 2,
            message: "Undeclared variable 'x'".to_string(),
        };
        assert_eq!(fault.to_string(), "[Line 4] @greet\n[Line 2] Undeclared variable 'x'");
    }
}
