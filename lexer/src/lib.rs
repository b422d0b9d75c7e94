use core::{Token, TokenKind};

/// Matches a scanned identifier lexeme against the reserved keyword table,
/// falling back to a plain `Identifier` token kind.
fn keyword_kind(word: &str) -> TokenKind {
    match word {
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "endif" => TokenKind::EndIf,
        "do" => TokenKind::Do,
        "while" => TokenKind::While,
        "loop" => TokenKind::Loop,
        "and" => TokenKind::LogicalAnd,
        "or" => TokenKind::LogicalOr,
        "add" => TokenKind::Add,
        "sub" => TokenKind::Subtract,
        "mul" => TokenKind::Multiply,
        "div" => TokenKind::Divide,
        "eq" => TokenKind::Equal,
        "neq" => TokenKind::NotEqual,
        "lt" => TokenKind::LessThan,
        "lte" => TokenKind::LessThanEqual,
        "gt" => TokenKind::GreaterThan,
        "gte" => TokenKind::GreaterThanEqual,
        "dup" => TokenKind::Duplicate,
        "pop" => TokenKind::Pop,
        "trace" => TokenKind::Trace,
        "showtracelog" => TokenKind::ShowTraceLog,
        "cleartracelog" => TokenKind::ClearTraceLog,
        "print" => TokenKind::Print,
        "println" => TokenKind::PrintLn,
        "pow" => TokenKind::Exponent,
        "not" => TokenKind::LogicalNot,
        "asdouble" => TokenKind::AsDouble,
        "aslong" => TokenKind::AsLong,
        "asstring" => TokenKind::AsString,
        _ => TokenKind::Identifier,
    }
}

/// Forward-only tokenizer: wraps the source text and yields one `Token` per
/// call to `next_token`. Calling it past the `End` token keeps returning
/// `End`, so a compiler can always look one token beyond the one it just
/// consumed without a separate "are we done" check.
pub struct Lexer<'a> {
    source: &'a [u8],
    start: usize,
    current: usize,
    line: usize,
    had_whitespace: bool,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
            had_whitespace: false,
            done: false,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.get(self.current + 1).copied()
    }

    fn advance(&mut self) -> u8 {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn lexeme(&self) -> &'a str {
        std::str::from_utf8(&self.source[self.start..self.current]).expect("source is valid utf8")
    }

    /// Skips ASCII whitespace and `#`-to-end-of-line comments, recording
    /// whether anything was skipped so the next emitted token can carry
    /// `had_whitespace`.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.had_whitespace = true;
                    self.current += 1;
                }
                Some(b'\n') => {
                    self.had_whitespace = true;
                    self.line += 1;
                    self.current += 1;
                }
                Some(b'#') => {
                    self.had_whitespace = true;
                    while self.peek().is_some() && self.peek() != Some(b'\n') {
                        self.current += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.lexeme(), self.line, self.had_whitespace)
    }

    fn error(&self, message: impl Into<String>) -> Token {
        Token::new(TokenKind::Error, message.into(), self.line, self.had_whitespace)
    }

    fn number(&mut self) -> Token {
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.current += 1;
        }

        let mut is_double = false;
        if self.peek() == Some(b'.') && self.peek_next().map_or(false, |c| c.is_ascii_digit()) {
            is_double = true;
            self.current += 1;
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.current += 1;
            }
        }

        self.make(if is_double { TokenKind::Double } else { TokenKind::Long })
    }

    fn string(&mut self) -> Token {
        while self.peek().is_some() && self.peek() != Some(b'"') {
            if self.peek() == Some(b'\n') {
                return self.error("Unterminated string.");
            }
            self.current += 1;
        }

        if self.is_at_end() {
            return self.error("Unterminated string.");
        }

        // Consume the closing quote.
        self.current += 1;
        self.make(TokenKind::String)
    }

    fn identifier(&mut self) -> Token {
        while self.peek().map_or(false, |c| c.is_ascii_alphanumeric() || c == b'_') {
            self.current += 1;
        }
        self.make(keyword_kind(self.lexeme()))
    }

    /// Scans and returns the next token, resetting `had_whitespace` once it
    /// has been attached to the token it precedes.
    pub fn next_token(&mut self) -> Token {
        if self.done {
            return Token::new(TokenKind::End, "", self.line, false);
        }

        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            self.done = true;
            return self.make(TokenKind::End);
        }

        let c = self.advance();
        let token = if c.is_ascii_alphabetic() || c == b'_' {
            self.identifier()
        } else if c.is_ascii_digit() {
            self.number()
        } else {
            match c {
                b'"' => self.string(),
                b'-' if self.matches(b'>') => self.make(TokenKind::Load),
                b'<' if self.matches(b'-') => self.make(TokenKind::Store),
                b'+' if self.matches(b'+') => self.make(TokenKind::Create),
                b'-' if self.matches(b'-') => self.make(TokenKind::Delete),
                b':' => self.make(TokenKind::FunctionHeader),
                b'@' => self.make(TokenKind::FunctionCall),
                _ => self.error(format!("Unexpected character '{}'", c as char)),
            }
        };

        self.had_whitespace = false;
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token();
            let kind = tok.kind;
            out.push(kind);
            if kind == TokenKind::End {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_a_long_and_a_double() {
        let mut lexer = Lexer::new("1 2.5");
        let a = lexer.next_token();
        assert_eq!(a.kind, TokenKind::Long);
        assert_eq!(a.lexeme, "1");
        let b = lexer.next_token();
        assert_eq!(b.kind, TokenKind::Double);
        assert_eq!(b.lexeme, "2.5");
        assert_eq!(lexer.next_token().kind, TokenKind::End);
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        assert_eq!(kinds("add pop println greet"), vec![
            TokenKind::Add,
            TokenKind::Pop,
            TokenKind::PrintLn,
            TokenKind::Identifier,
            TokenKind::End,
        ]);
    }

    #[test]
    fn scans_added_conversion_keywords() {
        assert_eq!(
            kinds("pow not asdouble aslong asstring"),
            vec![
                TokenKind::Exponent,
                TokenKind::LogicalNot,
                TokenKind::AsDouble,
                TokenKind::AsLong,
                TokenKind::AsString,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn scans_variable_operators() {
        assert_eq!(kinds("-> <- ++ -- : @"), vec![
            TokenKind::Load,
            TokenKind::Store,
            TokenKind::Create,
            TokenKind::Delete,
            TokenKind::FunctionHeader,
            TokenKind::FunctionCall,
            TokenKind::End,
        ]);
    }

    #[test]
    fn tracks_whitespace_before_a_token() {
        let mut lexer = Lexer::new("<-  name");
        let arrow = lexer.next_token();
        assert!(!arrow.had_whitespace);
        let name = lexer.next_token();
        assert!(name.had_whitespace);
    }

    #[test]
    fn skips_line_comments() {
        assert_eq!(kinds("1 # comment\n2"), vec![TokenKind::Long, TokenKind::Long, TokenKind::End]);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut lexer = Lexer::new("\"abc");
        let tok = lexer.next_token();
        assert_eq!(tok.kind, TokenKind::Error);
        assert_eq!(tok.lexeme, "Unterminated string.");
    }

    #[test]
    fn unexpected_character_is_an_error_token() {
        let mut lexer = Lexer::new("$");
        let tok = lexer.next_token();
        assert_eq!(tok.kind, TokenKind::Error);
        assert_eq!(tok.lexeme, "Unexpected character '$'");
    }

    #[test]
    fn scanning_past_end_keeps_returning_end() {
        let mut lexer = Lexer::new("");
        assert_eq!(lexer.next_token().kind, TokenKind::End);
        assert_eq!(lexer.next_token().kind, TokenKind::End);
        assert_eq!(lexer.next_token().kind, TokenKind::End);
    }

    #[test]
    fn string_lexeme_includes_quotes() {
        let mut lexer = Lexer::new("\"hi\"");
        let tok = lexer.next_token();
        assert_eq!(tok.lexeme, "\"hi\"");
    }
}
