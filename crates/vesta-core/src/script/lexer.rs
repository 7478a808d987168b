//! Tokenizer for the scripting language.
//!
//! Produces an indentation-aware token stream: logical lines end with
//! `Newline`, and changes in leading whitespace produce `Indent`/`Dedent`.
//! Newlines inside brackets and after a trailing backslash are ignored.

use super::failure::ExecutionFailure;

/// Kind of a lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Keyword(&'static str),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string after escape processing, fields still unparsed.
    FString(String),
    Punct(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

/// A token with its 1-indexed source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "break", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "not", "or", "pass", "raise", "return", "try", "while",
];

// Longest operators first so that prefix matching picks `**=` over `**`.
const PUNCTUATION: &[&str] = &[
    "**=", "//=", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "**", "//", "->", "(",
    ")", "[", "]", "{", "}", ",", ":", ".", ";", "+", "-", "*", "/", "%", "<", ">", "=",
];

const TAB_WIDTH: usize = 8;

/// Tokenize a complete source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ExecutionFailure> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn error(&self, message: &str) -> ExecutionFailure {
        ExecutionFailure::syntax(message, self.line, self.column)
    }

    fn run(mut self) -> Result<Vec<Token>, ExecutionFailure> {
        loop {
            if self.at_line_start && self.depth == 0 && !self.indentation()? {
                continue;
            }
            let Some(c) = self.peek() else { break };
            let (line, column) = (self.line, self.column);
            match c {
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        self.push_newline(line, column);
                        self.at_line_start = true;
                    }
                }
                '\\' => {
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.bump() != Some('\n') {
                        return Err(ExecutionFailure::syntax(
                            "unexpected character after line continuation character",
                            line,
                            column,
                        ));
                    }
                }
                '0'..='9' => self.number(line, column)?,
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    self.number(line, column)?
                }
                '"' | '\'' => self.string(false, false, line, column)?,
                c if c == '_' || c.is_alphabetic() => self.word(line, column)?,
                _ => self.punct(line, column)?,
            }
        }

        let (line, column) = (self.line, self.column);
        self.push_newline(line, column);
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, line, column);
        }
        self.push(TokenKind::Eof, line, column);
        Ok(self.tokens)
    }

    fn push_newline(&mut self, line: usize, column: usize) {
        match self.tokens.last() {
            None => {}
            Some(token) if token.kind == TokenKind::Newline => {}
            Some(_) => self.push(TokenKind::Newline, line, column),
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    /// Measure leading whitespace of a line and emit indentation tokens.
    ///
    /// Returns `false` when the line was blank or comment-only and has been
    /// consumed entirely.
    fn indentation(&mut self) -> Result<bool, ExecutionFailure> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' => width = 0,
                '\r' => {}
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => {
                self.at_line_start = false;
                return Ok(true);
            }
            Some('\n') => {
                self.bump();
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                self.bump();
                return Ok(false);
            }
            Some(_) => {}
        }

        self.at_line_start = false;
        let (line, column) = (self.line, self.column);
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, line, column);
        } else if width < current {
            while self.indents.last().is_some_and(|&top| top > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent, line, column);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(ExecutionFailure::syntax(
                    "unindent does not match any outer indentation level",
                    line,
                    column,
                ));
            }
        }
        Ok(true)
    }

    fn number(&mut self, line: usize, column: usize) -> Result<(), ExecutionFailure> {
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c == '_' {
                        self.bump();
                    } else if c.is_ascii_alphanumeric() {
                        digits.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                let value = i64::from_str_radix(&digits, radix).map_err(|_| {
                    ExecutionFailure::syntax("invalid integer literal", line, column)
                })?;
                self.push(TokenKind::Int(value), line, column);
                return Ok(());
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        self.digits(&mut text);
        if self.peek() == Some('.') && self.peek_at(1) != Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.bump();
                if signed {
                    text.extend(self.bump());
                }
                self.digits(&mut text);
            }
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            return Err(self.error("invalid decimal literal"));
        }

        let kind = if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| ExecutionFailure::syntax("invalid float literal", line, column))?;
            TokenKind::Float(value)
        } else {
            let value = text.parse::<i64>().map_err(|_| {
                ExecutionFailure::syntax("integer literal is too large", line, column)
            })?;
            TokenKind::Int(value)
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c != '_' {
                break;
            }
            self.bump();
        }
    }

    fn word(&mut self, line: usize, column: usize) -> Result<(), ExecutionFailure> {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }

        if matches!(self.peek(), Some('"' | '\'')) {
            let prefix = word.to_ascii_lowercase();
            if matches!(prefix.as_str(), "r" | "f" | "rf" | "fr" | "u" | "b" | "br" | "rb") {
                let raw = prefix.contains('r');
                let formatted = prefix.contains('f');
                return self.string(raw, formatted, line, column);
            }
        }

        let kind = match KEYWORDS.iter().find(|&&k| k == word) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Name(word),
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn string(
        &mut self,
        raw: bool,
        formatted: bool,
        line: usize,
        column: usize,
    ) -> Result<(), ExecutionFailure> {
        let Some(quote) = self.bump() else {
            return Err(self.error("unterminated string literal"));
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let unterminated = || ExecutionFailure::syntax("unterminated string literal", line, column);
        let mut text = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(unterminated());
            };
            if c == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
            }
            if c == '\n' && !triple {
                return Err(unterminated());
            }
            self.bump();
            if c != '\\' {
                text.push(c);
                continue;
            }

            let Some(escaped) = self.bump() else {
                return Err(unterminated());
            };
            if raw {
                text.push('\\');
                text.push(escaped);
                continue;
            }
            match escaped {
                'n' => text.push('\n'),
                't' => text.push('\t'),
                'r' => text.push('\r'),
                '0' => text.push('\0'),
                '\\' => text.push('\\'),
                '\'' => text.push('\''),
                '"' => text.push('"'),
                '\n' => {}
                'x' => text.push(self.hex_escape(2)?),
                'u' => text.push(self.hex_escape(4)?),
                other => {
                    text.push('\\');
                    text.push(other);
                }
            }
        }

        let kind = if formatted {
            TokenKind::FString(text)
        } else {
            TokenKind::Str(text)
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, ExecutionFailure> {
        let mut digits = String::new();
        for _ in 0..len {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    digits.push(c);
                    self.bump();
                }
                _ => return Err(self.error("truncated escape sequence")),
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid escape sequence"))
    }

    fn punct(&mut self, line: usize, column: usize) -> Result<(), ExecutionFailure> {
        let matched = PUNCTUATION.iter().find(|op| {
            op.chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c))
        });
        let Some(&op) = matched else {
            let c = self.peek().unwrap_or_default();
            return Err(ExecutionFailure::syntax(
                format!("invalid character '{}'", c),
                line,
                column,
            ));
        };
        for _ in 0..op.chars().count() {
            self.bump();
        }
        match op {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.push(TokenKind::Punct(op), line, column);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 41"),
            vec![
                TokenKind::Name("x".to_string()),
                TokenKind::Punct("="),
                TokenKind::Int(41),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = kinds("if x:\n    y = 1\nz = 2\n");
        assert!(tokens.contains(&TokenKind::Indent));
        assert!(tokens.contains(&TokenKind::Dedent));
        let indent = tokens.iter().position(|t| *t == TokenKind::Indent).unwrap();
        let dedent = tokens.iter().position(|t| *t == TokenKind::Dedent).unwrap();
        assert!(indent < dedent);
    }

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        let tokens = kinds("a = 1\n\n   # note\nb = 2\n");
        assert!(!tokens.contains(&TokenKind::Indent));
        let newlines = tokens.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn test_brackets_join_lines() {
        let tokens = kinds("xs = [1,\n      2]\n");
        let newlines = tokens.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!tokens.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("0xff")[0], TokenKind::Int(255));
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(kinds(r#""a\tb""#)[0], TokenKind::Str("a\tb".to_string()));
        assert_eq!(kinds(r#"r"a\tb""#)[0], TokenKind::Str("a\\tb".to_string()));
        assert_eq!(
            kinds("'''one\ntwo'''")[0],
            TokenKind::Str("one\ntwo".to_string())
        );
        assert_eq!(
            kinds("f'{x}!'")[0],
            TokenKind::FString("{x}!".to_string())
        );
    }

    #[test]
    fn test_keywords_and_operators() {
        assert_eq!(
            kinds("not a ** b")[..4],
            [
                TokenKind::Keyword("not"),
                TokenKind::Name("a".to_string()),
                TokenKind::Punct("**"),
                TokenKind::Name("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("s = 'abc").unwrap_err();
        assert_eq!(err.kind(), "SyntaxError");
        assert!(err.message().contains("unterminated string literal"));
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert!(err.message().contains("unindent"));
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("a = $").unwrap_err();
        assert!(err.message().contains("invalid character '$'"));
    }
}
