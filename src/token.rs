use std::fmt;

/// Position of the first character of a token, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Eof,

    // Keywords
    Def,
    Extern,

    // Primary
    Identifier(String),
    Number(f64),

    /// Any other single character: operators and punctuation.
    Char(char),
}

impl TokenKind {
    pub fn is_char(&self, expected: char) -> bool {
        matches!(self, TokenKind::Char(c) if *c == expected)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::Def => write!(f, "'def'"),
            TokenKind::Extern => write!(f, "'extern'"),
            TokenKind::Identifier(name) => write!(f, "identifier '{name}'"),
            TokenKind::Number(value) => write!(f, "number {value}"),
            TokenKind::Char(c) => write!(f, "'{c}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn kind(&self) -> &TokenKind {
        &self.kind
    }

    pub fn span(&self) -> Span {
        self.span
    }
}
