use std::iter::{Fuse, Peekable};
use std::str::Chars;

use crate::token::{Span, Token, TokenKind};

/// Turns a character stream into tokens, one at a time.
///
/// The stream is pulled lazily so an interactive reader only blocks when the
/// parser actually needs the next token. Once the stream ends every further
/// call yields `TokenKind::Eof` without touching the source again.
pub struct Lexer<I: Iterator<Item = char>> {
    chars: Peekable<Fuse<I>>,
    line: usize,
    column: usize,
}

impl<I: Iterator<Item = char>> Lexer<I> {
    pub fn new(chars: I) -> Self {
        Self {
            chars: chars.fuse().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            self.skip_whitespace();

            let span = self.span_here();
            let Some(&ch) = self.chars.peek() else {
                return Token::new(TokenKind::Eof, span);
            };

            match ch {
                '#' => {
                    if !self.skip_comment() {
                        return Token::new(TokenKind::Eof, self.span_here());
                    }
                }
                c if c.is_ascii_alphabetic() => return self.read_identifier(span),
                c if c.is_ascii_digit() || c == '.' => return self.read_number(span),
                c => {
                    self.advance_char();
                    return Token::new(TokenKind::Char(c), span);
                }
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if is_whitespace(c) {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    /// Discards a `#` comment through its line terminator. Returns false when
    /// the stream ended inside the comment.
    fn skip_comment(&mut self) -> bool {
        while let Some(c) = self.advance_char() {
            if c == '\n' || c == '\r' {
                return true;
            }
        }
        false
    }

    fn read_identifier(&mut self, span: Span) -> Token {
        let mut ident = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() {
                ident.push(c);
                self.advance_char();
            } else {
                break;
            }
        }

        let kind = match ident.as_str() {
            "def" => TokenKind::Def,
            "extern" => TokenKind::Extern,
            _ => TokenKind::Identifier(ident),
        };
        Token::new(kind, span)
    }

    fn read_number(&mut self, span: Span) -> Token {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.advance_char();
            } else {
                break;
            }
        }
        Token::new(TokenKind::Number(parse_number(&text)), span)
    }

    fn advance_char(&mut self) -> Option<char> {
        let next = self.chars.next();
        if let Some(c) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn span_here(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
        }
    }
}

impl<I: Iterator<Item = char>> Iterator for Lexer<I> {
    type Item = Token;

    /// Yields tokens up to, but not including, end of input.
    fn next(&mut self) -> Option<Self::Item> {
        let token = self.next_token();
        if matches!(token.kind, TokenKind::Eof) {
            None
        } else {
            Some(token)
        }
    }
}

impl<'a> Lexer<Chars<'a>> {
    pub fn from_source(source: &'a str) -> Self {
        Self::new(source.chars())
    }
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// Reads the longest `digits [. digits]` prefix of a scanned literal.
///
/// The scanner accepts any run of digits and dots, so `1.2.3` arrives here
/// whole; the trailing `.3` is ignored and the value is `1.2`. A lone `.`
/// reads as `0.0`.
fn parse_number(text: &str) -> f64 {
    let end = match text.find('.') {
        Some(dot) => text[dot + 1..]
            .find('.')
            .map_or(text.len(), |second| dot + 1 + second),
        None => text.len(),
    };
    text[..end].parse::<f64>().unwrap_or(0.0)
}

pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::from_source(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|token| token.kind).collect()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Identifier(name.to_string())
    }

    #[test]
    fn test_simple_program() {
        let input = indoc! {"
            extern sin(x);
            def f(a b) a*b + sin(a)
            f(1, 2.5)
        "};
        let expected = vec![
            TokenKind::Extern,
            ident("sin"),
            TokenKind::Char('('),
            ident("x"),
            TokenKind::Char(')'),
            TokenKind::Char(';'),
            TokenKind::Def,
            ident("f"),
            TokenKind::Char('('),
            ident("a"),
            ident("b"),
            TokenKind::Char(')'),
            ident("a"),
            TokenKind::Char('*'),
            ident("b"),
            TokenKind::Char('+'),
            ident("sin"),
            TokenKind::Char('('),
            ident("a"),
            TokenKind::Char(')'),
            ident("f"),
            TokenKind::Char('('),
            TokenKind::Number(1.0),
            TokenKind::Char(','),
            TokenKind::Number(2.5),
            TokenKind::Char(')'),
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn comment_is_discarded_before_number() {
        assert_eq!(kinds("# comment\n42"), vec![TokenKind::Number(42.0), TokenKind::Eof]);
    }

    #[test]
    fn comment_ended_by_carriage_return() {
        assert_eq!(kinds("# note\rx"), vec![ident("x"), TokenKind::Eof]);
    }

    #[test]
    fn comment_running_into_end_of_input_yields_eof() {
        assert_eq!(kinds("1 # trailing"), vec![TokenKind::Number(1.0), TokenKind::Eof]);
    }

    #[test]
    fn eof_is_sticky() {
        let mut lexer = Lexer::from_source("x");
        assert_eq!(lexer.next_token().kind, ident("x"));
        for _ in 0..3 {
            assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        }
    }

    #[test]
    fn minus_is_not_folded_into_literal() {
        assert_eq!(
            kinds("-3"),
            vec![TokenKind::Char('-'), TokenKind::Number(3.0), TokenKind::Eof]
        );
    }

    #[test]
    fn malformed_literals_read_longest_valid_prefix() {
        assert_eq!(kinds("1.2.3"), vec![TokenKind::Number(1.2), TokenKind::Eof]);
        assert_eq!(kinds("4..5"), vec![TokenKind::Number(4.0), TokenKind::Eof]);
        assert_eq!(kinds(".5"), vec![TokenKind::Number(0.5), TokenKind::Eof]);
        assert_eq!(kinds("."), vec![TokenKind::Number(0.0), TokenKind::Eof]);
    }

    #[test]
    fn identifiers_stop_at_non_alphanumeric() {
        assert_eq!(
            kinds("abc_def x1"),
            vec![
                ident("abc"),
                TokenKind::Char('_'),
                TokenKind::Def,
                ident("x1"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords_require_exact_match() {
        assert_eq!(
            kinds("def define extern externs"),
            vec![
                TokenKind::Def,
                ident("define"),
                TokenKind::Extern,
                ident("externs"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let tokens = tokenize("a\n  bc");
        assert_eq!(tokens[0].span, Span { line: 1, column: 1 });
        assert_eq!(tokens[1].span, Span { line: 2, column: 3 });
    }

    #[test]
    fn iterator_yields_spans_and_stops_before_eof() {
        let spans: Vec<Span> = Lexer::from_source("def f(x)\n# note\n  x + 1 # tail")
            .map(|token| token.span)
            .collect();
        assert_eq!(spans.len(), 8);
        assert_eq!(spans[0], Span { line: 1, column: 1 });
        assert_eq!(spans[4], Span { line: 1, column: 8 });
        assert_eq!(spans[5], Span { line: 3, column: 3 });
        assert_eq!(spans[7], Span { line: 3, column: 7 });
    }

    #[test]
    fn eof_after_trailing_comment_points_past_it() {
        let tokens = tokenize("x # tail");
        assert_eq!(tokens[1].kind, TokenKind::Eof);
        assert_eq!(tokens[1].span, Span { line: 1, column: 9 });
    }
}
