//! Recursive-descent parser with precedence climbing for binary operators.
//!
//! Grammar:
//!
//! ```text
//! expression     := primary binopRHS
//! binopRHS       := ( binop primary )*
//! primary        := number | identifierExpr | '(' expression ')'
//! identifierExpr := identifier | identifier '(' ( expression (',' expression)* )? ')'
//! prototype      := identifier '(' identifier* ')'
//! definition     := 'def' prototype expression
//! external       := 'extern' prototype
//! ```
//!
//! The parser holds exactly one token of lookahead. Every production starts
//! on its first token and, on success, leaves `current` just past its last
//! one. On failure nothing past the offending token is consumed.

mod error;

pub use error::{ParseError, ParseResult};

use crate::ast::{Expr, Function, Item, Prototype};
use crate::lexer::Lexer;
use crate::precedence::OperatorTable;
use crate::token::{Token, TokenKind};

/// Identifiers that name control flow this language does not have.
const RESERVED_WORDS: [&str; 5] = ["if", "then", "else", "for", "in"];

pub struct Parser<'t, I: Iterator<Item = char>> {
    lexer: Lexer<I>,
    current: Token,
    operators: &'t OperatorTable,
}

impl<'t, I: Iterator<Item = char>> Parser<'t, I> {
    /// Creates a parser and reads the first token.
    pub fn new(mut lexer: Lexer<I>, operators: &'t OperatorTable) -> Self {
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            operators,
        }
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    /// Moves to the next token, returning the one that was current.
    pub fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        std::mem::replace(&mut self.current, next)
    }

    /// Parses one definition, extern or bare expression, dispatching on the
    /// current token. Callers handle end of input and `;` themselves.
    pub fn parse_item(&mut self) -> ParseResult<Item> {
        match self.current.kind {
            TokenKind::Def => self.parse_definition().map(Item::Definition),
            TokenKind::Extern => self.parse_extern().map(Item::Extern),
            _ => self.parse_top_level_expr().map(Item::Expression),
        }
    }

    /// definition := 'def' prototype expression
    pub fn parse_definition(&mut self) -> ParseResult<Function> {
        self.advance(); // eat 'def'
        let prototype = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function::new(prototype, body))
    }

    /// external := 'extern' prototype
    pub fn parse_extern(&mut self) -> ParseResult<Prototype> {
        self.advance(); // eat 'extern'
        self.parse_prototype()
    }

    /// Wraps a bare expression in an anonymous nullary function.
    pub fn parse_top_level_expr(&mut self) -> ParseResult<Function> {
        let body = self.parse_expression()?;
        Ok(Function::new(Prototype::anonymous(), body))
    }

    /// prototype := identifier '(' identifier* ')'
    pub fn parse_prototype(&mut self) -> ParseResult<Prototype> {
        let name = match &self.current.kind {
            TokenKind::Identifier(name) => name.clone(),
            other => {
                return Err(ParseError::ExpectedFunctionName {
                    found: other.clone(),
                    span: self.current.span,
                });
            }
        };
        self.reject_reserved(&name)?;
        self.advance();

        if !self.current.kind.is_char('(') {
            return Err(ParseError::ExpectedPrototypeOpen {
                found: self.current.kind.clone(),
                span: self.current.span,
            });
        }
        self.advance();

        let mut params = Vec::new();
        while let TokenKind::Identifier(param) = &self.current.kind {
            let param = param.clone();
            self.reject_reserved(&param)?;
            params.push(param);
            self.advance();
        }

        if !self.current.kind.is_char(')') {
            return Err(ParseError::ExpectedPrototypeClose {
                found: self.current.kind.clone(),
                span: self.current.span,
            });
        }
        self.advance();

        Ok(Prototype::new(name, params))
    }

    /// expression := primary binopRHS
    pub fn parse_expression(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_primary()?;
        self.parse_binop_rhs(0, lhs)
    }

    /// Folds `(op primary)*` onto `lhs`, consuming only operators whose
    /// precedence is at least `min_precedence`.
    fn parse_binop_rhs(&mut self, min_precedence: i32, mut lhs: Expr) -> ParseResult<Expr> {
        loop {
            let precedence = self.current_precedence();
            let op = match self.current.kind {
                TokenKind::Char(op) if precedence >= min_precedence => op,
                _ => return Ok(lhs),
            };
            self.advance(); // eat the operator

            let mut rhs = self.parse_primary()?;

            // A tighter-binding operator after rhs takes rhs as its left operand.
            if precedence < self.current_precedence() {
                rhs = self.parse_binop_rhs(precedence + 1, rhs)?;
            }

            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    /// primary := number | identifierExpr | '(' expression ')'
    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match &self.current.kind {
            TokenKind::Identifier(_) => self.parse_identifier_expr(),
            TokenKind::Number(value) => {
                let value = *value;
                self.advance();
                Ok(Expr::Number(value))
            }
            TokenKind::Char('(') => self.parse_paren_expr(),
            other => Err(ParseError::ExpectedExpression {
                found: other.clone(),
                span: self.current.span,
            }),
        }
    }

    fn parse_paren_expr(&mut self) -> ParseResult<Expr> {
        self.advance(); // eat '('
        let expr = self.parse_expression()?;
        if !self.current.kind.is_char(')') {
            return Err(ParseError::ExpectedCloseParen {
                found: self.current.kind.clone(),
                span: self.current.span,
            });
        }
        self.advance();
        Ok(expr)
    }

    /// identifierExpr := identifier | identifier '(' args? ')'
    fn parse_identifier_expr(&mut self) -> ParseResult<Expr> {
        let name = match &self.current.kind {
            TokenKind::Identifier(name) => name.clone(),
            other => {
                return Err(ParseError::ExpectedExpression {
                    found: other.clone(),
                    span: self.current.span,
                });
            }
        };
        self.reject_reserved(&name)?;
        self.advance();

        if !self.current.kind.is_char('(') {
            return Ok(Expr::Variable(name));
        }
        self.advance(); // eat '('

        let mut args = Vec::new();
        if !self.current.kind.is_char(')') {
            loop {
                args.push(self.parse_expression()?);
                if self.current.kind.is_char(')') {
                    break;
                }
                if !self.current.kind.is_char(',') {
                    return Err(ParseError::ExpectedArgumentSeparator {
                        found: self.current.kind.clone(),
                        span: self.current.span,
                    });
                }
                self.advance();
            }
        }
        self.advance(); // eat ')'

        Ok(Expr::Call { callee: name, args })
    }

    fn current_precedence(&self) -> i32 {
        self.operators.precedence_of(&self.current.kind)
    }

    fn reject_reserved(&self, word: &str) -> ParseResult<()> {
        if RESERVED_WORDS.contains(&word) {
            return Err(ParseError::ReservedWord {
                word: word.to_string(),
                span: self.current.span,
            });
        }
        Ok(())
    }
}

/// Parses a whole source text, stopping at the first syntax error.
pub fn parse(source: &str, operators: &OperatorTable) -> ParseResult<Vec<Item>> {
    let mut parser = Parser::new(Lexer::from_source(source), operators);
    let mut items = Vec::new();
    loop {
        match parser.current().kind {
            TokenKind::Eof => return Ok(items),
            TokenKind::Char(';') => {
                parser.advance();
            }
            _ => items.push(parser.parse_item()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Span;
    use indoc::indoc;

    fn num(value: f64) -> Expr {
        Expr::Number(value)
    }

    fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    fn parse_expr(source: &str) -> ParseResult<Expr> {
        let operators = OperatorTable::standard();
        let mut parser = Parser::new(Lexer::from_source(source), &operators);
        parser.parse_expression()
    }

    #[test]
    fn higher_precedence_binds_right() {
        assert_eq!(
            parse_expr("1+2*3").unwrap(),
            Expr::binary('+', num(1.0), Expr::binary('*', num(2.0), num(3.0)))
        );
    }

    #[test]
    fn higher_precedence_binds_left() {
        assert_eq!(
            parse_expr("1*2+3").unwrap(),
            Expr::binary('+', Expr::binary('*', num(1.0), num(2.0)), num(3.0))
        );
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        assert_eq!(
            parse_expr("1-2-3").unwrap(),
            Expr::binary('-', Expr::binary('-', num(1.0), num(2.0)), num(3.0))
        );
    }

    #[test]
    fn mixed_chain_renders_expected_tree() {
        let expr = parse_expr("a < b + c * d - e").unwrap();
        assert_eq!(expr.to_string(), "(< a (- (+ b (* c d)) e))");
    }

    #[test]
    fn parentheses_override_precedence() {
        assert_eq!(
            parse_expr("(1+2)*3").unwrap(),
            Expr::binary('*', Expr::binary('+', num(1.0), num(2.0)), num(3.0))
        );
    }

    #[test]
    fn stops_at_unregistered_operator() {
        let operators = OperatorTable::standard();
        let mut parser = Parser::new(Lexer::from_source("1 + 2 / 3"), &operators);
        assert_eq!(
            parser.parse_expression().unwrap(),
            Expr::binary('+', num(1.0), num(2.0))
        );
        assert_eq!(parser.current().kind, TokenKind::Char('/'));
    }

    #[test]
    fn registered_operator_parses_with_its_precedence() {
        let mut operators = OperatorTable::standard();
        operators.insert('/', 40).unwrap();
        let mut parser = Parser::new(Lexer::from_source("1 + 4 / 2"), &operators);
        assert_eq!(
            parser.parse_expression().unwrap().to_string(),
            "(+ 1 (/ 4 2))"
        );
    }

    #[test]
    fn parses_calls() {
        assert_eq!(
            parse_expr("f()").unwrap(),
            Expr::Call {
                callee: "f".to_string(),
                args: vec![],
            }
        );
        assert_eq!(
            parse_expr("g(1, x+2)").unwrap(),
            Expr::Call {
                callee: "g".to_string(),
                args: vec![num(1.0), Expr::binary('+', var("x"), num(2.0))],
            }
        );
    }

    #[test]
    fn reports_missing_argument_separator() {
        let err = parse_expr("f(1 2)").unwrap_err();
        assert_eq!(
            err,
            ParseError::ExpectedArgumentSeparator {
                found: TokenKind::Number(2.0),
                span: Span { line: 1, column: 5 },
            }
        );
    }

    #[test]
    fn reports_missing_close_paren() {
        let err = parse_expr("(1 + 2").unwrap_err();
        assert!(matches!(
            err,
            ParseError::ExpectedCloseParen {
                found: TokenKind::Eof,
                ..
            }
        ));
    }

    #[test]
    fn reports_unexpected_token_and_leaves_it_current() {
        let operators = OperatorTable::standard();
        let mut parser = Parser::new(Lexer::from_source("1 + )"), &operators);
        let err = parser.parse_expression().unwrap_err();
        assert!(err.to_string().contains("Unknown token when expecting an expression"));
        assert_eq!(parser.current().kind, TokenKind::Char(')'));
    }

    #[test]
    fn parses_program_items() {
        let source = indoc! {"
            # adds two numbers
            def add(a b) a + b;
            extern sin(x);
            add(1, sin(2))
        "};
        let items = parse(source, &OperatorTable::standard()).unwrap();
        assert_eq!(
            items,
            vec![
                Item::Definition(Function::new(
                    Prototype::new("add", vec!["a".to_string(), "b".to_string()]),
                    Expr::binary('+', var("a"), var("b")),
                )),
                Item::Extern(Prototype::new("sin", vec!["x".to_string()])),
                Item::Expression(Function::new(
                    Prototype::anonymous(),
                    Expr::Call {
                        callee: "add".to_string(),
                        args: vec![
                            num(1.0),
                            Expr::Call {
                                callee: "sin".to_string(),
                                args: vec![num(2.0)],
                            },
                        ],
                    },
                )),
            ]
        );
    }

    #[test]
    fn prototype_errors() {
        let operators = OperatorTable::standard();
        let cases: [(&str, &str); 3] = [
            ("def 1(x) x", "Expected function name in prototype"),
            ("def f x", "Expected '(' in prototype"),
            ("extern f(a, b)", "Expected ')' in prototype"),
        ];
        for (source, message) in cases {
            let err = parse(source, &operators).unwrap_err();
            assert!(
                err.to_string().contains(message),
                "{source}: expected '{message}', got '{err}'"
            );
        }
    }

    #[test]
    fn conditional_definition_is_a_syntax_error() {
        let err = parse(
            "def fib(x) if x < 3 then 1 else fib(x-1)+fib(x-2)",
            &OperatorTable::standard(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::ReservedWord {
                word: "if".to_string(),
                span: Span { line: 1, column: 12 },
            }
        );
    }

    #[test]
    fn reserved_words_rejected_in_prototypes() {
        let err = parse("def f(then) 1", &OperatorTable::standard()).unwrap_err();
        assert!(matches!(err, ParseError::ReservedWord { word, .. } if word == "then"));
    }
}
