use thiserror::Error;

use crate::token::{Span, TokenKind};

/// Structural grammar violations. Each carries the offending token, which
/// the parser leaves unconsumed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Expected ')' at {span}, got {found}")]
    ExpectedCloseParen { found: TokenKind, span: Span },
    #[error("Expected ')' or ',' in argument list at {span}, got {found}")]
    ExpectedArgumentSeparator { found: TokenKind, span: Span },
    #[error("Unknown token when expecting an expression at {span}, got {found}")]
    ExpectedExpression { found: TokenKind, span: Span },
    #[error("Expected function name in prototype at {span}, got {found}")]
    ExpectedFunctionName { found: TokenKind, span: Span },
    #[error("Expected '(' in prototype at {span}, got {found}")]
    ExpectedPrototypeOpen { found: TokenKind, span: Span },
    #[error("Expected ')' in prototype at {span}, got {found}")]
    ExpectedPrototypeClose { found: TokenKind, span: Span },
    #[error("'{word}' at {span} is a reserved word; conditionals and loops are not supported")]
    ReservedWord { word: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::ExpectedCloseParen { span, .. }
            | ParseError::ExpectedArgumentSeparator { span, .. }
            | ParseError::ExpectedExpression { span, .. }
            | ParseError::ExpectedFunctionName { span, .. }
            | ParseError::ExpectedPrototypeOpen { span, .. }
            | ParseError::ExpectedPrototypeClose { span, .. }
            | ParseError::ReservedWord { span, .. } => *span,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
