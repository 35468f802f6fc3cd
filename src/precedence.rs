use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::token::TokenKind;

/// Precedence reported for anything that is not a registered binary operator.
pub const NOT_AN_OPERATOR: i32 = -1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperatorError {
    #[error("Operator precedence must be positive, got {precedence} for '{op}'")]
    NonPositivePrecedence { op: char, precedence: i32 },
    #[error("'{op}' cannot be used as a binary operator")]
    ReservedCharacter { op: char },
}

/// Binary operator precedences consulted by the parser.
///
/// Registering an operator here only affects parsing; code generation keeps
/// its own list of supported operators.
#[derive(Debug, Clone, Default)]
pub struct OperatorTable {
    precedences: FxHashMap<char, i32>,
}

impl OperatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard operators; 1 is the lowest precedence.
    pub fn standard() -> Self {
        let mut table = Self::new();
        for (op, precedence) in [('<', 10), ('+', 20), ('-', 20), ('*', 40)] {
            table.precedences.insert(op, precedence);
        }
        table
    }

    pub fn insert(&mut self, op: char, precedence: i32) -> Result<(), OperatorError> {
        if precedence <= 0 {
            return Err(OperatorError::NonPositivePrecedence { op, precedence });
        }
        if !op.is_ascii_punctuation() || matches!(op, '(' | ')' | ',' | ';' | '#' | '.') {
            return Err(OperatorError::ReservedCharacter { op });
        }
        self.precedences.insert(op, precedence);
        Ok(())
    }

    pub fn get(&self, op: char) -> Option<i32> {
        self.precedences.get(&op).copied()
    }

    /// Precedence of `token` as a binary operator, or [`NOT_AN_OPERATOR`].
    pub fn precedence_of(&self, token: &TokenKind) -> i32 {
        match token {
            TokenKind::Char(op) => self.get(*op).unwrap_or(NOT_AN_OPERATOR),
            _ => NOT_AN_OPERATOR,
        }
    }
}
