use thiserror::Error;

/// Failures while lowering one top-level unit. Each aborts only that unit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("Unknown variable name '{name}'")]
    UnknownVariable { name: String },
    #[error("Unknown function referenced '{name}'")]
    UnknownFunction { name: String },
    #[error("Incorrect number of arguments passed to '{name}': expected {expected}, got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Invalid binary operator '{op}'")]
    InvalidBinaryOperator { op: char },
    #[error("Function '{name}' cannot be redefined")]
    Redefinition { name: String },
    #[error("Function '{name}' redeclared with {found} parameters, previously {expected}")]
    SignatureMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Backend failure: {message}")]
    Backend { message: String },
}

impl CodegenError {
    pub fn backend(error: impl std::fmt::Display) -> Self {
        CodegenError::Backend {
            message: error.to_string(),
        }
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;
