//! Interfaces between the code generator and the machinery that turns its
//! requests into runnable code.
//!
//! Code generation never sees instructions directly: it asks a [`Backend`]
//! to declare and define functions and, while a body is open, asks the
//! [`FunctionEmitter`] for constants, arithmetic and calls. An [`Executor`]
//! then runs finished nullary functions.

use std::fmt;

use thiserror::Error;

use crate::codegen::CodegenResult;

pub mod jit;
pub mod vm;

/// Arithmetic and comparison operators with code generation support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Unordered-or-less-than comparison yielding 0.0 or 1.0.
    LessThan,
}

impl BinaryOp {
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(BinaryOp::Add),
            '-' => Some(BinaryOp::Sub),
            '*' => Some(BinaryOp::Mul),
            '<' => Some(BinaryOp::LessThan),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::LessThan => '<',
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::LessThan => {
                // true when less or when either side is NaN
                if lhs >= rhs { 0.0 } else { 1.0 }
            }
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Builds the body of one function. Only lives for the duration of
/// [`Backend::define_function`].
pub trait FunctionEmitter {
    type Value: Copy;
    type Function: Copy + Eq + fmt::Debug;

    fn lookup(&self, name: &str) -> Option<Self::Function>;
    fn arity(&self, function: Self::Function) -> usize;

    fn constant(&mut self, value: f64) -> Self::Value;
    fn binary(&mut self, op: BinaryOp, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    fn call(&mut self, callee: Self::Function, args: &[Self::Value]) -> CodegenResult<Self::Value>;
}

/// The module being populated: a set of named `f64 x N -> f64` functions.
pub trait Backend {
    type Value: Copy;
    type Function: Copy + Eq + fmt::Debug;

    fn name(&self) -> &'static str;

    fn lookup(&self, name: &str) -> Option<Self::Function>;
    fn arity(&self, function: Self::Function) -> usize;
    fn is_defined(&self, function: Self::Function) -> bool;

    /// Adds a body-less declaration. Names are unique within the module.
    fn declare_function(&mut self, name: &str, params: &[String]) -> CodegenResult<Self::Function>;

    /// Opens a body for `function` and hands it to `generate` together with
    /// the parameter values. The returned value becomes the function's return
    /// value, after which the backend optimizes and finalizes the function.
    /// If `generate` fails the partial body is dropped and the error returned;
    /// the declaration itself is left in place.
    fn define_function<G>(&mut self, function: Self::Function, generate: G) -> CodegenResult<()>
    where
        G: FnOnce(
            &mut dyn FunctionEmitter<Value = Self::Value, Function = Self::Function>,
            &[Self::Value],
        ) -> CodegenResult<Self::Value>;

    /// Forgets a function and frees its name.
    fn remove_function(&mut self, function: Self::Function);

    /// Human-readable dump of the declaration or generated code.
    fn listing(&self, function: Self::Function) -> Option<String>;
}

/// Nesting depth at which execution gives up on runaway recursion.
pub const DEFAULT_CALL_DEPTH_LIMIT: usize = 1_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Function '{name}' takes {arity} arguments and cannot be executed directly")]
    NotNullary { name: String, arity: usize },
    #[error("Function '{name}' has no body")]
    Undefined { name: String },
    #[error("Stale function handle")]
    StaleHandle,
    #[error("Call depth limit of {limit} exceeded")]
    CallDepthExceeded { limit: usize },
    #[error("Execution failed: {message}")]
    Backend { message: String },
}

/// Runs finished functions.
pub trait Executor: Backend {
    fn execute(&mut self, function: Self::Function) -> Result<f64, ExecutionError>;
}
