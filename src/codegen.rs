//! Lowers syntax trees into requests against a [`Backend`].
//!
//! Expressions are walked depth-first, post-order. The first failing subtree
//! aborts lowering of the whole top-level unit; a function whose body fails
//! is removed from the module rather than left half-built.

mod error;

pub use error::{CodegenError, CodegenResult};

use rustc_hash::FxHashMap;

use crate::ast::{Expr, Function, Prototype};
use crate::backend::{Backend, BinaryOp, FunctionEmitter};

pub struct Codegen<B: Backend> {
    backend: B,
    /// Parameter name to value, valid for the body currently being lowered.
    named_values: FxHashMap<String, B::Value>,
}

impl<B: Backend> Codegen<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            named_values: FxHashMap::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Declares `prototype`, reusing an existing declaration of the same
    /// name and arity.
    pub fn declare(&mut self, prototype: &Prototype) -> CodegenResult<B::Function> {
        if let Some(existing) = self.backend.lookup(&prototype.name) {
            let expected = self.backend.arity(existing);
            if expected != prototype.arity() {
                return Err(CodegenError::SignatureMismatch {
                    name: prototype.name.clone(),
                    expected,
                    found: prototype.arity(),
                });
            }
            return Ok(existing);
        }
        self.backend
            .declare_function(&prototype.name, &prototype.params)
    }

    /// Declares (or resolves) the function and generates its body.
    pub fn define(&mut self, function: &Function) -> CodegenResult<B::Function> {
        let prototype = &function.prototype;
        let handle = self.declare(prototype)?;
        if self.backend.is_defined(handle) {
            return Err(CodegenError::Redefinition {
                name: prototype.name.clone(),
            });
        }

        let named_values = &mut self.named_values;
        let result = self.backend.define_function(handle, |emitter, params| {
            named_values.clear();
            // A repeated parameter name refers to its first occurrence.
            for (name, value) in prototype.params.iter().zip(params) {
                named_values.entry(name.clone()).or_insert(*value);
            }
            lower_expr(emitter, named_values, &function.body)
        });
        self.named_values.clear();

        match result {
            Ok(()) => Ok(handle),
            Err(err) => {
                self.backend.remove_function(handle);
                Err(err)
            }
        }
    }

    pub fn remove(&mut self, function: B::Function) {
        self.backend.remove_function(function);
    }
}

fn lower_expr<E>(
    emitter: &mut E,
    named_values: &FxHashMap<String, E::Value>,
    expr: &Expr,
) -> CodegenResult<E::Value>
where
    E: FunctionEmitter + ?Sized,
{
    match expr {
        Expr::Number(value) => Ok(emitter.constant(*value)),
        Expr::Variable(name) => named_values
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::UnknownVariable { name: name.clone() }),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = lower_expr(emitter, named_values, lhs)?;
            let rhs = lower_expr(emitter, named_values, rhs)?;
            let op = BinaryOp::from_symbol(*op)
                .ok_or(CodegenError::InvalidBinaryOperator { op: *op })?;
            Ok(emitter.binary(op, lhs, rhs))
        }
        Expr::Call { callee, args } => {
            let function = emitter
                .lookup(callee)
                .ok_or_else(|| CodegenError::UnknownFunction {
                    name: callee.clone(),
                })?;
            let expected = emitter.arity(function);
            if expected != args.len() {
                return Err(CodegenError::ArityMismatch {
                    name: callee.clone(),
                    expected,
                    found: args.len(),
                });
            }
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(lower_expr(emitter, named_values, arg)?);
            }
            emitter.call(function, &values)
        }
    }
}
