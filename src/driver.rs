//! Top-level read, generate and evaluate loop.
//!
//! The driver pulls one top-level unit at a time from the parser, hands it
//! to code generation, and evaluates bare expressions immediately. A failing
//! unit is reported and skipped; everything generated before it stays
//! callable.

use std::io::{self, Write};

use thiserror::Error;

use crate::ast::{Function, Item};
use crate::backend::{ExecutionError, Executor};
use crate::codegen::{Codegen, CodegenError};
use crate::lexer::Lexer;
use crate::parser::{ParseError, Parser};
use crate::precedence::OperatorTable;
use crate::token::TokenKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Dump each declaration and generated function to stderr.
    pub emit_ir: bool,
    /// Dump each parsed unit as an s-expression to stderr.
    pub print_ast: bool,
    /// Write `ready> ` to stderr before each unit.
    pub prompt: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            emit_ir: true,
            print_ast: false,
            prompt: false,
        }
    }
}

/// Result of processing one top-level unit.
#[derive(Debug)]
pub enum Outcome {
    Separator,
    Declared { name: String, listing: String },
    Defined { name: String, listing: String },
    Evaluated { value: f64, listing: String },
    Failed(Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Top-level units processed, not counting bare `;`.
    pub units: usize,
    pub failures: usize,
}

pub struct Driver<'t, I, B, O, E>
where
    I: Iterator<Item = char>,
    B: Executor,
    O: Write,
    E: Write,
{
    parser: Parser<'t, I>,
    codegen: Codegen<B>,
    options: Options,
    out: O,
    err: E,
}

impl<'t, I, B, O, E> Driver<'t, I, B, O, E>
where
    I: Iterator<Item = char>,
    B: Executor,
    O: Write,
    E: Write,
{
    /// Creates a driver. This reads the first token from `lexer`.
    pub fn new(
        lexer: Lexer<I>,
        operators: &'t OperatorTable,
        backend: B,
        options: Options,
        out: O,
        err: E,
    ) -> Self {
        Self {
            parser: Parser::new(lexer, operators),
            codegen: Codegen::new(backend),
            options,
            out,
            err,
        }
    }

    pub fn backend(&self) -> &B {
        self.codegen.backend()
    }

    pub fn into_parts(self) -> (B, O, E) {
        (self.codegen.into_backend(), self.out, self.err)
    }

    /// Processes one top-level unit. Returns `None` at end of input.
    pub fn step(&mut self) -> io::Result<Option<Outcome>> {
        if matches!(self.parser.current().kind, TokenKind::Eof) {
            return Ok(None);
        }
        if self.parser.current().kind.is_char(';') {
            self.parser.advance();
            return Ok(Some(Outcome::Separator));
        }

        let item = match self.parser.parse_item() {
            Ok(item) => item,
            Err(err) => {
                // resynchronize on the next token
                self.parser.advance();
                return Ok(Some(Outcome::Failed(err.into())));
            }
        };
        if self.options.print_ast {
            writeln!(self.err, "Parsed: {item}")?;
        }

        Ok(Some(match item {
            Item::Extern(prototype) => match self.codegen.declare(&prototype) {
                Ok(handle) => Outcome::Declared {
                    listing: self.listing(handle),
                    name: prototype.name,
                },
                Err(err) => Outcome::Failed(err.into()),
            },
            Item::Definition(function) => match self.codegen.define(&function) {
                Ok(handle) => Outcome::Defined {
                    listing: self.listing(handle),
                    name: function.prototype.name,
                },
                Err(err) => Outcome::Failed(err.into()),
            },
            Item::Expression(function) => self.evaluate(&function),
        }))
    }

    fn evaluate(&mut self, function: &Function) -> Outcome {
        let handle = match self.codegen.define(function) {
            Ok(handle) => handle,
            Err(err) => return Outcome::Failed(err.into()),
        };
        let listing = self.listing(handle);
        let result = self.codegen.backend_mut().execute(handle);
        self.codegen.remove(handle);
        match result {
            Ok(value) => Outcome::Evaluated { value, listing },
            Err(err) => Outcome::Failed(err.into()),
        }
    }

    fn listing(&self, handle: B::Function) -> String {
        self.codegen.backend().listing(handle).unwrap_or_default()
    }

    /// Processes units until end of input, reporting each one.
    pub fn run(&mut self) -> io::Result<Summary> {
        let mut summary = Summary::default();
        loop {
            if self.options.prompt {
                write!(self.err, "ready> ")?;
                self.err.flush()?;
            }
            let Some(outcome) = self.step()? else {
                break;
            };
            if !matches!(outcome, Outcome::Separator) {
                summary.units += 1;
            }
            if matches!(outcome, Outcome::Failed(_)) {
                summary.failures += 1;
            }
            self.report(outcome)?;
        }
        self.out.flush()?;
        self.err.flush()?;
        Ok(summary)
    }

    fn report(&mut self, outcome: Outcome) -> io::Result<()> {
        match outcome {
            Outcome::Separator => {}
            Outcome::Declared { listing, .. } => self.dump("Read extern:", &listing)?,
            Outcome::Defined { listing, .. } => {
                self.dump("Read function definition:", &listing)?;
            }
            Outcome::Evaluated { value, listing } => {
                self.dump("Read top-level expression:", &listing)?;
                writeln!(self.out, "Evaluated to {value:.6}")?;
            }
            Outcome::Failed(err) => writeln!(self.err, "Error: {err}")?,
        }
        Ok(())
    }

    fn dump(&mut self, header: &str, listing: &str) -> io::Result<()> {
        if self.options.emit_ir {
            writeln!(self.err, "{header}")?;
            writeln!(self.err, "{listing}")?;
        }
        Ok(())
    }
}

/// Runs a whole program with the standard operators.
pub fn run_source<B, O, E>(
    source: &str,
    backend: B,
    options: Options,
    out: O,
    err: E,
) -> io::Result<Summary>
where
    B: Executor,
    O: Write,
    E: Write,
{
    let operators = OperatorTable::standard();
    let mut driver = Driver::new(
        Lexer::from_source(source),
        &operators,
        backend,
        options,
        out,
        err,
    );
    driver.run()
}
