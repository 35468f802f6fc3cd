pub mod ast;
pub mod backend;
pub mod builtins;
pub mod codegen;
pub mod driver;
pub mod lexer;
pub mod parser;
pub mod precedence;
pub mod source;
pub mod token;
