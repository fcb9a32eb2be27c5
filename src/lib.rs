//! Crate root: wires together the compilation pipeline.
//!
//! The stages are small and run strictly in sequence:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and resolves names through `locals`,
//!   returning function definitions whose variables are already stack offsets.
//! - `codegen` lowers the parsed program into x86-64 Intel-syntax assembly.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod codegen;
pub mod error;
pub mod locals;
pub mod parser;
pub mod tokenizer;
pub mod ty;

pub use error::{CompileError, CompileResult, ErrorKind};

/// Compile a source string into Intel-syntax assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let program = parser::parse(tokens, source)?;
  Ok(codegen::generate(&program))
}
