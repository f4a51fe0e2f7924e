//! Core of the langforge language workbench.
//!
//! A language is defined by a PEG grammar plus a little configuration.
//! From that definition this crate provides the whole pipeline:
//!
//!   grammar text / rule map
//!     -> grammar_parser (Grammar)
//!     -> interpreter    (SourceAst, with spans)
//!     -> incremental    (edit-driven reparsing)
//!     -> shape + typecheck + protocol (meaning, types, conformance)
//!     -> eval | codegen_c | codegen_wasm | codegen_llvm | codegen_python
//!
//! Front-ends (the CLI, an editor, a language server) should depend on
//! this crate rather than reimplementing any stage.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: grammars and parsing
// ---------------------------------------------------------------------

pub mod grammar;
pub mod grammar_parser;
pub mod ast;
pub mod interpreter;
pub mod incremental;

// ---------------------------------------------------------------------
// Semantic layers: constructs, types, protocols, evaluation
// ---------------------------------------------------------------------

pub mod shape;
pub mod types;
pub mod typecheck;
pub mod protocol;
pub mod eval;

// ---------------------------------------------------------------------
// Language definitions
// ---------------------------------------------------------------------

pub mod config;
pub mod language;

// ---------------------------------------------------------------------
// Back-end: code generation and compiler orchestration
// ---------------------------------------------------------------------

pub mod backend;
pub mod codegen_c;
pub mod codegen_wasm;
pub mod codegen_llvm;
pub mod codegen_python;
pub mod compiler;

#[cfg(test)]
mod fixtures;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use ast::{NodeId, SourceAst};
pub use backend::Backend;
pub use compiler::{CompilationArtifact, Target, compile, compile_wasm, emit_llvm_ir, emit_text};
pub use config::{LanguageConfig, LanguageRegistry, default_language_root};
pub use diagnostic::{Diagnostic, Severity};
pub use error::{CoreError, SyntaxError};
pub use grammar::Grammar;
pub use grammar_parser::GrammarParser;
pub use incremental::{IncrementalParser, ParseStats, SourceEdit};
pub use interpreter::Interpreter;
pub use language::{Execution, Language};
