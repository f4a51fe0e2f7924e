use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// The interpreter could not match the start rule, or left input unconsumed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error at line {line}, column {column}: expected {}", expected_list(.expected))]
pub struct SyntaxError {
    pub position: usize,
    pub line: usize,
    pub column: usize,
    pub expected: Vec<String>,
}

impl SyntaxError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.to_string(), Span::new(self.position, self.position))
            .with_code("S0001")
    }
}

fn expected_list(expected: &[String]) -> String {
    match expected {
        [] => "a valid construct".to_string(),
        [single] => single.clone(),
        many => format!("one of {}", many.join(", ")),
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("invalid language configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("unsupported emit format: {0}")]
    UnsupportedFormat(String),
    #[error("language definition directory was not found at {0}")]
    MissingLanguageRoot(PathBuf),
    #[error("unknown language: {0}")]
    UnknownLanguage(String),
    #[error("grammar notation error on line {line}: {message}")]
    GrammarNotation { line: usize, message: String },
    #[error("grammar is invalid: {}", summarize(.0))]
    InvalidGrammar(Vec<Diagnostic>),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("edit [{offset}, {offset}+{old_len}) does not fit a source of {len} bytes")]
    InvalidEdit {
        offset: usize,
        old_len: usize,
        len: usize,
    },
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("code generation error: {0}")]
    Codegen(String),
}
