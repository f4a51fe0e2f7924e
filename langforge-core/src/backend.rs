//! Shared contract for the text backends.

use crate::ast::SourceAst;
use crate::error::CoreError;

/// Turns a parse tree into target text.
///
/// Translation never fails: constructs a backend cannot express are
/// written as a placeholder comment and the rest of the tree is still
/// translated.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn translate(&self, ast: &SourceAst) -> String;
}

/// Value of an integer literal on targets whose `int` is 32 bits wide.
pub(crate) fn int_literal(text: &str) -> Result<i32, CoreError> {
    text.parse()
        .map_err(|_| CoreError::Codegen(format!("integer literal {text} does not fit in 32 bits")))
}

pub(crate) fn float_literal(text: &str) -> Result<f64, CoreError> {
    text.parse()
        .map_err(|_| CoreError::Codegen(format!("invalid float literal {text}")))
}

/// Line-oriented output buffer with indentation tracking.
#[derive(Debug)]
pub(crate) struct CodeWriter {
    out: String,
    depth: usize,
    unit: &'static str,
}

impl CodeWriter {
    pub(crate) fn new(unit: &'static str) -> Self {
        CodeWriter {
            out: String::new(),
            depth: 0,
            unit,
        }
    }

    pub(crate) fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str(self.unit);
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    pub(crate) fn blank(&mut self) {
        self.out.push('\n');
    }

    pub(crate) fn indent(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indents_nested_lines() {
        let mut w = CodeWriter::new("    ");
        w.line("a {");
        w.indent();
        w.line("b;");
        w.dedent();
        w.dedent();
        w.line("}");
        assert_eq!(w.finish(), "a {\n    b;\n}\n");
    }

    #[test]
    fn literals_must_fit_the_target() {
        assert_eq!(int_literal("2147483647").unwrap(), i32::MAX);
        assert_eq!(float_literal("2.5").unwrap(), 2.5);
        let err = int_literal("99999999999").unwrap_err();
        assert!(matches!(err, CoreError::Codegen(message) if message.contains("99999999999")));
    }
}
