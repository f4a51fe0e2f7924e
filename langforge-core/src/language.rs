//! A validated language: grammar, construct table and protocols bundled
//! together so callers can parse, run and check programs without
//! threading each piece by hand.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::ast::SourceAst;
use crate::config::LanguageConfig;
use crate::diagnostic::Diagnostic;
use crate::error::{CoreError, SyntaxError};
use crate::eval::{Evaluator, Value};
use crate::grammar::Grammar;
use crate::grammar_parser::GrammarParser;
use crate::incremental::IncrementalParser;
use crate::interpreter::Interpreter;
use crate::protocol::{Protocol, ProtocolChecker};
use crate::shape::ConstructTable;
use crate::typecheck::TypeInferencer;

#[derive(Debug, Clone)]
pub struct Language {
    name: String,
    extensions: Vec<String>,
    grammar: Grammar,
    table: ConstructTable,
    protocols: Vec<Protocol>,
    warnings: Vec<Diagnostic>,
}

/// Result of running a program with the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub globals: BTreeMap<String, Value>,
    pub output: Vec<String>,
}

impl Language {
    pub fn from_config(config: &LanguageConfig) -> Result<Self, CoreError> {
        let grammar = GrammarParser::new()
            .parse_rule_map(&config.grammar.to_rule_map())?
            .with_keywords(config.keywords.iter().cloned());
        let table = ConstructTable::default().with_overrides(&config.constructs);
        let mut language = Self::build(&config.name, grammar, table)?;
        language.extensions = config.extensions.clone();
        language.protocols = config.protocols.clone();
        Ok(language)
    }

    /// A language from rule-notation text, using the built-in construct
    /// aliases.
    pub fn from_grammar_text(name: &str, text: &str) -> Result<Self, CoreError> {
        let grammar = GrammarParser::new().parse(text)?;
        Self::build(name, grammar, ConstructTable::default())
    }

    fn build(name: &str, grammar: Grammar, table: ConstructTable) -> Result<Self, CoreError> {
        let (errors, warnings): (Vec<Diagnostic>, Vec<Diagnostic>) =
            grammar.validate().into_iter().partition(Diagnostic::is_error);
        for diagnostic in &errors {
            warn!(language = name, code = diagnostic.code, "{}", diagnostic.message);
        }
        for diagnostic in &warnings {
            debug!(language = name, code = diagnostic.code, "{}", diagnostic.message);
        }
        if !errors.is_empty() {
            return Err(CoreError::InvalidGrammar(errors));
        }
        debug!(language = name, rules = grammar.len(), "language ready");
        Ok(Language {
            name: name.to_string(),
            extensions: Vec::new(),
            grammar,
            table,
            protocols: Vec::new(),
            warnings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn table(&self) -> &ConstructTable {
        &self.table
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    /// Non-blocking grammar findings, such as unused rules.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn interpreter(&self) -> Interpreter<'_> {
        Interpreter::new(&self.grammar)
    }

    pub fn parse(&self, source: &str) -> Result<SourceAst, SyntaxError> {
        self.interpreter().parse(source)
    }

    /// A fresh incremental parser over a copy of the grammar.
    pub fn incremental(&self) -> IncrementalParser {
        IncrementalParser::new(self.grammar.clone())
    }

    pub fn evaluate(&self, source: &str) -> Result<Execution, CoreError> {
        let ast = self.parse(source)?;
        self.evaluate_ast(&ast)
    }

    pub fn evaluate_ast(&self, ast: &SourceAst) -> Result<Execution, CoreError> {
        let mut evaluator = Evaluator::new(ast, &self.table);
        evaluator.run()?;
        let globals = evaluator
            .globals()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(Execution {
            globals,
            output: evaluator.into_output(),
        })
    }

    /// Type-inference warnings for a parsed program.
    pub fn type_diagnostics(&self, ast: &SourceAst) -> Vec<Diagnostic> {
        let mut types = TypeInferencer::new(ast, &self.table);
        types.infer_program();
        types.into_diagnostics()
    }

    /// A checker preloaded with this language's protocols.
    pub fn protocol_checker(&self) -> ProtocolChecker {
        let mut checker = ProtocolChecker::new();
        for protocol in &self.protocols {
            checker.register_protocol(protocol.clone());
        }
        checker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LanguageRegistry, default_language_root};
    use crate::fixtures::ARITHMETIC;

    fn mini() -> Language {
        let registry = LanguageRegistry::load(default_language_root()).expect("bundled languages");
        Language::from_config(registry.get("mini").expect("mini")).expect("mini language")
    }

    #[test]
    fn evaluates_edited_source() {
        let language = Language::from_grammar_text("calc", ARITHMETIC).expect("language");
        let mut parser = language.incremental();
        parser.parse("x = 10 ;").expect("parse");
        parser.apply_edit(4, 2, "20").expect("edit");
        assert_eq!(parser.source(), "x = 20 ;");
        assert_eq!(parser.stats().total_parses, 2);

        let ast = parser.ast().expect("tree");
        let run = language.evaluate_ast(ast).expect("run");
        assert_eq!(run.globals.get("x"), Some(&Value::Int(20)));
    }

    #[test]
    fn bundled_mini_runs_programs() {
        let run = mini()
            .evaluate("fn sq(n) { return n * n; } // squares\nx = sq(3); print x + 1;")
            .expect("run");
        assert_eq!(run.globals.get("x"), Some(&Value::Int(9)));
        assert_eq!(run.output, ["10"]);
    }

    #[test]
    fn config_keywords_are_reserved() {
        let language = mini();
        assert!(language.grammar().is_keyword("fn"));
        assert!(language.grammar().is_keyword("while"));
        assert_eq!(language.extensions(), ["mini"]);
    }

    #[test]
    fn left_recursion_blocks_the_language() {
        let err = Language::from_grammar_text("bad", "a <- a \"x\" / \"y\"").unwrap_err();
        let CoreError::InvalidGrammar(diagnostics) = err else {
            panic!("expected InvalidGrammar, got {err:?}");
        };
        assert!(diagnostics.iter().any(|d| d.code == Some("G0003")));
    }

    #[test]
    fn warnings_do_not_block() {
        let language = Language::from_grammar_text(
            "calc",
            &format!("{ARITHMETIC}\nspare <- NUMBER"),
        )
        .expect("language");
        assert!(language.diagnostics().iter().any(|d| d.code == Some("G0004")));
    }

    #[test]
    fn checks_classes_against_configured_protocols() {
        let language = mini();
        let ast = language
            .parse(
                "class Square { sides = 4; fn area() { return 16; } fn draw(c) { return c; } } \
                 class Dot { fn draw(c) { return 0; } }",
            )
            .expect("parse");
        let mut checker = language.protocol_checker();
        assert_eq!(checker.register_classes(&ast, language.table()), ["Square", "Dot"]);

        assert!(checker.check("Square", "Drawable").compatible);
        let dot = checker.check("Dot", "Drawable");
        assert!(!dot.compatible);
        assert_eq!(dot.missing_features, ["method: area", "property: sides"]);
    }

    #[test]
    fn reports_type_warnings() {
        let language = mini();
        let ast = language.parse("a = 1; a = \"one\"; b = c;").expect("parse");
        let codes: Vec<_> = language
            .type_diagnostics(&ast)
            .iter()
            .filter_map(|d| d.code)
            .collect();
        assert!(codes.contains(&"T0001"));
        assert!(codes.contains(&"T0002"));
    }
}
