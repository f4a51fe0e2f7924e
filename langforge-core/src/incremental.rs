//! Keeps a parse tree live while its source buffer is edited.
//!
//! An edit is first tried locally: the deepest rule node spanning the
//! edited range is reparsed on its own, starting where it started
//! before, and grafted back if it covers exactly the old node's span
//! (shifted by the edit). The node must also have been reached without
//! any earlier attempt, failed alternatives included, looking at the
//! edited bytes; otherwise one of those attempts could now succeed and
//! the tree would change above the node. Anything else falls back to a
//! full parse.
//! Either way a failed parse leaves the previous source and tree in
//! place.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::debug;

use crate::ast::SourceAst;
use crate::error::{CoreError, SyntaxError};
use crate::grammar::Grammar;
use crate::interpreter::Interpreter;
use crate::span::Span;

/// One mutation of the tracked buffer: replace `old_len` bytes at
/// `offset` with `new_text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEdit {
    pub offset: usize,
    pub old_len: usize,
    pub new_text: String,
}

impl SourceEdit {
    pub fn new(offset: usize, old_len: usize, new_text: impl Into<String>) -> Self {
        SourceEdit {
            offset,
            old_len,
            new_text: new_text.into(),
        }
    }

    pub fn new_len(&self) -> usize {
        self.new_text.len()
    }

    pub fn delta(&self) -> isize {
        self.new_len() as isize - self.old_len as isize
    }

    /// End of the replaced range in the old buffer.
    pub fn old_end(&self) -> usize {
        self.offset + self.old_len
    }

    fn apply_to(&self, source: &str) -> Result<String, CoreError> {
        let in_bounds = self.old_end() <= source.len()
            && source.is_char_boundary(self.offset)
            && source.is_char_boundary(self.old_end());
        if !in_bounds {
            return Err(CoreError::InvalidEdit {
                offset: self.offset,
                old_len: self.old_len,
                len: source.len(),
            });
        }
        let mut spliced = String::with_capacity(source.len() + self.new_len());
        spliced.push_str(&source[..self.offset]);
        spliced.push_str(&self.new_text);
        spliced.push_str(&source[self.old_end()..]);
        Ok(spliced)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseStats {
    pub total_parses: u64,
    pub last_parse_ms: f64,
    pub incremental_reparses: u64,
    pub full_reparses: u64,
}

#[derive(Debug, Clone)]
pub struct IncrementalParser {
    grammar: Grammar,
    left_recursive: BTreeSet<String>,
    source: String,
    ast: Option<SourceAst>,
    stats: ParseStats,
    spans_valid: bool,
    verify: bool,
}

impl IncrementalParser {
    pub fn new(grammar: Grammar) -> Self {
        let left_recursive = grammar.left_recursive_rules();
        IncrementalParser {
            grammar,
            left_recursive,
            source: String::new(),
            ast: None,
            stats: ParseStats::default(),
            spans_valid: true,
            verify: false,
        }
    }

    /// Cross-check every localized reparse against a full parse and keep
    /// the full result when they disagree.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> Option<&SourceAst> {
        self.ast.as_ref()
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Parse `source` from scratch and make it the tracked buffer.
    pub fn parse(&mut self, source: &str) -> Result<&SourceAst, SyntaxError> {
        let started = Instant::now();
        let result = Interpreter::new(&self.grammar).parse(source);
        self.record(started);
        let ast = result?;

        self.stats.full_reparses += 1;
        self.source = source.to_string();
        self.spans_valid = true;
        Ok(self.ast.insert(ast))
    }

    pub fn apply_edit(
        &mut self,
        offset: usize,
        old_len: usize,
        new_text: &str,
    ) -> Result<&SourceAst, CoreError> {
        self.apply(&SourceEdit::new(offset, old_len, new_text))
    }

    /// Splice `edit` into the buffer and re-derive the tree.
    pub fn apply(&mut self, edit: &SourceEdit) -> Result<&SourceAst, CoreError> {
        let spliced = edit.apply_to(&self.source)?;
        let started = Instant::now();

        let localized = if self.spans_valid {
            self.reparse_locally(edit, &spliced)
        } else {
            debug!("span bookkeeping invalidated, forcing full reparse");
            None
        };

        let ast = match localized {
            Some(ast) => {
                self.stats.incremental_reparses += 1;
                ast
            }
            None => {
                let result = Interpreter::new(&self.grammar).parse(&spliced);
                if result.is_err() {
                    self.record(started);
                }
                let ast = result?;
                self.stats.full_reparses += 1;
                ast
            }
        };

        self.record(started);
        self.source = spliced;
        self.spans_valid = true;
        Ok(self.ast.insert(ast))
    }

    /// Force the next edit through the full-reparse path.
    pub fn invalidate(&mut self) {
        self.spans_valid = false;
    }

    pub fn reset(&mut self) {
        self.source.clear();
        self.ast = None;
        self.stats = ParseStats::default();
        self.spans_valid = true;
    }

    fn record(&mut self, started: Instant) {
        self.stats.total_parses += 1;
        self.stats.last_parse_ms = started.elapsed().as_secs_f64() * 1000.0;
    }

    fn reparse_locally(&self, edit: &SourceEdit, spliced: &str) -> Option<SourceAst> {
        let ast = self.ast.as_ref()?;
        let target = ast.smallest_rule_enclosing(edit.offset, edit.old_end())?;
        if target == ast.root() {
            return None;
        }
        let rule = ast.node(target).rule_name()?;
        if self.left_recursive.contains(rule) {
            return None;
        }

        let node = ast.node(target);
        if node.scanned_before() > edit.offset {
            debug!(rule, scanned = node.scanned_before(), "edit visible to earlier attempts");
            return None;
        }

        let span = node.span;
        let expected = Span::new(span.start, span.end.checked_add_signed(edit.delta())?);
        let interpreter = Interpreter::new(&self.grammar);
        let reparse = interpreter
            .reparse_rule_at(rule, spliced, span.start, node.scanned_before())
            .ok()?;
        let actual = reparse.ast.span(reparse.ast.root());
        if actual != expected {
            debug!(rule, ?actual, ?expected, "localized reparse changed extent");
            return None;
        }

        let mut grafted = ast.graft(target, &reparse.ast, edit.old_end(), edit.delta());
        grafted.raise_scanned_from(expected.end, reparse.examined);
        debug!(rule, start = span.start, "localized reparse");

        if self.verify {
            let full = interpreter.parse(spliced).ok()?;
            if full != grafted {
                debug!(rule, "localized reparse disagrees with full parse");
                return None;
            }
        }
        Some(grafted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::arithmetic_grammar;
    use crate::grammar_parser::GrammarParser;

    /// Assignment alternatives that overlap on their first two elements,
    /// so which one wins depends on text past the shared prefix.
    const OVERLAPPING: &str = r#"
program <- stmt*
stmt    <- IDENT "=" num ";" / IDENT "=" val ";" / "print" val ";"
num     <- NUMBER
val     <- call / NUMBER / IDENT / "(" val ")"
call    <- IDENT "(" val? ")"
"#;

    fn parser() -> IncrementalParser {
        IncrementalParser::new(arithmetic_grammar())
    }

    fn overlapping() -> IncrementalParser {
        IncrementalParser::new(GrammarParser::new().parse(OVERLAPPING).expect("grammar"))
    }

    fn full_parse(parser: &IncrementalParser) -> SourceAst {
        Interpreter::new(parser.grammar())
            .parse(parser.source())
            .expect("full parse")
    }

    #[test]
    fn replaces_number_in_place() {
        let mut parser = parser();
        parser.parse("x = 10 ;").expect("parse");
        let before = parser.stats().total_parses;

        let ast = parser.apply_edit(4, 2, "20").expect("edit").clone();
        assert_eq!(parser.source(), "x = 20 ;");
        let number = ast.find_all("NUMBER")[0];
        assert_eq!(ast.value(number), Some("20"));
        assert_eq!(parser.stats().total_parses, before + 1);
        assert_eq!(parser.stats().incremental_reparses, 1);
        assert_eq!(ast, full_parse(&parser));
    }

    #[test]
    fn shifts_spans_after_growing_edit() {
        let mut parser = parser();
        parser.parse("a = 1 ; b = 2 ;").expect("parse");

        let ast = parser.apply_edit(4, 1, "100").expect("edit").clone();
        assert_eq!(parser.source(), "a = 100 ; b = 2 ;");
        let statements = ast.find_all("statement");
        assert_eq!(ast.span(statements[1]), Span::new(10, 17));
        assert_eq!(ast, full_parse(&parser));
        assert_eq!(parser.stats().incremental_reparses, 1);
    }

    #[test]
    fn insertion_inside_statement_reparses_statement() {
        let mut parser = parser();
        parser.parse("a = 1 ; b = 2 ;").expect("parse");

        parser.apply_edit(5, 0, " + b").expect("edit");
        assert_eq!(parser.source(), "a = 1 + b ; b = 2 ;");
        let ast = parser.ast().expect("ast").clone();
        assert_eq!(ast, full_parse(&parser));
        assert_eq!(ast.find_all("term").len(), 3);
        assert_eq!(parser.stats().incremental_reparses, 1);
    }

    #[test]
    fn insertion_between_statements_parses_fully() {
        let mut parser = parser();
        parser.parse("a = 1 ; b = 2 ;").expect("parse");

        parser.apply_edit(7, 0, " c = 3 ;").expect("edit");
        let ast = parser.ast().expect("ast").clone();
        assert_eq!(ast.find_all("statement").len(), 3);
        assert_eq!(parser.stats().incremental_reparses, 0);
        assert_eq!(parser.stats().full_reparses, 2);
    }

    #[test]
    fn failed_edit_keeps_previous_state() {
        let mut parser = parser();
        let original = parser.parse("x = 10 ;").expect("parse").clone();

        let err = parser.apply_edit(4, 2, "+").unwrap_err();
        assert!(matches!(err, CoreError::Syntax(_)));
        assert_eq!(parser.source(), "x = 10 ;");
        assert_eq!(parser.ast(), Some(&original));
        assert_eq!(parser.stats().total_parses, 2);
    }

    #[test]
    fn rejects_edit_outside_buffer() {
        let mut parser = parser();
        parser.parse("x = 10 ;").expect("parse");
        let err = parser.apply_edit(6, 5, "").unwrap_err();
        assert!(matches!(err, CoreError::InvalidEdit { len: 8, .. }));
        assert_eq!(parser.stats().total_parses, 1);
    }

    #[test]
    fn invalidate_forces_one_full_reparse() {
        let mut parser = parser();
        parser.parse("x = 10 ;").expect("parse");

        parser.invalidate();
        parser.apply_edit(4, 2, "20").expect("edit");
        assert_eq!(parser.stats().incremental_reparses, 0);
        assert_eq!(parser.stats().full_reparses, 2);

        parser.apply_edit(4, 2, "30").expect("edit");
        assert_eq!(parser.stats().incremental_reparses, 1);
    }

    #[test]
    fn edit_without_tree_parses_fully() {
        let mut parser = parser();
        parser.apply_edit(0, 0, "y = 3 ;").expect("edit");
        assert_eq!(parser.stats().full_reparses, 1);
        assert_eq!(parser.ast().map(|ast| ast.find_all("statement").len()), Some(1));
    }

    #[test]
    fn verification_agrees_with_full_parse() {
        let mut parser = parser().with_verification(true);
        parser.parse("x = 1 * 2 ; y = x ;").expect("parse");
        parser.apply_edit(8, 1, "7").expect("edit");
        assert_eq!(parser.source(), "x = 1 * 7 ; y = x ;");
        assert_eq!(parser.stats().incremental_reparses, 1);
        assert_eq!(parser.ast().cloned(), Some(full_parse(&parser)));
    }

    #[test]
    fn earlier_alternative_can_win_after_edit() {
        let mut parser = IncrementalParser::new(
            GrammarParser::new()
                .parse("stmt <- IDENT \"=\" num \";\" / IDENT \"=\" val \";\"\nnum <- NUMBER\nval <- NUMBER / IDENT\n")
                .expect("grammar"),
        );
        parser.parse("a = b ;").expect("parse");

        let ast = parser.apply_edit(4, 1, "5").expect("edit").clone();
        assert_eq!(ast, full_parse(&parser));
        assert_eq!(ast.find_all("num").len(), 1);
        assert!(ast.find_all("val").is_empty());
        assert_eq!(parser.stats().incremental_reparses, 0);
        assert_eq!(parser.stats().full_reparses, 2);
    }

    #[test]
    fn every_single_byte_edit_matches_full_parse() {
        let base = "a = b ; print f ( 1 ) ; c = 2 ;";
        let grammar = GrammarParser::new().parse(OVERLAPPING).expect("grammar");
        let interpreter = Interpreter::new(&grammar);
        let mut localized = 0;

        for offset in 0..=base.len() {
            for old_len in 0..=1 {
                if offset + old_len > base.len() {
                    continue;
                }
                for text in ["", "7", "x", "(", " ", "print", "g ( 2 )"] {
                    let mut parser = overlapping();
                    parser.parse(base).expect("parse");
                    let spliced = format!("{}{}{}", &base[..offset], text, &base[offset + old_len..]);
                    let full = interpreter.parse(&spliced);
                    let ours = parser.apply_edit(offset, old_len, text).cloned();
                    match (ours, full) {
                        (Ok(ours), Ok(full)) => {
                            assert_eq!(ours, full, "edit ({offset}, {old_len}, {text:?}) on {base:?}")
                        }
                        (Err(_), Err(_)) => assert_eq!(parser.source(), base),
                        (ours, full) => panic!(
                            "edit ({offset}, {old_len}, {text:?}) disagrees: {:?} vs {:?}",
                            ours.map(|ast| ast.pretty()),
                            full.map(|ast| ast.pretty())
                        ),
                    }
                    localized += parser.stats().incremental_reparses;
                }
            }
        }
        assert!(localized > 0, "no edit was reparsed locally");
    }

    #[test]
    fn chained_edits_match_full_parse() {
        let mut parser = overlapping();
        parser.parse("a = b ; print f ( 1 ) ; c = 2 ;").expect("parse");

        let edits = [("1", "42"), ("42", "g ( 3 )"), ("3", "x"), ("b", "7"), ("2 ;", "y ;"), ("x", "")];
        for (needle, replacement) in edits {
            let offset = parser.source().find(needle).expect("needle present");
            parser.apply_edit(offset, needle.len(), replacement).expect("edit");
            assert_eq!(parser.ast().cloned(), Some(full_parse(&parser)), "after {needle:?} -> {replacement:?}");
        }
        assert_eq!(parser.source(), "a = 7 ; print f ( g (  ) ) ; c = y ;");
        assert!(parser.stats().incremental_reparses > 0);
        assert!(parser.stats().full_reparses > 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut parser = parser();
        parser.parse("x = 10 ;").expect("parse");
        parser.reset();
        assert_eq!(parser.source(), "");
        assert!(parser.ast().is_none());
        assert_eq!(parser.stats(), &ParseStats::default());
    }
}
