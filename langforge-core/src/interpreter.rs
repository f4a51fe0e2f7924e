//! Backtracking PEG interpreter.
//!
//! Matching rules:
//!
//! - literals and terminal classes skip whitespace and comments first
//!   (when the grammar asks for it); the skipped text never shows up in
//!   the tree;
//! - sequences backtrack completely on failure;
//! - ordered choice takes the first alternative that matches;
//! - repetition is greedy and stops on a failed or empty iteration;
//! - literals used as sequence elements are consumed but produce no
//!   node; a literal that wins an ordered choice produces a `TOKEN` leaf.
//!
//! Every rule node records how far into the source the interpreter had
//! looked, over all attempts including discarded ones, before it began
//! matching that node. The incremental parser uses it to decide whether
//! an edit could change any earlier decision.
//!
//! The interpreter trusts the grammar: undefined references simply fail
//! to match, and left recursion is expected to be rejected by
//! [`Grammar::validate`] beforehand.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use crate::ast::{AstArena, AstNode, NodeId, NodeKind, SourceAst};
use crate::error::SyntaxError;
use crate::grammar::{Grammar, PatternNode, Terminal};
use crate::span::{Span, line_col};

pub struct Interpreter<'g> {
    grammar: &'g Grammar,
}

impl<'g> Interpreter<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Interpreter { grammar }
    }

    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    /// Parse a whole source buffer with the start rule.
    pub fn parse(&self, source: &str) -> Result<SourceAst, SyntaxError> {
        debug!(start = self.grammar.start_rule(), len = source.len(), "full parse");
        let mut state = MatchState::new(self.grammar, source);
        let (root, end) = state.match_rule(self.grammar.start_rule(), 0).ok_or_else(|| state.error())?;

        let rest = state.skip(end);
        if rest < source.len() {
            state.fail(rest, "end of input");
            return Err(state.error());
        }
        trace!(nodes = state.arena.mark(), "parse finished");
        Ok(state.arena.finish(root))
    }

    /// Match a single rule at `start` without requiring the rest of the
    /// input to be consumed. Returns the rule's subtree and the offset
    /// where the match ended.
    pub fn parse_rule_at(
        &self,
        rule: &str,
        source: &str,
        start: usize,
    ) -> Result<(SourceAst, usize), SyntaxError> {
        let reparse = self.reparse_rule_at(rule, source, start, 0)?;
        Ok((reparse.ast, reparse.end))
    }

    /// [`Interpreter::parse_rule_at`] for a rule that previously started
    /// matching once the parser had already examined `scanned` bytes.
    pub(crate) fn reparse_rule_at(
        &self,
        rule: &str,
        source: &str,
        start: usize,
        scanned: usize,
    ) -> Result<RuleMatch, SyntaxError> {
        let mut state = MatchState::new(self.grammar, source);
        state.examined = scanned;
        let (root, end) = state.match_rule(rule, start).ok_or_else(|| state.error())?;
        let examined = state.examined;
        Ok(RuleMatch {
            ast: state.arena.finish(root),
            end,
            examined,
        })
    }
}

/// A single rule matched in isolation.
pub(crate) struct RuleMatch {
    pub(crate) ast: SourceAst,
    pub(crate) end: usize,
    /// Furthest byte offset examined once the match finished.
    pub(crate) examined: usize,
}

struct MatchState<'g, 's> {
    grammar: &'g Grammar,
    source: &'s str,
    arena: AstArena,
    farthest: usize,
    expected: BTreeSet<String>,
    examined: usize,
}

impl<'g, 's> MatchState<'g, 's> {
    fn new(grammar: &'g Grammar, source: &'s str) -> Self {
        MatchState {
            grammar,
            source,
            arena: AstArena::default(),
            farthest: 0,
            expected: BTreeSet::new(),
            examined: 0,
        }
    }

    /// Note that bytes before `end` have been looked at.
    fn touch(&mut self, end: usize) {
        self.examined = self.examined.max(end);
    }

    fn fail(&mut self, position: usize, expected: impl Into<String>) {
        if position > self.farthest {
            self.farthest = position;
            self.expected.clear();
        }
        if position == self.farthest {
            self.expected.insert(expected.into());
        }
    }

    fn error(&self) -> SyntaxError {
        let (line, column) = line_col(self.source, self.farthest);
        SyntaxError {
            position: self.farthest,
            line,
            column,
            expected: self.expected.iter().cloned().collect(),
        }
    }

    fn match_rule(&mut self, name: &str, position: usize) -> Option<(NodeId, usize)> {
        let grammar = self.grammar;
        let Some(rule) = grammar.rule(name) else {
            self.fail(position, name);
            return None;
        };
        let scanned_before = self.examined;
        let mut children = Vec::new();
        let end = self.match_pattern(&rule.pattern, position, &mut children)?;
        let start = if end > position {
            self.skip(position).min(end)
        } else {
            end
        };
        let node = AstNode::branch(NodeKind::Rule(rule.name.clone()), children, Span::new(start, end))
            .with_scanned_before(scanned_before);
        let id = self.arena.push(node);
        Some((id, end))
    }

    fn match_pattern(
        &mut self,
        pattern: &PatternNode,
        position: usize,
        out: &mut Vec<NodeId>,
    ) -> Option<usize> {
        match pattern {
            PatternNode::Literal(text) => self.match_literal(text, position),
            PatternNode::Terminal(terminal) => {
                let (id, end) = self.match_terminal(*terminal, position)?;
                out.push(id);
                Some(end)
            }
            PatternNode::Reference(name) => {
                let (id, end) = self.match_rule(name, position)?;
                out.push(id);
                Some(end)
            }
            PatternNode::Sequence(items) => {
                let (out_mark, arena_mark) = (out.len(), self.arena.mark());
                let mut cursor = position;
                for item in items {
                    match self.match_pattern(item, cursor, out) {
                        Some(next) => cursor = next,
                        None => {
                            out.truncate(out_mark);
                            self.arena.truncate(arena_mark);
                            return None;
                        }
                    }
                }
                Some(cursor)
            }
            PatternNode::OrderedChoice(alternatives) => {
                for alternative in alternatives {
                    if let PatternNode::Literal(text) = alternative {
                        if let Some(end) = self.match_literal(text, position) {
                            let start = end - text.len();
                            let id = self.arena.push(AstNode::leaf(
                                NodeKind::Token,
                                text.as_str(),
                                Span::new(start, end),
                            ));
                            out.push(id);
                            return Some(end);
                        }
                        continue;
                    }
                    let (out_mark, arena_mark) = (out.len(), self.arena.mark());
                    if let Some(end) = self.match_pattern(alternative, position, out) {
                        return Some(end);
                    }
                    out.truncate(out_mark);
                    self.arena.truncate(arena_mark);
                }
                None
            }
            PatternNode::ZeroOrMore(inner) => Some(self.repeat(inner, position, out)),
            PatternNode::OneOrMore(inner) => {
                let first = self.match_pattern(inner, position, out)?;
                Some(self.repeat(inner, first, out))
            }
            PatternNode::Optional(inner) => {
                let (out_mark, arena_mark) = (out.len(), self.arena.mark());
                match self.match_pattern(inner, position, out) {
                    Some(end) => Some(end),
                    None => {
                        out.truncate(out_mark);
                        self.arena.truncate(arena_mark);
                        Some(position)
                    }
                }
            }
        }
    }

    fn repeat(&mut self, inner: &PatternNode, position: usize, out: &mut Vec<NodeId>) -> usize {
        let mut cursor = position;
        loop {
            let (out_mark, arena_mark) = (out.len(), self.arena.mark());
            match self.match_pattern(inner, cursor, out) {
                Some(next) if next > cursor => cursor = next,
                _ => {
                    out.truncate(out_mark);
                    self.arena.truncate(arena_mark);
                    return cursor;
                }
            }
        }
    }

    fn match_literal(&mut self, text: &str, position: usize) -> Option<usize> {
        let start = self.skip(position);
        let word_like = text.ends_with(is_ident_continue);
        self.touch(start + text.len() + usize::from(word_like));
        let rest = &self.source[start..];
        if rest.starts_with(text) {
            let end = start + text.len();
            if !(word_like && self.source[end..].starts_with(is_ident_continue)) {
                return Some(end);
            }
        }
        self.fail(start, format!("{text:?}"));
        None
    }

    fn match_terminal(&mut self, terminal: Terminal, position: usize) -> Option<(NodeId, usize)> {
        let start = self.skip(position);
        let source = self.source;
        let rest = &source[start..];
        let len = match terminal {
            Terminal::Ident => lex_ident(rest).filter(|len| !self.grammar.is_keyword(&rest[..*len])),
            Terminal::Number => lex_number(rest),
            Terminal::String => lex_string(rest),
        };
        self.touch(start + scan_extent(terminal, rest, len));
        let Some(len) = len else {
            self.fail(start, terminal.name());
            return None;
        };
        let end = start + len;
        let id = self.arena.push(AstNode::leaf(
            NodeKind::Terminal(terminal),
            &self.source[start..end],
            Span::new(start, end),
        ));
        Some((id, end))
    }

    /// Skip whitespace and configured comments from `position`.
    fn skip(&mut self, position: usize) -> usize {
        if !self.grammar.skip_whitespace() {
            return position;
        }
        let source = self.source;
        let mut cursor = position;
        loop {
            let before = cursor;
            let rest = &source[cursor..];
            cursor += rest.len() - rest.trim_start().len();

            for pattern in self.grammar.comment_patterns() {
                let rest = &source[cursor..];
                match pattern.split_once(' ') {
                    Some((open, close)) => {
                        if let Some(body) = rest.strip_prefix(open) {
                            cursor += open.len()
                                + body.find(close).map_or(body.len(), |idx| idx + close.len());
                        }
                    }
                    None => {
                        if rest.starts_with(pattern.as_str()) {
                            cursor += rest.find('\n').unwrap_or(rest.len());
                        }
                    }
                }
            }

            if cursor == before {
                let opener = self
                    .grammar
                    .comment_patterns()
                    .iter()
                    .map(|pattern| pattern.split_once(' ').map_or(pattern.len(), |(open, _)| open.len()))
                    .max()
                    .unwrap_or(0);
                self.touch(cursor + opener.max(1));
                return cursor;
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex_ident(rest: &str) -> Option<usize> {
    if !rest.starts_with(is_ident_start) {
        return None;
    }
    Some(rest.find(|c: char| !is_ident_continue(c)).unwrap_or(rest.len()))
}

/// How many bytes of `rest` the lexer for `terminal` looked at, given
/// what it matched.
fn scan_extent(terminal: Terminal, rest: &str, matched: Option<usize>) -> usize {
    match (terminal, matched) {
        (Terminal::Ident, Some(len)) => len + 1,
        (Terminal::Number, Some(len)) => len + 2,
        (Terminal::String, Some(len)) => len,
        (Terminal::String, None) => rest.find('\n').map_or(rest.len(), |idx| idx + 1),
        (Terminal::Ident, None) => lex_ident(rest).map_or(1, |len| len + 1),
        (Terminal::Number, None) => 1,
    }
}

/// Integer or decimal: `digits ('.' digits)?`.
fn lex_number(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let mut len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
        len += 1;
        len += bytes[len..].iter().take_while(|b| b.is_ascii_digit()).count();
    }
    Some(len)
}

/// Double-quoted with backslash escapes; the quotes are part of the match.
fn lex_string(rest: &str) -> Option<usize> {
    let mut chars = rest.char_indices();
    if chars.next()?.1 != '"' {
        return None;
    }
    let mut escaped = false;
    for (idx, c) in chars {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(idx + 1),
            '\n' => return None,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::arithmetic_grammar;
    use crate::grammar_parser::GrammarParser;

    #[test]
    fn ordered_choice_takes_first_match() {
        let grammar = arithmetic_grammar().with_start_rule("factor");
        let ast = Interpreter::new(&grammar).parse("42").expect("parse");
        let root = ast.root();
        assert_eq!(ast.node_type(root), "factor");
        let child = ast.children(root)[0];
        assert_eq!(ast.node_type(child), "NUMBER");
        assert_eq!(ast.value(child), Some("42"));
    }

    #[test]
    fn sequence_literals_are_elided() {
        let grammar = arithmetic_grammar();
        let ast = Interpreter::new(&grammar).parse("x = 10 ;").expect("parse");
        let statement = ast.children(ast.root())[0];
        assert_eq!(ast.node_type(statement), "statement");
        let children = ast.children(statement);
        assert_eq!(children.len(), 2);
        assert_eq!(ast.node_type(children[0]), "IDENT");
        assert_eq!(ast.value(children[0]), Some("x"));
        assert_eq!(ast.node_type(children[1]), "expr");
    }

    #[test]
    fn choice_literals_become_tokens() {
        let grammar = arithmetic_grammar();
        let ast = Interpreter::new(&grammar).parse("z = 2 + 3 * 4 ;").expect("parse");
        let expr = ast.find_all("expr")[0];
        let kinds: Vec<_> = ast
            .children(expr)
            .iter()
            .map(|id| (ast.node_type(*id), ast.value(*id)))
            .collect();
        assert_eq!(
            kinds,
            [("term", None), ("TOKEN", Some("+")), ("term", None)]
        );
        let product = ast.children(expr)[2];
        assert_eq!(ast.children(product).len(), 3);
    }

    #[test]
    fn records_spans_without_leading_whitespace() {
        let grammar = arithmetic_grammar();
        let ast = Interpreter::new(&grammar).parse("  x = 10 ;").expect("parse");
        let statement = ast.children(ast.root())[0];
        assert_eq!(ast.span(statement), Span::new(2, 10));
        let number = ast.find_all("NUMBER")[0];
        assert_eq!(ast.span(number), Span::new(6, 8));
    }

    #[test]
    fn full_reparse_is_idempotent() {
        let grammar = arithmetic_grammar();
        let interpreter = Interpreter::new(&grammar);
        let source = "a = 1 ; b = (a + 2) * 3 ;";
        let first = interpreter.parse(source).expect("parse");
        let second = interpreter.parse(source).expect("parse");
        assert_eq!(first, second);
        assert_eq!(first.pretty(), second.pretty());
    }

    #[test]
    fn rejects_trailing_input() {
        let grammar = arithmetic_grammar();
        let err = Interpreter::new(&grammar).parse("x = 1 ; y").unwrap_err();
        assert_eq!(err.position, 9);
        assert!(err.expected.contains(&"\"=\"".to_string()));
    }

    #[test]
    fn reports_farthest_failure_position() {
        let grammar = arithmetic_grammar();
        let err = Interpreter::new(&grammar).parse("x = ;").unwrap_err();
        assert_eq!((err.line, err.column), (1, 5));
        assert!(err.expected.contains(&"NUMBER".to_string()));
        assert!(err.expected.contains(&"IDENT".to_string()));
    }

    #[test]
    fn keywords_respect_word_boundaries() {
        let grammar = GrammarParser::new()
            .parse("stmt <- \"if\" IDENT / IDENT\n")
            .expect("grammar");
        let interpreter = Interpreter::new(&grammar);
        let ast = interpreter.parse("iffy").expect("identifier");
        assert_eq!(ast.value(ast.children(ast.root())[0]), Some("iffy"));
        assert!(interpreter.parse("if").is_err());
        let ast = interpreter.parse("if ready").expect("keyword");
        assert_eq!(ast.children(ast.root()).len(), 1);
    }

    #[test]
    fn skips_configured_comments() {
        let grammar = arithmetic_grammar().with_comment_patterns(["//", "/* */"]);
        let ast = Interpreter::new(&grammar)
            .parse("// header\nx = /* inline */ 1 ; // trailing")
            .expect("parse");
        assert_eq!(ast.find_all("statement").len(), 1);
    }

    #[test]
    fn whitespace_is_significant_when_not_skipped() {
        let grammar = arithmetic_grammar().with_skip_whitespace(false);
        let interpreter = Interpreter::new(&grammar);
        assert!(interpreter.parse("x=1;").is_ok());
        assert!(interpreter.parse("x = 1 ;").is_err());
    }

    #[test]
    fn lexes_terminal_classes() {
        assert_eq!(lex_number("3.25;"), Some(4));
        assert_eq!(lex_number("0..10"), Some(1));
        assert_eq!(lex_ident("_a1 b"), Some(3));
        assert_eq!(lex_ident("1a"), None);
        assert_eq!(lex_string(r#""a\"b" rest"#), Some(6));
        assert_eq!(lex_string("\"open"), None);
    }
}
