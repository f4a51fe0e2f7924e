//! Compiled PEG grammars.
//!
//! A [`Grammar`] is immutable once built: a table of named rules, each
//! owning a [`PatternNode`] tree, plus the start rule and the
//! whitespace/comment policy the interpreter applies before every
//! terminal. Grammars are produced by [`crate::grammar_parser`] and
//! checked with [`Grammar::validate`] before they are interpreted.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// Lexical classes matched by fixed rules rather than grammar text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Terminal {
    Ident,
    Number,
    String,
}

impl Terminal {
    pub const ALL: [Terminal; 3] = [Terminal::Ident, Terminal::Number, Terminal::String];

    pub fn name(self) -> &'static str {
        match self {
            Terminal::Ident => "IDENT",
            Terminal::Number => "NUMBER",
            Terminal::String => "STRING",
        }
    }

    pub fn from_name(name: &str) -> Option<Terminal> {
        Terminal::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A pattern expression. Trees only: no sharing, no cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternNode {
    Literal(String),
    Reference(String),
    Terminal(Terminal),
    Sequence(Vec<PatternNode>),
    OrderedChoice(Vec<PatternNode>),
    ZeroOrMore(Box<PatternNode>),
    OneOrMore(Box<PatternNode>),
    Optional(Box<PatternNode>),
}

impl PatternNode {
    /// Rule names referenced anywhere inside this pattern.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PatternNode::Reference(name) => out.push(name),
            PatternNode::Literal(_) | PatternNode::Terminal(_) => {}
            PatternNode::Sequence(items) | PatternNode::OrderedChoice(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            PatternNode::ZeroOrMore(inner)
            | PatternNode::OneOrMore(inner)
            | PatternNode::Optional(inner) => inner.collect_references(out),
        }
    }

    fn collect_literals<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PatternNode::Literal(text) => out.push(text),
            PatternNode::Reference(_) | PatternNode::Terminal(_) => {}
            PatternNode::Sequence(items) | PatternNode::OrderedChoice(items) => {
                for item in items {
                    item.collect_literals(out);
                }
            }
            PatternNode::ZeroOrMore(inner)
            | PatternNode::OneOrMore(inner)
            | PatternNode::Optional(inner) => inner.collect_literals(out),
        }
    }

    /// Can this pattern succeed without consuming input, given the
    /// nullability of every rule?
    fn nullable(&self, rules: &HashMap<String, bool>) -> bool {
        match self {
            PatternNode::Literal(text) => text.is_empty(),
            PatternNode::Terminal(_) => false,
            PatternNode::Reference(name) => rules.get(name).copied().unwrap_or(false),
            PatternNode::Sequence(items) => items.iter().all(|item| item.nullable(rules)),
            PatternNode::OrderedChoice(items) => items.iter().any(|item| item.nullable(rules)),
            PatternNode::ZeroOrMore(_) | PatternNode::Optional(_) => true,
            PatternNode::OneOrMore(inner) => inner.nullable(rules),
        }
    }

    /// Rules that may be entered before any input is consumed.
    fn leading_references<'a>(&'a self, nullable: &HashMap<String, bool>, out: &mut Vec<&'a str>) {
        match self {
            PatternNode::Literal(_) | PatternNode::Terminal(_) => {}
            PatternNode::Reference(name) => out.push(name),
            PatternNode::Sequence(items) => {
                for item in items {
                    item.leading_references(nullable, out);
                    if !item.nullable(nullable) {
                        break;
                    }
                }
            }
            PatternNode::OrderedChoice(items) => {
                for item in items {
                    item.leading_references(nullable, out);
                }
            }
            PatternNode::ZeroOrMore(inner)
            | PatternNode::OneOrMore(inner)
            | PatternNode::Optional(inner) => inner.leading_references(nullable, out),
        }
    }
}

impl fmt::Display for PatternNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternNode::Literal(text) => write!(f, "{text:?}"),
            PatternNode::Reference(name) => f.write_str(name),
            PatternNode::Terminal(terminal) => f.write_str(terminal.name()),
            PatternNode::Sequence(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" ")?;
                    }
                    write_grouped(f, item)?;
                }
                Ok(())
            }
            PatternNode::OrderedChoice(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" / ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            PatternNode::ZeroOrMore(inner) => {
                write_grouped(f, inner)?;
                f.write_str("*")
            }
            PatternNode::OneOrMore(inner) => {
                write_grouped(f, inner)?;
                f.write_str("+")
            }
            PatternNode::Optional(inner) => {
                write_grouped(f, inner)?;
                f.write_str("?")
            }
        }
    }
}

fn write_grouped(f: &mut fmt::Formatter<'_>, node: &PatternNode) -> fmt::Result {
    match node {
        PatternNode::Sequence(_) | PatternNode::OrderedChoice(_) => write!(f, "({node})"),
        _ => write!(f, "{node}"),
    }
}

/// A named pattern. `span` locates the definition in grammar text when
/// the rule came from rule notation (empty for rule maps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub pattern: PatternNode,
    pub span: Span,
}

impl Rule {
    pub fn new(name: impl Into<String>, pattern: PatternNode) -> Self {
        Rule {
            name: name.into(),
            pattern,
            span: Span::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    rules: HashMap<String, Rule>,
    order: Vec<String>,
    duplicates: Vec<Rule>,
    start_rule: String,
    skip_whitespace: bool,
    comment_patterns: BTreeSet<String>,
    keywords: BTreeSet<String>,
}

impl Grammar {
    /// Build a grammar from rule definitions in declaration order.
    ///
    /// The first definition of a name wins; later ones are kept aside
    /// and reported by [`Grammar::validate`]. Without an explicit start
    /// rule the first declared rule is used.
    pub fn new(definitions: Vec<Rule>, start_rule: Option<String>) -> Self {
        let mut rules = HashMap::new();
        let mut order = Vec::new();
        let mut duplicates = Vec::new();
        for rule in definitions {
            if rules.contains_key(&rule.name) {
                duplicates.push(rule);
                continue;
            }
            order.push(rule.name.clone());
            rules.insert(rule.name.clone(), rule);
        }
        let start_rule = start_rule
            .or_else(|| order.first().cloned())
            .unwrap_or_default();

        let mut literals = Vec::new();
        for name in &order {
            rules[name].pattern.collect_literals(&mut literals);
        }
        let keywords = literals
            .into_iter()
            .filter(|text| is_identifier(text))
            .map(str::to_string)
            .collect();

        debug!(rules = order.len(), start = %start_rule, "built grammar");
        Grammar {
            rules,
            order,
            duplicates,
            start_rule,
            skip_whitespace: true,
            comment_patterns: BTreeSet::new(),
            keywords,
        }
    }

    pub fn with_start_rule(mut self, start_rule: impl Into<String>) -> Self {
        self.start_rule = start_rule.into();
        self
    }

    pub fn with_skip_whitespace(mut self, skip_whitespace: bool) -> Self {
        self.skip_whitespace = skip_whitespace;
        self
    }

    pub fn with_comment_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.comment_patterns
            .extend(patterns.into_iter().map(Into::into).filter(|p| !p.trim().is_empty()));
        self
    }

    /// Reserve extra words so `IDENT` never matches them.
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.order.iter().map(|name| &self.rules[name])
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn start_rule(&self) -> &str {
        &self.start_rule
    }

    pub fn skip_whitespace(&self) -> bool {
        self.skip_whitespace
    }

    pub fn comment_patterns(&self) -> &BTreeSet<String> {
        &self.comment_patterns
    }

    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.keywords.contains(word)
    }

    /// Check the grammar without failing.
    ///
    /// Reports undefined references, duplicate definitions, left
    /// recursion and an undefined start rule as errors, and rules
    /// unreachable from the start rule as warnings.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if !self.rules.contains_key(&self.start_rule) {
            diagnostics.push(
                Diagnostic::error(
                    format!("start rule '{}' is not defined", self.start_rule),
                    Span::default(),
                )
                .with_code("G0005"),
            );
        }

        for rule in self.rules() {
            let mut reported = HashSet::new();
            for reference in rule.pattern.references() {
                if self.rules.contains_key(reference) || !reported.insert(reference) {
                    continue;
                }
                diagnostics.push(
                    Diagnostic::error(
                        format!(
                            "rule '{}' references undefined rule '{}'",
                            rule.name, reference
                        ),
                        rule.span,
                    )
                    .with_code("G0001"),
                );
            }
        }

        for duplicate in &self.duplicates {
            diagnostics.push(
                Diagnostic::error(
                    format!("rule '{}' is defined more than once", duplicate.name),
                    duplicate.span,
                )
                .with_code("G0002"),
            );
        }

        for name in self.left_recursive_rules() {
            diagnostics.push(
                Diagnostic::error(
                    format!("rule '{name}' is left-recursive"),
                    self.rules[&name].span,
                )
                .with_code("G0003"),
            );
        }

        let reachable = self.reachable_rules();
        for rule in self.rules() {
            if !reachable.contains(rule.name.as_str()) {
                diagnostics.push(
                    Diagnostic::warning(
                        format!("rule '{}' is never used", rule.name),
                        rule.span,
                    )
                    .with_code("G0004"),
                );
            }
        }

        debug!(count = diagnostics.len(), "validated grammar");
        diagnostics
    }

    /// Rules that can re-enter themselves before consuming any input.
    pub fn left_recursive_rules(&self) -> BTreeSet<String> {
        let nullable = self.nullable_rules();
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for rule in self.rules() {
            let mut leading = Vec::new();
            rule.pattern.leading_references(&nullable, &mut leading);
            leading.retain(|name| self.rules.contains_key(*name));
            edges.insert(rule.name.as_str(), leading);
        }

        let mut recursive = BTreeSet::new();
        for name in &self.order {
            let mut stack: Vec<&str> = edges.get(name.as_str()).cloned().unwrap_or_default();
            let mut seen = HashSet::new();
            while let Some(next) = stack.pop() {
                if next == name {
                    recursive.insert(name.clone());
                    break;
                }
                if seen.insert(next) {
                    stack.extend(edges.get(next).into_iter().flatten().copied());
                }
            }
        }
        recursive
    }

    fn nullable_rules(&self) -> HashMap<String, bool> {
        let mut nullable: HashMap<String, bool> =
            self.order.iter().map(|name| (name.clone(), false)).collect();
        loop {
            let mut changed = false;
            for rule in self.rules() {
                if nullable[&rule.name] {
                    continue;
                }
                if rule.pattern.nullable(&nullable) {
                    nullable.insert(rule.name.clone(), true);
                    changed = true;
                }
            }
            if !changed {
                return nullable;
            }
        }
    }

    fn reachable_rules(&self) -> HashSet<&str> {
        let mut reachable = HashSet::new();
        let mut stack = vec![self.start_rule.as_str()];
        while let Some(name) = stack.pop() {
            let Some(rule) = self.rules.get(name) else {
                continue;
            };
            if reachable.insert(rule.name.as_str()) {
                stack.extend(rule.pattern.references());
            }
        }
        reachable
    }
}

pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(text: &str) -> PatternNode {
        PatternNode::Literal(text.to_string())
    }

    fn reference(name: &str) -> PatternNode {
        PatternNode::Reference(name.to_string())
    }

    #[test]
    fn first_definition_wins_and_duplicates_are_reported() {
        let grammar = Grammar::new(
            vec![
                Rule::new("start", reference("item")),
                Rule::new("item", lit("a")),
                Rule::new("item", lit("b")),
            ],
            None,
        );
        assert_eq!(grammar.len(), 2);
        assert_eq!(grammar.rule("item").unwrap().pattern, lit("a"));
        let diagnostics = grammar.validate();
        assert!(diagnostics.iter().any(|d| d.code == Some("G0002")));
    }

    #[test]
    fn detects_indirect_left_recursion() {
        let grammar = Grammar::new(
            vec![
                Rule::new(
                    "a",
                    PatternNode::Sequence(vec![
                        PatternNode::Optional(Box::new(lit("x"))),
                        reference("b"),
                    ]),
                ),
                Rule::new("b", PatternNode::Sequence(vec![reference("a"), lit("y")])),
            ],
            None,
        );
        let recursive = grammar.left_recursive_rules();
        assert!(recursive.contains("a"));
        assert!(recursive.contains("b"));
    }

    #[test]
    fn guarded_recursion_is_not_left_recursive() {
        let grammar = Grammar::new(
            vec![Rule::new(
                "paren",
                PatternNode::OrderedChoice(vec![
                    PatternNode::Sequence(vec![lit("("), reference("paren"), lit(")")]),
                    lit("x"),
                ]),
            )],
            None,
        );
        assert!(grammar.left_recursive_rules().is_empty());
        assert!(grammar.validate().is_empty());
    }

    #[test]
    fn collects_identifier_literals_as_keywords() {
        let grammar = Grammar::new(
            vec![Rule::new(
                "stmt",
                PatternNode::Sequence(vec![lit("while"), lit("("), lit("do_it")]),
            )],
            None,
        );
        assert!(grammar.is_keyword("while"));
        assert!(grammar.is_keyword("do_it"));
        assert!(!grammar.is_keyword("("));
    }

    #[test]
    fn unused_rules_are_warnings() {
        let grammar = Grammar::new(
            vec![Rule::new("start", lit("a")), Rule::new("orphan", lit("b"))],
            None,
        );
        let diagnostics = grammar.validate();
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics[0].is_error());
        assert_eq!(diagnostics[0].code, Some("G0004"));
    }

    #[test]
    fn reports_missing_start_rule() {
        let grammar = Grammar::new(vec![Rule::new("a", lit("a"))], None).with_start_rule("b");
        assert!(grammar.validate().iter().any(|d| d.code == Some("G0005")));
    }
}
