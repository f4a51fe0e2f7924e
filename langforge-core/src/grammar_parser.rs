//! Compiles PEG rule notation into a [`Grammar`].
//!
//! Notation, one rule per line:
//!
//! ```text
//! # comment
//! expr   <- term (("+" / "-") term)*
//! factor <- NUMBER / IDENT
//!         / "(" expr ")"
//! ```
//!
//! `/` is ordered choice, juxtaposition is sequence, `*` `+` `?` are
//! postfix quantifiers and parentheses group. Literals use double or
//! single quotes. Bare `IDENT`, `NUMBER` and `STRING` name the built-in
//! terminal classes; every other bare word references a rule. A line
//! without `<-` continues the pattern of the rule above it.

use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::grammar::{Grammar, PatternNode, Rule, Terminal, is_identifier};
use crate::span::Span;

/// Structured rule-map input, usually read from a language configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMap {
    pub rules: BTreeMap<String, String>,
    pub start: Option<String>,
    pub skip_whitespace: bool,
    pub comments: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GrammarParser;

impl GrammarParser {
    pub fn new() -> Self {
        GrammarParser
    }

    /// Compile rule-notation text. The first rule is the start rule.
    pub fn parse(&self, text: &str) -> Result<Grammar, CoreError> {
        let mut pending: Vec<PendingRule> = Vec::new();
        let mut offset = 0;

        for (index, raw_line) in text.split_inclusive('\n').enumerate() {
            let line_number = index + 1;
            let line_start = offset;
            offset += raw_line.len();

            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((name, body)) = split_definition(line) {
                pending.push(PendingRule {
                    name: name.to_string(),
                    body: body.to_string(),
                    line: line_number,
                    span: Span::new(line_start, line_start + raw_line.trim_end().len()),
                });
                continue;
            }

            match pending.last_mut() {
                Some(rule) => {
                    rule.body.push(' ');
                    rule.body.push_str(line);
                    rule.span.end = line_start + raw_line.trim_end().len();
                }
                None => {
                    return Err(CoreError::GrammarNotation {
                        line: line_number,
                        message: "expected a rule of the form `name <- pattern`".to_string(),
                    });
                }
            }
        }

        let mut rules = Vec::with_capacity(pending.len());
        for rule in pending {
            let pattern = parse_pattern(&rule.body).map_err(|message| {
                CoreError::GrammarNotation {
                    line: rule.line,
                    message: format!("in rule '{}': {message}", rule.name),
                }
            })?;
            rules.push(Rule {
                name: rule.name,
                pattern,
                span: rule.span,
            });
        }
        Ok(Grammar::new(rules, None))
    }

    /// Compile a structured rule map into the same representation.
    ///
    /// Map order carries no meaning, so the start rule is the explicit
    /// `start`, else `program` when defined, else the first name in
    /// sorted order.
    pub fn parse_rule_map(&self, map: &RuleMap) -> Result<Grammar, CoreError> {
        let mut rules = Vec::with_capacity(map.rules.len());
        for (name, body) in &map.rules {
            if !is_identifier(name) {
                return Err(CoreError::GrammarNotation {
                    line: 0,
                    message: format!("'{name}' is not a valid rule name"),
                });
            }
            let pattern = parse_pattern(body).map_err(|message| CoreError::GrammarNotation {
                line: 0,
                message: format!("in rule '{name}': {message}"),
            })?;
            rules.push(Rule::new(name.clone(), pattern));
        }

        let start = map.start.clone().or_else(|| {
            if map.rules.contains_key("program") {
                Some("program".to_string())
            } else {
                None
            }
        });

        Ok(Grammar::new(rules, start)
            .with_skip_whitespace(map.skip_whitespace)
            .with_comment_patterns(map.comments.iter().cloned()))
    }
}

struct PendingRule {
    name: String,
    body: String,
    line: usize,
    span: Span,
}

fn split_definition(line: &str) -> Option<(&str, &str)> {
    let (name, body) = line.split_once("<-")?;
    let name = name.trim();
    if is_identifier(name) {
        Some((name, body.trim()))
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(String),
    Slash,
    LParen,
    RParen,
    Star,
    Plus,
    Question,
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            '/' => tokens.push(Token::Slash),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '*' => tokens.push(Token::Star),
            '+' => tokens.push(Token::Plus),
            '?' => tokens.push(Token::Question),
            '"' | '\'' => {
                let quote = ch;
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, other)) => text.push(other),
                            None => return Err("unterminated escape in literal".to_string()),
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => text.push(c),
                    }
                }
                if !closed {
                    return Err(format!("unterminated literal starting at column {}", idx + 1));
                }
                if text.is_empty() {
                    return Err("empty literal".to_string());
                }
                tokens.push(Token::Literal(text));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn parse_pattern(body: &str) -> Result<PatternNode, String> {
    let tokens = tokenize(body)?;
    if tokens.is_empty() {
        return Err("empty pattern".to_string());
    }
    let mut cursor = Cursor { tokens, position: 0 };
    let pattern = cursor.choice()?;
    match cursor.peek() {
        None => Ok(pattern),
        Some(Token::RParen) => Err("unbalanced ')'".to_string()),
        Some(other) => Err(format!("unexpected {other:?}")),
    }
}

struct Cursor {
    tokens: Vec<Token>,
    position: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn choice(&mut self) -> Result<PatternNode, String> {
        let mut alternatives = vec![self.sequence()?];
        while self.peek() == Some(&Token::Slash) {
            self.bump();
            alternatives.push(self.sequence()?);
        }
        Ok(if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            PatternNode::OrderedChoice(alternatives)
        })
    }

    fn sequence(&mut self) -> Result<PatternNode, String> {
        let mut items = Vec::new();
        while matches!(
            self.peek(),
            Some(Token::Word(_) | Token::Literal(_) | Token::LParen)
        ) {
            items.push(self.postfix()?);
        }
        match items.len() {
            0 => Err("expected a pattern".to_string()),
            1 => Ok(items.remove(0)),
            _ => Ok(PatternNode::Sequence(items)),
        }
    }

    fn postfix(&mut self) -> Result<PatternNode, String> {
        let mut node = self.primary()?;
        loop {
            node = match self.peek() {
                Some(Token::Star) => PatternNode::ZeroOrMore(Box::new(node)),
                Some(Token::Plus) => PatternNode::OneOrMore(Box::new(node)),
                Some(Token::Question) => PatternNode::Optional(Box::new(node)),
                _ => return Ok(node),
            };
            self.bump();
        }
    }

    fn primary(&mut self) -> Result<PatternNode, String> {
        match self.bump() {
            Some(Token::Word(word)) => Ok(match Terminal::from_name(&word) {
                Some(terminal) => PatternNode::Terminal(terminal),
                None => PatternNode::Reference(word),
            }),
            Some(Token::Literal(text)) => Ok(PatternNode::Literal(text)),
            Some(Token::LParen) => {
                let inner = self.choice()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected {other:?}")),
            None => Err("unexpected end of pattern".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ARITHMETIC;

    #[test]
    fn round_trips_declared_rule_names() {
        let text = format!("# statements and arithmetic\n{ARITHMETIC}");
        let grammar = GrammarParser::new().parse(&text).expect("grammar");
        let names: Vec<_> = grammar.rule_names().collect();
        assert_eq!(names, ["program", "statement", "expr", "term", "factor"]);
        assert_eq!(grammar.start_rule(), "program");
        assert!(grammar.validate().is_empty());
    }

    #[test]
    fn builds_pattern_trees() {
        let grammar = GrammarParser::new().parse(ARITHMETIC).expect("grammar");
        let factor = &grammar.rule("factor").unwrap().pattern;
        let PatternNode::OrderedChoice(alternatives) = factor else {
            panic!("factor should be a choice, got {factor:?}");
        };
        assert_eq!(alternatives.len(), 3);
        assert_eq!(alternatives[0], PatternNode::Terminal(Terminal::Number));
        assert_eq!(alternatives[1], PatternNode::Terminal(Terminal::Ident));
        assert!(matches!(&alternatives[2], PatternNode::Sequence(items) if items.len() == 3));

        let expr = &grammar.rule("expr").unwrap().pattern;
        assert_eq!(expr.to_string(), r#"term (("+" / "-") term)*"#);
    }

    #[test]
    fn joins_continuation_lines() {
        let grammar = GrammarParser::new()
            .parse("value <- NUMBER\n      / STRING\n      / 'nil'\n")
            .expect("grammar");
        let value = &grammar.rule("value").unwrap().pattern;
        assert!(matches!(value, PatternNode::OrderedChoice(items) if items.len() == 3));
        assert_eq!(grammar.rule("value").unwrap().span.start, 0);
    }

    #[test]
    fn flags_left_recursion_in_notation() {
        let grammar = GrammarParser::new()
            .parse("a <- a \"x\" / \"y\"\n")
            .expect("grammar");
        let diagnostics = grammar.validate();
        assert!(
            diagnostics
                .iter()
                .any(|d| d.code == Some("G0003") && d.message.contains("'a'"))
        );
    }

    #[test]
    fn reports_undefined_references() {
        let grammar = GrammarParser::new()
            .parse("start <- item+\n")
            .expect("grammar");
        let diagnostics = grammar.validate();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("undefined rule 'item'"));
    }

    #[test]
    fn rejects_malformed_notation() {
        let parser = GrammarParser::new();
        assert!(matches!(
            parser.parse("start <- (\"a\"\n"),
            Err(CoreError::GrammarNotation { line: 1, .. })
        ));
        assert!(matches!(
            parser.parse("just words\n"),
            Err(CoreError::GrammarNotation { line: 1, .. })
        ));
        assert!(matches!(
            parser.parse("ok <- \"a\"\nbad <- \"unterminated\n"),
            Err(CoreError::GrammarNotation { line: 2, .. })
        ));
    }

    #[test]
    fn rule_map_builds_identical_rules() {
        let text = GrammarParser::new().parse(ARITHMETIC).expect("grammar");
        let mut map = RuleMap {
            skip_whitespace: true,
            ..RuleMap::default()
        };
        for rule in text.rules() {
            map.rules.insert(rule.name.clone(), rule.pattern.to_string());
        }
        let from_map = GrammarParser::new().parse_rule_map(&map).expect("grammar");
        assert_eq!(from_map.start_rule(), "program");
        for rule in text.rules() {
            assert_eq!(from_map.rule(&rule.name).unwrap().pattern, rule.pattern);
        }
    }
}
