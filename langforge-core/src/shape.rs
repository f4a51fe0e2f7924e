//! Recognizes language constructs in grammar-shaped trees.
//!
//! Parse trees only carry rule names, so every consumer (evaluator,
//! type inference, backends) needs the same answer to "is this node an
//! assignment?". A [`ConstructTable`] maps rule names to [`Role`]s and
//! [`ConstructTable::classify`] turns a node into a [`Construct`]. Nodes
//! without a role are classified by shape: one child passes through,
//! `TOKEN operand` is unary, `operand (TOKEN operand)+` is a
//! left-associative binary chain.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{NodeId, NodeKind, SourceAst};
use crate::grammar::Terminal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Program,
    Block,
    Statement,
    Function,
    Params,
    Call,
    Args,
    Assign,
    If,
    While,
    For,
    Return,
    Print,
    Class,
}

const DEFAULT_ALIASES: &[(Role, &[&str])] = &[
    (Role::Program, &["program", "module", "source_file", "unit"]),
    (Role::Block, &["block", "body", "statements", "suite"]),
    (Role::Statement, &["statement", "stmt", "item"]),
    (
        Role::Function,
        &["function", "function_def", "func", "fn_decl", "def"],
    ),
    (Role::Params, &["params", "parameters", "param_list"]),
    (Role::Call, &["call", "call_expr", "invocation"]),
    (Role::Args, &["args", "arguments", "arg_list"]),
    (
        Role::Assign,
        &["assignment", "assign", "assign_stmt", "let_stmt", "var_decl"],
    ),
    (
        Role::If,
        &["if", "if_stmt", "if_statement", "conditional"],
    ),
    (Role::While, &["while", "while_stmt", "while_loop"]),
    (Role::For, &["for", "for_stmt", "for_loop"]),
    (Role::Return, &["return", "return_stmt"]),
    (Role::Print, &["print", "print_stmt", "output"]),
    (
        Role::Class,
        &["class", "class_decl", "struct_decl", "type_decl"],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_token(token: &str) -> Option<BinaryOp> {
        Some(match token {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::Le,
            ">=" => BinaryOp::Ge,
            "&&" | "and" => BinaryOp::And,
            "||" | "or" => BinaryOp::Or,
            _ => return None,
        })
    }

    /// C-family spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn from_token(token: &str) -> Option<UnaryOp> {
        match token {
            "-" => Some(UnaryOp::Neg),
            "!" | "not" => Some(UnaryOp::Not),
            _ => None,
        }
    }
}

/// What a node means, independent of how the grammar spelled it.
#[derive(Debug, Clone, PartialEq)]
pub enum Construct<'a> {
    Statements(&'a [NodeId]),
    Function {
        name: &'a str,
        params: Vec<&'a str>,
        body: NodeId,
    },
    Class {
        name: &'a str,
        members: &'a [NodeId],
    },
    Call {
        callee: &'a str,
        args: Vec<NodeId>,
    },
    Assign {
        target: &'a str,
        value: NodeId,
    },
    If {
        cond: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    },
    While {
        cond: NodeId,
        body: NodeId,
    },
    /// `for var in from .. to`, upper bound exclusive.
    For {
        var: &'a str,
        from: NodeId,
        to: NodeId,
        body: NodeId,
    },
    Return(Option<NodeId>),
    Print(NodeId),
    Binary {
        first: NodeId,
        rest: Vec<(BinaryOp, NodeId)>,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Number(&'a str),
    /// String literal text, quotes included.
    Str(&'a str),
    Bool(bool),
    Var(&'a str),
    Passthrough(NodeId),
    Unknown,
}

impl Construct<'_> {
    /// Short label used in placeholder output.
    pub fn label(&self) -> &'static str {
        match self {
            Construct::Statements(_) => "statements",
            Construct::Function { .. } => "function",
            Construct::Class { .. } => "class",
            Construct::Call { .. } => "call",
            Construct::Assign { .. } => "assignment",
            Construct::If { .. } => "if",
            Construct::While { .. } => "while",
            Construct::For { .. } => "for",
            Construct::Return(_) => "return",
            Construct::Print(_) => "print",
            Construct::Binary { .. } => "binary",
            Construct::Unary { .. } => "unary",
            Construct::Number(_) => "number",
            Construct::Str(_) => "string",
            Construct::Bool(_) => "bool",
            Construct::Var(_) => "variable",
            Construct::Passthrough(_) => "passthrough",
            Construct::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructTable {
    roles: HashMap<String, Role>,
}

impl Default for ConstructTable {
    fn default() -> Self {
        let roles = DEFAULT_ALIASES
            .iter()
            .flat_map(|(role, names)| names.iter().map(|name| (name.to_string(), *role)))
            .collect();
        ConstructTable { roles }
    }
}

impl ConstructTable {
    /// A table with no aliases; everything is classified by shape.
    pub fn empty() -> Self {
        ConstructTable {
            roles: HashMap::new(),
        }
    }

    pub fn with_role(mut self, rule: impl Into<String>, role: Role) -> Self {
        self.roles.insert(rule.into(), role);
        self
    }

    pub fn with_overrides<'a>(mut self, overrides: impl IntoIterator<Item = (&'a String, &'a Role)>) -> Self {
        for (rule, role) in overrides {
            self.roles.insert(rule.clone(), *role);
        }
        self
    }

    pub fn role(&self, rule: &str) -> Option<Role> {
        self.roles.get(rule).copied()
    }

    pub fn classify<'a>(&self, ast: &'a SourceAst, id: NodeId) -> Construct<'a> {
        let node = ast.node(id);
        match &node.kind {
            NodeKind::Terminal(Terminal::Number) => Construct::Number(node.value().unwrap_or("0")),
            NodeKind::Terminal(Terminal::String) => Construct::Str(node.value().unwrap_or("\"\"")),
            NodeKind::Terminal(Terminal::Ident) => Construct::Var(node.value().unwrap_or_default()),
            NodeKind::Token => match node.value() {
                Some("true") => Construct::Bool(true),
                Some("false") => Construct::Bool(false),
                _ => Construct::Unknown,
            },
            NodeKind::Rule(name) => match self.role(name) {
                Some(role) => self.classify_role(ast, id, role),
                None => classify_shape(ast, id),
            },
        }
    }

    /// Classify, following single-child wrappers down to the node that
    /// carries meaning.
    pub fn resolve<'a>(&self, ast: &'a SourceAst, mut id: NodeId) -> (NodeId, Construct<'a>) {
        loop {
            match self.classify(ast, id) {
                Construct::Passthrough(inner) => id = inner,
                construct => return (id, construct),
            }
        }
    }

    /// Statements of a program, block or single-statement body.
    pub fn body(&self, ast: &SourceAst, id: NodeId) -> Vec<NodeId> {
        match self.resolve(ast, id) {
            (_, Construct::Statements(items)) => items.to_vec(),
            (inner, _) => vec![inner],
        }
    }

    /// Top-level function definitions under `root`, in source order.
    pub fn functions(&self, ast: &SourceAst, root: NodeId) -> Vec<NodeId> {
        self.body(ast, root)
            .into_iter()
            .map(|item| self.resolve(ast, item))
            .filter(|(_, construct)| matches!(construct, Construct::Function { .. }))
            .map(|(id, _)| id)
            .collect()
    }

    /// Variables assigned in `root`'s statements (including loop
    /// variables), in first-assignment order. Does not look inside
    /// nested functions or classes.
    pub fn assignments<'a>(&self, ast: &'a SourceAst, root: NodeId) -> Vec<&'a str> {
        let mut names = Vec::new();
        self.collect_assignments(ast, root, &mut names);
        names
    }

    fn collect_assignments<'a>(&self, ast: &'a SourceAst, id: NodeId, names: &mut Vec<&'a str>) {
        fn add<'a>(name: &'a str, names: &mut Vec<&'a str>) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        match self.resolve(ast, id).1 {
            Construct::Statements(items) => {
                for item in items {
                    self.collect_assignments(ast, *item, names);
                }
            }
            Construct::Assign { target, .. } => add(target, names),
            Construct::For { var, body, .. } => {
                add(var, names);
                self.collect_assignments(ast, body, names);
            }
            Construct::If {
                then_branch,
                else_branch,
                ..
            } => {
                self.collect_assignments(ast, then_branch, names);
                if let Some(else_branch) = else_branch {
                    self.collect_assignments(ast, else_branch, names);
                }
            }
            Construct::While { body, .. } => self.collect_assignments(ast, body, names),
            _ => {}
        }
    }

    fn classify_role<'a>(&self, ast: &'a SourceAst, id: NodeId, role: Role) -> Construct<'a> {
        let children = ast.children(id);
        let ident = |idx: usize| {
            children
                .get(idx)
                .filter(|child| ast.node(**child).is_terminal(Terminal::Ident))
                .and_then(|child| ast.value(*child))
        };

        match role {
            Role::Program | Role::Block | Role::Params | Role::Args => Construct::Statements(children),
            Role::Statement => match (children, ident(0)) {
                ([_, value], Some(target)) => Construct::Assign {
                    target,
                    value: *value,
                },
                _ => classify_shape(ast, id),
            },
            Role::Function => {
                let (Some(name), Some(body)) = (ident(0), children.last().filter(|_| children.len() >= 2))
                else {
                    return Construct::Unknown;
                };
                let params = children[1..children.len() - 1]
                    .iter()
                    .flat_map(|param| identifiers(ast, *param))
                    .collect();
                Construct::Function {
                    name,
                    params,
                    body: *body,
                }
            }
            Role::Class => match ident(0) {
                Some(name) => Construct::Class {
                    name,
                    members: &children[1..],
                },
                None => Construct::Unknown,
            },
            Role::Call => {
                let Some(callee) = ident(0) else {
                    return Construct::Unknown;
                };
                let args = match &children[1..] {
                    [list] if self.role(ast.node_type(*list)) == Some(Role::Args) => {
                        ast.children(*list).to_vec()
                    }
                    rest => rest.to_vec(),
                };
                Construct::Call { callee, args }
            }
            Role::Assign => match (children, ident(0)) {
                ([_, value], Some(target)) => Construct::Assign {
                    target,
                    value: *value,
                },
                _ => Construct::Unknown,
            },
            Role::If => match children {
                [cond, then_branch] => Construct::If {
                    cond: *cond,
                    then_branch: *then_branch,
                    else_branch: None,
                },
                [cond, then_branch, else_branch] => Construct::If {
                    cond: *cond,
                    then_branch: *then_branch,
                    else_branch: Some(*else_branch),
                },
                _ => Construct::Unknown,
            },
            Role::While => match children {
                [cond, body] => Construct::While {
                    cond: *cond,
                    body: *body,
                },
                _ => Construct::Unknown,
            },
            Role::For => match (children, ident(0)) {
                ([_, from, to, body], Some(var)) => Construct::For {
                    var,
                    from: *from,
                    to: *to,
                    body: *body,
                },
                _ => Construct::Unknown,
            },
            Role::Return => match children {
                [] => Construct::Return(None),
                [value] => Construct::Return(Some(*value)),
                _ => Construct::Unknown,
            },
            Role::Print => match children {
                [value] => Construct::Print(*value),
                _ => Construct::Unknown,
            },
        }
    }
}

/// Identifier leaves at or directly under `id`.
fn identifiers(ast: &SourceAst, id: NodeId) -> Vec<&str> {
    let node = ast.node(id);
    if node.is_terminal(Terminal::Ident) {
        return node.value().into_iter().collect();
    }
    node.children()
        .iter()
        .filter(|child| ast.node(**child).is_terminal(Terminal::Ident))
        .filter_map(|child| ast.value(*child))
        .collect()
}

fn token(ast: &SourceAst, id: NodeId) -> Option<&str> {
    let node = ast.node(id);
    match node.kind {
        NodeKind::Token => node.value(),
        _ => None,
    }
}

fn classify_shape(ast: &SourceAst, id: NodeId) -> Construct<'_> {
    let children = ast.children(id);
    match children {
        [] => Construct::Statements(children),
        [only] => Construct::Passthrough(*only),
        [op, operand] => match token(ast, *op).and_then(UnaryOp::from_token) {
            Some(op) => Construct::Unary {
                op,
                operand: *operand,
            },
            None if all_rules(ast, children) => Construct::Statements(children),
            None => Construct::Unknown,
        },
        [first, rest @ ..] if rest.len() % 2 == 0 => {
            let chain: Option<Vec<_>> = rest
                .chunks(2)
                .map(|pair| {
                    let op = token(ast, pair[0]).and_then(BinaryOp::from_token)?;
                    Some((op, pair[1]))
                })
                .collect();
            match chain {
                Some(rest) => Construct::Binary {
                    first: *first,
                    rest,
                },
                None if all_rules(ast, children) => Construct::Statements(children),
                None => Construct::Unknown,
            }
        }
        _ if all_rules(ast, children) => Construct::Statements(children),
        _ => Construct::Unknown,
    }
}

fn all_rules(ast: &SourceAst, children: &[NodeId]) -> bool {
    children.iter().all(|child| ast.node(*child).rule_name().is_some())
}
