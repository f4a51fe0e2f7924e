//! Parse trees produced by the PEG interpreter.
//!
//! Nodes live in a flat arena and refer to their children by
//! [`NodeId`], which gives later passes a stable, hashable identity to
//! key caches on. A node is either a leaf carrying a `value` or a
//! branch with zero or more children, never both.

use std::fmt::Write as _;

use crate::grammar::Terminal;
use crate::span::Span;

/// Label of the synthetic leaf produced when a literal alternative of an
/// ordered choice wins (operators, `true`/`false`, ...).
pub const TOKEN: &str = "TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        NodeId(index as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Rule(String),
    Terminal(Terminal),
    Token,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    pub kind: NodeKind,
    value: Option<String>,
    children: Vec<NodeId>,
    pub span: Span,
    /// Furthest byte offset the interpreter had examined, across every
    /// attempt so far, when it started matching this node. Not part of
    /// tree equality.
    scanned_before: usize,
}

impl AstNode {
    pub fn leaf(kind: NodeKind, value: impl Into<String>, span: Span) -> Self {
        AstNode {
            kind,
            value: Some(value.into()),
            children: Vec::new(),
            span,
            scanned_before: 0,
        }
    }

    pub fn branch(kind: NodeKind, children: Vec<NodeId>, span: Span) -> Self {
        AstNode {
            kind,
            value: None,
            children,
            span,
            scanned_before: 0,
        }
    }

    pub(crate) fn with_scanned_before(mut self, offset: usize) -> Self {
        self.scanned_before = offset;
        self
    }

    pub fn scanned_before(&self) -> usize {
        self.scanned_before
    }

    /// Rule name, terminal class, or [`TOKEN`].
    pub fn node_type(&self) -> &str {
        match &self.kind {
            NodeKind::Rule(name) => name,
            NodeKind::Terminal(terminal) => terminal.name(),
            NodeKind::Token => TOKEN,
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_terminal(&self, terminal: Terminal) -> bool {
        self.kind == NodeKind::Terminal(terminal)
    }

    pub fn rule_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Rule(name) => Some(name),
            _ => None,
        }
    }
}

/// Incremental builder used by the interpreter. Truncating to an earlier
/// [`AstArena::mark`] discards nodes built by a failed alternative.
#[derive(Debug, Default)]
pub(crate) struct AstArena {
    nodes: Vec<AstNode>,
}

impl AstArena {
    pub(crate) fn push(&mut self, node: AstNode) -> NodeId {
        self.nodes.push(node);
        NodeId::from_index(self.nodes.len() - 1)
    }

    pub(crate) fn mark(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn truncate(&mut self, mark: usize) {
        self.nodes.truncate(mark);
    }

    pub(crate) fn finish(self, root: NodeId) -> SourceAst {
        SourceAst {
            nodes: self.nodes,
            root,
        }
        .compact()
    }
}

#[derive(Debug, Clone)]
pub struct SourceAst {
    nodes: Vec<AstNode>,
    root: NodeId,
}

impl SourceAst {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.index()]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children()
    }

    pub fn node_type(&self, id: NodeId) -> &str {
        self.node(id).node_type()
    }

    pub fn value(&self, id: NodeId) -> Option<&str> {
        self.node(id).value()
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.node(id).span
    }

    /// Number of arena slots, reachable or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in pre-order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// All nodes with the given rule name, in pre-order.
    pub fn find_all(&self, node_type: &str) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.node_type(*id) == node_type)
            .collect()
    }

    /// Ancestors of `target` from the root down, excluding `target`.
    pub fn ancestors(&self, target: NodeId) -> Vec<NodeId> {
        fn walk(ast: &SourceAst, at: NodeId, target: NodeId, path: &mut Vec<NodeId>) -> bool {
            if at == target {
                return true;
            }
            path.push(at);
            for child in ast.children(at) {
                if walk(ast, *child, target, path) {
                    return true;
                }
            }
            path.pop();
            false
        }
        let mut path = Vec::new();
        walk(self, self.root, target, &mut path);
        path
    }

    /// Deepest rule node whose span contains the edited range.
    ///
    /// A pure insertion (`start == end`) only counts as contained when it
    /// falls strictly inside a node, since text inserted on a boundary
    /// may belong to either neighbour.
    pub fn smallest_rule_enclosing(&self, start: usize, end: usize) -> Option<NodeId> {
        let encloses = |span: Span| {
            if start == end {
                span.start < start && start < span.end
            } else {
                span.covers(start, end)
            }
        };

        if !encloses(self.span(self.root)) {
            return None;
        }
        let mut current = self.root;
        let mut best = self.node(current).rule_name().map(|_| current);
        'descend: loop {
            for child in self.children(current) {
                if encloses(self.span(*child)) {
                    current = *child;
                    if self.node(current).rule_name().is_some() {
                        best = Some(current);
                    }
                    continue 'descend;
                }
            }
            return best;
        }
    }

    /// Replace the subtree at `target` with `replacement`, whose spans are
    /// already expressed in post-edit coordinates. Nodes after the edited
    /// range `[edit_start, edit_end)` shift by `delta`; nodes enclosing it
    /// stretch by `delta`.
    pub fn graft(
        &self,
        target: NodeId,
        replacement: &SourceAst,
        edit_end: usize,
        delta: isize,
    ) -> SourceAst {
        let mut nodes = Vec::with_capacity(self.nodes.len() + replacement.nodes.len());
        let root = self.copy_grafted(self.root, target, replacement, edit_end, delta, &mut nodes);
        SourceAst { nodes, root }
    }

    fn copy_grafted(
        &self,
        id: NodeId,
        target: NodeId,
        replacement: &SourceAst,
        edit_end: usize,
        delta: isize,
        out: &mut Vec<AstNode>,
    ) -> NodeId {
        if id == target {
            return replacement.copy_subtree(replacement.root, out);
        }
        let node = self.node(id);
        let children = node
            .children
            .iter()
            .map(|child| self.copy_grafted(*child, target, replacement, edit_end, delta, out))
            .collect();
        let span = if node.span.start >= edit_end {
            node.span.shifted(delta)
        } else if node.span.end >= edit_end {
            node.span.stretched(delta)
        } else {
            node.span
        };
        let scanned_before = if node.scanned_before >= edit_end {
            node.scanned_before.saturating_add_signed(delta)
        } else {
            node.scanned_before
        };
        out.push(AstNode {
            kind: node.kind.clone(),
            value: node.value.clone(),
            children,
            span,
            scanned_before,
        });
        NodeId::from_index(out.len() - 1)
    }

    fn copy_subtree(&self, id: NodeId, out: &mut Vec<AstNode>) -> NodeId {
        let node = self.node(id);
        let children = node
            .children
            .iter()
            .map(|child| self.copy_subtree(*child, out))
            .collect();
        out.push(AstNode {
            kind: node.kind.clone(),
            value: node.value.clone(),
            children,
            span: node.span,
            scanned_before: node.scanned_before,
        });
        NodeId::from_index(out.len() - 1)
    }

    /// Raise the recorded scan offset of every node starting at or after
    /// `from` to at least `floor`.
    pub(crate) fn raise_scanned_from(&mut self, from: usize, floor: usize) {
        for node in &mut self.nodes {
            if node.span.start >= from {
                node.scanned_before = node.scanned_before.max(floor);
            }
        }
    }

    /// Rebuild the arena keeping only nodes reachable from the root.
    pub fn compact(&self) -> SourceAst {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let root = self.copy_subtree(self.root, &mut nodes);
        SourceAst { nodes, root }
    }

    /// Same node types, values and nesting, ignoring spans.
    pub fn same_shape(&self, other: &SourceAst) -> bool {
        fn eq(a: &SourceAst, x: NodeId, b: &SourceAst, y: NodeId) -> bool {
            let (left, right) = (a.node(x), b.node(y));
            left.kind == right.kind
                && left.value == right.value
                && left.children.len() == right.children.len()
                && left
                    .children
                    .iter()
                    .zip(&right.children)
                    .all(|(l, r)| eq(a, *l, b, *r))
        }
        eq(self, self.root, other, other.root)
    }

    /// Indented tree dump, one node per line.
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let node = self.node(id);
            let _ = write!(out, "{}{}", "  ".repeat(depth), node.node_type());
            if let Some(value) = node.value() {
                let _ = write!(out, " {value:?}");
            }
            out.push('\n');
            stack.extend(node.children.iter().rev().map(|child| (*child, depth + 1)));
        }
        out
    }
}

impl PartialEq for SourceAst {
    /// Structural equality including spans; arena layout is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.same_shape(other)
            && self
                .preorder()
                .into_iter()
                .zip(other.preorder())
                .all(|(l, r)| self.span(l) == other.span(r))
    }
}

impl Eq for SourceAst {}
