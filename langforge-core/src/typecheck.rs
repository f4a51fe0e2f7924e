//! Single-pass type inference over a parse tree.
//!
//! Arithmetic is `float` as soon as either operand is, `int` otherwise.
//! Types are cached per [`NodeId`], so asking for the type of the same
//! expression twice is a map lookup. Variables are typed by their first
//! assignment within a scope; a scope is either the program (`None`) or
//! one function definition (`Some(function_node)`). Function bodies are
//! closed scopes: they see their parameters and their own locals.
//!
//! Parameters carry no annotation in the source languages this crate
//! builds, so they are typed `any`.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::ast::{NodeId, SourceAst};
use crate::diagnostic::Diagnostic;
use crate::shape::{Construct, ConstructTable, UnaryOp};
use crate::types::{BaseType, CompatibilityCache, TypeInfo};

/// `None` is program scope, `Some(id)` the body of function `id`.
pub type Scope = Option<NodeId>;

pub struct TypeInferencer<'a> {
    ast: &'a SourceAst,
    table: &'a ConstructTable,
    functions: HashMap<&'a str, NodeId>,
    cache: HashMap<NodeId, TypeInfo>,
    variables: HashMap<(Scope, &'a str), TypeInfo>,
    declared: Vec<(Scope, &'a str)>,
    returns: HashMap<NodeId, TypeInfo>,
    in_progress: HashSet<NodeId>,
    compat: CompatibilityCache,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> TypeInferencer<'a> {
    pub fn new(ast: &'a SourceAst, table: &'a ConstructTable) -> Self {
        let functions = table
            .functions(ast, ast.root())
            .into_iter()
            .filter_map(|id| match table.classify(ast, id) {
                Construct::Function { name, .. } => Some((name, id)),
                _ => None,
            })
            .collect();
        TypeInferencer {
            ast,
            table,
            functions,
            cache: HashMap::new(),
            variables: HashMap::new(),
            declared: Vec::new(),
            returns: HashMap::new(),
            in_progress: HashSet::new(),
            compat: CompatibilityCache::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Visit function definitions first, then the top-level statements.
    pub fn infer_program(&mut self) {
        let root = self.ast.root();
        for id in self.table.functions(self.ast, root) {
            self.infer_function(id);
        }
        for statement in self.table.body(self.ast, root) {
            self.visit_statement(None, statement);
        }
        trace!(nodes = self.cache.len(), "type inference finished");
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Number of nodes with a cached type.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn compatible(&mut self, a: BaseType, b: BaseType) -> bool {
        self.compat.compatible(a, b)
    }

    pub fn variable_type(&self, scope: Scope, name: &str) -> Option<TypeInfo> {
        self.variables.get(&(scope, name)).copied()
    }

    /// Variables of `scope` in first-assignment order, parameters first.
    pub fn variables_in(&self, scope: Scope) -> Vec<(&'a str, TypeInfo)> {
        self.declared
            .iter()
            .filter(|(owner, _)| *owner == scope)
            .map(|key| (key.1, self.variables[key]))
            .collect()
    }

    pub fn function(&self, name: &str) -> Option<NodeId> {
        self.functions.get(name).copied()
    }

    /// Type returned by function `id`: the type of its first `return`
    /// with a value, `int` otherwise.
    pub fn return_type(&mut self, id: NodeId) -> TypeInfo {
        self.infer_function(id);
        self.returns.get(&id).copied().unwrap_or(TypeInfo::INT)
    }

    pub fn type_of(&mut self, scope: Scope, id: NodeId) -> TypeInfo {
        if let Some(ty) = self.cache.get(&id) {
            return *ty;
        }
        let ty = self.compute(scope, id);
        self.cache.insert(id, ty);
        ty
    }

    fn compute(&mut self, scope: Scope, id: NodeId) -> TypeInfo {
        match self.table.classify(self.ast, id) {
            Construct::Passthrough(inner) => self.type_of(scope, inner),
            Construct::Number(text) if text.contains('.') => TypeInfo::FLOAT,
            Construct::Number(_) => TypeInfo::INT,
            Construct::Str(_) => TypeInfo::STRING,
            Construct::Bool(_) => TypeInfo::BOOL,
            Construct::Var(name) => match self.variable_type(scope, name) {
                Some(ty) => ty,
                None => {
                    self.diagnostics.push(
                        Diagnostic::warning(
                            format!("use of undefined variable '{name}'"),
                            self.ast.span(id),
                        )
                        .with_code("T0001"),
                    );
                    TypeInfo::ANY
                }
            },
            Construct::Binary { first, rest } => {
                let mut ty = self.type_of(scope, first);
                for (op, operand) in rest {
                    let right = self.type_of(scope, operand);
                    ty = if !op.is_arithmetic() {
                        TypeInfo::BOOL
                    } else if ty.is_float() || right.is_float() {
                        TypeInfo::FLOAT
                    } else if ty.is_numeric() {
                        ty
                    } else {
                        TypeInfo::INT
                    };
                }
                ty
            }
            Construct::Unary { op, operand } => {
                let ty = self.type_of(scope, operand);
                match op {
                    UnaryOp::Neg => ty,
                    UnaryOp::Not => TypeInfo::BOOL,
                }
            }
            Construct::Call { callee, args } => {
                for arg in args {
                    self.type_of(scope, arg);
                }
                match self.functions.get(callee) {
                    Some(function) => {
                        let function = *function;
                        if self.in_progress.contains(&function) {
                            self.returns.get(&function).copied().unwrap_or(TypeInfo::ANY)
                        } else {
                            self.return_type(function)
                        }
                    }
                    None if callee == "pow" => TypeInfo::FLOAT,
                    None => TypeInfo::ANY,
                }
            }
            _ => TypeInfo::ANY,
        }
    }

    fn declare(&mut self, scope: Scope, name: &'a str, ty: TypeInfo, at: NodeId) {
        match self.variables.get(&(scope, name)).copied() {
            Some(existing) => {
                if !self.compat.compatible(existing.base, ty.base) {
                    self.diagnostics.push(
                        Diagnostic::warning(
                            format!("'{name}' was first assigned {existing}, now {ty}"),
                            self.ast.span(at),
                        )
                        .with_code("T0002"),
                    );
                }
            }
            None => {
                self.variables.insert((scope, name), ty);
                self.declared.push((scope, name));
            }
        }
    }

    fn infer_function(&mut self, id: NodeId) {
        if self.in_progress.contains(&id) || self.returns.contains_key(&id) {
            return;
        }
        let Construct::Function { params, body, .. } = self.table.classify(self.ast, id) else {
            return;
        };
        self.in_progress.insert(id);
        for param in params {
            self.declare(Some(id), param, TypeInfo::ANY, id);
        }
        for statement in self.table.body(self.ast, body) {
            self.visit_statement(Some(id), statement);
        }
        self.returns.entry(id).or_insert(TypeInfo::INT);
        self.in_progress.remove(&id);
    }

    fn visit_block(&mut self, scope: Scope, id: NodeId) {
        for statement in self.table.body(self.ast, id) {
            self.visit_statement(scope, statement);
        }
    }

    fn visit_statement(&mut self, scope: Scope, id: NodeId) {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Statements(items) => {
                for item in items {
                    self.visit_statement(scope, *item);
                }
            }
            Construct::Assign { target, value } => {
                let ty = self.type_of(scope, value);
                self.declare(scope, target, ty, id);
            }
            Construct::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.type_of(scope, cond);
                self.visit_block(scope, then_branch);
                if let Some(else_branch) = else_branch {
                    self.visit_block(scope, else_branch);
                }
            }
            Construct::While { cond, body } => {
                self.type_of(scope, cond);
                self.visit_block(scope, body);
            }
            Construct::For { var, from, to, body } => {
                let ty = self.type_of(scope, from);
                self.type_of(scope, to);
                self.declare(scope, var, ty, id);
                self.visit_block(scope, body);
            }
            Construct::Return(value) => {
                let ty = value.map(|value| self.type_of(scope, value));
                if let (Some(function), Some(ty)) = (scope, ty) {
                    self.returns.entry(function).or_insert(ty);
                }
            }
            Construct::Print(value) => {
                self.type_of(scope, value);
            }
            Construct::Function { .. } | Construct::Class { .. } | Construct::Unknown => {}
            _ => {
                self.type_of(scope, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{parse_arithmetic, parse_mini};

    #[test]
    fn types_top_level_variables() {
        let ast = parse_mini("a = 1; b = 2.5; c = a < 3; d = \"hi\"; e = b * 2;");
        let table = ConstructTable::default();
        let mut types = TypeInferencer::new(&ast, &table);
        types.infer_program();

        let names: Vec<_> = types
            .variables_in(None)
            .into_iter()
            .map(|(name, ty)| (name, ty.base))
            .collect();
        assert_eq!(
            names,
            [
                ("a", BaseType::Int),
                ("b", BaseType::Float),
                ("c", BaseType::Bool),
                ("d", BaseType::String),
                ("e", BaseType::Float),
            ]
        );
        assert!(types.diagnostics().is_empty());
    }

    #[test]
    fn integer_arithmetic_stays_int() {
        let ast = parse_arithmetic("x = 10 ; y = x + 2 ;");
        let table = ConstructTable::default();
        let mut types = TypeInferencer::new(&ast, &table);
        types.infer_program();
        assert_eq!(types.variable_type(None, "y"), Some(TypeInfo::INT));

        let before = types.cached();
        let expr = ast.find_all("expr")[1];
        assert_eq!(types.type_of(None, expr), TypeInfo::INT);
        assert_eq!(types.cached(), before);
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        let ast = parse_mini("x = 1 + 2.5; r = x * 2; n = 2 * 3 - 1; m = n / 2.0;");
        let table = ConstructTable::default();
        let mut types = TypeInferencer::new(&ast, &table);
        types.infer_program();
        assert_eq!(types.variable_type(None, "x"), Some(TypeInfo::FLOAT));
        assert_eq!(types.variable_type(None, "r"), Some(TypeInfo::FLOAT));
        assert_eq!(types.variable_type(None, "n"), Some(TypeInfo::INT));
        assert_eq!(types.variable_type(None, "m"), Some(TypeInfo::FLOAT));
    }

    #[test]
    fn first_assignment_wins_and_conflicts_warn() {
        let ast = parse_mini("x = 1; x = \"text\";");
        let table = ConstructTable::default();
        let mut types = TypeInferencer::new(&ast, &table);
        types.infer_program();
        assert_eq!(types.variable_type(None, "x"), Some(TypeInfo::INT));
        assert_eq!(types.diagnostics().len(), 1);
        assert_eq!(types.diagnostics()[0].code, Some("T0002"));
    }

    #[test]
    fn functions_are_closed_scopes() {
        let ast = parse_mini(
            "fn avg(a, b) { total = a + b; return total / 2.0; } r = avg(1, 2); s = pow(2, 3);",
        );
        let table = ConstructTable::default();
        let mut types = TypeInferencer::new(&ast, &table);
        types.infer_program();

        let avg = types.function("avg").expect("avg");
        let locals: Vec<_> = types
            .variables_in(Some(avg))
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(locals, ["a", "b", "total"]);
        assert_eq!(types.variable_type(None, "total"), None);
        assert_eq!(types.return_type(avg), TypeInfo::FLOAT);
        assert_eq!(types.variable_type(None, "r"), Some(TypeInfo::FLOAT));
        assert_eq!(types.variable_type(None, "s"), Some(TypeInfo::FLOAT));
    }

    #[test]
    fn recursive_functions_terminate() {
        let ast = parse_mini("fn f(n) { if n < 1 { return 0; } return f(n - 1); } r = f(3);");
        let table = ConstructTable::default();
        let mut types = TypeInferencer::new(&ast, &table);
        types.infer_program();
        assert_eq!(types.variable_type(None, "r"), Some(TypeInfo::INT));
    }

    #[test]
    fn undefined_variables_are_reported() {
        let ast = parse_mini("y = missing + 1;");
        let table = ConstructTable::default();
        let mut types = TypeInferencer::new(&ast, &table);
        types.infer_program();
        let diagnostics = types.into_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, Some("T0001"));
        assert!(!diagnostics[0].is_error());
    }
}
