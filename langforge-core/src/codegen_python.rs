//! Python backend.
//!
//! Top-level statements become the body of `main()`, which the script
//! calls under the usual `__name__` guard. Integer `/` and `%` keep
//! truncating semantics through `int(a / b)` and `math.fmod`.

use tracing::trace;

use crate::ast::{NodeId, SourceAst};
use crate::backend::{Backend, CodeWriter};
use crate::shape::{BinaryOp, Construct, ConstructTable, UnaryOp};
use crate::typecheck::{Scope, TypeInferencer};
use crate::types::{BaseType, TypeInfo, TypeMapping};

#[derive(Debug, Clone, Default)]
pub struct PythonBackend {
    table: ConstructTable,
}

impl PythonBackend {
    pub fn new(table: ConstructTable) -> Self {
        PythonBackend { table }
    }
}

impl Backend for PythonBackend {
    fn name(&self) -> &'static str {
        "python"
    }

    fn file_extension(&self) -> &'static str {
        "py"
    }

    fn translate(&self, ast: &SourceAst) -> String {
        let mut types = TypeInferencer::new(ast, &self.table);
        types.infer_program();
        let emitter = PyEmitter {
            ast,
            table: &self.table,
            types,
            mapping: TypeMapping::python(),
            w: CodeWriter::new("    "),
            uses_math: false,
        };
        emitter.program()
    }
}

struct PyEmitter<'a> {
    ast: &'a SourceAst,
    table: &'a ConstructTable,
    types: TypeInferencer<'a>,
    mapping: TypeMapping,
    w: CodeWriter,
    uses_math: bool,
}

fn function_name(name: &str) -> &str {
    if name == "main" { "user_main" } else { name }
}

impl<'a> PyEmitter<'a> {
    fn program(mut self) -> String {
        let root = self.ast.root();
        for function in self.table.functions(self.ast, root) {
            self.function(function);
            self.w.blank();
            self.w.blank();
        }

        self.w.line("def main() -> None:");
        let statements: Vec<NodeId> = self
            .table
            .body(self.ast, root)
            .into_iter()
            .filter(|id| !matches!(self.table.resolve(self.ast, *id).1, Construct::Function { .. }))
            .collect();
        self.suite(None, &statements);
        self.w.blank();
        self.w.blank();
        self.w.line("if __name__ == \"__main__\":");
        self.w.indent();
        self.w.line("main()");
        self.w.dedent();

        let mut out = String::new();
        if self.uses_math {
            out.push_str("import math\n\n\n");
        }
        out.push_str(&self.w.finish());
        out
    }

    fn function(&mut self, id: NodeId) {
        let Construct::Function { name, params, body } = self.table.classify(self.ast, id) else {
            return;
        };
        let params = params
            .iter()
            .map(|param| {
                let ty = self.types.variable_type(Some(id), param).unwrap_or(TypeInfo::ANY);
                format!("{param}: {}", self.mapping.spell(&ty))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let returns = self.types.return_type(id);
        self.w.line(format!(
            "def {}({params}) -> {}:",
            function_name(name),
            self.mapping.spell(&returns)
        ));
        let statements = self.table.body(self.ast, body);
        self.suite(Some(id), &statements);
    }

    /// An indented block; Python needs `pass` when it would be empty.
    fn suite(&mut self, scope: Scope, statements: &[NodeId]) {
        self.w.indent();
        if statements.is_empty() {
            self.w.line("pass");
        }
        for statement in statements {
            self.statement(scope, *statement);
        }
        self.w.dedent();
    }

    fn block(&mut self, scope: Scope, id: NodeId) {
        let statements = self.table.body(self.ast, id);
        self.suite(scope, &statements);
    }

    fn statement(&mut self, scope: Scope, id: NodeId) {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Statements(items) => {
                for item in items {
                    self.statement(scope, *item);
                }
            }
            Construct::Assign { target, value: expr } => {
                let value_ty = self.types.type_of(scope, expr);
                let storage = self.types.variable_type(scope, target).unwrap_or(value_ty);
                let value = self.expr(scope, expr);
                let value = match (storage.base, value_ty.base) {
                    (BaseType::Int, BaseType::Float) => format!("int({value})"),
                    (BaseType::Float, BaseType::Int) => format!("float({value})"),
                    _ => value,
                };
                self.w.line(format!("{target} = {value}"));
            }
            Construct::If {
                cond,
                then_branch,
                else_branch,
            } => self.if_chain(scope, cond, then_branch, else_branch, "if"),
            Construct::While { cond, body } => {
                let cond = self.expr(scope, cond);
                self.w.line(format!("while {cond}:"));
                self.block(scope, body);
            }
            Construct::For { var, from, to, body } => {
                let from = self.expr(scope, from);
                let to = self.expr(scope, to);
                self.w.line(format!("{var} = {from}"));
                self.w.line(format!("while {var} < {to}:"));
                self.block(scope, body);
                self.w.indent();
                self.w.line(format!("{var} += 1"));
                self.w.dedent();
            }
            Construct::Return(Some(value)) => {
                let value = self.expr(scope, value);
                self.w.line(format!("return {value}"));
            }
            Construct::Return(None) => self.w.line("return 0"),
            Construct::Print(value) => {
                let ty = self.types.type_of(scope, value);
                let value = self.expr(scope, value);
                let line = match ty.base {
                    BaseType::Bool => format!("print(\"true\" if {value} else \"false\")"),
                    _ => format!("print({value})"),
                };
                self.w.line(line);
            }
            Construct::Call { .. } | Construct::Binary { .. } | Construct::Unary { .. } => {
                let value = self.expr(scope, id);
                self.w.line(value);
            }
            other => {
                trace!(node = self.ast.node_type(id), "python backend placeholder");
                self.w.line(format!(
                    "# unsupported construct: {} ({})",
                    other.label(),
                    self.ast.node_type(id)
                ));
                self.w.line("pass");
            }
        }
    }

    fn if_chain(
        &mut self,
        scope: Scope,
        cond: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
        keyword: &str,
    ) {
        let cond = self.expr(scope, cond);
        self.w.line(format!("{keyword} {cond}:"));
        self.block(scope, then_branch);
        match else_branch.map(|branch| self.table.resolve(self.ast, branch)) {
            Some((
                _,
                Construct::If {
                    cond,
                    then_branch,
                    else_branch,
                },
            )) => self.if_chain(scope, cond, then_branch, else_branch, "elif"),
            Some((branch, _)) => {
                self.w.line("else:");
                self.block(scope, branch);
            }
            None => {}
        }
    }

    fn expr(&mut self, scope: Scope, id: NodeId) -> String {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Number(text) | Construct::Str(text) | Construct::Var(text) => text.to_string(),
            Construct::Bool(true) => "True".to_string(),
            Construct::Bool(false) => "False".to_string(),
            Construct::Unary { op, operand } => {
                let operand = self.expr(scope, operand);
                match op {
                    UnaryOp::Neg => format!("(-{operand})"),
                    UnaryOp::Not => format!("(not {operand})"),
                }
            }
            Construct::Binary { first, rest } => {
                let mut left_ty = self.types.type_of(scope, first);
                let mut acc = self.expr(scope, first);
                for (op, operand) in rest {
                    let right_ty = self.types.type_of(scope, operand);
                    let right = self.expr(scope, operand);
                    let integral = !left_ty.is_float() && !right_ty.is_float();
                    acc = match op {
                        BinaryOp::Div if integral => format!("int({acc} / {right})"),
                        BinaryOp::Rem => {
                            self.uses_math = true;
                            if integral {
                                format!("int(math.fmod({acc}, {right}))")
                            } else {
                                format!("math.fmod({acc}, {right})")
                            }
                        }
                        BinaryOp::And => format!("({acc} and {right})"),
                        BinaryOp::Or => format!("({acc} or {right})"),
                        _ => format!("({acc} {op} {right})"),
                    };
                    left_ty = if op.is_arithmetic() { left_ty } else { TypeInfo::BOOL };
                }
                acc
            }
            Construct::Call { callee, args } => {
                let args: Vec<String> = args.into_iter().map(|arg| self.expr(scope, arg)).collect();
                let callee = if self.types.function(callee).is_some() {
                    function_name(callee)
                } else if callee == "pow" {
                    self.uses_math = true;
                    "math.pow"
                } else {
                    callee
                };
                format!("{callee}({})", args.join(", "))
            }
            other => {
                trace!(node = self.ast.node_type(id), "python backend placeholder");
                format!("0  # unsupported construct: {}", other.label())
            }
        }
    }
}
