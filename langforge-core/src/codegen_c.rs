//! C backend.
//!
//! Output layout: includes, forward declarations, one global per
//! top-level variable, function definitions with their locals hoisted
//! to the top, and a synthesized `int main(void)` running the top-level
//! statements. A source function called `main` is emitted as
//! `user_main`.

use tracing::trace;

use crate::ast::{NodeId, SourceAst};
use crate::backend::{Backend, CodeWriter};
use crate::shape::{BinaryOp, Construct, ConstructTable, UnaryOp};
use crate::typecheck::{Scope, TypeInferencer};
use crate::types::{BaseType, TypeInfo, TypeMapping};

#[derive(Debug, Clone, Default)]
pub struct CBackend {
    table: ConstructTable,
}

impl CBackend {
    pub fn new(table: ConstructTable) -> Self {
        CBackend { table }
    }
}

impl Backend for CBackend {
    fn name(&self) -> &'static str {
        "c"
    }

    fn file_extension(&self) -> &'static str {
        "c"
    }

    fn translate(&self, ast: &SourceAst) -> String {
        let mut types = TypeInferencer::new(ast, &self.table);
        types.infer_program();
        let emitter = CEmitter {
            ast,
            table: &self.table,
            types,
            mapping: TypeMapping::c(),
            w: CodeWriter::new("    "),
            uses_bool: false,
            uses_math: false,
        };
        emitter.program()
    }
}

struct CEmitter<'a> {
    ast: &'a SourceAst,
    table: &'a ConstructTable,
    types: TypeInferencer<'a>,
    mapping: TypeMapping,
    w: CodeWriter,
    uses_bool: bool,
    uses_math: bool,
}

fn function_name(name: &str) -> &str {
    if name == "main" { "user_main" } else { name }
}

impl<'a> CEmitter<'a> {
    fn program(mut self) -> String {
        let root = self.ast.root();
        let functions = self.table.functions(self.ast, root);

        let mut prototypes = Vec::new();
        for function in &functions {
            if let Some(prototype) = self.prototype(*function) {
                prototypes.push(prototype);
            }
        }
        let globals: Vec<String> = self
            .types
            .variables_in(None)
            .into_iter()
            .map(|(name, ty)| format!("{} {name};", self.spell(&ty)))
            .collect();

        for function in &functions {
            self.function(*function);
            self.w.blank();
        }

        self.w.line("int main(void) {");
        self.w.indent();
        for statement in self.table.body(self.ast, root) {
            if let Construct::Function { .. } = self.table.resolve(self.ast, statement).1 {
                continue;
            }
            self.statement(None, statement);
        }
        self.w.line("return 0;");
        self.w.dedent();
        self.w.line("}");

        let mut header = CodeWriter::new("    ");
        header.line("#include <stdio.h>");
        if self.uses_bool {
            header.line("#include <stdbool.h>");
        }
        if self.uses_math {
            header.line("#include <math.h>");
        }
        header.blank();
        if !prototypes.is_empty() {
            for prototype in &prototypes {
                header.line(format!("{prototype};"));
            }
            header.blank();
        }
        if !globals.is_empty() {
            for global in &globals {
                header.line(global);
            }
            header.blank();
        }

        let mut out = header.finish();
        out.push_str(&self.w.finish());
        out
    }

    fn spell(&mut self, ty: &TypeInfo) -> String {
        if ty.base == BaseType::Bool {
            self.uses_bool = true;
        }
        self.mapping.spell(ty)
    }

    fn prototype(&mut self, id: NodeId) -> Option<String> {
        let Construct::Function { name, params, .. } = self.table.classify(self.ast, id) else {
            return None;
        };
        let returns = self.types.return_type(id);
        let returns = self.spell(&returns);
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params
                .iter()
                .map(|param| {
                    let ty = self.types.variable_type(Some(id), param).unwrap_or(TypeInfo::ANY);
                    format!("{} {param}", self.spell(&ty))
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        Some(format!("{returns} {}({params})", function_name(name)))
    }

    fn function(&mut self, id: NodeId) {
        let Some(prototype) = self.prototype(id) else {
            return;
        };
        let Construct::Function { params, body, .. } = self.table.classify(self.ast, id) else {
            return;
        };
        self.w.line(format!("{prototype} {{"));
        self.w.indent();
        for (name, ty) in self.types.variables_in(Some(id)) {
            if !params.contains(&name) {
                let decl = format!("{} {name};", self.spell(&ty));
                self.w.line(decl);
            }
        }
        for statement in self.table.body(self.ast, body) {
            self.statement(Some(id), statement);
        }
        self.w.line("return 0;");
        self.w.dedent();
        self.w.line("}");
    }

    fn block(&mut self, scope: Scope, id: NodeId) {
        self.w.indent();
        for statement in self.table.body(self.ast, id) {
            self.statement(scope, statement);
        }
        self.w.dedent();
    }

    fn statement(&mut self, scope: Scope, id: NodeId) {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Statements(items) => {
                for item in items {
                    self.statement(scope, *item);
                }
            }
            Construct::Assign { target, value } => {
                let value = self.expr(scope, value);
                self.w.line(format!("{target} = {value};"));
            }
            Construct::If {
                cond,
                then_branch,
                else_branch,
            } => self.if_chain(scope, cond, then_branch, else_branch, ""),
            Construct::While { cond, body } => {
                let cond = self.expr(scope, cond);
                self.w.line(format!("while ({cond}) {{"));
                self.block(scope, body);
                self.w.line("}");
            }
            Construct::For { var, from, to, body } => {
                let from = self.expr(scope, from);
                let to = self.expr(scope, to);
                self.w.line(format!("for ({var} = {from}; {var} < {to}; {var}++) {{"));
                self.block(scope, body);
                self.w.line("}");
            }
            Construct::Return(Some(value)) if scope.is_some() => {
                let value = self.expr(scope, value);
                self.w.line(format!("return {value};"));
            }
            Construct::Return(_) => self.w.line("return 0;"),
            Construct::Print(value) => {
                let ty = self.types.type_of(scope, value);
                let value = self.expr(scope, value);
                let line = match ty.base {
                    BaseType::Float => format!("printf(\"%g\\n\", {value});"),
                    BaseType::String => format!("printf(\"%s\\n\", {value});"),
                    BaseType::Bool => format!("printf(\"%s\\n\", {value} ? \"true\" : \"false\");"),
                    _ => format!("printf(\"%d\\n\", {value});"),
                };
                self.w.line(line);
            }
            Construct::Call { .. } | Construct::Binary { .. } | Construct::Unary { .. } => {
                let value = self.expr(scope, id);
                self.w.line(format!("{value};"));
            }
            other => {
                trace!(node = self.ast.node_type(id), "c backend placeholder");
                self.w.line(format!(
                    "/* unsupported construct: {} ({}) */",
                    other.label(),
                    self.ast.node_type(id)
                ));
            }
        }
    }

    fn if_chain(
        &mut self,
        scope: Scope,
        cond: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
        prefix: &str,
    ) {
        let cond = self.expr(scope, cond);
        self.w.line(format!("{prefix}if ({cond}) {{"));
        self.block(scope, then_branch);
        match else_branch.map(|branch| self.table.resolve(self.ast, branch)) {
            Some((
                _,
                Construct::If {
                    cond,
                    then_branch,
                    else_branch,
                },
            )) => self.if_chain(scope, cond, then_branch, else_branch, "} else "),
            Some((branch, _)) => {
                self.w.line("} else {");
                self.block(scope, branch);
                self.w.line("}");
            }
            None => self.w.line("}"),
        }
    }

    fn expr(&mut self, scope: Scope, id: NodeId) -> String {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Number(text) | Construct::Str(text) | Construct::Var(text) => text.to_string(),
            Construct::Bool(b) => {
                self.uses_bool = true;
                b.to_string()
            }
            Construct::Unary { op, operand } => {
                let operand = self.expr(scope, operand);
                match op {
                    UnaryOp::Neg => format!("(-{operand})"),
                    UnaryOp::Not => format!("(!{operand})"),
                }
            }
            Construct::Binary { first, rest } => {
                let mut left_ty = self.types.type_of(scope, first);
                let mut acc = self.expr(scope, first);
                for (op, operand) in rest {
                    let right_ty = self.types.type_of(scope, operand);
                    let right = self.expr(scope, operand);
                    acc = if op == BinaryOp::Rem && (left_ty.is_float() || right_ty.is_float()) {
                        self.uses_math = true;
                        format!("fmod({acc}, {right})")
                    } else {
                        format!("({acc} {op} {right})")
                    };
                    left_ty = if !op.is_arithmetic() {
                        TypeInfo::BOOL
                    } else if right_ty.is_float() {
                        TypeInfo::FLOAT
                    } else {
                        left_ty
                    };
                }
                acc
            }
            Construct::Call { callee, args } => {
                let args: Vec<String> = args.into_iter().map(|arg| self.expr(scope, arg)).collect();
                let callee = if self.types.function(callee).is_some() {
                    function_name(callee)
                } else {
                    if callee == "pow" {
                        self.uses_math = true;
                    }
                    callee
                };
                format!("{callee}({})", args.join(", "))
            }
            other => {
                trace!(node = self.ast.node_type(id), "c backend placeholder");
                format!("0 /* unsupported construct: {} */", other.label())
            }
        }
    }
}
