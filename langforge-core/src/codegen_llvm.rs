//! LLVM IR backend.
//!
//! Emits textual IR with opaque pointers. Every variable lives in an
//! `alloca` slot created in the entry block; reads are `load`s into fresh
//! numbered registers and writes are `store`s, so the only SSA values are
//! temporaries. Control flow uses named blocks (`if.then.N`, `while.cond.N`,
//! ...) and a `dead.N` block is opened after each `ret` so that every
//! block stays terminated.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::trace;

use crate::ast::{NodeId, SourceAst};
use crate::backend::{Backend, CodeWriter, float_literal, int_literal};
use crate::error::CoreError;
use crate::eval::unquote;
use crate::shape::{BinaryOp, Construct, ConstructTable, UnaryOp};
use crate::typecheck::{Scope, TypeInferencer};
use crate::types::{TypeInfo, TypeMapping};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IrType {
    I1,
    I32,
    Double,
    Ptr,
}

impl IrType {
    fn of(mapping: &TypeMapping, ty: &TypeInfo) -> IrType {
        match mapping.spell(ty).as_str() {
            "i1" => IrType::I1,
            "double" => IrType::Double,
            "ptr" => IrType::Ptr,
            _ => IrType::I32,
        }
    }

    fn name(self) -> &'static str {
        match self {
            IrType::I1 => "i1",
            IrType::I32 => "i32",
            IrType::Double => "double",
            IrType::Ptr => "ptr",
        }
    }

    fn zero(self) -> Operand {
        let text = match self {
            IrType::I1 => "false",
            IrType::I32 => "0",
            IrType::Double => "0.0",
            IrType::Ptr => "null",
        };
        Operand::new(self, text)
    }
}

#[derive(Debug, Clone)]
struct Operand {
    ty: IrType,
    text: String,
}

impl Operand {
    fn new(ty: IrType, text: impl Into<String>) -> Self {
        Operand {
            ty,
            text: text.into(),
        }
    }
}

/// Doubles are written as their bit pattern so every value is exact.
fn double_literal(value: f64) -> String {
    format!("0x{:016X}", value.to_bits())
}

fn c_string(content: &str) -> (usize, String) {
    let mut out = String::new();
    for byte in content.bytes() {
        if byte == b' ' || (byte.is_ascii_graphic() && byte != b'"' && byte != b'\\') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "\\{byte:02X}");
        }
    }
    out.push_str("\\00");
    (content.len() + 1, out)
}

#[derive(Debug, Clone, Default)]
pub struct LlvmBackend {
    table: ConstructTable,
}

impl Backend for LlvmBackend {
    fn name(&self) -> &'static str {
        "llvm"
    }

    fn file_extension(&self) -> &'static str {
        "ll"
    }

    fn translate(&self, ast: &SourceAst) -> String {
        self.build(ast).0
    }
}

impl LlvmBackend {
    pub fn new(table: ConstructTable) -> Self {
        LlvmBackend { table }
    }

    /// Emit IR for a parsed program, failing on literals that do not fit
    /// their IR type.
    pub fn emit(&self, ast: &SourceAst) -> Result<String, CoreError> {
        match self.build(ast) {
            (ir, None) => Ok(ir),
            (_, Some(err)) => Err(err),
        }
    }

    fn build(&self, ast: &SourceAst) -> (String, Option<CoreError>) {
        let mut types = TypeInferencer::new(ast, &self.table);
        types.infer_program();
        let emitter = LlvmEmitter {
            ast,
            table: &self.table,
            types,
            mapping: TypeMapping::llvm(),
            w: CodeWriter::new("  "),
            strings: Vec::new(),
            uses_printf: false,
            uses_pow: false,
            next_reg: 1,
            next_label: 0,
            block: String::new(),
            slots: HashMap::new(),
            ret: IrType::I32,
            failure: None,
        };
        emitter.program()
    }
}

struct LlvmEmitter<'a> {
    ast: &'a SourceAst,
    table: &'a ConstructTable,
    types: TypeInferencer<'a>,
    mapping: TypeMapping,
    w: CodeWriter,
    strings: Vec<String>,
    uses_printf: bool,
    uses_pow: bool,
    next_reg: u32,
    next_label: u32,
    /// Name of the block currently being filled, as used in `phi`.
    block: String,
    slots: HashMap<&'a str, IrType>,
    ret: IrType,
    failure: Option<CoreError>,
}

fn symbol(name: &str) -> &str {
    if name == "main" { "user_main" } else { name }
}

impl<'a> LlvmEmitter<'a> {
    fn program(mut self) -> (String, Option<CoreError>) {
        let root = self.ast.root();
        for function in self.table.functions(self.ast, root) {
            self.function(function);
            self.w.blank();
        }

        self.begin(None, IrType::I32, &[]);
        self.w.line("define i32 @main() {");
        self.w.indent();
        self.allocas(None, &[]);
        for statement in self.table.body(self.ast, root) {
            if let Construct::Function { .. } = self.table.resolve(self.ast, statement).1 {
                continue;
            }
            self.statement(None, statement);
        }
        self.w.line("ret i32 0");
        self.w.dedent();
        self.w.line("}");

        let mut header = CodeWriter::new("  ");
        header.line("; ModuleID = 'langforge'");
        header.line("source_filename = \"langforge\"");
        header.blank();
        let mut globals = false;
        for (index, content) in self.strings.iter().enumerate() {
            let (len, bytes) = c_string(content);
            header.line(format!(
                "@.str.{index} = private unnamed_addr constant [{len} x i8] c\"{bytes}\""
            ));
            globals = true;
        }
        if self.uses_printf {
            for (name, spec) in [("int", "%d"), ("float", "%g"), ("str", "%s")] {
                header.line(format!(
                    "@.fmt.{name} = private unnamed_addr constant [4 x i8] c\"{spec}\\0A\\00\""
                ));
            }
            globals = true;
        }
        if globals {
            header.blank();
        }
        if self.uses_printf {
            header.line("declare i32 @printf(ptr, ...)");
        }
        if self.uses_pow {
            header.line("declare double @llvm.pow.f64(double, double)");
        }
        if self.uses_printf || self.uses_pow {
            header.blank();
        }

        let mut out = header.finish();
        out.push_str(&self.w.finish());
        (out, self.failure)
    }

    fn begin(&mut self, scope: Scope, ret: IrType, params: &[&'a str]) {
        self.next_reg = 1;
        self.next_label = 0;
        self.block = "%0".to_string();
        self.ret = ret;
        self.slots.clear();
        for (name, ty) in self.types.variables_in(scope) {
            self.slots.insert(name, IrType::of(&self.mapping, &ty));
        }
        for param in params {
            self.slots.entry(*param).or_insert(IrType::I32);
        }
    }

    fn allocas(&mut self, scope: Scope, params: &[&'a str]) {
        for (name, _) in self.types.variables_in(scope) {
            let ty = self.slot_type(name);
            self.w.line(format!("%{name}.addr = alloca {}", ty.name()));
        }
        for param in params {
            let ty = self.slot_type(param);
            self.w.line(format!("store {} %{param}, ptr %{param}.addr", ty.name()));
        }
    }

    fn slot_type(&self, name: &str) -> IrType {
        self.slots.get(name).copied().unwrap_or(IrType::I32)
    }

    fn function(&mut self, id: NodeId) {
        let Construct::Function { name, params, body } = self.table.classify(self.ast, id) else {
            return;
        };
        let ret = self.types.return_type(id);
        let ret = IrType::of(&self.mapping, &ret);
        self.begin(Some(id), ret, &params);
        let signature = params
            .iter()
            .map(|param| format!("{} %{param}", self.slot_type(param).name()))
            .collect::<Vec<_>>()
            .join(", ");
        self.w.line(format!("define {} @{}({signature}) {{", ret.name(), symbol(name)));
        self.w.indent();
        self.allocas(Some(id), &params);
        for statement in self.table.body(self.ast, body) {
            self.statement(Some(id), statement);
        }
        let zero = ret.zero();
        self.w.line(format!("ret {} {}", ret.name(), zero.text));
        self.w.dedent();
        self.w.line("}");
    }

    fn reg(&mut self) -> String {
        let reg = format!("%{}", self.next_reg);
        self.next_reg += 1;
        reg
    }

    fn label(&mut self) -> u32 {
        let n = self.next_label;
        self.next_label += 1;
        n
    }

    fn start_block(&mut self, label: &str) {
        self.w.dedent();
        self.w.line(format!("{label}:"));
        self.w.indent();
        self.block = format!("%{label}");
    }

    /// Emit `%N = <rhs>` and return the register.
    fn assign(&mut self, ty: IrType, rhs: String) -> Operand {
        let reg = self.reg();
        self.w.line(format!("{reg} = {rhs}"));
        Operand::new(ty, reg)
    }

    fn intern(&mut self, content: String) -> Operand {
        let index = match self.strings.iter().position(|known| *known == content) {
            Some(index) => index,
            None => {
                self.strings.push(content);
                self.strings.len() - 1
            }
        };
        Operand::new(IrType::Ptr, format!("@.str.{index}"))
    }

    fn fail<T: Default>(&mut self, err: CoreError) -> T {
        self.w.line(format!("; {err}"));
        self.failure.get_or_insert(err);
        T::default()
    }

    fn placeholder(&mut self, what: &str, id: NodeId) {
        trace!(node = self.ast.node_type(id), "llvm backend placeholder");
        self.w.line(format!(
            "; unsupported construct: {what} ({})",
            self.ast.node_type(id)
        ));
    }

    fn convert(&mut self, value: Operand, to: IrType) -> Operand {
        let from = value.ty;
        let v = &value.text;
        match (from, to) {
            _ if from == to => value,
            (IrType::I32, IrType::Double) => self.assign(to, format!("sitofp i32 {v} to double")),
            (IrType::Double, IrType::I32) => self.assign(to, format!("fptosi double {v} to i32")),
            (IrType::I1, IrType::I32) => self.assign(to, format!("zext i1 {v} to i32")),
            (IrType::I1, IrType::Double) => self.assign(to, format!("uitofp i1 {v} to double")),
            (IrType::I32, IrType::I1) => self.assign(to, format!("icmp ne i32 {v}, 0")),
            (IrType::Double, IrType::I1) => self.assign(to, format!("fcmp one double {v}, 0.0")),
            _ => {
                self.w.line(format!("; cannot convert {} to {}", from.name(), to.name()));
                to.zero()
            }
        }
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
                self.store(target, value, id);
            }
            Construct::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let n = self.label();
                let cond = self.expr(scope, cond);
                let cond = self.convert(cond, IrType::I1);
                let otherwise = if else_branch.is_some() {
                    format!("if.else.{n}")
                } else {
                    format!("if.end.{n}")
                };
                self.w.line(format!(
                    "br i1 {}, label %if.then.{n}, label %{otherwise}",
                    cond.text
                ));
                self.start_block(&format!("if.then.{n}"));
                self.block(scope, then_branch);
                self.w.line(format!("br label %if.end.{n}"));
                if let Some(else_branch) = else_branch {
                    self.start_block(&otherwise);
                    self.block(scope, else_branch);
                    self.w.line(format!("br label %if.end.{n}"));
                }
                self.start_block(&format!("if.end.{n}"));
            }
            Construct::While { cond, body } => {
                let n = self.label();
                self.w.line(format!("br label %while.cond.{n}"));
                self.start_block(&format!("while.cond.{n}"));
                let cond = self.expr(scope, cond);
                let cond = self.convert(cond, IrType::I1);
                self.w.line(format!(
                    "br i1 {}, label %while.body.{n}, label %while.end.{n}",
                    cond.text
                ));
                self.start_block(&format!("while.body.{n}"));
                self.block(scope, body);
                self.w.line(format!("br label %while.cond.{n}"));
                self.start_block(&format!("while.end.{n}"));
            }
            Construct::For { var, from, to, body } => {
                let n = self.label();
                let ty = self.slot_type(var);
                let start = self.expr(scope, from);
                self.store(var, start, id);
                self.w.line(format!("br label %for.cond.{n}"));

                self.start_block(&format!("for.cond.{n}"));
                let current = self.assign(ty, format!("load {}, ptr %{var}.addr", ty.name()));
                let bound = self.expr(scope, to);
                let bound = self.convert(bound, ty);
                let test = match ty {
                    IrType::Double => format!("fcmp olt double {}, {}", current.text, bound.text),
                    _ => format!("icmp slt {} {}, {}", ty.name(), current.text, bound.text),
                };
                let test = self.assign(IrType::I1, test);
                self.w.line(format!(
                    "br i1 {}, label %for.body.{n}, label %for.end.{n}",
                    test.text
                ));

                self.start_block(&format!("for.body.{n}"));
                self.block(scope, body);
                self.w.line(format!("br label %for.inc.{n}"));

                self.start_block(&format!("for.inc.{n}"));
                let current = self.assign(ty, format!("load {}, ptr %{var}.addr", ty.name()));
                let next = match ty {
                    IrType::Double => format!("fadd double {}, {}", current.text, double_literal(1.0)),
                    _ => format!("add {} {}, 1", ty.name(), current.text),
                };
                let next = self.assign(ty, next);
                self.w.line(format!("store {} {}, ptr %{var}.addr", ty.name(), next.text));
                self.w.line(format!("br label %for.cond.{n}"));

                self.start_block(&format!("for.end.{n}"));
            }
            Construct::Return(value) => {
                let value = match value {
                    Some(value) => self.expr(scope, value),
                    None => self.ret.zero(),
                };
                let value = self.convert(value, self.ret);
                self.w.line(format!("ret {} {}", self.ret.name(), value.text));
                let n = self.label();
                self.start_block(&format!("dead.{n}"));
            }
            Construct::Print(value) => {
                let value = self.expr(scope, value);
                self.print(value);
            }
            Construct::Call { .. } | Construct::Binary { .. } | Construct::Unary { .. } => {
                self.expr(scope, id);
            }
            other => self.placeholder(other.label(), id),
        }
    }

    fn block(&mut self, scope: Scope, id: NodeId) {
        for statement in self.table.body(self.ast, id) {
            self.statement(scope, statement);
        }
    }

    fn store(&mut self, target: &str, value: Operand, at: NodeId) {
        let Some(ty) = self.slots.get(target).copied() else {
            self.placeholder("assignment to unknown variable", at);
            return;
        };
        let value = self.convert(value, ty);
        self.w.line(format!("store {} {}, ptr %{target}.addr", ty.name(), value.text));
    }

    fn print(&mut self, value: Operand) {
        self.uses_printf = true;
        let (format, arg) = match value.ty {
            IrType::I32 => ("int", value),
            IrType::Double => ("float", value),
            IrType::Ptr => ("str", value),
            IrType::I1 => {
                let yes = self.intern("true".to_string());
                let no = self.intern("false".to_string());
                let word = self.assign(
                    IrType::Ptr,
                    format!("select i1 {}, ptr {}, ptr {}", value.text, yes.text, no.text),
                );
                ("str", word)
            }
        };
        self.assign(
            IrType::I32,
            format!(
                "call i32 (ptr, ...) @printf(ptr @.fmt.{format}, {} {})",
                arg.ty.name(),
                arg.text
            ),
        );
    }

    fn expr(&mut self, scope: Scope, id: NodeId) -> Operand {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Number(text) if text.contains('.') => {
                let value = float_literal(text).unwrap_or_else(|err| self.fail(err));
                Operand::new(IrType::Double, double_literal(value))
            }
            Construct::Number(text) => {
                let value = int_literal(text).unwrap_or_else(|err| self.fail(err));
                Operand::new(IrType::I32, value.to_string())
            }
            Construct::Str(text) => self.intern(unquote(text)),
            Construct::Bool(b) => Operand::new(IrType::I1, b.to_string()),
            Construct::Var(name) => match self.slots.get(name).copied() {
                Some(ty) => self.assign(ty, format!("load {}, ptr %{name}.addr", ty.name())),
                None => {
                    self.placeholder("unknown variable", id);
                    IrType::I32.zero()
                }
            },
            Construct::Unary { op, operand } => {
                let value = self.expr(scope, operand);
                match op {
                    UnaryOp::Neg if value.ty == IrType::Double => {
                        self.assign(IrType::Double, format!("fneg double {}", value.text))
                    }
                    UnaryOp::Neg => {
                        let value = self.convert(value, IrType::I32);
                        self.assign(IrType::I32, format!("sub i32 0, {}", value.text))
                    }
                    UnaryOp::Not => {
                        let value = self.convert(value, IrType::I1);
                        self.assign(IrType::I1, format!("xor i1 {}, true", value.text))
                    }
                }
            }
            Construct::Binary { first, rest } => {
                let mut acc = self.expr(scope, first);
                for (op, operand) in rest {
                    acc = if op.is_logical() {
                        self.short_circuit(scope, op, acc, operand)
                    } else {
                        let right = self.expr(scope, operand);
                        self.binary(op, acc, right)
                    };
                }
                acc
            }
            Construct::Call { callee, args } => self.call(scope, id, callee, args),
            other => {
                self.placeholder(other.label(), id);
                IrType::I32.zero()
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: Operand, right: Operand) -> Operand {
        if op.is_logical() {
            let left = self.convert(left, IrType::I1);
            let right = self.convert(right, IrType::I1);
            let instr = if op == BinaryOp::And { "and" } else { "or" };
            return self.assign(IrType::I1, format!("{instr} i1 {}, {}", left.text, right.text));
        }
        let ty = if left.ty == IrType::Double || right.ty == IrType::Double {
            IrType::Double
        } else {
            IrType::I32
        };
        let left = self.convert(left, ty);
        let right = self.convert(right, ty);
        let float = ty == IrType::Double;
        let (instr, result) = match op {
            BinaryOp::Add => (if float { "fadd" } else { "add" }, ty),
            BinaryOp::Sub => (if float { "fsub" } else { "sub" }, ty),
            BinaryOp::Mul => (if float { "fmul" } else { "mul" }, ty),
            BinaryOp::Div => (if float { "fdiv" } else { "sdiv" }, ty),
            BinaryOp::Rem => (if float { "frem" } else { "srem" }, ty),
            BinaryOp::Eq => (if float { "fcmp oeq" } else { "icmp eq" }, IrType::I1),
            BinaryOp::Ne => (if float { "fcmp one" } else { "icmp ne" }, IrType::I1),
            BinaryOp::Lt => (if float { "fcmp olt" } else { "icmp slt" }, IrType::I1),
            BinaryOp::Gt => (if float { "fcmp ogt" } else { "icmp sgt" }, IrType::I1),
            BinaryOp::Le => (if float { "fcmp ole" } else { "icmp sle" }, IrType::I1),
            _ => (if float { "fcmp oge" } else { "icmp sge" }, IrType::I1),
        };
        self.assign(
            result,
            format!("{instr} {} {}, {}", ty.name(), left.text, right.text),
        )
    }

    fn short_circuit(&mut self, scope: Scope, op: BinaryOp, left: Operand, right: NodeId) -> Operand {
        let n = self.label();
        let (kind, skip_value) = match op {
            BinaryOp::Or => ("or", "true"),
            _ => ("and", "false"),
        };
        let left = self.convert(left, IrType::I1);
        let from = self.block.clone();
        let (on_true, on_false) = if kind == "and" {
            (format!("{kind}.rhs.{n}"), format!("{kind}.end.{n}"))
        } else {
            (format!("{kind}.end.{n}"), format!("{kind}.rhs.{n}"))
        };
        self.w.line(format!(
            "br i1 {}, label %{on_true}, label %{on_false}",
            left.text
        ));
        self.start_block(&format!("{kind}.rhs.{n}"));
        let right = self.expr(scope, right);
        let right = self.convert(right, IrType::I1);
        let right_block = self.block.clone();
        self.w.line(format!("br label %{kind}.end.{n}"));
        self.start_block(&format!("{kind}.end.{n}"));
        self.assign(
            IrType::I1,
            format!(
                "phi i1 [ {skip_value}, {from} ], [ {}, {right_block} ]",
                right.text
            ),
        )
    }

    fn call(&mut self, scope: Scope, id: NodeId, callee: &str, args: Vec<NodeId>) -> Operand {
        let (name, params, ret) = match self.types.function(callee) {
            Some(function) => {
                let Construct::Function { params, .. } = self.table.classify(self.ast, function) else {
                    self.placeholder("call", id);
                    return IrType::I32.zero();
                };
                let params: Vec<IrType> = params
                    .iter()
                    .map(|param| {
                        let ty = self
                            .types
                            .variable_type(Some(function), param)
                            .unwrap_or(TypeInfo::ANY);
                        IrType::of(&self.mapping, &ty)
                    })
                    .collect();
                let ret = self.types.return_type(function);
                (symbol(callee).to_string(), params, IrType::of(&self.mapping, &ret))
            }
            None if callee == "pow" => {
                self.uses_pow = true;
                (
                    "llvm.pow.f64".to_string(),
                    vec![IrType::Double, IrType::Double],
                    IrType::Double,
                )
            }
            None => {
                self.placeholder("call to unknown function", id);
                return IrType::I32.zero();
            }
        };
        if params.len() != args.len() {
            self.placeholder("call with wrong argument count", id);
            return ret.zero();
        }
        let mut operands = Vec::with_capacity(args.len());
        for (arg, param) in args.into_iter().zip(params) {
            let value = self.expr(scope, arg);
            let value = self.convert(value, param);
            operands.push(format!("{} {}", param.name(), value.text));
        }
        self.assign(
            ret,
            format!("call {} @{name}({})", ret.name(), operands.join(", ")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{parse_arithmetic, parse_mini};

    fn translate_mini(source: &str) -> String {
        LlvmBackend::default().translate(&parse_mini(source))
    }

    /// Numbered registers defined in each function, in textual order.
    fn registers_per_function(ir: &str) -> Vec<Vec<u32>> {
        let mut functions = Vec::new();
        for line in ir.lines() {
            if line.starts_with("define ") {
                functions.push(Vec::new());
            }
            let Some(current) = functions.last_mut() else {
                continue;
            };
            let line = line.trim_start();
            if let Some((lhs, _)) = line.split_once(" = ") {
                if let Some(n) = lhs.strip_prefix('%').and_then(|n| n.parse().ok()) {
                    current.push(n);
                }
            }
        }
        functions
    }

    #[test]
    fn straight_line_program_uses_slots() {
        let ir = LlvmBackend::default().translate(&parse_arithmetic("x = 10 ; y = 20 ; z = x + y ;"));
        assert!(ir.contains("define i32 @main() {"), "{ir}");
        for slot in ["%x.addr = alloca i32", "%y.addr = alloca i32", "%z.addr = alloca i32"] {
            assert!(ir.contains(slot), "missing {slot} in\n{ir}");
        }
        assert!(ir.contains("store i32 10, ptr %x.addr"));
        assert!(ir.contains("%1 = load i32, ptr %x.addr"));
        assert!(ir.contains("%2 = load i32, ptr %y.addr"));
        assert!(ir.contains("%3 = add i32 %1, %2"));
        assert!(ir.contains("store i32 %3, ptr %z.addr"));
        assert!(ir.trim_end().ends_with("ret i32 0\n}"));
        assert!(!ir.contains("@printf"));
    }

    #[test]
    fn registers_are_sequential_per_function() {
        let ir = translate_mini(
            "fn f(a, b) { c = a * b; if c > 10 { return c - 1; } return c; } x = f(3, 4) + f(1, 2);",
        );
        let functions = registers_per_function(&ir);
        assert_eq!(functions.len(), 2);
        for registers in functions {
            let expected: Vec<u32> = (1..=registers.len() as u32).collect();
            assert_eq!(registers, expected, "{ir}");
        }
    }

    #[test]
    fn every_block_is_terminated() {
        let ir = translate_mini(
            "fn g(n) { i = 0; while i < n { if i == 3 { return i; } else { i = i + 1; } } return 0; } \
             s = 0; for k in 0..4 { s = s + g(k); }",
        );
        let lines: Vec<&str> = ir.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
        for pair in lines.windows(2) {
            if pair[1].ends_with(':') || pair[1] == "}" {
                assert!(
                    pair[0].starts_with("br ") || pair[0].starts_with("ret "),
                    "unterminated block before {:?} in\n{ir}",
                    pair[1]
                );
            }
        }
        assert!(ir.contains("while.cond.0:"));
        assert!(ir.contains("dead.2:"), "{ir}");
        assert!(ir.contains("for.inc.0:"));
        assert!(ir.contains("icmp slt i32"));
    }

    #[test]
    fn functions_take_params_through_slots() {
        let ir = translate_mini("fn main(n) { return n + 1; } r = main(4);");
        assert!(ir.contains("define i32 @user_main(i32 %n) {"), "{ir}");
        assert!(ir.contains("store i32 %n, ptr %n.addr"));
        assert!(ir.contains("call i32 @user_main(i32 4)"));
    }

    #[test]
    fn print_declares_printf_and_strings() {
        let ir = translate_mini("x = 2.5; print x; print \"hi\\n\"; print x > 1.0;");
        assert!(ir.contains("declare i32 @printf(ptr, ...)"));
        assert!(ir.contains("@.fmt.float = private unnamed_addr constant [4 x i8] c\"%g\\0A\\00\""));
        assert!(ir.contains("@.str.0 = private unnamed_addr constant [4 x i8] c\"hi\\0A\\00\""), "{ir}");
        assert!(ir.contains("call i32 (ptr, ...) @printf(ptr @.fmt.str, ptr @.str.0)"));
        assert!(ir.contains("select i1"));
        assert!(ir.contains(&format!("store double {}, ptr %x.addr", double_literal(2.5))));
    }

    #[test]
    fn mixed_arithmetic_converts_operands() {
        let ir = translate_mini("a = 1.5; b = 2; c = a * b; d = pow(2, 3);");
        assert!(ir.contains("sitofp i32"), "{ir}");
        assert!(ir.contains("fmul double"));
        assert!(ir.contains("declare double @llvm.pow.f64(double, double)"));
        assert!(ir.contains("sitofp i32 2 to double"));
        assert!(ir.contains("call double @llvm.pow.f64(double %"));
    }

    #[test]
    fn logic_uses_phi() {
        let ir = translate_mini("a = 0; b = a != 0 && 10 / a > 1;");
        assert!(ir.contains("and.rhs.0:"), "{ir}");
        assert!(ir.contains("phi i1 [ false, %0 ], ["), "{ir}");
    }

    #[test]
    fn unknown_constructs_become_comments() {
        let ir = translate_mini("class P { x = 1; } y = 3;");
        assert!(ir.contains("; unsupported construct: class (class_decl)"), "{ir}");
        assert!(ir.contains("store i32 3, ptr %y.addr"));
    }

    #[test]
    fn oversized_literals_fail_emission() {
        let ast = parse_mini("x = 2147483648; y = 2147483647;");
        let err = LlvmBackend::default().emit(&ast).unwrap_err();
        assert!(matches!(err, CoreError::Codegen(message) if message.contains("2147483648")));
        let ir = LlvmBackend::default().translate(&ast);
        assert!(ir.contains("; code generation error: integer literal 2147483648"), "{ir}");
        assert!(ir.contains("store i32 2147483647, ptr %y.addr"), "{ir}");
    }
}
