//! WebAssembly backend.
//!
//! Lowering produces a small structured instruction IR ([`WasmModule`])
//! that renders to WAT text through `Display` and encodes to a binary
//! module with `wasm-encoder`. Both views come from the same IR, so the
//! text a user reads is the module that runs.
//!
//! Every function returns a value (`i32` unless its first `return` is a
//! float). The synthesized `main` is exported and returns the value of
//! the last top-level assignment, or `0`. Host functions are imported
//! only when used:
//!
//! - `env.log_i32 (param i32)` and `env.log_f64 (param f64)` for `print`
//! - `math.pow (param f64 f64) (result f64)` for `pow(a, b)`
//!
//! User functions named `main` or after a host import are renamed to
//! `user_<name>`.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;
use wasm_encoder::{
    BlockType, CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, Instruction, MemorySection, MemoryType, Module, TypeSection, ValType,
};

use crate::ast::{NodeId, SourceAst};
use crate::backend::{Backend, float_literal, int_literal};
use crate::error::CoreError;
use crate::shape::{BinaryOp, Construct, ConstructTable, UnaryOp};
use crate::typecheck::{Scope, TypeInferencer};
use crate::types::{TypeInfo, TypeMapping};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WasmType {
    I32,
    F64,
}

impl WasmType {
    fn of(ty: &TypeInfo) -> WasmType {
        match TypeMapping::wat().spell(ty).as_str() {
            "f64" => WasmType::F64,
            _ => WasmType::I32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WasmType::I32 => "i32",
            WasmType::F64 => "f64",
        }
    }

    fn val_type(self) -> ValType {
        match self {
            WasmType::I32 => ValType::I32,
            WasmType::F64 => ValType::F64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WasmInstr {
    Comment(String),
    I32Const(i32),
    F64Const(f64),
    LocalGet(String),
    LocalSet(String),
    Call(String),
    Drop,
    Return,
    /// `rem` exists for `i32` only.
    Arith(WasmType, ArithOp),
    Compare(WasmType, CompareOp),
    I32Eqz,
    I32And,
    I32Or,
    F64Neg,
    F64Trunc,
    F64ConvertI32S,
    I32TruncF64S,
    Block(String),
    Loop(String),
    If(Option<WasmType>),
    Else,
    End,
    Br(String),
    BrIf(String),
}

impl WasmInstr {
    fn opens(&self) -> bool {
        matches!(self, WasmInstr::Block(_) | WasmInstr::Loop(_) | WasmInstr::If(_))
    }
}

impl fmt::Display for WasmInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WasmInstr::Comment(text) => write!(f, ";; {text}"),
            WasmInstr::I32Const(value) => write!(f, "i32.const {value}"),
            WasmInstr::F64Const(value) => write!(f, "f64.const {value}"),
            WasmInstr::LocalGet(name) => write!(f, "local.get ${name}"),
            WasmInstr::LocalSet(name) => write!(f, "local.set ${name}"),
            WasmInstr::Call(name) => write!(f, "call ${name}"),
            WasmInstr::Drop => f.write_str("drop"),
            WasmInstr::Return => f.write_str("return"),
            WasmInstr::Arith(ty, op) => {
                let op = match (ty, op) {
                    (_, ArithOp::Add) => "add",
                    (_, ArithOp::Sub) => "sub",
                    (_, ArithOp::Mul) => "mul",
                    (WasmType::I32, ArithOp::Div) => "div_s",
                    (WasmType::F64, ArithOp::Div) => "div",
                    (_, ArithOp::Rem) => "rem_s",
                };
                write!(f, "{}.{op}", ty.name())
            }
            WasmInstr::Compare(ty, op) => {
                let signed = *ty == WasmType::I32;
                let op = match op {
                    CompareOp::Eq => "eq",
                    CompareOp::Ne => "ne",
                    CompareOp::Lt if signed => "lt_s",
                    CompareOp::Gt if signed => "gt_s",
                    CompareOp::Le if signed => "le_s",
                    CompareOp::Ge if signed => "ge_s",
                    CompareOp::Lt => "lt",
                    CompareOp::Gt => "gt",
                    CompareOp::Le => "le",
                    CompareOp::Ge => "ge",
                };
                write!(f, "{}.{op}", ty.name())
            }
            WasmInstr::I32Eqz => f.write_str("i32.eqz"),
            WasmInstr::I32And => f.write_str("i32.and"),
            WasmInstr::I32Or => f.write_str("i32.or"),
            WasmInstr::F64Neg => f.write_str("f64.neg"),
            WasmInstr::F64Trunc => f.write_str("f64.trunc"),
            WasmInstr::F64ConvertI32S => f.write_str("f64.convert_i32_s"),
            WasmInstr::I32TruncF64S => f.write_str("i32.trunc_f64_s"),
            WasmInstr::Block(label) => write!(f, "block ${label}"),
            WasmInstr::Loop(label) => write!(f, "loop ${label}"),
            WasmInstr::If(None) => f.write_str("if"),
            WasmInstr::If(Some(ty)) => write!(f, "if (result {})", ty.name()),
            WasmInstr::Else => f.write_str("else"),
            WasmInstr::End => f.write_str("end"),
            WasmInstr::Br(label) => write!(f, "br ${label}"),
            WasmInstr::BrIf(label) => write!(f, "br_if ${label}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmImport {
    pub module: &'static str,
    pub name: &'static str,
    pub params: Vec<WasmType>,
    pub result: Option<WasmType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WasmFunction {
    pub name: String,
    pub export: Option<String>,
    pub params: Vec<(String, WasmType)>,
    pub result: WasmType,
    pub locals: Vec<(String, WasmType)>,
    pub body: Vec<WasmInstr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WasmModule {
    pub imports: Vec<WasmImport>,
    /// Linear memory size in 64 KiB pages.
    pub memory_pages: u64,
    pub functions: Vec<WasmFunction>,
}

impl WasmModule {
    /// `(module, name)` pairs of the host functions the module imports.
    pub fn host_imports(&self) -> Vec<(String, String)> {
        self.imports
            .iter()
            .map(|import| (import.module.to_string(), import.name.to_string()))
            .collect()
    }

    /// Encode the module to the binary format.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let mut module = Module::new();
        let mut types = TypeSection::new();
        let mut indices = HashMap::new();

        let mut imports = ImportSection::new();
        for import in &self.imports {
            let type_index = types.len();
            types.ty().function(
                import.params.iter().map(|ty| ty.val_type()),
                import.result.map(WasmType::val_type),
            );
            imports.import(import.module, import.name, EntityType::Function(type_index));
            declare(&mut indices, import.name)?;
        }

        let mut functions = FunctionSection::new();
        for function in &self.functions {
            let type_index = types.len();
            types.ty().function(
                function.params.iter().map(|(_, ty)| ty.val_type()),
                [function.result.val_type()],
            );
            functions.function(type_index);
            declare(&mut indices, &function.name)?;
        }

        let mut memories = MemorySection::new();
        memories.memory(MemoryType {
            minimum: self.memory_pages,
            maximum: None,
            memory64: false,
            shared: false,
            page_size_log2: None,
        });

        let mut exports = ExportSection::new();
        exports.export("memory", ExportKind::Memory, 0);
        for function in &self.functions {
            if let Some(export) = &function.export {
                exports.export(export, ExportKind::Func, indices[&function.name]);
            }
        }

        let mut code = CodeSection::new();
        for function in &self.functions {
            code.function(&encode_function(function, &indices)?);
        }

        module.section(&types);
        if !self.imports.is_empty() {
            module.section(&imports);
        }
        module.section(&functions);
        module.section(&memories);
        module.section(&exports);
        module.section(&code);
        Ok(module.finish())
    }
}

fn declare(indices: &mut HashMap<String, u32>, symbol: &str) -> Result<(), CoreError> {
    let index = indices.len() as u32;
    if indices.insert(symbol.to_string(), index).is_some() {
        return Err(CoreError::Codegen(format!("duplicate function symbol ${symbol}")));
    }
    Ok(())
}

fn encode_function(
    function: &WasmFunction,
    indices: &HashMap<String, u32>,
) -> Result<Function, CoreError> {
    let mut locals = HashMap::new();
    for (name, _) in function.params.iter().chain(&function.locals) {
        locals.insert(name.as_str(), locals.len() as u32);
    }
    let local = |name: &str| {
        locals
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::Codegen(format!("unknown local ${name} in ${}", function.name)))
    };
    let call = |name: &str| {
        indices
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::Codegen(format!("unknown function ${name}")))
    };

    let mut labels: Vec<Option<&str>> = Vec::new();
    let depth = |labels: &[Option<&str>], name: &str| {
        labels
            .iter()
            .rev()
            .position(|label| *label == Some(name))
            .map(|depth| depth as u32)
            .ok_or_else(|| CoreError::Codegen(format!("unknown label ${name}")))
    };

    let mut encoded = Function::new(
        function
            .locals
            .iter()
            .map(|(_, ty)| (1, ty.val_type()))
            .collect::<Vec<_>>(),
    );
    for instr in &function.body {
        let instruction = match instr {
            WasmInstr::Comment(_) => continue,
            WasmInstr::I32Const(value) => Instruction::I32Const(*value),
            WasmInstr::F64Const(value) => Instruction::F64Const((*value).into()),
            WasmInstr::LocalGet(name) => Instruction::LocalGet(local(name)?),
            WasmInstr::LocalSet(name) => Instruction::LocalSet(local(name)?),
            WasmInstr::Call(name) => Instruction::Call(call(name)?),
            WasmInstr::Drop => Instruction::Drop,
            WasmInstr::Return => Instruction::Return,
            WasmInstr::Arith(WasmType::I32, op) => match op {
                ArithOp::Add => Instruction::I32Add,
                ArithOp::Sub => Instruction::I32Sub,
                ArithOp::Mul => Instruction::I32Mul,
                ArithOp::Div => Instruction::I32DivS,
                ArithOp::Rem => Instruction::I32RemS,
            },
            WasmInstr::Arith(WasmType::F64, op) => match op {
                ArithOp::Add => Instruction::F64Add,
                ArithOp::Sub => Instruction::F64Sub,
                ArithOp::Mul => Instruction::F64Mul,
                ArithOp::Div => Instruction::F64Div,
                ArithOp::Rem => {
                    return Err(CoreError::Codegen("f64 has no rem instruction".into()));
                }
            },
            WasmInstr::Compare(WasmType::I32, op) => match op {
                CompareOp::Eq => Instruction::I32Eq,
                CompareOp::Ne => Instruction::I32Ne,
                CompareOp::Lt => Instruction::I32LtS,
                CompareOp::Gt => Instruction::I32GtS,
                CompareOp::Le => Instruction::I32LeS,
                CompareOp::Ge => Instruction::I32GeS,
            },
            WasmInstr::Compare(WasmType::F64, op) => match op {
                CompareOp::Eq => Instruction::F64Eq,
                CompareOp::Ne => Instruction::F64Ne,
                CompareOp::Lt => Instruction::F64Lt,
                CompareOp::Gt => Instruction::F64Gt,
                CompareOp::Le => Instruction::F64Le,
                CompareOp::Ge => Instruction::F64Ge,
            },
            WasmInstr::I32Eqz => Instruction::I32Eqz,
            WasmInstr::I32And => Instruction::I32And,
            WasmInstr::I32Or => Instruction::I32Or,
            WasmInstr::F64Neg => Instruction::F64Neg,
            WasmInstr::F64Trunc => Instruction::F64Trunc,
            WasmInstr::F64ConvertI32S => Instruction::F64ConvertI32S,
            WasmInstr::I32TruncF64S => Instruction::I32TruncF64S,
            WasmInstr::Block(label) => {
                labels.push(Some(label.as_str()));
                Instruction::Block(BlockType::Empty)
            }
            WasmInstr::Loop(label) => {
                labels.push(Some(label.as_str()));
                Instruction::Loop(BlockType::Empty)
            }
            WasmInstr::If(result) => {
                labels.push(None);
                match result {
                    Some(ty) => Instruction::If(BlockType::Result(ty.val_type())),
                    None => Instruction::If(BlockType::Empty),
                }
            }
            WasmInstr::Else => Instruction::Else,
            WasmInstr::End => {
                labels.pop();
                Instruction::End
            }
            WasmInstr::Br(label) => Instruction::Br(depth(&labels, label)?),
            WasmInstr::BrIf(label) => Instruction::BrIf(depth(&labels, label)?),
        };
        encoded.instruction(&instruction);
    }
    encoded.instruction(&Instruction::End);
    Ok(encoded)
}

impl fmt::Display for WasmModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "(module")?;
        for import in &self.imports {
            write!(f, "  (import \"{}\" \"{}\" (func ${}", import.module, import.name, import.name)?;
            for param in &import.params {
                write!(f, " (param {})", param.name())?;
            }
            if let Some(result) = import.result {
                write!(f, " (result {})", result.name())?;
            }
            writeln!(f, "))")?;
        }
        writeln!(f, "  (memory (export \"memory\") {})", self.memory_pages)?;
        for function in &self.functions {
            write!(f, "  (func ${}", function.name)?;
            if let Some(export) = &function.export {
                write!(f, " (export \"{export}\")")?;
            }
            for (name, ty) in &function.params {
                write!(f, " (param ${name} {})", ty.name())?;
            }
            writeln!(f, " (result {})", function.result.name())?;
            for (name, ty) in &function.locals {
                writeln!(f, "    (local ${name} {})", ty.name())?;
            }
            let mut depth = 2usize;
            for instr in &function.body {
                if matches!(instr, WasmInstr::End | WasmInstr::Else) {
                    depth = depth.saturating_sub(1);
                }
                writeln!(f, "{}{instr}", "  ".repeat(depth))?;
                if instr.opens() || *instr == WasmInstr::Else {
                    depth += 1;
                }
            }
            writeln!(f, "  )")?;
        }
        writeln!(f, ")")
    }
}

/// Host functions available to generated code.
const LOG_I32: (&str, &str) = ("env", "log_i32");
const LOG_F64: (&str, &str) = ("env", "log_f64");
const POW: (&str, &str) = ("math", "pow");

#[derive(Debug, Default)]
struct HostUses {
    log_i32: bool,
    log_f64: bool,
    pow: bool,
}

impl HostUses {
    fn imports(&self) -> Vec<WasmImport> {
        let mut imports = Vec::new();
        if self.log_i32 {
            imports.push(WasmImport {
                module: LOG_I32.0,
                name: LOG_I32.1,
                params: vec![WasmType::I32],
                result: None,
            });
        }
        if self.log_f64 {
            imports.push(WasmImport {
                module: LOG_F64.0,
                name: LOG_F64.1,
                params: vec![WasmType::F64],
                result: None,
            });
        }
        if self.pow {
            imports.push(WasmImport {
                module: POW.0,
                name: POW.1,
                params: vec![WasmType::F64, WasmType::F64],
                result: Some(WasmType::F64),
            });
        }
        imports
    }
}

struct Signature {
    symbol: String,
    params: Vec<WasmType>,
    result: WasmType,
}

/// Symbol of a user function. `main` and the host import names are
/// reserved, so those (and anything already carrying the prefix) become
/// `user_<name>`.
fn symbol_for(name: &str) -> String {
    let reserved = [LOG_I32.1, LOG_F64.1, POW.1].contains(&name);
    if name == "main" || reserved || name.starts_with("user_") {
        format!("user_{name}")
    } else {
        name.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WatBackend {
    table: ConstructTable,
}

impl WatBackend {
    pub fn new(table: ConstructTable) -> Self {
        WatBackend { table }
    }

    /// Lower a parsed program to a module, failing on literals the
    /// module cannot represent.
    pub fn lower(&self, ast: &SourceAst) -> Result<WasmModule, CoreError> {
        match self.build(ast) {
            (module, None) => Ok(module),
            (_, Some(err)) => Err(err),
        }
    }

    fn build(&self, ast: &SourceAst) -> (WasmModule, Option<CoreError>) {
        let mut failure = None;
        let mut types = TypeInferencer::new(ast, &self.table);
        types.infer_program();
        let root = ast.root();

        let mut signatures = HashMap::new();
        let mut definitions = Vec::new();
        for id in self.table.functions(ast, root) {
            let Construct::Function { name, params, body } = self.table.classify(ast, id) else {
                continue;
            };
            let params: Vec<(String, WasmType)> = params
                .iter()
                .map(|param| {
                    let ty = types.variable_type(Some(id), param).unwrap_or(TypeInfo::ANY);
                    (param.to_string(), WasmType::of(&ty))
                })
                .collect();
            let result = WasmType::of(&types.return_type(id));
            signatures.insert(
                name,
                Signature {
                    symbol: symbol_for(name),
                    params: params.iter().map(|(_, ty)| *ty).collect(),
                    result,
                },
            );
            definitions.push((id, symbol_for(name), params, body, result));
        }

        let mut uses = HostUses::default();
        let mut functions = Vec::new();
        for (id, symbol, params, body, result) in definitions {
            let mut lowering =
                Lowering::new(ast, &self.table, &mut types, &signatures, &mut uses, Some(id), result);
            for (name, ty) in &params {
                lowering.param_types.insert(name.clone(), *ty);
            }
            lowering.block(body);
            lowering.default_value();
            failure = failure.or(lowering.failure.take());
            let locals = lowering.locals_excluding(&params);
            functions.push(WasmFunction {
                name: symbol,
                export: None,
                params,
                result,
                locals,
                body: lowering.body,
            });
        }

        let mut lowering =
            Lowering::new(ast, &self.table, &mut types, &signatures, &mut uses, None, WasmType::I32);
        let mut last_assignment = None;
        for statement in self.table.body(ast, root) {
            match self.table.resolve(ast, statement).1 {
                Construct::Function { .. } => continue,
                Construct::Assign { target, .. } => last_assignment = Some(target),
                _ => {}
            }
            lowering.statement(statement);
        }
        match last_assignment {
            Some(target) => {
                let ty = lowering.local_type(target);
                lowering.emit(WasmInstr::LocalGet(target.to_string()));
                lowering.convert(ty, WasmType::I32);
            }
            None => lowering.emit(WasmInstr::I32Const(0)),
        }
        failure = failure.or(lowering.failure.take());
        let locals = lowering.locals_excluding(&[]);
        functions.push(WasmFunction {
            name: "main".to_string(),
            export: Some("main".to_string()),
            params: Vec::new(),
            result: WasmType::I32,
            locals,
            body: lowering.body,
        });

        let module = WasmModule {
            imports: uses.imports(),
            memory_pages: 1,
            functions,
        };
        (module, failure)
    }
}

impl Backend for WatBackend {
    fn name(&self) -> &'static str {
        "wat"
    }

    fn file_extension(&self) -> &'static str {
        "wat"
    }

    fn translate(&self, ast: &SourceAst) -> String {
        self.build(ast).0.to_string()
    }
}

const REM_LEFT: &str = "__rem_a";
const REM_RIGHT: &str = "__rem_b";

struct Lowering<'a, 'b> {
    ast: &'a SourceAst,
    table: &'a ConstructTable,
    types: &'b mut TypeInferencer<'a>,
    signatures: &'b HashMap<&'a str, Signature>,
    uses: &'b mut HostUses,
    scope: Scope,
    result: WasmType,
    param_types: HashMap<String, WasmType>,
    hidden: Vec<(String, WasmType)>,
    body: Vec<WasmInstr>,
    failure: Option<CoreError>,
}

impl<'a, 'b> Lowering<'a, 'b> {
    fn new(
        ast: &'a SourceAst,
        table: &'a ConstructTable,
        types: &'b mut TypeInferencer<'a>,
        signatures: &'b HashMap<&'a str, Signature>,
        uses: &'b mut HostUses,
        scope: Scope,
        result: WasmType,
    ) -> Self {
        Lowering {
            ast,
            table,
            types,
            signatures,
            uses,
            scope,
            result,
            param_types: HashMap::new(),
            hidden: Vec::new(),
            body: Vec::new(),
            failure: None,
        }
    }

    fn emit(&mut self, instr: WasmInstr) {
        self.body.push(instr);
    }

    /// Locals declared in this scope (parameters excluded) plus any
    /// scratch locals the lowering needed.
    fn locals_excluding(&self, params: &[(String, WasmType)]) -> Vec<(String, WasmType)> {
        let mut locals: Vec<(String, WasmType)> = self
            .types
            .variables_in(self.scope)
            .into_iter()
            .filter(|(name, _)| !params.iter().any(|(param, _)| param == name))
            .map(|(name, ty)| (name.to_string(), WasmType::of(&ty)))
            .collect();
        locals.extend(self.hidden.iter().cloned());
        locals
    }

    fn local_type(&self, name: &str) -> Option<WasmType> {
        if let Some(ty) = self.param_types.get(name) {
            return Some(*ty);
        }
        self.types
            .variable_type(self.scope, name)
            .map(|ty| WasmType::of(&ty))
    }

    fn default_value(&mut self) {
        match self.result {
            WasmType::I32 => self.emit(WasmInstr::I32Const(0)),
            WasmType::F64 => self.emit(WasmInstr::F64Const(0.0)),
        }
    }

    fn convert(&mut self, from: Option<WasmType>, to: WasmType) {
        match (from, to) {
            (Some(WasmType::I32), WasmType::F64) => self.emit(WasmInstr::F64ConvertI32S),
            (Some(WasmType::F64), WasmType::I32) => self.emit(WasmInstr::I32TruncF64S),
            _ => {}
        }
    }

    /// Record the first lowering failure and continue with a zero value.
    fn fail<T: Default>(&mut self, err: CoreError) -> T {
        self.emit(WasmInstr::Comment(err.to_string()));
        self.failure.get_or_insert(err);
        T::default()
    }

    fn placeholder(&mut self, what: &str, id: NodeId) {
        trace!(node = self.ast.node_type(id), "wat backend placeholder");
        self.emit(WasmInstr::Comment(format!(
            "unsupported construct: {what} ({})",
            self.ast.node_type(id)
        )));
    }

    /// Type of the value `expr` would leave on the stack.
    fn type_of(&mut self, id: NodeId) -> WasmType {
        match self.table.resolve(self.ast, id).1 {
            Construct::Number(text) if text.contains('.') => WasmType::F64,
            Construct::Var(name) => self.local_type(name).unwrap_or(WasmType::I32),
            Construct::Unary {
                op: UnaryOp::Neg,
                operand,
            } => self.type_of(operand),
            Construct::Binary { first, rest } => {
                let mut ty = self.type_of(first);
                for (op, operand) in rest {
                    let right = self.type_of(operand);
                    ty = if op.is_arithmetic() && (ty == WasmType::F64 || right == WasmType::F64) {
                        WasmType::F64
                    } else {
                        WasmType::I32
                    };
                }
                ty
            }
            Construct::Call { callee, .. } => match self.signatures.get(callee) {
                Some(signature) => signature.result,
                None if callee == POW.1 => WasmType::F64,
                None => WasmType::I32,
            },
            _ => WasmType::I32,
        }
    }

    fn statement(&mut self, id: NodeId) {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Statements(items) => {
                for item in items {
                    self.statement(*item);
                }
            }
            Construct::Assign { target, value } => {
                let ty = self.expr(value);
                let local = self.local_type(target);
                self.convert(Some(ty), local.unwrap_or(ty));
                self.emit(WasmInstr::LocalSet(target.to_string()));
            }
            Construct::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.condition(cond);
                self.emit(WasmInstr::If(None));
                self.block(then_branch);
                if let Some(else_branch) = else_branch {
                    self.emit(WasmInstr::Else);
                    self.block(else_branch);
                }
                self.emit(WasmInstr::End);
            }
            Construct::While { cond, body } => {
                self.emit(WasmInstr::Block("break".into()));
                self.emit(WasmInstr::Loop("continue".into()));
                self.condition(cond);
                self.emit(WasmInstr::I32Eqz);
                self.emit(WasmInstr::BrIf("break".into()));
                self.block(body);
                self.emit(WasmInstr::Br("continue".into()));
                self.emit(WasmInstr::End);
                self.emit(WasmInstr::End);
            }
            Construct::For { var, from, to, body } => {
                let var_ty = self.local_type(var).unwrap_or(WasmType::I32);
                let from_ty = self.expr(from);
                self.convert(Some(from_ty), var_ty);
                self.emit(WasmInstr::LocalSet(var.to_string()));

                self.emit(WasmInstr::Block("break".into()));
                self.emit(WasmInstr::Loop("continue".into()));
                self.emit(WasmInstr::LocalGet(var.to_string()));
                let to_ty = self.expr(to);
                self.convert(Some(to_ty), var_ty);
                self.emit(WasmInstr::Compare(var_ty, CompareOp::Lt));
                self.emit(WasmInstr::I32Eqz);
                self.emit(WasmInstr::BrIf("break".into()));
                self.block(body);
                self.emit(WasmInstr::LocalGet(var.to_string()));
                match var_ty {
                    WasmType::I32 => self.emit(WasmInstr::I32Const(1)),
                    WasmType::F64 => self.emit(WasmInstr::F64Const(1.0)),
                }
                self.emit(WasmInstr::Arith(var_ty, ArithOp::Add));
                self.emit(WasmInstr::LocalSet(var.to_string()));
                self.emit(WasmInstr::Br("continue".into()));
                self.emit(WasmInstr::End);
                self.emit(WasmInstr::End);
            }
            Construct::Return(value) => {
                match value {
                    Some(value) => {
                        let ty = self.expr(value);
                        self.convert(Some(ty), self.result);
                    }
                    None => self.default_value(),
                }
                self.emit(WasmInstr::Return);
            }
            Construct::Print(value) => {
                if let Construct::Str(_) = self.table.resolve(self.ast, value).1 {
                    self.placeholder("string output", value);
                    return;
                }
                let import = match self.expr(value) {
                    WasmType::I32 => {
                        self.uses.log_i32 = true;
                        LOG_I32.1
                    }
                    WasmType::F64 => {
                        self.uses.log_f64 = true;
                        LOG_F64.1
                    }
                };
                self.emit(WasmInstr::Call(import.to_string()));
            }
            Construct::Call { .. } | Construct::Binary { .. } | Construct::Unary { .. } => {
                self.expr(id);
                self.emit(WasmInstr::Drop);
            }
            other => self.placeholder(other.label(), id),
        }
    }

    fn block(&mut self, id: NodeId) {
        for statement in self.table.body(self.ast, id) {
            self.statement(statement);
        }
    }

    /// Evaluate `id` as an `i32` truth value.
    fn condition(&mut self, id: NodeId) {
        if self.expr(id) == WasmType::F64 {
            self.emit(WasmInstr::F64Const(0.0));
            self.emit(WasmInstr::Compare(WasmType::F64, CompareOp::Ne));
        }
    }

    fn truthy(&mut self, id: NodeId) {
        match self.expr(id) {
            WasmType::I32 => {
                self.emit(WasmInstr::I32Const(0));
                self.emit(WasmInstr::Compare(WasmType::I32, CompareOp::Ne));
            }
            WasmType::F64 => {
                self.emit(WasmInstr::F64Const(0.0));
                self.emit(WasmInstr::Compare(WasmType::F64, CompareOp::Ne));
            }
        }
    }

    fn hidden_local(&mut self, name: &str, ty: WasmType) {
        if !self.hidden.iter().any(|(hidden, _)| hidden == name) {
            self.hidden.push((name.to_string(), ty));
        }
    }

    fn expr(&mut self, id: NodeId) -> WasmType {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Number(text) if text.contains('.') => {
                let value = float_literal(text).unwrap_or_else(|err| self.fail(err));
                self.emit(WasmInstr::F64Const(value));
                WasmType::F64
            }
            Construct::Number(text) => {
                let value = int_literal(text).unwrap_or_else(|err| self.fail(err));
                self.emit(WasmInstr::I32Const(value));
                WasmType::I32
            }
            Construct::Bool(b) => {
                self.emit(WasmInstr::I32Const(i32::from(b)));
                WasmType::I32
            }
            Construct::Var(name) => match self.local_type(name) {
                Some(ty) => {
                    self.emit(WasmInstr::LocalGet(name.to_string()));
                    ty
                }
                None => {
                    self.emit(WasmInstr::Comment(format!("unknown variable {name}")));
                    self.emit(WasmInstr::I32Const(0));
                    WasmType::I32
                }
            },
            Construct::Unary { op: UnaryOp::Not, operand } => {
                self.truthy(operand);
                self.emit(WasmInstr::I32Eqz);
                WasmType::I32
            }
            Construct::Unary { op: UnaryOp::Neg, operand } => match self.type_of(operand) {
                WasmType::I32 => {
                    self.emit(WasmInstr::I32Const(0));
                    self.expr(operand);
                    self.emit(WasmInstr::Arith(WasmType::I32, ArithOp::Sub));
                    WasmType::I32
                }
                WasmType::F64 => {
                    self.expr(operand);
                    self.emit(WasmInstr::F64Neg);
                    WasmType::F64
                }
            },
            Construct::Binary { first, rest } => self.binary(first, rest),
            Construct::Call { callee, args } => self.call(id, callee, args),
            other => {
                self.placeholder(other.label(), id);
                self.emit(WasmInstr::I32Const(0));
                WasmType::I32
            }
        }
    }

    fn binary(&mut self, first: NodeId, rest: Vec<(BinaryOp, NodeId)>) -> WasmType {
        let mut acc = self.expr(first);
        for (op, operand) in rest {
            if op.is_logical() {
                if acc == WasmType::F64 {
                    self.emit(WasmInstr::F64Const(0.0));
                    self.emit(WasmInstr::Compare(WasmType::F64, CompareOp::Ne));
                } else {
                    self.emit(WasmInstr::I32Const(0));
                    self.emit(WasmInstr::Compare(WasmType::I32, CompareOp::Ne));
                }
                self.emit(WasmInstr::If(Some(WasmType::I32)));
                if op == BinaryOp::And {
                    self.truthy(operand);
                    self.emit(WasmInstr::Else);
                    self.emit(WasmInstr::I32Const(0));
                } else {
                    self.emit(WasmInstr::I32Const(1));
                    self.emit(WasmInstr::Else);
                    self.truthy(operand);
                }
                self.emit(WasmInstr::End);
                acc = WasmType::I32;
                continue;
            }

            let right = self.type_of(operand);
            let ty = if acc == WasmType::F64 || right == WasmType::F64 {
                WasmType::F64
            } else {
                WasmType::I32
            };
            self.convert(Some(acc), ty);
            let right = self.expr(operand);
            self.convert(Some(right), ty);

            let arith = match op {
                BinaryOp::Add => Some(ArithOp::Add),
                BinaryOp::Sub => Some(ArithOp::Sub),
                BinaryOp::Mul => Some(ArithOp::Mul),
                BinaryOp::Div => Some(ArithOp::Div),
                BinaryOp::Rem => Some(ArithOp::Rem),
                _ => None,
            };
            match arith {
                Some(ArithOp::Rem) if ty == WasmType::F64 => self.float_rem(),
                Some(arith) => self.emit(WasmInstr::Arith(ty, arith)),
                None => {
                    let compare = match op {
                        BinaryOp::Eq => CompareOp::Eq,
                        BinaryOp::Ne => CompareOp::Ne,
                        BinaryOp::Lt => CompareOp::Lt,
                        BinaryOp::Gt => CompareOp::Gt,
                        BinaryOp::Le => CompareOp::Le,
                        _ => CompareOp::Ge,
                    };
                    self.emit(WasmInstr::Compare(ty, compare));
                }
            }
            acc = if op.is_arithmetic() { ty } else { WasmType::I32 };
        }
        acc
    }

    /// `a - trunc(a / b) * b` with both operands on the stack.
    fn float_rem(&mut self) {
        self.hidden_local(REM_LEFT, WasmType::F64);
        self.hidden_local(REM_RIGHT, WasmType::F64);
        self.emit(WasmInstr::LocalSet(REM_RIGHT.into()));
        self.emit(WasmInstr::LocalSet(REM_LEFT.into()));
        self.emit(WasmInstr::LocalGet(REM_LEFT.into()));
        self.emit(WasmInstr::LocalGet(REM_LEFT.into()));
        self.emit(WasmInstr::LocalGet(REM_RIGHT.into()));
        self.emit(WasmInstr::Arith(WasmType::F64, ArithOp::Div));
        self.emit(WasmInstr::F64Trunc);
        self.emit(WasmInstr::LocalGet(REM_RIGHT.into()));
        self.emit(WasmInstr::Arith(WasmType::F64, ArithOp::Mul));
        self.emit(WasmInstr::Arith(WasmType::F64, ArithOp::Sub));
    }

    fn call(&mut self, id: NodeId, callee: &str, args: Vec<NodeId>) -> WasmType {
        let (symbol, params, result) = match self.signatures.get(callee) {
            Some(signature) => (signature.symbol.clone(), signature.params.clone(), signature.result),
            None if callee == POW.1 => {
                self.uses.pow = true;
                (POW.1.to_string(), vec![WasmType::F64, WasmType::F64], WasmType::F64)
            }
            None => {
                self.placeholder("call to unknown function", id);
                self.emit(WasmInstr::I32Const(0));
                return WasmType::I32;
            }
        };
        if params.len() != args.len() {
            self.placeholder("call with wrong argument count", id);
            self.emit(WasmInstr::I32Const(0));
            return WasmType::I32;
        }
        for (arg, param) in args.into_iter().zip(params) {
            let ty = self.expr(arg);
            self.convert(Some(ty), param);
        }
        self.emit(WasmInstr::Call(symbol));
        result
    }
}
