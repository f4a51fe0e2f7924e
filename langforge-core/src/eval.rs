//! Tree-walking evaluator.
//!
//! Runs a parse tree directly, with the same semantics the backends
//! compile to: integer arithmetic truncates, `for i in a .. b` checks
//! `i < b` before every iteration and increments after the body,
//! function bodies only see their parameters and their own locals, a
//! variable keeps the numeric kind of its first value, and a function
//! that falls off its end returns `0`.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::ast::{NodeId, SourceAst};
use crate::error::CoreError;
use crate::shape::{BinaryOp, Construct, ConstructTable, UnaryOp};

const MAX_CALL_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Unit,
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::Unit => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Unit => "unit",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => f.write_str(s),
            Value::Unit => Ok(()),
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
}

pub struct Evaluator<'a> {
    ast: &'a SourceAst,
    table: &'a ConstructTable,
    functions: HashMap<&'a str, NodeId>,
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    output: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(ast: &'a SourceAst, table: &'a ConstructTable) -> Self {
        let functions = table
            .functions(ast, ast.root())
            .into_iter()
            .filter_map(|id| match table.classify(ast, id) {
                Construct::Function { name, .. } => Some((name, id)),
                _ => None,
            })
            .collect();
        Evaluator {
            ast,
            table,
            functions,
            globals: HashMap::new(),
            frames: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Execute the top-level statements.
    pub fn run(&mut self) -> Result<(), CoreError> {
        for statement in self.table.body(self.ast, self.ast.root()) {
            if let Flow::Return(_) = self.exec(statement)? {
                break;
            }
        }
        trace!(globals = self.globals.len(), lines = self.output.len(), "evaluation finished");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn globals(&self) -> &HashMap<String, Value> {
        &self.globals
    }

    /// Lines written by `print`.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn into_output(self) -> Vec<String> {
        self.output
    }

    fn scope(&mut self) -> &mut HashMap<String, Value> {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.globals,
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, CoreError> {
        let scope = self.frames.last().unwrap_or(&self.globals);
        scope
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::Runtime(format!("undefined variable '{name}'")))
    }

    fn exec_block(&mut self, id: NodeId) -> Result<Flow, CoreError> {
        for statement in self.table.body(self.ast, id) {
            if let Flow::Return(value) = self.exec(statement)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, id: NodeId) -> Result<Flow, CoreError> {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Statements(items) => {
                for item in items {
                    if let Flow::Return(value) = self.exec(*item)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Construct::Assign { target, value } => {
                let value = self.eval(value)?;
                let value = keep_numeric_kind(self.scope().get(target), value);
                self.scope().insert(target.to_string(), value);
            }
            Construct::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond)?.truthy() {
                    return self.exec_block(then_branch);
                }
                if let Some(else_branch) = else_branch {
                    return self.exec_block(else_branch);
                }
            }
            Construct::While { cond, body } => {
                while self.eval(cond)?.truthy() {
                    if let Flow::Return(value) = self.exec_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Construct::For { var, from, to, body } => {
                let start = self.eval(from)?;
                self.scope().insert(var.to_string(), start);
                loop {
                    let current = self.lookup(var)?;
                    let bound = self.eval(to)?;
                    if !binary(BinaryOp::Lt, current, bound)?.truthy() {
                        break;
                    }
                    if let Flow::Return(value) = self.exec_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                    let next = binary(BinaryOp::Add, self.lookup(var)?, Value::Int(1))?;
                    self.scope().insert(var.to_string(), next);
                }
            }
            Construct::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Int(0),
                };
                return Ok(Flow::Return(value));
            }
            Construct::Print(value) => {
                let line = self.eval(value)?.to_string();
                self.output.push(line);
            }
            Construct::Function { .. } | Construct::Class { .. } => {}
            _ => {
                self.eval(id)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, id: NodeId) -> Result<Value, CoreError> {
        let (id, construct) = self.table.resolve(self.ast, id);
        match construct {
            Construct::Number(text) => parse_number(text),
            Construct::Str(text) => Ok(Value::Str(unquote(text))),
            Construct::Bool(b) => Ok(Value::Bool(b)),
            Construct::Var(name) => self.lookup(name),
            Construct::Unary { op, operand } => match (op, self.eval(operand)?) {
                (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
                (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(n.wrapping_neg())),
                (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
                (UnaryOp::Neg, value) => Err(CoreError::Runtime(format!(
                    "cannot negate a {}",
                    value.type_name()
                ))),
            },
            Construct::Binary { first, rest } => {
                let mut acc = self.eval(first)?;
                for (op, operand) in rest {
                    acc = match op {
                        BinaryOp::And if !acc.truthy() => Value::Bool(false),
                        BinaryOp::Or if acc.truthy() => Value::Bool(true),
                        BinaryOp::And | BinaryOp::Or => Value::Bool(self.eval(operand)?.truthy()),
                        _ => binary(op, acc, self.eval(operand)?)?,
                    };
                }
                Ok(acc)
            }
            Construct::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(callee, values)
            }
            other => Err(CoreError::Runtime(format!(
                "cannot evaluate {} node '{}'",
                other.label(),
                self.ast.node_type(id)
            ))),
        }
    }

    fn call(&mut self, callee: &str, args: Vec<Value>) -> Result<Value, CoreError> {
        let Some(function) = self.functions.get(callee).copied() else {
            return match (callee, args.as_slice()) {
                ("pow", [base, exponent]) => match (base.as_f64(), exponent.as_f64()) {
                    (Some(base), Some(exponent)) => Ok(Value::Float(base.powf(exponent))),
                    _ => Err(CoreError::Runtime("pow expects numbers".into())),
                },
                _ => Err(CoreError::Runtime(format!("undefined function '{callee}'"))),
            };
        };
        let Construct::Function { params, body, .. } = self.table.classify(self.ast, function) else {
            return Err(CoreError::Runtime(format!("'{callee}' is not a function")));
        };
        if params.len() != args.len() {
            return Err(CoreError::Runtime(format!(
                "'{callee}' expects {} arguments, got {}",
                params.len(),
                args.len()
            )));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(CoreError::Runtime(format!(
                "call depth exceeded {MAX_CALL_DEPTH} in '{callee}'"
            )));
        }

        let frame = params
            .iter()
            .map(|param| param.to_string())
            .zip(args)
            .collect();
        self.frames.push(frame);
        let flow = self.exec_block(body);
        self.frames.pop();
        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Int(0)),
        }
    }
}

fn parse_number(text: &str) -> Result<Value, CoreError> {
    let value = if text.contains('.') {
        text.parse().ok().map(Value::Float)
    } else {
        text.parse().ok().map(Value::Int)
    };
    value.ok_or_else(|| CoreError::Runtime(format!("invalid number literal '{text}'")))
}

/// Strip the quotes from a string literal and resolve escapes.
pub(crate) fn unquote(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(text);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, CoreError> {
    use Value::{Bool, Float, Int, Str};

    let mismatch = |left: &Value, right: &Value| {
        CoreError::Runtime(format!(
            "unsupported operands for '{op}': {} and {}",
            left.type_name(),
            right.type_name()
        ))
    };

    Ok(match (left, right) {
        (Int(a), Int(b)) => match op {
            BinaryOp::Add => Int(a.wrapping_add(b)),
            BinaryOp::Sub => Int(a.wrapping_sub(b)),
            BinaryOp::Mul => Int(a.wrapping_mul(b)),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                return Err(CoreError::Runtime("division by zero".into()));
            }
            BinaryOp::Div => Int(a.wrapping_div(b)),
            BinaryOp::Rem => Int(a.wrapping_rem(b)),
            _ => Bool(compare(op, a.cmp(&b))),
        },
        (Str(a), Str(b)) => match op {
            BinaryOp::Add => Str(a + &b),
            _ if op.is_comparison() => Bool(compare(op, a.cmp(&b))),
            _ => return Err(mismatch(&Str(a), &Str(b))),
        },
        (Str(a), other) if op == BinaryOp::Add => Str(format!("{a}{other}")),
        (left, right) => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) if op.is_arithmetic() => match op {
                BinaryOp::Add => Float(a + b),
                BinaryOp::Sub => Float(a - b),
                BinaryOp::Mul => Float(a * b),
                BinaryOp::Div => Float(a / b),
                _ => Float(a % b),
            },
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ordering) => Bool(compare(op, ordering)),
                None => Bool(op == BinaryOp::Ne),
            },
            _ => return Err(mismatch(&left, &right)),
        },
    })
}

/// A variable keeps the numeric kind of the value it first held: floats
/// stored into an int variable truncate toward zero, ints stored into a
/// float variable widen.
fn keep_numeric_kind(previous: Option<&Value>, value: Value) -> Value {
    match (previous, value) {
        (Some(Value::Int(_)), Value::Float(x)) => Value::Int(x as i64),
        (Some(Value::Float(_)), Value::Int(n)) => Value::Float(n as f64),
        (_, value) => value,
    }
}

fn compare(op: BinaryOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match op {
        BinaryOp::Eq => ordering == Equal,
        BinaryOp::Ne => ordering != Equal,
        BinaryOp::Lt => ordering == Less,
        BinaryOp::Gt => ordering == Greater,
        BinaryOp::Le => ordering != Greater,
        BinaryOp::Ge => ordering != Less,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{parse_arithmetic, parse_mini};

    fn run_mini(source: &str) -> (HashMap<String, Value>, Vec<String>) {
        let ast = parse_mini(source);
        let table = ConstructTable::default();
        let mut evaluator = Evaluator::new(&ast, &table);
        evaluator.run().expect("run");
        (evaluator.globals().clone(), evaluator.output().to_vec())
    }

    #[test]
    fn multiplication_binds_tighter() {
        let ast = parse_arithmetic("z = 2 + 3 * 4 ;");
        let table = ConstructTable::default();
        let mut evaluator = Evaluator::new(&ast, &table);
        evaluator.run().expect("run");
        assert_eq!(evaluator.get("z"), Some(&Value::Int(14)));
    }

    #[test]
    fn evaluates_assignment_chain() {
        let ast = parse_arithmetic("x = 10 ; y = 20 ; z = x + y ;");
        let table = ConstructTable::default();
        let mut evaluator = Evaluator::new(&ast, &table);
        evaluator.run().expect("run");
        assert_eq!(evaluator.get("z"), Some(&Value::Int(30)));
    }

    #[test]
    fn runs_functions_and_loops() {
        let (globals, output) = run_mini(
            r#"
            fn fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); }
            total = 0;
            for i in 0..5 { total = total + i; }
            count = 3;
            while count > 0 { count = count - 1; }
            print fib(10);
            print "done";
            "#,
        );
        assert_eq!(globals["total"], Value::Int(10));
        assert_eq!(globals["count"], Value::Int(0));
        assert_eq!(globals["i"], Value::Int(5));
        assert_eq!(output, ["55", "done"]);
    }

    #[test]
    fn else_if_chains() {
        let (globals, _) = run_mini(
            "x = 5; if x < 3 { r = 1; } else if x < 10 { r = 2; } else { r = 3; }",
        );
        assert_eq!(globals["r"], Value::Int(2));
    }

    #[test]
    fn mixes_floats_strings_and_logic() {
        let (globals, _) = run_mini(
            r#"a = 7 / 2; b = 7.0 / 2; c = "n=" + a; d = !(a == 3) || 1 > 2; e = pow(2, 10); f = -a % 2;"#,
        );
        assert_eq!(globals["a"], Value::Int(3));
        assert_eq!(globals["b"], Value::Float(3.5));
        assert_eq!(globals["c"], Value::Str("n=3".into()));
        assert_eq!(globals["d"], Value::Bool(false));
        assert_eq!(globals["e"], Value::Float(1024.0));
        assert_eq!(globals["f"], Value::Int(-1));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let ast = parse_mini("x = 1 / 0;");
        let table = ConstructTable::default();
        let err = Evaluator::new(&ast, &table).run().unwrap_err();
        assert!(matches!(err, CoreError::Runtime(msg) if msg == "division by zero"));
    }

    #[test]
    fn functions_cannot_see_globals() {
        let ast = parse_mini("g = 1; fn f() { return g; } x = f();");
        let table = ConstructTable::default();
        let err = Evaluator::new(&ast, &table).run().unwrap_err();
        assert!(matches!(err, CoreError::Runtime(msg) if msg.contains("'g'")));
    }

    #[test]
    fn runaway_recursion_is_bounded() {
        let ast = parse_mini("fn f(n) { return f(n + 1); } x = f(0);");
        let table = ConstructTable::default();
        let err = Evaluator::new(&ast, &table).run().unwrap_err();
        assert!(matches!(err, CoreError::Runtime(msg) if msg.contains("call depth")));
    }

    #[test]
    fn unquotes_escapes() {
        assert_eq!(unquote(r#""a\"b\n""#), "a\"b\n");
    }
}
