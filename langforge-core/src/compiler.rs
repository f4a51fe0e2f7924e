use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use crate::ast::SourceAst;
use crate::backend::Backend;
use crate::codegen_c::CBackend;
use crate::codegen_llvm::LlvmBackend;
use crate::codegen_python::PythonBackend;
use crate::codegen_wasm::WatBackend;
use crate::error::CoreError;
use crate::language::Language;
use crate::shape::ConstructTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    C,
    Wat,
    Wasm,
    Llvm,
    Python,
}

impl Target {
    pub const ALL: [Target; 5] = [Target::C, Target::Wat, Target::Wasm, Target::Llvm, Target::Python];

    pub fn name(self) -> &'static str {
        match self {
            Target::C => "c",
            Target::Wat => "wat",
            Target::Wasm => "wasm",
            Target::Llvm => "llvm",
            Target::Python => "python",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Target::Wasm => "wasm",
            other => backend_for(other, ConstructTable::empty()).file_extension(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(Target::C),
            "wat" => Ok(Target::Wat),
            "wasm" => Ok(Target::Wasm),
            "llvm" | "ll" => Ok(Target::Llvm),
            "python" | "py" => Ok(Target::Python),
            _ => Err(CoreError::UnsupportedFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationArtifact {
    pub target: Target,
    /// Target text; WAT for [`Target::Wasm`].
    pub text: String,
    /// Encoded module, present for [`Target::Wasm`] only.
    pub wasm: Option<Vec<u8>>,
    /// `(module, name)` of each host function the wasm module imports.
    pub host_imports: Vec<(String, String)>,
}

/// The text backend for a target. Binary wasm shares the WAT backend.
pub fn backend_for(target: Target, table: ConstructTable) -> Box<dyn Backend> {
    match target {
        Target::C => Box::new(CBackend::new(table)),
        Target::Wat | Target::Wasm => Box::new(WatBackend::new(table)),
        Target::Llvm => Box::new(LlvmBackend::new(table)),
        Target::Python => Box::new(PythonBackend::new(table)),
    }
}

/// Translate an already parsed program.
pub fn emit_text(ast: &SourceAst, language: &Language, target: Target) -> String {
    backend_for(target, language.table().clone()).translate(ast)
}

pub fn compile(source: &str, language: &Language, target: Target) -> Result<CompilationArtifact, CoreError> {
    info!(language = language.name(), %target, "compiling");
    let ast = language.parse(source)?;
    debug!(nodes = ast.len(), "parsed source");

    let text = match target {
        Target::Wasm => {
            let module = WatBackend::new(language.table().clone()).lower(&ast)?;
            let wasm = module.encode()?;
            debug!(bytes = wasm.len(), functions = module.functions.len(), "encoded wasm module");
            return Ok(CompilationArtifact {
                target,
                text: module.to_string(),
                host_imports: module.host_imports(),
                wasm: Some(wasm),
            });
        }
        Target::Wat => WatBackend::new(language.table().clone()).lower(&ast)?.to_string(),
        Target::Llvm => LlvmBackend::new(language.table().clone()).emit(&ast)?,
        Target::C | Target::Python => emit_text(&ast, language, target),
    };

    Ok(CompilationArtifact {
        target,
        text,
        wasm: None,
        host_imports: Vec::new(),
    })
}

pub fn compile_wasm(source: &str, language: &Language) -> Result<CompilationArtifact, CoreError> {
    compile(source, language, Target::Wasm)
}

pub fn emit_llvm_ir(source: &str, language: &Language) -> Result<String, CoreError> {
    Ok(compile(source, language, Target::Llvm)?.text)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{LanguageRegistry, default_language_root};
    use crate::eval::Value;
    use crate::fixtures::ARITHMETIC;

    const AGREEMENT: &str = "x = 10 ; y = 20 ; z = x + y ;";

    fn calc() -> Language {
        Language::from_grammar_text("calc", ARITHMETIC).expect("calc language")
    }

    fn mini() -> Language {
        let registry = LanguageRegistry::load(default_language_root()).expect("bundled languages");
        Language::from_config(registry.get("mini").expect("mini")).expect("mini language")
    }

    /// Run straight-line `@main` IR and return the final slot values.
    fn interpret_llvm_main(ir: &str) -> HashMap<String, i64> {
        let mut slots = HashMap::new();
        let mut registers: HashMap<String, i64> = HashMap::new();
        let body = ir
            .split("define i32 @main() {")
            .nth(1)
            .expect("main function");
        for line in body.lines() {
            let tokens: Vec<&str> = line
                .split_whitespace()
                .map(|token| token.trim_end_matches(','))
                .collect();
            let value = |token: &str, registers: &HashMap<String, i64>| -> i64 {
                match registers.get(token) {
                    Some(value) => *value,
                    None => token.parse().expect("constant operand"),
                }
            };
            let slot = |token: &str| token.trim_start_matches('%').trim_end_matches(".addr").to_string();
            match tokens.as_slice() {
                [_, "=", "alloca", "i32"] => {}
                ["store", "i32", v, "ptr", target] => {
                    slots.insert(slot(target), value(v, &registers));
                }
                [reg, "=", "load", "i32", "ptr", source] => {
                    registers.insert(reg.to_string(), slots[&slot(source)]);
                }
                [reg, "=", op, "i32", a, b] => {
                    let (a, b) = (value(a, &registers), value(b, &registers));
                    let result = match *op {
                        "add" => a + b,
                        "sub" => a - b,
                        "mul" => a * b,
                        "sdiv" => a / b,
                        other => panic!("unexpected instruction {other}"),
                    };
                    registers.insert(reg.to_string(), result);
                }
                ["ret", "i32", _] | ["}"] => break,
                [] => {}
                other => panic!("unexpected line {other:?}"),
            }
        }
        slots
    }

    /// Run `main` with the host imports linked; returns its result and the
    /// printed lines.
    fn run_wasm(bytes: &[u8]) -> (i32, Vec<String>) {
        let engine = wasmi::Engine::default();
        let module = wasmi::Module::new(&engine, bytes).expect("module");
        let mut linker = wasmi::Linker::<Vec<String>>::new(&engine);
        linker
            .func_wrap("env", "log_i32", |mut caller: wasmi::Caller<'_, Vec<String>>, value: i32| {
                caller.data_mut().push(value.to_string());
            })
            .expect("link log_i32");
        linker
            .func_wrap("env", "log_f64", |mut caller: wasmi::Caller<'_, Vec<String>>, value: f64| {
                caller.data_mut().push(value.to_string());
            })
            .expect("link log_f64");
        linker
            .func_wrap("math", "pow", |base: f64, exponent: f64| -> f64 { base.powf(exponent) })
            .expect("link pow");
        let mut store = wasmi::Store::new(&engine, Vec::new());
        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .expect("instantiate");
        let main = instance
            .get_typed_func::<(), i32>(&store, "main")
            .expect("typed func");
        let result = main.call(&mut store, ()).expect("execute main");
        (result, store.into_data())
    }

    /// Evaluate `source` and run its wasm build; printed lines must match
    /// and `main` must return the final `r`.
    fn assert_evaluator_matches_wasm(source: &str) {
        let language = mini();
        let run = language.evaluate(source).expect("evaluate");
        let expected = match run.globals.get("r") {
            Some(Value::Int(n)) => *n as i32,
            Some(Value::Float(x)) => x.trunc() as i32,
            Some(Value::Bool(b)) => i32::from(*b),
            other => panic!("r is {other:?} in {source}"),
        };
        let artifact = compile_wasm(source, &language).expect("wasm");
        let (result, printed) = run_wasm(artifact.wasm.as_deref().expect("bytes"));
        assert_eq!(printed, run.output, "output of {source}");
        assert_eq!(result, expected, "result of {source}");
    }

    #[test]
    fn parses_target_names() {
        assert_eq!("C".parse::<Target>().unwrap(), Target::C);
        assert_eq!("ll".parse::<Target>().unwrap(), Target::Llvm);
        assert_eq!("py".parse::<Target>().unwrap(), Target::Python);
        let err = "cobol".parse::<Target>().unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedFormat(name) if name == "cobol"));
        let extensions: Vec<_> = Target::ALL.iter().map(|t| t.file_extension()).collect();
        assert_eq!(extensions, ["c", "wat", "wasm", "ll", "py"]);
    }

    #[test]
    fn backends_agree_on_assignment_chain() {
        let language = calc();

        let run = language.evaluate(AGREEMENT).expect("evaluate");
        assert_eq!(run.globals.get("z"), Some(&Value::Int(30)));

        let c = compile(AGREEMENT, &language, Target::C).expect("c").text;
        for decl in ["int x;", "int y;", "int z;"] {
            assert!(c.contains(decl), "missing {decl} in\n{c}");
        }
        assert!(c.contains("z = (x + y);"));

        let ir = emit_llvm_ir(AGREEMENT, &language).expect("llvm");
        assert!(ir.contains(" add "));
        assert!(ir.contains(" load "));
        assert_eq!(interpret_llvm_main(&ir).get("z"), Some(&30));

        let artifact = compile_wasm(AGREEMENT, &language).expect("wasm");
        assert!(artifact.text.contains("i32.add"));
        assert!(artifact.host_imports.is_empty());
        assert_eq!(run_wasm(artifact.wasm.as_deref().expect("bytes")).0, 30);
    }

    #[test]
    fn precedence_agrees_across_backends() {
        let language = calc();
        let source = "z = 2 + 3 * 4 ;";
        let run = language.evaluate(source).expect("evaluate");
        assert_eq!(run.globals.get("z"), Some(&Value::Int(14)));

        let ir = emit_llvm_ir(source, &language).expect("llvm");
        assert_eq!(interpret_llvm_main(&ir).get("z"), Some(&14));

        let artifact = compile_wasm(source, &language).expect("wasm");
        assert_eq!(run_wasm(artifact.wasm.as_deref().expect("bytes")).0, 14);
    }

    #[test]
    fn mixed_arithmetic_agrees_across_backends() {
        let language = mini();
        let source = "x = 1 + 2.5; r = x * 2; n = 1; n = n + 2.5;";

        let run = language.evaluate(source).expect("evaluate");
        assert_eq!(run.globals.get("x"), Some(&Value::Float(3.5)));
        assert_eq!(run.globals.get("r"), Some(&Value::Float(7.0)));
        assert_eq!(run.globals.get("n"), Some(&Value::Int(3)));

        let c = compile(source, &language, Target::C).expect("c").text;
        for decl in ["double x;", "double r;", "int n;"] {
            assert!(c.contains(decl), "missing {decl} in\n{c}");
        }

        let ir = emit_llvm_ir(source, &language).expect("llvm");
        assert!(ir.contains("%x.addr = alloca double"), "{ir}");
        assert!(ir.contains("%n.addr = alloca i32"), "{ir}");
        assert!(ir.contains("fptosi double"), "{ir}");

        let py = compile(source, &language, Target::Python).expect("python").text;
        assert!(py.contains("n = int((n + 2.5))"), "{py}");

        let artifact = compile_wasm(source, &language).expect("wasm");
        assert!(artifact.text.contains("(local $x f64)"), "{}", artifact.text);
        assert_eq!(run_wasm(artifact.wasm.as_deref().expect("bytes")).0, 3);
    }

    #[test]
    fn evaluator_and_wasm_agree_on_floats() {
        assert_evaluator_matches_wasm("x = 1 + 2.5; print x; r = x * 2; print r;");
        assert_evaluator_matches_wasm(
            "n = 1; n = n + 2.5; print n; h = 7 / 2; f = 7.0 / 2; print h; print f; \
             m = 7.5 % 2; print m; r = h + f;",
        );
        assert_evaluator_matches_wasm(
            "p = pow(2, 10); q = p / 4; print q; ok = p > 1000 && q < 300; r = ok;",
        );
    }

    #[test]
    fn evaluator_and_wasm_agree_on_control_flow() {
        assert_evaluator_matches_wasm(
            "total = 0; i = 0; while i < 10 { if i % 3 == 0 { total = total + i; } \
             else { total = total - 1; } i = i + 1; } print total; r = total;",
        );
        assert_evaluator_matches_wasm(
            "acc = 0.5; for k in 0..4 { acc = acc * 2 + k; } print acc; r = acc;",
        );
        assert_evaluator_matches_wasm(
            "fn fib(n) { if n < 2 { return n; } else { return fib(n - 1) + fib(n - 2); } } \
             fn half(x) { return x / 2.0; } h = half(5); print h; r = fib(12) + h;",
        );
    }

    #[test]
    fn oversized_literals_are_codegen_errors() {
        let language = mini();
        for target in [Target::Wat, Target::Wasm, Target::Llvm] {
            let err = compile("x = 99999999999;", &language, target).unwrap_err();
            assert!(matches!(err, CoreError::Codegen(_)), "{target}: {err:?}");
        }
        let c = compile("x = 99999999999;", &language, Target::C).expect("c");
        assert!(c.text.contains("99999999999"));
    }

    #[test]
    fn wasm_artifact_records_host_imports() {
        let artifact = compile_wasm("x = 3; print x; y = pow(x, 2);", &mini()).expect("wasm");
        assert_eq!(
            artifact.host_imports,
            [
                ("env".to_string(), "log_i32".to_string()),
                ("math".to_string(), "pow".to_string()),
            ]
        );
        let bytes = artifact.wasm.expect("bytes");
        wasmparser::Validator::new()
            .validate_all(&bytes)
            .expect("valid module");
    }

    #[test]
    fn text_targets_have_no_binary() {
        let language = mini();
        for target in [Target::C, Target::Wat, Target::Llvm, Target::Python] {
            let artifact = compile("print 1;", &language, target).expect("compile");
            assert_eq!(artifact.target, target);
            assert!(artifact.wasm.is_none());
            assert!(!artifact.text.is_empty());
        }
    }

    #[test]
    fn syntax_errors_propagate() {
        let err = compile("x = ;", &calc(), Target::C).unwrap_err();
        let CoreError::Syntax(error) = err else {
            panic!("expected a syntax error, got {err:?}");
        };
        assert_eq!(error.position, 4);
    }
}
