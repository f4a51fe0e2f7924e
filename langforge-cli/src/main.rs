use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use langforge_core::diagnostic::blocking;
use langforge_core::span::line_col;
use langforge_core::{
    CompilationArtifact, Diagnostic, Language, LanguageConfig, LanguageRegistry, Target, compile,
    default_language_root,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wasmi::{Caller, Engine, Linker, Module, Store};

#[derive(Parser, Debug)]
#[command(version, about = "Build, check and run programs in grammar-defined languages", long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        default_value = "mini",
        help = "Language name, or path to a language definition (.json)"
    )]
    language: String,

    #[arg(
        long,
        value_name = "DIR",
        help = "Directory of language definitions (defaults to the bundled languages)"
    )]
    languages_root: Option<PathBuf>,

    #[arg(short, long, help = "Source file (reads stdin when omitted)")]
    input: Option<PathBuf>,

    #[arg(short, long, required_unless_present = "check")]
    output: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "wasm",
        help = "Output format: c, wat, wasm, llvm, python, ast"
    )]
    emit: String,

    #[arg(long, help = "Run the program after compiling")]
    run: bool,

    #[arg(long, help = "Report grammar and type diagnostics")]
    check: bool,

    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).context("invalid --log-level")?)
        .with_writer(io::stderr)
        .init();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    let language = load_language(&cli.language, cli.languages_root.as_deref())?;
    debug!(language = language.name(), "language loaded");

    let source = match &cli.input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?,
        None if cli.check && cli.output.is_none() => String::new(),
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    if cli.check {
        let errors = check(&language, &source);
        if cli.output.is_none() {
            if errors > 0 {
                bail!("{errors} error(s) found");
            }
            return Ok(());
        }
    }

    let Some(output) = &cli.output else {
        return Ok(());
    };

    if cli.emit == "ast" {
        let ast = language.parse(&source)?;
        write_output(output, ast.pretty().as_bytes())?;
        if cli.run {
            run_evaluator(&language, &source)?;
        }
        return Ok(());
    }

    let target: Target = cli.emit.parse()?;
    let artifact = compile(&source, &language, target)?;
    match &artifact.wasm {
        Some(bytes) => write_output(output, bytes)?,
        None => write_output(output, artifact.text.as_bytes())?,
    }

    if cli.run {
        if artifact.wasm.is_some() {
            let result = run_wasm(&artifact)?;
            println!("Program exited with {result}");
        } else {
            run_evaluator(&language, &source)?;
        }
    }

    Ok(())
}

/// A language by registry name, or straight from a definition file.
fn load_language(spec: &str, root: Option<&Path>) -> Result<Language> {
    let as_path = Path::new(spec);
    let config = if as_path.extension().is_some_and(|ext| ext == "json") || as_path.is_file() {
        LanguageConfig::load(as_path)
            .with_context(|| format!("failed to load language definition {spec}"))?
    } else {
        let root = root.map(Path::to_path_buf).unwrap_or_else(default_language_root);
        let registry = LanguageRegistry::load(&root)
            .with_context(|| format!("failed to load languages from {}", root.display()))?;
        registry.get(spec)?.clone()
    };
    Language::from_config(&config)
        .with_context(|| format!("language {} is not usable", config.name))
}

/// Print diagnostics for the grammar and, when given, the source.
/// Returns the number of errors.
fn check(language: &Language, source: &str) -> usize {
    let mut diagnostics: Vec<Diagnostic> = language.diagnostics().to_vec();
    let mut located = Vec::new();
    if !source.trim().is_empty() {
        match language.parse(source) {
            Ok(ast) => located.extend(language.type_diagnostics(&ast)),
            Err(error) => located.push(error.to_diagnostic()),
        }
    }
    for diagnostic in &diagnostics {
        println!("{}: {diagnostic}", language.name());
    }
    for diagnostic in &located {
        let (line, column) = line_col(source, diagnostic.span.start);
        println!("{line}:{column}: {diagnostic}");
    }
    diagnostics.extend(located);
    if diagnostics.is_empty() {
        println!("no problems found");
    }
    blocking(&diagnostics).len()
}

fn run_evaluator(language: &Language, source: &str) -> Result<()> {
    let execution = language.evaluate(source).context("program failed")?;
    for line in &execution.output {
        println!("{line}");
    }
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

fn run_wasm(artifact: &CompilationArtifact) -> Result<i32> {
    let bytes = artifact
        .wasm
        .as_deref()
        .context("artifact does not contain a wasm module")?;
    let engine = Engine::default();
    let module = Module::new(&engine, bytes).context("failed to compile wasm artifact")?;
    let mut linker = Linker::<()>::new(&engine);
    linker
        .func_wrap("env", "log_i32", |_: Caller<'_, ()>, value: i32| println!("{value}"))
        .context("failed to link env.log_i32")?;
    linker
        .func_wrap("env", "log_f64", |_: Caller<'_, ()>, value: f64| println!("{value}"))
        .context("failed to link env.log_f64")?;
    linker
        .func_wrap("math", "pow", |base: f64, exponent: f64| -> f64 { base.powf(exponent) })
        .context("failed to link math.pow")?;
    let mut store = Store::new(&engine, ());
    let instance = linker
        .instantiate_and_start(&mut store, &module)
        .context("failed to instantiate module")?;
    let main = instance
        .get_typed_func::<(), i32>(&store, "main")
        .context("exported main function missing or has wrong type")?;
    let result = main
        .call(&mut store, ())
        .context("failed to execute main")?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::tempdir;

    fn langforge() -> Command {
        Command::cargo_bin("langforge").expect("binary exists")
    }

    #[test]
    fn compiles_and_runs_wasm() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.mini");
        fs::write(&input_path, "x = 10; y = 20; z = x + y; print z;").expect("write input");
        let output_path = dir.path().join("out.wasm");

        langforge()
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--run")
            .assert()
            .success()
            .stdout(predicate::str::contains("30\nProgram exited with 30"));

        assert!(output_path.exists(), "wasm output was not created");
    }

    #[test]
    fn emits_llvm_ir() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.mini");
        fs::write(&input_path, "a = 2 * 3;").expect("write input");
        let output_path = dir.path().join("out.ll");

        langforge()
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--emit")
            .arg("llvm")
            .assert()
            .success();

        let ir = fs::read_to_string(&output_path).expect("read ir");
        assert!(ir.contains("define i32 @main"));
        assert!(ir.contains("mul i32 2, 3"));
    }

    #[test]
    fn runs_text_targets_with_the_evaluator() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.mini");
        fs::write(&input_path, "fn sq(n) { return n * n; } print sq(7);").expect("write input");
        let output_path = dir.path().join("nested/out.c");

        langforge()
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--emit")
            .arg("c")
            .arg("--run")
            .assert()
            .success()
            .stdout(predicate::str::contains("49"));

        let c = fs::read_to_string(&output_path).expect("read c");
        assert!(c.contains("int sq(int n);"));
    }

    #[test]
    fn accepts_language_definition_files() {
        let dir = tempdir().expect("tempdir");
        let language_path = dir.path().join("tiny.json");
        fs::write(
            &language_path,
            r#"{ "name": "tiny", "grammar": { "rules": {
                "program": "statement*", "statement": "IDENT '=' NUMBER ';'" } } }"#,
        )
        .expect("write language");
        let input_path = dir.path().join("input.tiny");
        fs::write(&input_path, "a = 1;").expect("write input");
        let output_path = dir.path().join("out.txt");

        langforge()
            .arg("--language")
            .arg(&language_path)
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--emit")
            .arg("ast")
            .assert()
            .success();

        let tree = fs::read_to_string(&output_path).expect("read tree");
        assert!(tree.contains("statement"));
    }

    #[test]
    fn check_reports_diagnostics() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.mini");
        fs::write(&input_path, "a = 1;\nb = c;").expect("write input");

        langforge()
            .arg("--check")
            .arg("--input")
            .arg(&input_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("2:5: warning[T0001]"));
    }

    #[test]
    fn check_fails_on_syntax_errors() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.mini");
        fs::write(&input_path, "a = ;").expect("write input");

        langforge()
            .arg("--check")
            .arg("--input")
            .arg(&input_path)
            .assert()
            .failure()
            .stdout(predicate::str::contains("error[S0001]"));
    }

    #[test]
    fn reports_unknown_language_and_format() {
        langforge()
            .arg("--language")
            .arg("cobol")
            .arg("--output")
            .arg("out")
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown language: cobol"));

        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.mini");
        fs::write(&input_path, "a = 1;").expect("write input");
        langforge()
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(dir.path().join("out"))
            .arg("--emit")
            .arg("jvm")
            .assert()
            .failure()
            .stderr(predicate::str::contains("unsupported emit format: jvm"));
    }

    #[test]
    fn reports_missing_languages_root() {
        let dir = tempdir().expect("tempdir");
        langforge()
            .arg("--languages-root")
            .arg(dir.path().join("missing"))
            .arg("--output")
            .arg(dir.path().join("out"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to load languages"));
    }
}
