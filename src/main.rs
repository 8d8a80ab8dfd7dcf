//! Purpose: `llama-smoke` CLI entry point.
//! Role: Binary crate root; parses args, runs the smoke pipeline, maps errors to exit codes.
//! Invariants: Stage markers and the JSON report go to stdout; diagnostics go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};

use clap::Parser;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use llama_smoke::core::error::{Error, ErrorKind, to_exit_code};
use llama_smoke::core::pipeline::{self, RunReport, SmokeConfig};
use llama_smoke::core::runtime::OsRuntime;
use llama_smoke::core::symbols;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

#[derive(Parser)]
#[command(
    name = "llama-smoke",
    version,
    about = "ABI smoke test for a prebuilt llama.cpp runtime and its ggml companion",
    long_about = r#"Opens the prebuilt runtime/backend module pair, binds the pinned b5028
entry points, initializes the runtime, and load-tests a model artifact inside
an access-violation guard.

Exit codes: 0 ok, 1 module open failed, 2 entry point missing, 3 empty load
result, 4 access violation during load."#,
    after_help = r#"EXAMPLES
  $ llama-smoke
  $ llama-smoke --model ./models/tiny.gguf
  $ llama-smoke --runtime-lib ./build/libllama.so --backend-lib ./build/libggml.so
  $ llama-smoke --json | jq .outcome

NOTES
  - Module refs without a path separator use the platform naming convention
    (libllama.so / llama.dll / libllama.dylib) and are tried in the working
    directory before the loader search path.
  - Set RUST_LOG=debug (or RUST_LOG=llama=debug for library output only) for
    verbose diagnostics on stderr."#
)]
struct Cli {
    #[arg(
        long,
        default_value = pipeline::DEFAULT_MODEL_PATH,
        help = "Model artifact to load-test"
    )]
    model: String,
    #[arg(
        long,
        default_value = symbols::RUNTIME_MODULE,
        help = "Runtime module ref (bare name or path)"
    )]
    runtime_lib: String,
    #[arg(
        long,
        default_value = symbols::BACKEND_MODULE,
        help = "Backend-loader module ref (bare name or path)"
    )]
    backend_lib: String,
    #[arg(long, help = "Emit a JSON run report on stdout instead of stage markers")]
    json: bool,
}

fn run() -> Result<RunOutcome, Error> {
    let cli = Cli::parse();

    init_tracing();

    let config = SmokeConfig {
        runtime_ref: cli.runtime_lib,
        backend_ref: cli.backend_lib,
        model_path: cli.model,
    };

    let report = pipeline::run_smoke(&OsRuntime, &config, !cli.json)
        .map_err(add_module_open_hint)
        .map_err(add_symbol_hint)
        .map_err(add_empty_load_hint)
        .map_err(add_load_fault_hint)?;

    if cli.json {
        emit_report(&report);
    }

    Ok(RunOutcome::ok())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_report(report: &RunReport) {
    let json = serde_json::to_string_pretty(report)
        .unwrap_or_else(|_| "{\"outcome\":\"report encode failed\"}".to_string());
    println!("{json}");
}

fn add_module_open_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::ModuleOpen || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Place the runtime/backend libraries next to the binary or on the loader search path (LD_LIBRARY_PATH / PATH).",
    )
}

fn add_symbol_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::SymbolMissing || err.hint().is_some() {
        return err;
    }
    err.with_hint(format!(
        "The library does not export the pinned {} ABI. Point the harness at a {} build.",
        pipeline::PINNED_BUILD,
        pipeline::PINNED_BUILD
    ))
}

fn add_empty_load_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::EmptyLoad || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Check that the model file exists and is a valid GGUF artifact; the library reports a missing file and a corrupt one the same way.",
    )
}

fn add_load_fault_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::LoadFault || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "The library crashed while reading the artifact. This usually means the build does not match the pinned ABI.",
    )
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value)
        .unwrap_or_else(|_| "{\"error\":{\"message\":\"json encode failed\"}}".to_string());
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::ModuleOpen => "module open failed".to_string(),
        ErrorKind::SymbolMissing => "entry point missing".to_string(),
        ErrorKind::EmptyLoad => "model load returned an empty result".to_string(),
        ErrorKind::LoadFault => "access violation during model load".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(module) = err.module() {
        inner.insert("module".to_string(), json!(module));
    }
    if let Some(symbol) = err.symbol() {
        inner.insert("symbol".to_string(), json!(symbol));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = Vec::new();
    lines.push(format!("error: {}", error_message(err)));

    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(module) = err.module() {
        lines.push(format!("module: {module}"));
    }
    if let Some(symbol) = err.symbol() {
        lines.push(format!("symbol: {symbol}"));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!("caused by: {cause}"));
    }

    lines.join("\n")
}
