// CLI integration tests for the exit-code contract of the smoke binary.
use std::process::Command;

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_llama-smoke");
    Command::new(exe)
}

#[test]
fn default_invocation_fails_cleanly_without_libraries() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd().current_dir(temp.path()).output().expect("run");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_modules_exit_with_open_failure_and_name_the_module() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd()
        .current_dir(temp.path())
        .args([
            "--runtime-lib",
            "no-such-runtime",
            "--backend-lib",
            "no-such-backend",
        ])
        .output()
        .expect("run");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no-such-runtime"));
}

#[test]
fn stage_banner_appears_before_the_first_stage() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd().current_dir(temp.path()).output().expect("run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("b5028"));
}

#[test]
fn errors_on_pipes_are_json_envelopes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd()
        .current_dir(temp.path())
        .arg("--json")
        .output()
        .expect("run");

    assert_eq!(output.status.code(), Some(1));
    // Marker lines are suppressed in --json mode and no report is produced
    // on failure.
    assert!(output.stdout.is_empty());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr
        .lines()
        .rev()
        .find(|line| line.starts_with('{'))
        .expect("json error line");
    let value: Value = serde_json::from_str(line).expect("valid json");
    let error = value.get("error").expect("error envelope");
    assert_eq!(error.get("kind").and_then(Value::as_str), Some("ModuleOpen"));
    assert!(error.get("message").is_some());
    assert!(error.get("hint").is_some());
}

#[test]
fn help_and_version_exit_zero() {
    let help = cmd().arg("--help").output().expect("help");
    assert!(help.status.success());
    let stdout = String::from_utf8_lossy(&help.stdout);
    assert!(stdout.contains("--runtime-lib"));
    assert!(stdout.contains("--backend-lib"));
    assert!(stdout.contains("--model"));

    let version = cmd().arg("--version").output().expect("version");
    assert!(version.status.success());
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let output = cmd()
        .arg("--definitely-not-a-flag")
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
}

// Drives a real dlopen success followed by a symbol-binding failure: the C
// library is a valid shared object but exports none of the pinned entry
// points.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[test]
fn foreign_module_fails_at_symbol_binding() {
    let candidates = [
        "/lib/x86_64-linux-gnu/libc.so.6",
        "/lib/aarch64-linux-gnu/libc.so.6",
        "/lib64/libc.so.6",
        "/usr/lib64/libc.so.6",
    ];
    let Some(libc_path) = candidates
        .iter()
        .copied()
        .find(|path| std::path::Path::new(path).exists())
    else {
        return;
    };

    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd()
        .current_dir(temp.path())
        .args(["--runtime-lib", libc_path, "--backend-lib", libc_path])
        .output()
        .expect("run");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("llama_log_set"));
}
