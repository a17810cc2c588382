//! The runner binary on its own: arguments in, one JSON line out

use pybox_core::{ExecutionResult, protocol};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const RUNNER: &str = env!("CARGO_BIN_EXE_pybox-runner");

fn run_source(source: &str) -> (TempDir, Output) {
    let dir = tempfile::tempdir().unwrap();
    let code = dir.path().join("main.py");
    fs::write(&code, source).unwrap();
    let output = runner(&code, &dir.path().join("workspace"));
    (dir, output)
}

fn runner(code: &Path, workdir: &Path) -> Output {
    Command::new(RUNNER)
        .arg(code)
        .args(["--time-limit", "5", "--memory-limit", "268435456", "--workdir"])
        .arg(workdir)
        .output()
        .unwrap()
}

fn decode(output: &Output) -> ExecutionResult {
    assert!(
        output.status.success(),
        "runner failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    protocol::decode_line(&output.stdout).unwrap()
}

#[test]
fn prints_one_result_line() {
    let (_dir, output) = run_source("print('hi')");
    let stdout = String::from_utf8(output.stdout.clone()).unwrap();
    assert_eq!(stdout.lines().count(), 1, "{stdout}");

    let value: serde_json::Value = serde_json::from_str(stdout.trim_end()).unwrap();
    assert_eq!(
        value,
        serde_json::json!({"success": true, "stdout": "hi\n", "stderr": "", "error": null})
    );
}

#[test]
fn nonzero_exit_request_still_exits_cleanly() {
    let (_dir, output) = run_source("import sys\nsys.exit(3)");
    let result = decode(&output);
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("SystemExit: 3"));
}

#[test]
fn raw_descriptor_writes_do_not_reach_the_protocol() {
    let (_dir, output) = run_source("import os\nos.write(1, b'junk\\n')\nprint('ok')");
    let result = decode(&output);
    assert!(result.success);
    assert_eq!(result.stdout, "ok\n");
}

#[test]
fn runs_inside_the_workdir() {
    let (dir, output) = run_source("import os\nprint(os.getcwd())\nopen('out.txt', 'w').write('x')");
    let result = decode(&output);

    let workdir = fs::canonicalize(dir.path().join("workspace")).unwrap();
    assert_eq!(result.stdout.trim_end(), workdir.to_str().unwrap());
    assert!(workdir.join("out.txt").is_file());
}

#[test]
fn third_party_packages_are_not_importable_paths() {
    let (_dir, output) = run_source(
        "import sys\nprint(any('site-packages' in p or 'dist-packages' in p for p in sys.path))",
    );
    let result = decode(&output);
    assert_eq!(result.stdout, "False\n");
}

#[test]
fn missing_code_file_is_a_malfunction() {
    let dir = tempfile::tempdir().unwrap();
    let output = runner(&dir.path().join("absent.py"), dir.path());

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("absent.py"), "{stderr}");
}
