use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

fn tosca(args: &[&str], program: Option<&str>) -> (String, String, bool) {
    let mut file = NamedTempFile::new().unwrap();
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tosca"));
    cmd.args(args);
    if let Some(source) = program {
        file.write_all(source.as_bytes()).unwrap();
        cmd.arg(file.path());
    }
    let output = cmd.output().expect("failed to execute tosca");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn assert_success(args: &[&str], program: Option<&str>) -> String {
    let (stdout, stderr, success) = tosca(args, program);
    assert!(success, "command should succeed, stderr:\n{}", stderr);
    stdout
}

const HELLO: &str = r#"
[[class]]
name = "Hello"

[[class.method]]
name = "helper"
descriptor = "()I"
flags = ["static"]
code = """
    bipush 42
    ireturn
"""

[[class.method]]
name = "main"
descriptor = "()Ljava/lang/String;"
flags = ["static"]
code = """
    ldc "hello"
    areturn
"""

[[class.method]]
name = "answer"
descriptor = "()I"
flags = ["static"]
code = """
    invokestatic Hello.helper()I
    ireturn
"""

[[class.method]]
name = "fail"
descriptor = "()I"
flags = ["static"]
code = """
    iconst_1
    iconst_0
    idiv
    ireturn
"""
"#;

#[test]
fn test_run_default_entry() {
    let stdout = assert_success(&["run"], Some(HELLO));
    assert_eq!(stdout, "\"hello\"\n");
}

#[test]
fn test_run_named_entry() {
    let stdout = assert_success(&["run", "--entry", "Hello.answer()I"], Some(HELLO));
    assert_eq!(stdout, "42\n");

    let stdout = assert_success(&["run", "--entry", "Hello.answer()I", "--compressed-oops", "heap-based"], Some(HELLO));
    assert_eq!(stdout, "42\n");
}

#[test]
fn test_run_reports_exceptions() {
    let (_, stderr, success) = tosca(&["run", "--entry", "Hello.fail()I"], Some(HELLO));
    assert!(!success);
    assert!(stderr.contains("exception java/lang/ArithmeticException: / by zero"), "stderr:\n{}", stderr);
}

#[test]
fn test_run_json() {
    let stdout = assert_success(&["run", "--json", "--entry", "Hello.answer()I"], Some(HELLO));
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["entry"], "Hello.answer()I");
    assert_eq!(json["result"]["type"], "int");
    assert_eq!(json["result"]["value"], 42);
    assert!(json["instructions"].as_u64().unwrap() > 0);

    let stdout = assert_success(&["run", "--json"], Some(HELLO));
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["string"], "hello");
}

#[test]
fn test_run_json_exception() {
    let (stdout, _, success) = tosca(&["run", "--json", "--entry", "Hello.fail()I"], Some(HELLO));
    assert!(!success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["exception"]["class"], "java/lang/ArithmeticException");
    assert_eq!(json["exception"]["message"], "/ by zero");
}

#[test]
fn test_run_trace() {
    let (stdout, stderr, success) = tosca(&["run", "--trace", "--no-rewrite", "--entry", "Hello.answer()I"], Some(HELLO));
    assert!(success);
    assert_eq!(stdout, "42\n");
    assert!(stderr.contains("Hello.answer()I @0 invokestatic [vtos] depth=0"), "stderr:\n{}", stderr);
    assert!(stderr.contains("Hello.helper()I @0 bipush [vtos] depth=0"), "stderr:\n{}", stderr);
}

#[test]
fn test_run_unknown_entry() {
    let (_, stderr, success) = tosca(&["run", "--entry", "Hello.nothing()V"], Some(HELLO));
    assert!(!success);
    assert!(stderr.starts_with("error:"), "stderr:\n{}", stderr);
}

#[test]
fn test_check() {
    let stdout = assert_success(&["check"], Some(HELLO));
    assert!(stdout.contains(": 1 classes,"), "stdout:\n{}", stdout);
}

#[test]
fn test_check_rejects_bad_assembly() {
    let source = r#"
[[class]]
name = "Bad"

[[class.method]]
name = "f"
descriptor = "()V"
flags = ["static"]
code = "frobnicate"
"#;
    let (_, stderr, success) = tosca(&["check"], Some(source));
    assert!(!success);
    assert!(stderr.starts_with("error:"), "stderr:\n{}", stderr);
}

#[test]
fn test_dump_one_template() {
    let stdout = assert_success(&["dump", "--bytecode", "iadd"], None);
    let first = stdout.lines().next().unwrap();
    assert!(first.starts_with("iadd [itos -> itos]"), "{}", first);
    assert!(stdout.lines().count() > 1);
}

#[test]
fn test_dump_unknown_bytecode() {
    let (_, stderr, success) = tosca(&["dump", "--bytecode", "nonsense"], None);
    assert!(!success);
    assert!(stderr.contains("unknown bytecode `nonsense`"));
}
