use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

fn demo(name: &str) -> String {
    format!("{}/../../demos/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn mosaic() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_mosaic"));
    command.env("RUST_LOG", "warn");
    command
}

#[test]
fn help_lists_subcommands() {
    let output = mosaic()
        .arg("--help")
        .output()
        .expect("failed to execute mosaic --help");
    assert!(output.status.success(), "--help should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("verify"));
    assert!(stdout.contains("graph"));
}

#[test]
fn safe_demo_exits_with_zero() {
    let output = mosaic()
        .arg("verify")
        .arg(demo("guarded_safe.json"))
        .output()
        .expect("failed to execute mosaic verify");
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("RESULT: SAFE"), "stdout: {stdout}");
    assert!(stdout.contains("Program: guarded-safe"));
}

#[test]
fn unsafe_demo_exits_with_one_and_prints_the_chain() {
    let output = mosaic()
        .arg("verify")
        .arg(demo("guarded_unsafe.json"))
        .output()
        .expect("failed to execute mosaic verify");
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("RESULT: UNSAFE"), "stdout: {stdout}");
    assert!(stdout.contains("blocks: init -> bump -> check"));
}

#[test]
fn loop_demo_is_safe() {
    let output = mosaic()
        .arg("verify")
        .arg(demo("counting_loop.json"))
        .output()
        .expect("failed to execute mosaic verify");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn truncated_path_search_exits_with_two() {
    let output = mosaic()
        .arg("verify")
        .arg(demo("self_loop_unknown.json"))
        .arg("--max-path-length")
        .arg("8")
        .output()
        .expect("failed to execute mosaic verify");
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("RESULT: UNKNOWN"), "stdout: {stdout}");
}

#[test]
fn json_format_is_machine_readable() {
    let output = mosaic()
        .args(["verify", "--format", "json"])
        .arg(demo("guarded_unsafe.json"))
        .output()
        .expect("failed to execute mosaic verify");
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(json["result"]["verdict"], "unsafe");
    assert_eq!(json["blocks"], 3);
}

#[test]
fn graph_command_prints_loop_predecessors() {
    let output = mosaic()
        .arg("graph")
        .arg(demo("counting_loop.json"))
        .output()
        .expect("failed to execute mosaic graph");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("block init (root): 0 -> 1"), "stdout: {stdout}");
    assert!(stdout.contains("loop predecessors: body"));
}

#[test]
fn malformed_model_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{{\"entry\": 0, \"blocks\": [").unwrap();
    let output = mosaic()
        .arg("verify")
        .arg(file.path())
        .output()
        .expect("failed to execute mosaic verify");
    assert!(!output.status.success());
    assert_ne!(output.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid program model"), "stderr: {stderr}");
}

#[test]
fn model_from_temp_file_is_verified() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"entry": 0, "error_locations": [9], "blocks": [
            {{"id": "main", "start": 0, "end": 1, "edges": [
                {{"from": 0, "to": 1, "op": {{"op": "assume", "var": "x", "cmp": "==", "value": 2}}}},
                {{"from": 0, "to": 9, "op": {{"op": "assume", "var": "x", "cmp": "<", "value": 0}}}}
            ]}}
        ]}}"#
    )
    .unwrap();
    let output = mosaic()
        .arg("verify")
        .arg(file.path())
        .output()
        .expect("failed to execute mosaic verify");
    assert_eq!(output.status.code(), Some(1));
}
