//! CLI integration tests

use std::process::Command;

fn vopt(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "vopt-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = vopt(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Volume Optimizer"), "Should show app name");
    assert!(stdout.contains("analyze"), "Should show analyze command");
    assert!(stdout.contains("execute"), "Should show execute command");
    assert!(stdout.contains("cost"), "Should show cost command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = vopt(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("vopt"), "Should show binary name");
}

/// Test execute subcommand help lists the action kinds
#[test]
fn test_execute_help() {
    let output = vopt(&["execute", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Execute help should succeed");
    assert!(stdout.contains("snapshot-and-delete"));
    assert!(stdout.contains("change-type-and-resize"));
    assert!(stdout.contains("--target-size"));
}

/// Test cost subcommand requires a size
#[test]
fn test_cost_requires_size() {
    let output = vopt(&["cost", "--class", "gp3"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Missing --size should fail");
    assert!(stderr.contains("--size"));
}

/// Test invalid action is rejected before any request is made
#[test]
fn test_execute_rejects_unknown_action() {
    let output = vopt(&["execute", "vol-1", "shred"]);

    assert!(!output.status.success(), "Unknown action should fail");
}
