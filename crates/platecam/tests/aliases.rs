//! The launch script sourced by operators on the appliance.

use std::path::PathBuf;
use std::process::Command;

fn script() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../scripts/aliases.sh")
}

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap()
}

/// Source the script in `shell` from a foreign directory, then run `then`.
fn source_with(shell: &str, then: &str) -> Option<String> {
    let setup = if shell == "bash" {
        "shopt -s expand_aliases; "
    } else {
        ""
    };
    let output = Command::new(shell)
        .current_dir(std::env::temp_dir())
        .arg("-c")
        .arg(format!("{setup}. \"{}\"; {then}", script().display()))
        .output()
        .ok()?;
    assert!(output.status.success(), "sourcing the script in {shell} failed");
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn source_and(then: &str) -> Option<String> {
    source_with("bash", then)
}

#[test]
fn sourcing_prints_two_lines() {
    let Some(stdout) = source_and("true") else {
        return; // no bash on this machine
    };
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        [
            "platecam aliases loaded.",
            "Type 'run' to start the camera stream (Ctrl-C to stop)",
        ]
    );
}

#[test]
fn sourcing_defines_run_alias() {
    let Some(stdout) = source_and("alias run") else {
        return;
    };
    let definition = stdout.lines().last().unwrap_or_default();
    assert!(definition.starts_with("alias run="));
    assert!(definition.contains("platecam -- run"));
    assert!(definition.contains("cd "));
}

#[test]
fn alias_changes_to_repo_root() {
    let Some(stdout) = source_and("alias run") else {
        return;
    };
    let root = repo_root();
    assert!(stdout.contains(&format!("cd \"{}\"", root.display())));
}

#[test]
fn zsh_resolves_repo_root() {
    let Some(stdout) = source_with("zsh", "print -r -- $PLATECAM_ROOT") else {
        return; // no zsh on this machine
    };
    let reported = stdout.lines().last().unwrap_or_default();
    assert_eq!(PathBuf::from(reported), repo_root());
}
