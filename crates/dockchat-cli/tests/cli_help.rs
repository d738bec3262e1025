use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("dockchat")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ask"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_ask_help_shows_flags() {
    cargo_bin_cmd!("dockchat")
        .args(["ask", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-feedback"))
        .stdout(predicate::str::contains("--width"));
}

#[test]
fn test_history_help_shows_subcommands() {
    cargo_bin_cmd!("dockchat")
        .args(["history", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("show"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("dockchat")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.3"));
}

#[test]
fn test_ask_requires_question() {
    cargo_bin_cmd!("dockchat")
        .arg("ask")
        .assert()
        .failure()
        .stderr(predicate::str::contains("QUESTION"));
}
