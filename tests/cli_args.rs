// Flag-surface checks. Everything here must fail (or print help) before any
// credential resolution, so no network is involved.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

fn rolecall() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("rolecall"))
}

#[test]
fn help_lists_the_flag_surface() {
    rolecall()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--rate-limit")
                .and(predicate::str::contains("--account-list"))
                .and(predicate::str::contains("--force"))
                .and(predicate::str::contains("--clean")),
        );
}

#[test]
fn rate_limit_zero_is_rejected() {
    rolecall()
        .args(["--rate-limit", "0", "--roles", "roles.list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("1..=1000"));
}

#[test]
fn rate_limit_above_cap_is_rejected() {
    rolecall()
        .args(["--rate-limit", "1001", "--roles", "roles.list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("1..=1000"));
}

#[test]
fn setup_and_clean_conflict() {
    rolecall()
        .args(["--setup", "--clean"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn scanning_without_roles_is_an_input_error() {
    rolecall()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--roles"));
}
