//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("ephemera");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("describe"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("stop"));
}

#[test]
fn provision_requires_eula_acceptance() {
    let mut cmd = cargo_bin_cmd!("ephemera");
    cmd.args(["provision", "--kind", "paper"])
        .assert()
        .failure()
        .stdout("")
        .stderr(predicate::str::contains("EULA"));
}

#[test]
fn unknown_kind_is_rejected_before_provisioning() {
    let mut cmd = cargo_bin_cmd!("ephemera");
    cmd.args(["provision", "--accept-eula", "--kind", "bukkit"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bukkit"));
}

#[test]
fn reaper_without_credentials_exits_before_monitoring() {
    let mut cmd = cargo_bin_cmd!("ephemera-reaper");
    cmd.env_clear()
        .env("REAPER_CONTAINER", "minecraft")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"))
        .stderr(predicate::str::contains(
            "reaper stopped without terminating the instance",
        ));
}
