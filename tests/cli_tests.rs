//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the transport-agent binary
fn agent_cmd() -> Command {
    Command::cargo_bin("transport-agent").unwrap()
}

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    agent_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Transport Agent"))
        .stdout(predicate::str::contains("drive"))
        .stdout(predicate::str::contains("fare"))
        .stdout(predicate::str::contains("book"))
        .stdout(predicate::str::contains("track"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    agent_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("transport-agent"))
        .stdout(predicate::str::contains("Build Information"))
        .stdout(predicate::str::contains("Git Hash"))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_short_version_flag() {
    agent_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("transport-agent"));
}

// ─────────────────────────────────────────────────────────────────
// Config Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    agent_cmd()
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .stdout(predicate::str::contains("[agent]"))
        .stdout(predicate::str::contains("[endpoints]"))
        .stdout(predicate::str::contains("[driver]"))
        .stdout(predicate::str::contains("[logging]"));
}

#[test]
fn test_config_validate_default() {
    // Default config should always be valid
    agent_cmd()
        .arg("config")
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_nonexistent_file() {
    agent_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg("/nonexistent/path/config.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found").or(predicate::str::contains("Error")));
}

#[test]
fn test_config_init_help() {
    agent_cmd()
        .arg("config")
        .arg("init")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialize"))
        .stdout(predicate::str::contains("--path"))
        .stdout(predicate::str::contains("--force"));
}

// ─────────────────────────────────────────────────────────────────
// Command Argument Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_drive_help() {
    agent_cmd()
        .arg("drive")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("driver loop"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--auto-accept"));
}

#[test]
fn test_drive_with_invalid_config() {
    agent_cmd()
        .arg("drive")
        .arg("--config")
        .arg("/nonexistent/config.toml")
        .assert()
        .failure();
}

#[test]
fn test_fare_requires_both_points() {
    agent_cmd()
        .arg("fare")
        .arg("19.076,72.8777")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_fare_rejects_bad_coordinate() {
    agent_cmd()
        .arg("fare")
        .arg("not-a-point")
        .arg("19.08,72.88")
        .assert()
        .failure()
        .stderr(predicate::str::contains("lat,lng"));
}

#[test]
fn test_fare_rejects_out_of_range_latitude() {
    agent_cmd()
        .arg("fare")
        .arg("95.0,72.88")
        .arg("19.08,72.88")
        .assert()
        .failure()
        .stderr(predicate::str::contains("latitude"));
}

#[test]
fn test_track_requires_booking_id() {
    agent_cmd()
        .arg("track")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_track_rejects_non_numeric_booking_id() {
    agent_cmd()
        .arg("track")
        .arg("abc")
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────
// Verbosity Flag Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flag() {
    // -v should work without errors
    agent_cmd()
        .arg("-v")
        .arg("version")
        .assert()
        .success();
}

#[test]
fn test_very_verbose_flag() {
    // -vv should work without errors
    agent_cmd()
        .arg("-vv")
        .arg("version")
        .assert()
        .success();
}

#[test]
fn test_quiet_flag() {
    agent_cmd()
        .arg("--quiet")
        .arg("version")
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Error Handling Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_command() {
    agent_cmd()
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_subcommand() {
    // Running without any command should show help or error
    agent_cmd()
        .assert()
        .failure();
}
