//! CLI tests for `botloop init`, `validate` and `describe`.
//!
//! Spawns the botloop binary in a temp directory and checks exit codes and
//! output.

use std::fs;
use std::process::Command;

use botloop::exit_codes;
use botloop::io::config::{BotConfig, DEFAULT_CONFIG_FILE, load_config};

fn botloop(dir: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_botloop"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn botloop")
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let out = botloop(temp.path(), &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join(DEFAULT_CONFIG_FILE)).expect("load");
    assert_eq!(cfg, BotConfig::default());

    let again = botloop(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&again.stderr).contains("already exists"));

    let forced = botloop(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn validate_reports_bad_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("bot.toml");
    fs::write(&path, "[engine]\nidle_ms = 0\n").expect("write");

    let out = botloop(temp.path(), &["validate", "--config", "bot.toml"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("engine.idle_ms"));

    fs::write(&path, "[tapper]\ntarget = \"Tree\"\ntap_action = \"Chop\"\n").expect("write");
    let out = botloop(temp.path(), &["validate", "--config", "bot.toml"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
}

#[test]
fn describe_prints_phase_tables() {
    let temp = tempfile::tempdir().expect("tempdir");

    let out = botloop(temp.path(), &["describe", "tapper"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.starts_with("script tapper (recovery: cleanup)"));
    assert!(text.contains("[0] heal  trigger: flag=low_health"));
    assert!(text.contains("phase waiting  exits: [cleanup]  timeout: 30000ms -> cleanup"));
    assert!(text.contains("  [1] tap"));
}
