#[path = "common/mod.rs"]
mod common;

use std::fs;

use assert_cmd::Command;
use common::{Fixture, read, serial};
use predicates::prelude::*;
use tempfile::tempdir;

fn botdeploy(fixture: &Fixture) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("botdeploy"));
    cmd.current_dir(&fixture.root)
        .arg("--config")
        .arg(fixture.config_path())
        .env("RUST_LOG", "info");
    cmd
}

#[test]
fn missing_app_dir_exits_with_environment_code() {
    let temp = tempdir().expect("failed to create tempdir");

    Command::new(assert_cmd::cargo::cargo_bin!("botdeploy"))
        .current_dir(temp.path())
        .arg("run")
        .arg("--app-dir")
        .arg(temp.path().join("nowhere"))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Application directory not found"));
}

#[test]
fn plan_reports_pending_migrations_and_credentials() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_app_file("orders.json", "{}");
    fixture.write_env("TELEGRAM_BOT_TOKEN=REPLACE_ME\n");

    botdeploy(&fixture)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("orders.json"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("Credentials: not ready (placeholder_token)"));

    assert!(fixture.app.join("orders.json").exists());
    assert!(!fixture.app.join("data").exists());
}

#[test]
fn run_end_to_end_with_fake_tools() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_valid_env();
    fixture.write_app_file("orders.json", "{\"1\": []}");

    botdeploy(&fixture)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("bot.service is active"));

    assert_eq!(read(&fixture.data_file("orders.json")), "{\"1\": []}");
    assert!(fixture.called("systemctl restart bot.service"));

    let deploy_log = read(&fixture.app.join("logs").join("deploy.log"));
    assert!(deploy_log.contains("Migrated"));
    assert!(deploy_log.contains("ready: 1 migrated, 0 already present, 9 absent"));
    assert!(!deploy_log.contains("\u{1b}["), "file log must not carry ANSI codes");
}

#[test]
fn run_with_nothing_to_migrate_still_logs_the_data_step() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_valid_env();

    botdeploy(&fixture).arg("run").assert().success();

    let deploy_log = read(&fixture.app.join("logs").join("deploy.log"));
    assert!(deploy_log.contains("ready: 0 migrated, 0 already present, 10 absent"));
}

#[test]
fn run_with_placeholder_token_exits_zero_without_restart() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_env("TELEGRAM_BOT_TOKEN=PASTE_TELEGRAM_BOT_TOKEN_HERE\n");

    botdeploy(&fixture)
        .arg("run")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Skipped, waiting for input"));

    assert!(!fixture.called("systemctl restart"));
}

#[test]
fn run_with_failing_restart_exits_with_service_code() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_env("TELEGRAM_BOT_TOKEN=abc123\n");
    fixture.fail("fail_restart");

    botdeploy(&fixture)
        .arg("run")
        .assert()
        .code(4)
        .stdout(predicate::str::contains("InvalidToken"));
}

#[test]
fn migrate_command_moves_files_only() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_app_file("feedbacks.json", "[]");

    botdeploy(&fixture).arg("migrate").assert().success();

    assert!(fixture.data_file("feedbacks.json").is_file());
    assert!(fixture.calls().is_empty());
}

#[test]
fn logs_shows_tail_of_deploy_log() {
    let _serial = serial();
    let fixture = Fixture::new();
    let log_dir = fixture.app.join("logs");
    fs::create_dir_all(&log_dir).unwrap();
    let content: String = (1..=30).map(|n| format!("entry {n}\n")).collect();
    fs::write(log_dir.join("deploy.log"), content).unwrap();

    botdeploy(&fixture)
        .args(["logs", "--lines", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entry 28\nentry 29\nentry 30"))
        .stdout(predicate::str::contains("entry 27").not());
}

#[test]
fn render_unit_uses_configured_paths() {
    let _serial = serial();
    let fixture = Fixture::new();

    botdeploy(&fixture)
        .arg("render-unit")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "WorkingDirectory={}",
            fixture.app.display()
        )))
        .stdout(predicate::str::contains("Restart=always"));
}

#[test]
fn status_prints_state_and_journal_tail() {
    let _serial = serial();
    let fixture = Fixture::new();

    botdeploy(&fixture)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("bot.service: active"))
        .stdout(predicate::str::contains("Traceback (most recent call last):"));

    assert!(fixture.called("journalctl -u bot.service -n 20 --no-pager"));
}
