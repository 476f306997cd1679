#[path = "common/mod.rs"]
mod common;

use std::fs;

use botdeploy::{
    error::{DeployError, FailureKind, Step},
    orchestrator::{Orchestrator, Outcome, SoftStop, exit_code},
    service::{ServiceAction, ServiceRuntimeState},
};
use common::{Fixture, read, serial};

#[test]
fn placeholder_token_stops_before_restart() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_env("TELEGRAM_BOT_TOKEN=PASTE_TELEGRAM_BOT_TOKEN_HERE\n");
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let result = Orchestrator::new(&ctx, &installer, &manager).run();

    assert_eq!(exit_code(&result), 0);
    assert_eq!(result.unwrap(), Outcome::SoftStop(SoftStop::PlaceholderToken));
    // Everything up to the unit install still happens.
    assert!(fixture.units.join("bot.service").is_file());
    assert!(fixture.called("systemctl daemon-reload"));
    assert!(!fixture.called("systemctl restart"));
    assert!(!fixture.called("systemctl enable"));
}

#[test]
fn missing_credential_file_is_a_soft_stop() {
    let _serial = serial();
    let fixture = Fixture::new();
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let result = Orchestrator::new(&ctx, &installer, &manager).run();

    assert_eq!(result.unwrap(), Outcome::SoftStop(SoftStop::MissingCredentials));
    assert!(!fixture.called("systemctl restart"));
}

#[test]
fn empty_token_is_a_soft_stop() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_env("# filled in by the operator\nTELEGRAM_BOT_TOKEN=\"\"\n");
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let result = Orchestrator::new(&ctx, &installer, &manager).run();

    assert_eq!(result.unwrap(), Outcome::SoftStop(SoftStop::EmptyToken));
}

#[test]
fn restart_failure_reports_diagnostics() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_env("TELEGRAM_BOT_TOKEN=abc123\n");
    fixture.fail("fail_restart");
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let mut orchestrator = Orchestrator::new(&ctx, &installer, &manager);
    let result = orchestrator.run();

    assert_eq!(exit_code(&result), FailureKind::ServiceManager.exit_code());
    let failure = result.unwrap_err();
    assert_eq!(failure.step, Step::ControlService);
    match failure.error {
        DeployError::Service {
            action,
            diagnostics,
            ..
        } => {
            assert_eq!(action, ServiceAction::Restart);
            assert!(diagnostics.summary.contains("Active: failed"));
            assert!(
                diagnostics
                    .journal
                    .iter()
                    .any(|line| line.contains("InvalidToken"))
            );
        }
        other => panic!("expected a service failure, got {other:?}"),
    }
    assert!(fixture.called("journalctl -u bot.service -n 20 --no-pager"));
    assert_eq!(
        orchestrator.report().service_states.last(),
        Some(&ServiceRuntimeState::Failed)
    );
}

#[test]
fn missing_unit_source_skips_service_control() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_valid_env();
    fixture.remove_unit_source();
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let result = Orchestrator::new(&ctx, &installer, &manager).run();

    assert_eq!(result.unwrap(), Outcome::SoftStop(SoftStop::UnitUnavailable));
    assert!(!fixture.units.join("bot.service").exists());
    assert!(!fixture.called("systemctl"));
}

#[test]
fn happy_path_migrates_installs_and_starts() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_valid_env();
    fixture.write_app_file("orders.json", "{\"42\": [{\"id\": 1}]}");
    fixture.write_app_file("prices.json", "{\"essay\": 1000}");
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let mut orchestrator = Orchestrator::new(&ctx, &installer, &manager);
    let result = orchestrator.run();

    assert_eq!(result.unwrap(), Outcome::Active);
    assert_eq!(read(&fixture.data_file("orders.json")), "{\"42\": [{\"id\": 1}]}");
    assert_eq!(read(&fixture.data_file("prices.json")), "{\"essay\": 1000}");
    assert!(!fixture.app.join("orders.json").exists());
    assert!(!fixture.app.join("prices.json").exists());
    assert!(fixture.app.join("clients").join("feedbacks").is_dir());

    let unit = fixture.units.join("bot.service");
    assert_eq!(read(&unit), read(&fixture.app.join("bot.service")));

    let calls = fixture.calls();
    let position = |prefix: &str| {
        calls
            .iter()
            .position(|line| line.starts_with(prefix))
            .unwrap_or_else(|| panic!("{prefix} never called: {calls:?}"))
    };
    assert!(position("python3 -m venv") < position("pip install --upgrade -r"));
    assert!(position("pip install --upgrade -r") < position("python -m py_compile"));
    assert!(position("python -m py_compile") < position("systemctl daemon-reload"));
    assert!(position("systemctl daemon-reload") < position("systemctl enable bot.service"));
    assert!(position("systemctl enable") < position("systemctl restart bot.service"));
    assert!(position("systemctl restart") < position("systemctl is-active bot.service"));

    let report = read(&ctx.report_path);
    assert!(report.contains("\"status\": \"active\""));
    assert!(report.contains("\"unit_digest\""));
    assert_eq!(
        orchestrator.report().service_states.last(),
        Some(&ServiceRuntimeState::Active)
    );
}

#[test]
fn second_run_reuses_environment_and_keeps_data() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_valid_env();
    fixture.write_app_file("users.json", "[1]");
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    Orchestrator::new(&ctx, &installer, &manager).run().unwrap();
    fs::write(fixture.data_file("users.json"), "[1, 2]").unwrap();
    fixture.write_app_file("users.json", "[stale]");
    let result = Orchestrator::new(&ctx, &installer, &manager).run();

    assert_eq!(result.unwrap(), Outcome::Active);
    assert_eq!(read(&fixture.data_file("users.json")), "[1, 2]");
    assert_eq!(read(&fixture.app.join("users.json")), "[stale]");
    let venvs = fixture
        .calls()
        .iter()
        .filter(|line| line.starts_with("python3 -m venv"))
        .count();
    assert_eq!(venvs, 1);
}

#[test]
fn dependency_failure_aborts_before_unit_is_touched() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_valid_env();
    fixture.fail("fail_pip");
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let result = Orchestrator::new(&ctx, &installer, &manager).run();

    assert_eq!(exit_code(&result), FailureKind::Provisioning.exit_code());
    let failure = result.unwrap_err();
    assert_eq!(failure.step, Step::Provision);
    assert!(failure.message().contains("No matching distribution"));
    assert!(!fixture.units.join("bot.service").exists());
    assert!(!fixture.called("systemctl"));
}

#[test]
fn compile_failure_aborts_before_unit_is_touched() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_valid_env();
    fixture.fail("fail_compile");
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let result = Orchestrator::new(&ctx, &installer, &manager).run();

    let failure = result.unwrap_err();
    assert_eq!(failure.step, Step::ValidateSource);
    assert!(!fixture.called("systemctl"));
    assert!(read(&ctx.report_path).contains("\"kind\": \"provisioning\""));
}

#[test]
fn missing_manifest_is_fatal() {
    let _serial = serial();
    let fixture = Fixture::new();
    fixture.write_valid_env();
    fs::remove_file(fixture.app.join("requirements.txt")).unwrap();
    let ctx = fixture.context();
    let (installer, manager) = (fixture.installer(&ctx), fixture.manager(&ctx));

    let failure = Orchestrator::new(&ctx, &installer, &manager)
        .run()
        .unwrap_err();

    assert_eq!(failure.step, Step::Provision);
    assert!(matches!(failure.error, DeployError::ManifestMissing(_)));
}
