#[path = "common/mod.rs"]
mod common;

use std::{fs, os::unix::fs::PermissionsExt};

use botdeploy::{
    constants::{DIR_MODE, MIGRATION_TMP_PREFIX},
    migrate::{self, MigrationDecision},
};
use common::{Fixture, read};

fn decision_for(records: &[migrate::MigrationRecord], file: &str) -> MigrationDecision {
    records
        .iter()
        .find(|record| record.file == file)
        .map(|record| record.decision)
        .unwrap_or_else(|| panic!("no record for {file}"))
}

#[test]
fn repeated_migration_is_a_no_op() {
    let fixture = Fixture::new();
    fixture.write_app_file("orders.json", "{}");
    fixture.write_app_file("bonuses.json", "{\"7\": 50}");
    let ctx = fixture.context();

    migrate::prepare_directories(&ctx).unwrap();
    let first = migrate::migrate(&ctx).unwrap();
    let second = migrate::migrate(&ctx).unwrap();

    assert_eq!(decision_for(&first, "orders.json"), MigrationDecision::Migrate);
    assert_eq!(decision_for(&first, "bonuses.json"), MigrationDecision::Migrate);
    assert_eq!(
        decision_for(&second, "orders.json"),
        MigrationDecision::SkipAlreadyPresent
    );
    assert_eq!(
        decision_for(&second, "referrals.json"),
        MigrationDecision::SkipSourceAbsent
    );
    assert_eq!(read(&fixture.data_file("bonuses.json")), "{\"7\": 50}");
}

#[test]
fn existing_data_file_is_never_overwritten() {
    let fixture = Fixture::new();
    let ctx = fixture.context();
    migrate::prepare_directories(&ctx).unwrap();
    fs::write(fixture.data_file("prices.json"), "{\"current\": true}").unwrap();
    fixture.write_app_file("prices.json", "{\"current\": false}");

    let records = migrate::migrate(&ctx).unwrap();

    assert_eq!(
        decision_for(&records, "prices.json"),
        MigrationDecision::SkipAlreadyPresent
    );
    assert_eq!(read(&fixture.data_file("prices.json")), "{\"current\": true}");
    assert_eq!(read(&fixture.app.join("prices.json")), "{\"current\": false}");
}

#[test]
fn plan_matches_what_migrate_does_and_changes_nothing() {
    let fixture = Fixture::new();
    fixture.write_app_file("user_logs.json", "[]");
    fixture.write_app_file("orders.xlsx", "binary");
    let ctx = fixture.context();
    migrate::prepare_directories(&ctx).unwrap();

    let planned = migrate::plan(&ctx);
    assert!(fixture.app.join("user_logs.json").exists());
    let done = migrate::migrate(&ctx).unwrap();

    let decisions = |records: &[migrate::MigrationRecord]| {
        records.iter().map(|r| r.decision).collect::<Vec<_>>()
    };
    assert_eq!(decisions(&planned), decisions(&done));
    assert!(fixture.data_file("orders.xlsx").is_file());
}

#[test]
fn directories_are_created_with_expected_mode_and_no_staging_left() {
    let fixture = Fixture::new();
    fixture.write_app_file("settings.json", "{}");
    let ctx = fixture.context();

    migrate::prepare_directories(&ctx).unwrap();
    migrate::migrate(&ctx).unwrap();

    for dir in [&ctx.data_dir, &ctx.log_dir] {
        let mode = fs::metadata(dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, DIR_MODE);
    }
    for runtime in &ctx.runtime_dirs {
        assert!(runtime.is_dir(), "{} missing", runtime.display());
    }
    let leftovers = fs::read_dir(&ctx.data_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(MIGRATION_TMP_PREFIX)
        })
        .count();
    assert_eq!(leftovers, 0);
}
