//! Sequencing of a full reconciliation run.
//!
//! A run moves the deployment towards its desired state in a fixed order:
//!
//! 1. take the run lock (a busy lock ends the run cleanly),
//! 2. create runtime directories and migrate legacy data,
//! 3. provision the runtime environment and dependencies,
//! 4. validate the entry file,
//! 5. install the unit definition,
//! 6. check credentials,
//! 7. enable, restart and verify the service.
//!
//! Failures in steps 2-5 and 7 abort the run with a [`StepFailure`]. Missing
//! credentials, an unusable token, a missing unit definition or a busy lock
//! end it early with a successful [`Outcome::SoftStop`].
use std::{fs, io, path::Path};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tracing::{error, info, warn};

use crate::config::DeploymentContext;
use crate::constants::{ADMIN_CHAT_KEY, TOKEN_KEY};
use crate::env_file::{EnvTable, TokenCheck, check_token};
use crate::error::{AtStep, FailureKind, Step, StepFailure};
use crate::lock::RunLock;
use crate::migrate::{self, MigrationRecord};
use crate::provision::{PackageInstaller, provision};
use crate::service::{ServiceController, ServiceManager, ServiceRuntimeState};
use crate::unit::{UnitInstall, install_unit};

/// Why a run stopped early without touching the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SoftStop {
    /// Another run held the lock for the whole bounded wait.
    LockBusy,
    /// No credential file exists.
    MissingCredentials,
    /// The token key is absent or empty.
    EmptyToken,
    /// The token is a shipped placeholder.
    PlaceholderToken,
    /// No unit definition was installed.
    UnitUnavailable,
}

/// Successful terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The service was restarted and observed active.
    Active,
    /// A precondition is not met yet; nothing was restarted.
    SoftStop(SoftStop),
}

/// Terminal status recorded in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has not finished.
    Pending,
    /// Service active.
    Active,
    /// Early successful exit.
    SoftStop {
        /// Unmet precondition.
        reason: SoftStop,
    },
    /// Fatal failure.
    Failed {
        /// Step that failed.
        step: Step,
        /// Failure taxonomy.
        kind: FailureKind,
        /// Error message.
        message: String,
    },
}

/// Summary of one run, persisted as JSON for operators.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal status.
    pub status: RunStatus,
    /// Per-file migration decisions.
    pub migrations: Vec<MigrationRecord>,
    /// SHA-256 of the installed unit definition.
    pub unit_digest: Option<String>,
    /// Service lifecycle states entered during the run.
    pub service_states: Vec<ServiceRuntimeState>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Pending,
            migrations: Vec::new(),
            unit_digest: None,
            service_states: Vec::new(),
        }
    }

    fn finish(&mut self, result: &Result<Outcome, StepFailure>) {
        self.finished_at = Some(Utc::now());
        self.status = match result {
            Ok(Outcome::Active) => RunStatus::Active,
            Ok(Outcome::SoftStop(reason)) => RunStatus::SoftStop { reason: *reason },
            Err(failure) => RunStatus::Failed {
                step: failure.step,
                kind: failure.kind(),
                message: failure.message(),
            },
        };
    }
}

/// Process exit status for the result of a run: zero for success and soft
/// stops, the failure kind's code otherwise.
pub fn exit_code(result: &Result<Outcome, StepFailure>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(failure) => failure.exit_code(),
    }
}

/// Sequences the reconciliation steps against a package installer and a
/// service manager.
pub struct Orchestrator<'a, P: PackageInstaller + ?Sized, M: ServiceManager + ?Sized> {
    ctx: &'a DeploymentContext,
    installer: &'a P,
    manager: &'a M,
    report: RunReport,
}

impl<'a, P: PackageInstaller + ?Sized, M: ServiceManager + ?Sized> Orchestrator<'a, P, M> {
    /// Orchestrator for one run over `ctx`.
    pub fn new(ctx: &'a DeploymentContext, installer: &'a P, manager: &'a M) -> Self {
        Self {
            ctx,
            installer,
            manager,
            report: RunReport::new(),
        }
    }

    /// Report of the run so far.
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Runs the reconciliation under the run lock and writes the report before
    /// releasing it. A run that never got the lock leaves the report alone.
    pub fn run(&mut self) -> Result<Outcome, StepFailure> {
        let acquired = RunLock::acquire(&self.ctx.lock_path, self.ctx.lock_timeout);
        let (result, lock) = match acquired.at(Step::AcquireLock) {
            Ok(Some(lock)) => (self.reconcile(), Some(lock)),
            Ok(None) => (Ok(self.soft_stop(SoftStop::LockBusy)), None),
            Err(failure) => (Err(failure), None),
        };

        match &result {
            Ok(Outcome::Active) => {
                info!("Deployment reconciled; {} is active", self.ctx.unit_name)
            }
            Ok(Outcome::SoftStop(_)) => {}
            Err(failure) => error!(
                step = %failure.step,
                kind = %failure.kind(),
                "Deployment failed: {}",
                failure.message()
            ),
        }

        self.report.finish(&result);
        // The holder of the lock owns the report.
        if lock.is_some() {
            self.write_report();
        }
        drop(lock);
        result
    }

    /// Runs every step without taking the lock.
    pub fn reconcile(&mut self) -> Result<Outcome, StepFailure> {
        let ctx = self.ctx;

        migrate::prepare_directories(ctx).at(Step::PrepareDirectories)?;
        self.report.migrations = migrate::migrate(ctx).at(Step::MigrateData)?;

        provision(self.installer, &ctx.env_dir, &ctx.manifest).at(Step::Provision)?;
        self.installer
            .validate_entry(&ctx.env_dir, &ctx.entry)
            .at(Step::ValidateSource)?;
        info!("{} compiles", ctx.entry.display());

        let unit = install_unit(ctx, self.manager).at(Step::InstallUnit)?;
        if let UnitInstall::Installed { digest, .. } = &unit {
            self.report.unit_digest = Some(digest.clone());
        }

        if let Some(reason) = self.check_credentials() {
            return Ok(self.soft_stop(reason));
        }

        if unit == UnitInstall::Unavailable {
            self.report.service_states = vec![ServiceRuntimeState::NotInstalled];
            return Ok(self.soft_stop(SoftStop::UnitUnavailable));
        }

        let mut controller = ServiceController::new(self.manager, &ctx.unit_name, ctx.tail_lines)
            .with_verify_delay(ctx.verify_delay);
        let result = controller.reconcile();
        self.report.service_states = controller.history().to_vec();
        result.at(Step::ControlService)?;

        Ok(Outcome::Active)
    }

    fn check_credentials(&self) -> Option<SoftStop> {
        let env_file = &self.ctx.env_file;
        let check = check_token(env_file, TOKEN_KEY);
        match &check {
            TokenCheck::Placeholder(value) => {
                warn!("{TOKEN_KEY} in {} is the placeholder '{value}'", env_file.display());
            }
            TokenCheck::Usable { well_formed } => {
                if !well_formed {
                    warn!("{TOKEN_KEY} does not look like a bot token; starting anyway");
                }
                let has_admin = EnvTable::load(env_file)
                    .map(|table| table.get(ADMIN_CHAT_KEY).is_some_and(|v| !v.is_empty()))
                    .unwrap_or(false);
                info!("Credentials present ({ADMIN_CHAT_KEY} set: {has_admin})");
            }
            TokenCheck::MissingFile | TokenCheck::Empty => {}
        }
        soft_stop_for(&check)
    }

    fn soft_stop(&self, reason: SoftStop) -> Outcome {
        info!("Skipped, waiting for input: {reason}");
        Outcome::SoftStop(reason)
    }

    fn write_report(&self) {
        let path = &self.ctx.report_path;
        if let Err(err) = write_atomically(path, &self.report) {
            warn!("Could not write run report {}: {err}", path.display());
        }
    }
}

/// Serializes `report` next to `path` and renames it into place, so readers
/// see either the previous report or the complete new one.
fn write_atomically(path: &Path, report: &RunReport) -> io::Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// Outcome of a [`TokenCheck`], as a soft-stop reason if any.
pub fn soft_stop_for(check: &TokenCheck) -> Option<SoftStop> {
    match check {
        TokenCheck::MissingFile => Some(SoftStop::MissingCredentials),
        TokenCheck::Empty => Some(SoftStop::EmptyToken),
        TokenCheck::Placeholder(_) => Some(SoftStop::PlaceholderToken),
        TokenCheck::Usable { .. } => None,
    }
}
