//! Service manager abstraction and the lifecycle controller for the managed unit.
use std::{
    fs::{self, File},
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::Duration,
};

use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, error, info};

use crate::constants::UNIT_FILE_MODE;
use crate::error::DeployError;
use crate::process::{capture, run_checked, stdout_lines};

/// Activity reported by the service manager for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Display, AsRefStr, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActiveState {
    /// Running.
    Active,
    /// Loaded but not running.
    Inactive,
    /// Starting up.
    Activating,
    /// Shutting down.
    Deactivating,
    /// Reloading its configuration.
    Reloading,
    /// Exited with an error or hit its restart limit.
    Failed,
    /// Anything the manager reported that is not listed above.
    #[strum(default)]
    Unknown(String),
}

/// Snapshot of a unit's state as reported by the service manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    /// Parsed activity state.
    pub state: ActiveState,
    /// Free-form status summary for operators.
    pub summary: String,
}

/// Narrow interface over the host service manager.
pub trait ServiceManager {
    /// Installs the unit definition at `source` under `unit`, then reloads the
    /// manager's configuration cache. Returns the installed path.
    fn install(&self, source: &Path, unit: &str) -> Result<PathBuf, DeployError>;

    /// Marks `unit` to start at boot.
    fn enable(&self, unit: &str) -> Result<(), DeployError>;

    /// Stops then starts `unit`.
    fn restart(&self, unit: &str) -> Result<(), DeployError>;

    /// Polls the current state of `unit` once.
    fn status(&self, unit: &str) -> Result<UnitStatus, DeployError>;

    /// Returns the most recent `lines` entries of `unit`'s log stream.
    fn tail_log(&self, unit: &str, lines: usize) -> Result<Vec<String>, DeployError>;
}

/// `systemd` backed service manager.
#[derive(Debug, Clone)]
pub struct Systemctl {
    systemctl: String,
    journalctl: String,
    unit_dir: PathBuf,
}

impl Systemctl {
    /// Creates a manager driving the given binaries and unit store.
    pub fn new(
        systemctl: impl Into<String>,
        journalctl: impl Into<String>,
        unit_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            systemctl: systemctl.into(),
            journalctl: journalctl.into(),
            unit_dir: unit_dir.into(),
        }
    }

    fn systemctl(&self, args: &[&str]) -> Result<(), DeployError> {
        run_checked(&self.systemctl, args, None).map(|_| ())
    }
}

impl ServiceManager for Systemctl {
    fn install(&self, source: &Path, unit: &str) -> Result<PathBuf, DeployError> {
        let dest = self.unit_dir.join(unit);
        fs::create_dir_all(&self.unit_dir)
            .map_err(|err| DeployError::io(&self.unit_dir, err))?;
        let contents = fs::read(source).map_err(|err| DeployError::io(source, err))?;
        write_unit_file(&dest, &contents).map_err(|err| DeployError::io(&dest, err))?;
        debug!("Wrote {} ({} bytes)", dest.display(), contents.len());

        self.systemctl(&["daemon-reload"])?;
        Ok(dest)
    }

    fn enable(&self, unit: &str) -> Result<(), DeployError> {
        self.systemctl(&["enable", unit])
    }

    fn restart(&self, unit: &str) -> Result<(), DeployError> {
        self.systemctl(&["restart", unit])
    }

    fn status(&self, unit: &str) -> Result<UnitStatus, DeployError> {
        // `is-active` exits non-zero for anything but active; the answer is on stdout.
        let output = capture(&self.systemctl, &["is-active", unit], None)?;
        let state = stdout_lines(&output)
            .first()
            .map(|line| parse_active_state(line))
            .unwrap_or_else(|| ActiveState::Unknown(String::new()));

        let summary = capture(&self.systemctl, &["status", "--no-pager", "--lines=0", unit], None)
            .map(|out| stdout_lines(&out).join("\n"))
            .unwrap_or_default();

        Ok(UnitStatus { state, summary })
    }

    fn tail_log(&self, unit: &str, lines: usize) -> Result<Vec<String>, DeployError> {
        let lines_arg = lines.to_string();
        let output = run_checked(
            &self.journalctl,
            &["-u", unit, "-n", lines_arg.as_str(), "--no-pager"],
            None,
        )?;
        Ok(stdout_lines(&output))
    }
}

/// Writes the unit file through a sibling temp file so readers never see a
/// partial definition.
fn write_unit_file(dest: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = dest.with_extension("service.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::set_permissions(&tmp, fs::Permissions::from_mode(UNIT_FILE_MODE))?;
    fs::rename(&tmp, dest)
}

fn parse_active_state(raw: &str) -> ActiveState {
    let trimmed = raw.trim();
    ActiveState::from_str(trimmed).unwrap_or_else(|_| ActiveState::Unknown(trimmed.to_string()))
}

/// Lifecycle action attempted on the managed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    /// Enable at boot.
    Enable,
    /// Stop then start.
    Restart,
    /// Confirm the unit is active.
    Verify,
}

/// Lifecycle state of the managed service during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRuntimeState {
    /// No unit definition installed.
    NotInstalled,
    /// Installed, not yet confirmed running by this run.
    InstalledInactive,
    /// Enable in progress.
    Enabling,
    /// Restart in progress.
    Restarting,
    /// Confirmed active after restart.
    Active,
    /// A lifecycle call failed; terminal for the run.
    Failed,
}

/// Material captured for operators when the service fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Status summary from the service manager.
    pub summary: String,
    /// Most recent log entries of the unit.
    pub journal: Vec<String>,
}

/// Drives the managed unit through enable, restart and verify.
pub struct ServiceController<'a, M: ServiceManager + ?Sized> {
    manager: &'a M,
    unit: String,
    tail_lines: usize,
    verify_delay: Duration,
    state: ServiceRuntimeState,
    history: Vec<ServiceRuntimeState>,
}

impl<'a, M: ServiceManager + ?Sized> ServiceController<'a, M> {
    /// Controller for an installed unit.
    pub fn new(manager: &'a M, unit: impl Into<String>, tail_lines: usize) -> Self {
        Self {
            manager,
            unit: unit.into(),
            tail_lines,
            verify_delay: Duration::ZERO,
            state: ServiceRuntimeState::InstalledInactive,
            history: vec![ServiceRuntimeState::InstalledInactive],
        }
    }

    /// Pause once between restart and the status poll.
    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = delay;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceRuntimeState {
        self.state
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[ServiceRuntimeState] {
        &self.history
    }

    fn transition(&mut self, next: ServiceRuntimeState) {
        debug!("{}: {} -> {}", self.unit, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Marks the unit for automatic start at boot.
    pub fn enable(&mut self) -> Result<(), DeployError> {
        self.transition(ServiceRuntimeState::Enabling);
        match self.manager.enable(&self.unit) {
            Ok(()) => {
                info!("Enabled {}", self.unit);
                self.transition(ServiceRuntimeState::InstalledInactive);
                Ok(())
            }
            Err(err) => Err(self.fail(ServiceAction::Enable, err.to_string())),
        }
    }

    /// Stops then starts the unit.
    pub fn restart(&mut self) -> Result<(), DeployError> {
        self.transition(ServiceRuntimeState::Restarting);
        match self.manager.restart(&self.unit) {
            Ok(()) => {
                info!("Restarted {}", self.unit);
                Ok(())
            }
            Err(err) => Err(self.fail(ServiceAction::Restart, err.to_string())),
        }
    }

    /// Polls the unit once and requires it to be active.
    pub fn verify(&mut self) -> Result<(), DeployError> {
        if !self.verify_delay.is_zero() {
            thread::sleep(self.verify_delay);
        }

        match self.manager.status(&self.unit) {
            Ok(status) if status.state == ActiveState::Active => {
                info!("{} is active", self.unit);
                self.transition(ServiceRuntimeState::Active);
                Ok(())
            }
            Ok(status) => Err(self.fail(
                ServiceAction::Verify,
                format!("unit is {} after restart", status.state),
            )),
            Err(err) => Err(self.fail(ServiceAction::Verify, err.to_string())),
        }
    }

    /// Enable, restart and verify, stopping at the first failure.
    pub fn reconcile(&mut self) -> Result<(), DeployError> {
        self.enable()?;
        self.restart()?;
        self.verify()
    }

    fn fail(&mut self, action: ServiceAction, cause: String) -> DeployError {
        self.transition(ServiceRuntimeState::Failed);
        error!("Failed to {action} {}: {cause}", self.unit);
        let diagnostics = self.capture_diagnostics();
        DeployError::Service {
            unit: self.unit.clone(),
            action,
            cause,
            diagnostics: Box::new(diagnostics),
        }
    }

    /// Collects the status summary and journal tail, logging both.
    pub fn capture_diagnostics(&self) -> Diagnostics {
        let summary = match self.manager.status(&self.unit) {
            Ok(status) if status.summary.is_empty() => format!("state: {}", status.state),
            Ok(status) => status.summary,
            Err(err) => format!("status unavailable: {err}"),
        };
        for line in summary.lines() {
            error!(target: "botdeploy::status", "{line}");
        }

        let journal = match self.manager.tail_log(&self.unit, self.tail_lines) {
            Ok(lines) => lines,
            Err(err) => {
                error!("Could not read the journal of {}: {err}", self.unit);
                Vec::new()
            }
        };
        for line in &journal {
            error!(target: "botdeploy::journal", "{line}");
        }

        Diagnostics { summary, journal }
    }
}
