//! In-memory stand-ins for the host service manager and package tooling.
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, OnceLock},
};

use crate::error::DeployError;
use crate::provision::{EnvironmentState, PackageInstaller};
use crate::service::{ActiveState, ServiceManager, UnitStatus};

/// Global lock for environment variable modifications in tests.
pub static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn simulated(what: &str) -> DeployError {
    DeployError::CommandFailed {
        command: what.to_string(),
        status: "status 1".to_string(),
        stderr: format!("simulated {what} failure"),
    }
}

/// A call received by [`FakeServiceManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCall {
    Install(String),
    Enable(String),
    Restart(String),
    Status(String),
    TailLog(String, usize),
}

/// Records every call; the unit becomes active once restarted unless a state
/// is forced with [`FakeServiceManager::set_state`].
#[derive(Debug, Default)]
pub struct FakeServiceManager {
    fail_install: bool,
    fail_enable: bool,
    fail_restart: bool,
    journal: Vec<String>,
    unit_dir: Option<PathBuf>,
    forced_state: Mutex<Option<ActiveState>>,
    restarted: Mutex<bool>,
    calls: Mutex<Vec<ManagerCall>>,
}

impl FakeServiceManager {
    pub fn failing_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    pub fn failing_enable(mut self) -> Self {
        self.fail_enable = true;
        self
    }

    pub fn failing_restart(mut self) -> Self {
        self.fail_restart = true;
        self
    }

    /// Lines returned by `tail_log`, oldest first.
    pub fn with_journal<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.journal = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Copies installed units into `dir` instead of reporting a fake path.
    pub fn with_unit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = Some(dir.into());
        self
    }

    pub fn set_state(&self, state: ActiveState) {
        *lock(&self.forced_state) = Some(state);
    }

    pub fn calls(&self) -> Vec<ManagerCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: ManagerCall) {
        lock(&self.calls).push(call);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ServiceManager for FakeServiceManager {
    fn install(&self, source: &Path, unit: &str) -> Result<PathBuf, DeployError> {
        self.record(ManagerCall::Install(unit.to_string()));
        if self.fail_install {
            return Err(simulated("daemon-reload"));
        }
        match &self.unit_dir {
            Some(dir) => {
                let dest = dir.join(unit);
                fs::create_dir_all(dir).map_err(|err| DeployError::io(dir, err))?;
                fs::copy(source, &dest).map_err(|err| DeployError::io(&dest, err))?;
                Ok(dest)
            }
            None => Ok(PathBuf::from("/fake/units").join(unit)),
        }
    }

    fn enable(&self, unit: &str) -> Result<(), DeployError> {
        self.record(ManagerCall::Enable(unit.to_string()));
        if self.fail_enable {
            return Err(simulated("enable"));
        }
        Ok(())
    }

    fn restart(&self, unit: &str) -> Result<(), DeployError> {
        self.record(ManagerCall::Restart(unit.to_string()));
        if self.fail_restart {
            return Err(simulated("restart"));
        }
        *lock(&self.restarted) = true;
        Ok(())
    }

    fn status(&self, unit: &str) -> Result<UnitStatus, DeployError> {
        self.record(ManagerCall::Status(unit.to_string()));
        let state = match lock(&self.forced_state).clone() {
            Some(state) => state,
            None if *lock(&self.restarted) => ActiveState::Active,
            None => ActiveState::Inactive,
        };
        Ok(UnitStatus {
            summary: format!("{unit} - fake unit\n   Active: {state}"),
            state,
        })
    }

    fn tail_log(&self, unit: &str, lines: usize) -> Result<Vec<String>, DeployError> {
        self.record(ManagerCall::TailLog(unit.to_string(), lines));
        let start = self.journal.len().saturating_sub(lines);
        Ok(self.journal[start..].to_vec())
    }
}

/// A call received by [`FakeInstaller`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerCall {
    EnsureEnvironment(PathBuf),
    InstallManifest(PathBuf),
    ValidateEntry(PathBuf),
}

/// Package installer that creates the environment directory and records calls.
#[derive(Debug, Default)]
pub struct FakeInstaller {
    fail_install: bool,
    fail_validate: bool,
    calls: Mutex<Vec<InstallerCall>>,
}

impl FakeInstaller {
    pub fn failing_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    pub fn failing_validate(mut self) -> Self {
        self.fail_validate = true;
        self
    }

    pub fn calls(&self) -> Vec<InstallerCall> {
        lock(&self.calls).clone()
    }
}

impl PackageInstaller for FakeInstaller {
    fn ensure_environment(&self, env_dir: &Path) -> Result<EnvironmentState, DeployError> {
        lock(&self.calls).push(InstallerCall::EnsureEnvironment(env_dir.to_path_buf()));
        if env_dir.exists() {
            return Ok(EnvironmentState::Reused);
        }
        fs::create_dir_all(env_dir).map_err(|err| DeployError::io(env_dir, err))?;
        Ok(EnvironmentState::Created)
    }

    fn install_manifest(&self, _env_dir: &Path, manifest: &Path) -> Result<(), DeployError> {
        lock(&self.calls).push(InstallerCall::InstallManifest(manifest.to_path_buf()));
        if self.fail_install {
            return Err(simulated("pip install"));
        }
        Ok(())
    }

    fn validate_entry(&self, _env_dir: &Path, entry: &Path) -> Result<(), DeployError> {
        lock(&self.calls).push(InstallerCall::ValidateEntry(entry.to_path_buf()));
        if self.fail_validate {
            return Err(simulated("py_compile"));
        }
        Ok(())
    }
}
