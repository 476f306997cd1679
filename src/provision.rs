//! Runtime environment and dependency provisioning.
use std::path::{Path, PathBuf};

use strum_macros::Display;
use tracing::{info, warn};

use crate::error::DeployError;
use crate::process::{render_command, run_checked};

/// Whether the runtime environment was reused or had to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EnvironmentState {
    /// Created during this run.
    Created,
    /// Already present and reused.
    Reused,
}

/// Narrow interface over the package tooling used to provision the bot.
pub trait PackageInstaller {
    /// Creates the runtime environment at `env_dir` unless it already exists.
    /// Never recreates an existing environment.
    fn ensure_environment(&self, env_dir: &Path) -> Result<EnvironmentState, DeployError>;

    /// Upgrade-installs every dependency in `manifest` into `env_dir`.
    fn install_manifest(&self, env_dir: &Path, manifest: &Path) -> Result<(), DeployError>;

    /// Checks that `entry` compiles with the environment's interpreter.
    fn validate_entry(&self, env_dir: &Path, entry: &Path) -> Result<(), DeployError>;
}

/// Python virtualenv provisioned with `venv` and `pip`.
#[derive(Debug, Clone)]
pub struct VirtualEnv {
    python: String,
}

impl VirtualEnv {
    /// Uses `python` to bootstrap new environments.
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn interpreter(env_dir: &Path) -> PathBuf {
        env_dir.join("bin").join("python")
    }

    fn pip(env_dir: &Path) -> PathBuf {
        env_dir.join("bin").join("pip")
    }
}

impl PackageInstaller for VirtualEnv {
    fn ensure_environment(&self, env_dir: &Path) -> Result<EnvironmentState, DeployError> {
        if Self::interpreter(env_dir).exists() {
            info!("Reusing runtime environment at {}", env_dir.display());
            return Ok(EnvironmentState::Reused);
        }

        info!("Creating runtime environment at {}", env_dir.display());
        let args = [
            "-m".to_string(),
            "venv".to_string(),
            env_dir.display().to_string(),
        ];
        run_checked(&self.python, &args, None)?;
        Ok(EnvironmentState::Created)
    }

    fn install_manifest(&self, env_dir: &Path, manifest: &Path) -> Result<(), DeployError> {
        if !manifest.is_file() {
            return Err(DeployError::ManifestMissing(manifest.to_path_buf()));
        }

        let pip = Self::pip(env_dir).display().to_string();
        let upgrade_pip = ["install", "--upgrade", "pip"];
        if let Err(err) = run_checked(&pip, &upgrade_pip, None) {
            warn!("Could not upgrade pip, continuing with the bundled one: {err}");
        }

        let args = [
            "install".to_string(),
            "--upgrade".to_string(),
            "-r".to_string(),
            manifest.display().to_string(),
        ];
        info!("Installing dependencies: {}", render_command(&pip, &args));
        run_checked(&pip, &args, manifest.parent())?;
        Ok(())
    }

    fn validate_entry(&self, env_dir: &Path, entry: &Path) -> Result<(), DeployError> {
        if !entry.is_file() {
            return Err(DeployError::EntryMissing(entry.to_path_buf()));
        }

        let python = Self::interpreter(env_dir).display().to_string();
        let args = [
            "-m".to_string(),
            "py_compile".to_string(),
            entry.display().to_string(),
        ];
        run_checked(&python, &args, entry.parent())?;
        Ok(())
    }
}

/// Ensures the runtime environment and installs the manifest into it.
///
/// Any failure here must stop the run before the service is touched.
pub fn provision<P: PackageInstaller + ?Sized>(
    installer: &P,
    env_dir: &Path,
    manifest: &Path,
) -> Result<EnvironmentState, DeployError> {
    let state = installer.ensure_environment(env_dir)?;
    installer.install_manifest(env_dir, manifest)?;
    info!("Dependencies up to date ({state} environment)");
    Ok(state)
}
