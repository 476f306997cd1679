//! Installation of the service unit definition shipped with the deployment.
use std::{fmt::Write as _, fs, path::PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::DeploymentContext;
use crate::constants::{DEFAULT_RESTART_SEC, EXPECTED_RESTART_POLICY};
use crate::error::DeployError;
use crate::service::ServiceManager;

/// The launch settings a unit definition declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceUnitDefinition {
    /// `Description=` of the `[Unit]` section.
    pub description: Option<String>,
    /// `WorkingDirectory=` of the `[Service]` section.
    pub working_directory: Option<PathBuf>,
    /// `ExecStart=` of the `[Service]` section.
    pub exec_start: Option<String>,
    /// `Restart=` policy.
    pub restart: Option<String>,
    /// `RestartSec=` backoff.
    pub restart_sec: Option<String>,
    /// `EnvironmentFile=` passed to the process.
    pub environment_file: Option<PathBuf>,
}

impl ServiceUnitDefinition {
    /// Extracts the known keys from unit file text. Later assignments win.
    pub fn parse(content: &str) -> Self {
        let mut unit = Self::default();
        let mut section = String::new();

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();

            match (section.as_str(), key.trim()) {
                ("Unit", "Description") => unit.description = Some(value),
                ("Service", "WorkingDirectory") => unit.working_directory = Some(value.into()),
                ("Service", "ExecStart") => unit.exec_start = Some(value),
                ("Service", "Restart") => unit.restart = Some(value),
                ("Service", "RestartSec") => unit.restart_sec = Some(value),
                ("Service", "EnvironmentFile") => {
                    let path = value.trim_start_matches('-');
                    unit.environment_file = Some(path.into());
                }
                _ => {}
            }
        }
        unit
    }

    /// Default definition for the deployment: run the entry file with the
    /// environment's interpreter, restart always.
    pub fn for_context(ctx: &DeploymentContext) -> Self {
        Self {
            description: Some(format!("{} managed by botdeploy", ctx.unit_name)),
            working_directory: Some(ctx.app_dir.clone()),
            exec_start: Some(format!(
                "{} {}",
                ctx.env_dir.join("bin").join("python").display(),
                ctx.entry.display()
            )),
            restart: Some(EXPECTED_RESTART_POLICY.to_string()),
            restart_sec: Some(DEFAULT_RESTART_SEC.to_string()),
            environment_file: Some(ctx.env_file.clone()),
        }
    }

    /// Renders the definition as unit file text.
    pub fn render(&self) -> String {
        let mut out = String::from("[Unit]\n");
        if let Some(description) = &self.description {
            let _ = writeln!(out, "Description={description}");
        }
        out.push_str("After=network-online.target\nWants=network-online.target\n\n");
        out.push_str("[Service]\nType=simple\n");
        if let Some(dir) = &self.working_directory {
            let _ = writeln!(out, "WorkingDirectory={}", dir.display());
        }
        if let Some(env_file) = &self.environment_file {
            let _ = writeln!(out, "EnvironmentFile=-{}", env_file.display());
        }
        if let Some(exec) = &self.exec_start {
            let _ = writeln!(out, "ExecStart={exec}");
        }
        if let Some(restart) = &self.restart {
            let _ = writeln!(out, "Restart={restart}");
        }
        if let Some(sec) = &self.restart_sec {
            let _ = writeln!(out, "RestartSec={sec}");
        }
        out.push_str("\n[Install]\nWantedBy=multi-user.target\n");
        out
    }
}

/// Result of the unit installation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitInstall {
    /// The shipped definition was installed and the manager reloaded.
    Installed {
        /// Installed file path.
        path: PathBuf,
        /// SHA-256 of the installed contents, hex encoded.
        digest: String,
    },
    /// No definition ships with this revision; nothing to restart into.
    Unavailable,
}

/// Copies the shipped unit definition into the service manager's store and
/// reloads it. A missing source is reported as `Unavailable`, not an error.
pub fn install_unit<M: ServiceManager + ?Sized>(
    ctx: &DeploymentContext,
    manager: &M,
) -> Result<UnitInstall, DeployError> {
    if !ctx.unit_source.is_file() {
        warn!(
            "Unit source {} not found; skipping install, the service will not be restarted",
            ctx.unit_source.display()
        );
        return Ok(UnitInstall::Unavailable);
    }

    let content =
        fs::read(&ctx.unit_source).map_err(|err| DeployError::io(&ctx.unit_source, err))?;
    let definition = ServiceUnitDefinition::parse(&String::from_utf8_lossy(&content));
    match definition.restart.as_deref() {
        Some(EXPECTED_RESTART_POLICY) => {}
        Some(other) => warn!(
            "{} declares Restart={other}, expected {EXPECTED_RESTART_POLICY}",
            ctx.unit_name
        ),
        None => warn!("{} declares no Restart= policy", ctx.unit_name),
    }
    if definition.exec_start.is_none() {
        warn!("{} declares no ExecStart=", ctx.unit_name);
    }

    let path = manager.install(&ctx.unit_source, &ctx.unit_name)?;
    let digest = format!("{:x}", Sha256::digest(&content));
    info!("Installed {} (sha256 {})", path.display(), digest);
    Ok(UnitInstall::Installed { path, digest })
}
