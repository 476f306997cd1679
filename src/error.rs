//! Error handling for botdeploy.
use std::{io, path::PathBuf};

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use crate::service::{Diagnostics, ServiceAction};

/// Defines all possible errors raised while reconciling a deployment.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The application root does not exist or is not a directory.
    #[error("Application directory not found: {}", .0.display())]
    MissingAppDir(PathBuf),

    /// Error reading the configuration file.
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The configuration references an environment variable that is not set.
    #[error("Config references undefined environment variable '{0}'")]
    MissingConfigVar(String),

    /// A filesystem mutation failed.
    #[error("Filesystem operation on {} failed: {source}", path.display())]
    Io {
        /// Path being operated on.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// An external program could not be started.
    #[error("Failed to launch '{program}': {source}")]
    CommandSpawn {
        /// Program that failed to start.
        program: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// An external program exited unsuccessfully.
    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        /// Rendered command line.
        command: String,
        /// Exit code, or the signal description when killed.
        status: String,
        /// Trimmed standard error of the command.
        stderr: String,
    },

    /// The declared dependency manifest is absent.
    #[error("Dependency manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    /// The application entry file is absent.
    #[error("Application entry file not found: {}", .0.display())]
    EntryMissing(PathBuf),

    /// The service manager reported a failure for the managed unit.
    #[error("Service '{unit}' failed to {action}: {cause}")]
    Service {
        /// Managed unit name.
        unit: String,
        /// Lifecycle action that failed.
        action: ServiceAction,
        /// Human-readable failure cause.
        cause: String,
        /// Status summary and journal tail captured on failure.
        diagnostics: Box<Diagnostics>,
    },
}

impl DeployError {
    /// Wraps an I/O error together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DeployError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Broad error taxonomy used for exit codes and log classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing application directory, bad configuration or filesystem failure.
    Environment,
    /// Dependency install or entry validation failure.
    Provisioning,
    /// Unit install, enable, restart or verify failure.
    ServiceManager,
}

impl FailureKind {
    /// Process exit status reported for this kind of failure.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Environment => 2,
            Self::Provisioning => 3,
            Self::ServiceManager => 4,
        }
    }
}

/// Steps of a reconciliation run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Build the deployment context from configuration.
    ResolvePaths,
    /// Take the run lock.
    AcquireLock,
    /// Create data, log and runtime directories.
    PrepareDirectories,
    /// Move legacy state files into the data directory.
    MigrateData,
    /// Ensure the runtime environment and install dependencies.
    Provision,
    /// Check the entry file compiles.
    ValidateSource,
    /// Copy the unit file and reload the service manager.
    InstallUnit,
    /// Enable, restart and verify the service.
    ControlService,
}

impl Step {
    /// Classification of a failure raised by this step.
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::ResolvePaths
            | Self::AcquireLock
            | Self::PrepareDirectories
            | Self::MigrateData => FailureKind::Environment,
            Self::Provision | Self::ValidateSource => FailureKind::Provisioning,
            Self::InstallUnit | Self::ControlService => FailureKind::ServiceManager,
        }
    }
}

/// A fatal failure, tagged with the step that raised it.
#[derive(Debug, Error)]
#[error("step '{step}' failed: {error}")]
pub struct StepFailure {
    /// Step at which the run stopped.
    pub step: Step,
    /// The underlying error.
    #[source]
    pub error: DeployError,
}

impl StepFailure {
    /// Tags `error` with `step`.
    pub fn new(step: Step, error: DeployError) -> Self {
        Self { step, error }
    }

    /// Taxonomy of this failure.
    pub fn kind(&self) -> FailureKind {
        self.step.kind()
    }

    /// Human-readable message without the step prefix.
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// Exit status for the process.
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

/// Extension trait for attaching a step to a `DeployError` result.
pub trait AtStep<T> {
    /// Converts the error side into a `StepFailure` for `step`.
    fn at(self, step: Step) -> Result<T, StepFailure>;
}

impl<T> AtStep<T> for Result<T, DeployError> {
    fn at(self, step: Step) -> Result<T, StepFailure> {
        self.map_err(|error| StepFailure::new(step, error))
    }
}
