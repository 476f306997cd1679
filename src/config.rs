//! Configuration management for botdeploy.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants::{
    DEFAULT_CONFIG_FILE, DEFAULT_LEGACY_FILES, DEFAULT_LOCK_TIMEOUT, DEFAULT_RUNTIME_DIRS,
    DEFAULT_TAIL_LINES, DEFAULT_UNIT_DIR, DEFAULT_VERIFY_DELAY, DEPLOY_LOG_FILE, LOCK_FILE,
    RUN_REPORT_FILE,
};
use crate::error::DeployError;

/// Represents the structure of the configuration file.
///
/// Every field has a default, so an absent file describes a bot living in the
/// current directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Application root holding the shipped files.
    pub app_dir: PathBuf,
    /// Managed data directory, relative to `app_dir` unless absolute.
    pub data_dir: PathBuf,
    /// Log directory, relative to `app_dir` unless absolute.
    pub log_dir: PathBuf,
    /// Additional working directories the application expects.
    pub runtime_dirs: Vec<PathBuf>,
    /// Isolated runtime environment (virtualenv) directory.
    pub env_dir: PathBuf,
    /// Credential file.
    pub env_file: PathBuf,
    /// Dependency manifest installed into the runtime environment.
    pub manifest: PathBuf,
    /// Application entry file.
    pub entry: PathBuf,
    /// Interpreter used to create the runtime environment.
    pub python: String,
    /// Service unit settings.
    pub unit: UnitConfig,
    /// `systemctl` binary.
    pub systemctl: String,
    /// `journalctl` binary.
    pub journalctl: String,
    /// Legacy state files to migrate into `data_dir`.
    pub legacy_files: Vec<String>,
    /// Seconds to wait for a concurrent run before giving up.
    pub lock_timeout_secs: u64,
    /// Seconds between restart and the status poll.
    pub verify_delay_secs: u64,
    /// Journal entries captured on service failure.
    pub tail_lines: usize,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("."),
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            runtime_dirs: DEFAULT_RUNTIME_DIRS.iter().map(PathBuf::from).collect(),
            env_dir: PathBuf::from("venv"),
            env_file: PathBuf::from(".env"),
            manifest: PathBuf::from("requirements.txt"),
            entry: PathBuf::from("bot.py"),
            python: "python3".to_string(),
            unit: UnitConfig::default(),
            systemctl: "systemctl".to_string(),
            journalctl: "journalctl".to_string(),
            legacy_files: DEFAULT_LEGACY_FILES.iter().map(|s| s.to_string()).collect(),
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
            verify_delay_secs: DEFAULT_VERIFY_DELAY.as_secs(),
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

/// Service unit section of the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitConfig {
    /// Unit name without the `.service` suffix.
    pub name: String,
    /// Shipped unit file; defaults to `<name>.service` in the app dir.
    pub source: Option<PathBuf>,
    /// Service manager unit store.
    pub directory: PathBuf,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            name: "bot".to_string(),
            source: None,
            directory: PathBuf::from(DEFAULT_UNIT_DIR),
        }
    }
}

impl UnitConfig {
    /// File name of the unit, e.g. `bot.service`.
    pub fn file_name(&self) -> String {
        if self.name.ends_with(".service") {
            self.name.clone()
        } else {
            format!("{}.service", self.name)
        }
    }
}

/// Immutable snapshot of every path a run touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentContext {
    /// Application root.
    pub app_dir: PathBuf,
    /// Managed data directory.
    pub data_dir: PathBuf,
    /// Log directory.
    pub log_dir: PathBuf,
    /// Additional working directories.
    pub runtime_dirs: Vec<PathBuf>,
    /// Runtime environment directory.
    pub env_dir: PathBuf,
    /// Credential file.
    pub env_file: PathBuf,
    /// Dependency manifest.
    pub manifest: PathBuf,
    /// Application entry file.
    pub entry: PathBuf,
    /// Interpreter used to bootstrap the runtime environment.
    pub python: String,
    /// Managed unit file name.
    pub unit_name: String,
    /// Shipped unit definition.
    pub unit_source: PathBuf,
    /// Installed unit definition.
    pub unit_dest: PathBuf,
    /// Service manager unit store.
    pub unit_dir: PathBuf,
    /// `systemctl` binary.
    pub systemctl: String,
    /// `journalctl` binary.
    pub journalctl: String,
    /// Legacy file names, in migration order.
    pub legacy_files: Vec<String>,
    /// Orchestrator log file.
    pub deploy_log: PathBuf,
    /// JSON report of the last run.
    pub report_path: PathBuf,
    /// Run lock file.
    pub lock_path: PathBuf,
    /// Bounded wait for the run lock.
    pub lock_timeout: Duration,
    /// Pause before the post-restart status poll.
    pub verify_delay: Duration,
    /// Journal entries captured on failure.
    pub tail_lines: usize,
}

impl DeploymentContext {
    /// Resolves every configured path against the application root.
    ///
    /// Fails when the application root does not exist.
    pub fn resolve(config: &DeployConfig) -> Result<Self, DeployError> {
        let app_dir = absolutize(&config.app_dir)?;
        if !app_dir.is_dir() {
            return Err(DeployError::MissingAppDir(app_dir));
        }

        let under_app = |path: &Path| -> PathBuf {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                app_dir.join(path)
            }
        };

        let log_dir = under_app(&config.log_dir);
        let unit_name = config.unit.file_name();
        let unit_source = config
            .unit
            .source
            .as_deref()
            .map(under_app)
            .unwrap_or_else(|| app_dir.join(&unit_name));

        Ok(Self {
            data_dir: under_app(&config.data_dir),
            runtime_dirs: config.runtime_dirs.iter().map(|d| under_app(d)).collect(),
            env_dir: under_app(&config.env_dir),
            env_file: under_app(&config.env_file),
            manifest: under_app(&config.manifest),
            entry: under_app(&config.entry),
            python: config.python.clone(),
            unit_dest: config.unit.directory.join(&unit_name),
            unit_dir: config.unit.directory.clone(),
            systemctl: config.systemctl.clone(),
            journalctl: config.journalctl.clone(),
            unit_source,
            unit_name,
            legacy_files: config.legacy_files.clone(),
            deploy_log: log_dir.join(DEPLOY_LOG_FILE),
            report_path: log_dir.join(RUN_REPORT_FILE),
            lock_path: log_dir.join(LOCK_FILE),
            log_dir,
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
            verify_delay: Duration::from_secs(config.verify_delay_secs),
            tail_lines: config.tail_lines,
            app_dir,
        })
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, DeployError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(|source| DeployError::io(".", source))?;
    let joined = cwd.join(path);
    Ok(joined.canonicalize().unwrap_or(joined))
}

/// Expands `$VAR` and `${VAR}` references from the process environment.
fn expand_env_vars(input: &str) -> Result<String, DeployError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("valid env var pattern");

    let mut expanded = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = env::var(name.as_str())
            .map_err(|_| DeployError::MissingConfigVar(name.as_str().to_string()))?;
        expanded.push_str(&input[last..whole.start()]);
        expanded.push_str(&value);
        last = whole.end();
    }
    expanded.push_str(&input[last..]);
    Ok(expanded)
}

/// Loads the configuration file, falling back to defaults when none exists.
///
/// An explicit `config_path` must exist. Without one, `botdeploy.yaml` in the
/// current directory is used when present. A relative `app_dir` inside the file
/// resolves against the file's directory; `app_dir_override` replaces it.
pub fn load_config(
    config_path: Option<&Path>,
    app_dir_override: Option<&Path>,
) -> Result<DeployConfig, DeployError> {
    let implicit = Path::new(DEFAULT_CONFIG_FILE);
    let path = match config_path {
        Some(path) => Some(path),
        None if implicit.exists() => Some(implicit),
        None => None,
    };

    let mut config = match path {
        Some(path) => {
            let content =
                fs::read_to_string(path).map_err(|source| DeployError::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })?;
            let expanded = expand_env_vars(&content)?;
            let mut config: DeployConfig = if expanded.trim().is_empty() {
                DeployConfig::default()
            } else {
                serde_yaml::from_str(&expanded)?
            };

            if config.app_dir.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                config.app_dir = base.join(&config.app_dir);
            }
            config
        }
        None => DeployConfig::default(),
    };

    if let Some(app_dir) = app_dir_override {
        config.app_dir = app_dir.to_path_buf();
    }

    Ok(config)
}
