//! Blocking execution of external programs.
use std::{
    ffi::OsStr,
    path::Path,
    process::{Command, ExitStatus, Output},
};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use tracing::debug;

use crate::error::DeployError;

/// Renders a program and its arguments for log lines and error messages.
pub fn render_command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.as_ref().to_string_lossy());
    }
    rendered
}

fn describe_status(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("status {code}");
    }
    #[cfg(unix)]
    if let Some(signal) = status.signal() {
        return format!("signal {signal}");
    }
    "unknown status".to_string()
}

/// Runs `program` to completion and returns its captured output, whatever the
/// exit status.
pub fn capture<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
) -> Result<Output, DeployError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!("Running {}", render_command(program, args));
    cmd.output().map_err(|source| DeployError::CommandSpawn {
        program: program.to_string(),
        source,
    })
}

/// Runs `program` and fails unless it exits successfully.
pub fn run_checked<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
) -> Result<Output, DeployError> {
    let output = capture(program, args, cwd)?;
    if output.status.success() {
        return Ok(output);
    }

    Err(DeployError::CommandFailed {
        command: render_command(program, args),
        status: describe_status(&output.status),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Non-empty lines of a command's standard output.
pub fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
