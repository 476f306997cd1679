//! Logging setup and access to the orchestrator's own log file.
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global subscriber: stdout always, plus `log_file` (append-only,
/// no ANSI colours) when given.
///
/// Fails only if the log file cannot be opened; a subscriber that is already
/// installed is left in place.
pub fn init(filter: EnvFilter, log_file: Option<&Path>) -> io::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
    Ok(())
}

/// Returns the last `lines` lines of `path`.
pub fn tail_file(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}

/// Prints the last `lines` lines of the orchestrator log.
///
/// # Returns
/// * `Ok(())` if successful, or when the log does not exist yet.
pub fn show_logs(path: &Path, lines: usize) -> io::Result<()> {
    if !path.exists() {
        eprintln!("No deploy log at {} yet.", path.display());
        return Ok(());
    }

    for line in tail_file(path, lines)? {
        println!("{}", line);
    }

    Ok(())
}
