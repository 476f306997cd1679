//! Run-scoped exclusive lock serializing overlapping reconciliation runs.
use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::constants::LOCK_POLL_INTERVAL;
use crate::error::DeployError;

/// Exclusive advisory lock held for the whole run; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Tries to take the lock at `path`, polling until `timeout` elapses.
    ///
    /// Returns `Ok(None)` when another run still holds the lock at the deadline.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Option<Self>, DeployError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| DeployError::io(parent, err))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|err| DeployError::io(path, err))?;

        let deadline = Instant::now() + timeout;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(err) if is_contended(&err) => {
                    if Instant::now() >= deadline {
                        warn!(
                            "Another run holds {} after {:?}; giving up",
                            path.display(),
                            timeout
                        );
                        return Ok(None);
                    }
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(err) => return Err(DeployError::io(path, err)),
            }
        }

        // Holder's pid, for operators inspecting a stuck lock.
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        debug!("Acquired run lock {}", path.display());
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("Failed to release {}: {}", self.path.display(), err);
        }
    }
}
