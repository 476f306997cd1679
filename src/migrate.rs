//! Relocation of legacy state files into the managed data directory.
use std::{
    fs::{self, DirBuilder},
    io,
    os::unix::fs::{DirBuilderExt, PermissionsExt},
    path::{Path, PathBuf},
};

use nix::errno::Errno;
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::config::DeploymentContext;
use crate::constants::{DIR_MODE, MIGRATION_TMP_PREFIX};
use crate::error::DeployError;

/// What a run does with one legacy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum MigrationDecision {
    /// Present at the root and absent from the data dir: move it.
    Migrate,
    /// Already present in the data dir: leave both copies untouched.
    SkipAlreadyPresent,
    /// Not present at the root: nothing to do.
    SkipSourceAbsent,
}

/// Decision taken for a single legacy file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    /// Legacy file name.
    pub file: String,
    /// What happened to it.
    pub decision: MigrationDecision,
}

/// Creates `path` (and parents) if needed and applies the fixed directory mode.
pub fn ensure_dir(path: &Path) -> Result<(), DeployError> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
        .map_err(|source| DeployError::io(path, source))?;
    fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))
        .map_err(|source| DeployError::io(path, source))
}

/// Creates the data, log and runtime directories of the deployment.
pub fn prepare_directories(ctx: &DeploymentContext) -> Result<(), DeployError> {
    let dirs = [&ctx.data_dir, &ctx.log_dir]
        .into_iter()
        .chain(ctx.runtime_dirs.iter());
    for dir in dirs {
        ensure_dir(dir)?;
        debug!("Ensured directory {}", dir.display());
    }
    Ok(())
}

fn decide(source: &Path, dest: &Path) -> MigrationDecision {
    // Dangling symlinks count as present.
    if fs::symlink_metadata(dest).is_ok() {
        MigrationDecision::SkipAlreadyPresent
    } else if source.is_file() {
        MigrationDecision::Migrate
    } else {
        MigrationDecision::SkipSourceAbsent
    }
}

/// Computes the decision for every legacy file without touching anything.
pub fn plan(ctx: &DeploymentContext) -> Vec<MigrationRecord> {
    ctx.legacy_files
        .iter()
        .map(|file| MigrationRecord {
            file: file.clone(),
            decision: decide(&ctx.app_dir.join(file), &ctx.data_dir.join(file)),
        })
        .collect()
}

/// Moves every pending legacy file into the data directory.
///
/// A file already present at the destination is never overwritten, so repeated
/// runs are no-ops and stale root copies are left alone. This holds even when
/// the destination appears between the decision and the move.
pub fn migrate(ctx: &DeploymentContext) -> Result<Vec<MigrationRecord>, DeployError> {
    let mut records = Vec::with_capacity(ctx.legacy_files.len());
    for file in &ctx.legacy_files {
        let source = ctx.app_dir.join(file);
        let dest = ctx.data_dir.join(file);
        let mut decision = decide(&source, &dest);

        if decision == MigrationDecision::Migrate {
            match move_file(&source, &dest)? {
                Moved::Done => info!("Migrated {} -> {}", source.display(), dest.display()),
                Moved::DestinationTaken => decision = MigrationDecision::SkipAlreadyPresent,
            }
        }

        match decision {
            MigrationDecision::Migrate => {}
            MigrationDecision::SkipAlreadyPresent if source.exists() => warn!(
                "Keeping stale {} at the app root; {} already exists",
                file,
                dest.display()
            ),
            MigrationDecision::SkipAlreadyPresent => {
                debug!("{file} already lives in the data directory")
            }
            MigrationDecision::SkipSourceAbsent => {
                debug!("{file} not present, nothing to migrate")
            }
        }

        records.push(MigrationRecord {
            file: file.clone(),
            decision,
        });
    }

    let count = |wanted: MigrationDecision| {
        records.iter().filter(|r| r.decision == wanted).count()
    };
    info!(
        "Data directory {} ready: {} migrated, {} already present, {} absent",
        ctx.data_dir.display(),
        count(MigrationDecision::Migrate),
        count(MigrationDecision::SkipAlreadyPresent),
        count(MigrationDecision::SkipSourceAbsent)
    );
    Ok(records)
}

/// Result of a no-replace move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Moved {
    Done,
    /// Something exists at the destination; the source was left in place.
    DestinationTaken,
}

/// Links `source` at `dest` without replacing anything there, then unlinks
/// the source. The file exists at one or both locations at every instant.
fn link_then_unlink(source: &Path, dest: &Path) -> io::Result<Moved> {
    match fs::hard_link(source, dest) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Ok(Moved::DestinationTaken);
        }
        Err(err) => return Err(err),
    }
    fs::remove_file(source)?;
    Ok(Moved::Done)
}

fn move_file(source: &Path, dest: &Path) -> Result<Moved, DeployError> {
    let moved = match link_then_unlink(source, dest) {
        Ok(moved) => moved,
        Err(err) if err.raw_os_error() == Some(Errno::EXDEV as i32) => {
            debug!("{} is on another device, copying instead", source.display());
            copy_across_devices(source, dest)?
        }
        Err(err) => return Err(DeployError::io(source, err)),
    };
    if moved == Moved::DestinationTaken {
        warn!(
            "{} appeared during migration; leaving {} in place",
            dest.display(),
            source.display()
        );
    }
    Ok(moved)
}

fn copy_across_devices(source: &Path, dest: &Path) -> Result<Moved, DeployError> {
    let staging = staging_path(dest)?;
    fs::copy(source, &staging).map_err(|err| {
        let _ = fs::remove_file(&staging);
        DeployError::io(&staging, err)
    })?;

    let placed = link_then_unlink(&staging, dest);
    if !matches!(placed, Ok(Moved::Done)) {
        let _ = fs::remove_file(&staging);
    }
    match placed.map_err(|err| DeployError::io(dest, err))? {
        Moved::Done => {
            fs::remove_file(source).map_err(|err| DeployError::io(source, err))?;
            Ok(Moved::Done)
        }
        Moved::DestinationTaken => Ok(Moved::DestinationTaken),
    }
}

fn staging_path(dest: &Path) -> Result<PathBuf, DeployError> {
    let parent = dest.parent().ok_or_else(|| {
        DeployError::io(
            dest,
            io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"),
        )
    })?;
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(parent.join(format!("{MIGRATION_TMP_PREFIX}{name}")))
}
