//! Timestamped backups of files about to be overwritten.
//!
//! Every run gets one directory under `<state-dir>/backups/` named after the
//! run's start time.  A file backed up from `/home/me/.gitconfig` by module
//! `git` lands at `<run>/git/home/me/.gitconfig`, next to a
//! `.gitconfig.meta.json` sidecar describing it.
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FileOpError;
use crate::hash;
use crate::resources::fs::{copy_dir_recursive, remove_existing, symlink};

/// Sub-directory of the state dir that holds backups.
pub const BACKUPS_SUBDIR: &str = "backups";

const META_SUFFIX: &str = ".meta.json";

/// Sidecar metadata written next to every backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Absolute path of the original file.
    pub original: PathBuf,
    /// When the backup was taken.
    pub timestamp: DateTime<Utc>,
    /// Content hash of the backed-up bytes (or link target for symlinks).
    pub hash: String,
    /// Why the backup was taken.
    pub reason: String,
    /// Module that triggered the backup.
    pub module: String,
}

/// Where a backup was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Path of the backup copy.
    pub path: PathBuf,
    /// Sidecar contents.
    pub metadata: BackupMetadata,
}

/// Backup writer for one run.
#[derive(Debug, Clone)]
pub struct BackupStore {
    run_dir: PathBuf,
}

impl BackupStore {
    /// Create a store whose run directory is stamped with the current time.
    #[must_use]
    pub fn new(backups_root: &Path) -> Self {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        Self {
            run_dir: backups_root.join(stamp),
        }
    }

    /// Directory receiving this run's backups.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Copy `path` (bytes and permission bits, the link itself for symlinks,
    /// or the whole tree for directories) into the run directory and write
    /// its sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`FileOpError::Backup`] if the copy or the sidecar cannot be
    /// written.
    pub fn backup(&self, module: &str, path: &Path, reason: &str) -> Result<BackupRecord, FileOpError> {
        let err = |source| FileOpError::Backup {
            path: path.to_path_buf(),
            source,
        };

        let dest = self.run_dir.join(module).join(relative_to_root(path));
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(err)?;
        }

        let meta = std::fs::symlink_metadata(path).map_err(err)?;
        let content_hash = if meta.file_type().is_symlink() {
            let target = std::fs::read_link(path).map_err(err)?;
            symlink(&target, &dest).map_err(err)?;
            hash::bytes_hash(target.to_string_lossy().as_bytes())
        } else if meta.is_dir() {
            copy_dir_recursive(path, &dest).map_err(err)?;
            hash::path_hash(&dest).map_err(err)?
        } else {
            std::fs::copy(path, &dest).map_err(err)?;
            std::fs::set_permissions(&dest, meta.permissions()).map_err(err)?;
            hash::file_hash(&dest).map_err(err)?
        };

        let metadata = BackupMetadata {
            original: path.to_path_buf(),
            timestamp: Utc::now(),
            hash: content_hash,
            reason: reason.to_string(),
            module: module.to_string(),
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| err(std::io::Error::other(e)))?;
        std::fs::write(sidecar_path(&dest), json).map_err(err)?;

        tracing::debug!("backed up {} to {} ({reason})", path.display(), dest.display());
        Ok(BackupRecord {
            path: dest,
            metadata,
        })
    }
}

/// Put a backup back at `original`, replacing whatever is there now.
///
/// # Errors
///
/// Returns an error if the current file cannot be removed or the backup
/// cannot be copied back.
pub fn restore(backup: &Path, original: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(backup)?;
    // Removing first keeps a symlink at `original` from redirecting the copy.
    remove_existing(original)?;
    if meta.file_type().is_symlink() {
        symlink(&std::fs::read_link(backup)?, original)
    } else if meta.is_dir() {
        copy_dir_recursive(backup, original)
    } else {
        std::fs::copy(backup, original)?;
        std::fs::set_permissions(original, meta.permissions())
    }
}

/// Delete a backup and its sidecar.
///
/// # Errors
///
/// Returns an error if the backup exists but cannot be removed.
pub fn discard(backup: &Path) -> std::io::Result<()> {
    remove_existing(backup)?;
    std::fs::remove_file(sidecar_path(backup)).ok();
    Ok(())
}

/// Read the sidecar of a backup.
///
/// # Errors
///
/// Returns an error if the sidecar is missing or invalid.
pub fn read_metadata(backup: &Path) -> anyhow::Result<BackupMetadata> {
    let content = std::fs::read_to_string(sidecar_path(backup))?;
    Ok(serde_json::from_str(&content)?)
}

fn sidecar_path(backup: &Path) -> PathBuf {
    let mut name = backup
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(META_SUFFIX);
    backup.with_file_name(name)
}

/// Strip the root/prefix from an absolute path so it can be nested.
fn relative_to_root(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
