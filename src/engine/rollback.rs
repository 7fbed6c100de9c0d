//! Reversal of a module's operation log.
//!
//! Operations are replayed newest first.  File deployments and directory
//! creations are undone; script runs and package installs are only
//! reported.  Failures never stop the replay: they are collected in the
//! [`RollbackReport`] so a partial rollback still undoes as much as it can.
use std::path::Path;

use crate::engine::backup;
use crate::error::FileOpError;
use crate::logging::Log;
use crate::resources::fs::{remove_dir_if_empty, remove_existing};
use crate::state::{Action, OpType, Operation};

/// Summary of a rollback.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Operations actually reversed.
    pub reverted: usize,
    /// Operations that cannot be reversed and were only reported.
    pub informational: usize,
    /// Operations whose reversal failed.
    pub errors: Vec<FileOpError>,
}

impl RollbackReport {
    /// Whether every reversible operation was reversed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reverse `operations` in LIFO order.  In dry-run mode nothing is touched
/// and each reversal is only announced.
pub fn rollback(operations: &[Operation], log: &dyn Log, dry_run: bool) -> RollbackReport {
    let mut report = RollbackReport::default();
    for op in operations.iter().rev() {
        let path = Path::new(&op.path);
        match (op.op_type, op.action) {
            (OpType::FileDeploy, Action::Created | Action::Symlinked) => {
                if dry_run {
                    log.dry_run(&format!("would remove {}", op.path));
                    continue;
                }
                match remove_existing(path) {
                    Ok(()) => {
                        log.debug(&format!("removed {}", op.path));
                        report.reverted += 1;
                    }
                    Err(source) => report.errors.push(rollback_err(path, source)),
                }
            }
            (OpType::FileDeploy, Action::Modified) => match op.backup_path() {
                Some(saved) => {
                    if dry_run {
                        log.dry_run(&format!(
                            "would restore {} from {}",
                            op.path,
                            saved.display()
                        ));
                        continue;
                    }
                    match backup::restore(&saved, path).and_then(|()| backup::discard(&saved)) {
                        Ok(()) => {
                            log.debug(&format!("restored {} from backup", op.path));
                            report.reverted += 1;
                        }
                        Err(source) => report.errors.push(rollback_err(path, source)),
                    }
                }
                None => {
                    log.info(&format!("{} was overwritten without a backup; left as is", op.path));
                    report.informational += 1;
                }
            },
            (OpType::DirCreate, _) => {
                if dry_run {
                    log.dry_run(&format!("would remove directory {} if empty", op.path));
                    continue;
                }
                match remove_dir_if_empty(path) {
                    Ok(true) => {
                        log.debug(&format!("removed directory {}", op.path));
                        report.reverted += 1;
                    }
                    Ok(false) => log.debug(&format!("kept directory {}", op.path)),
                    Err(source) => report.errors.push(rollback_err(path, source)),
                }
            }
            (OpType::ScriptRun, _) => {
                log.info(&format!("script {} ran; its effects are not reverted", op.path));
                report.informational += 1;
            }
            (OpType::PackageInstall, _) => {
                log.info(&format!("package {} was installed; remove it manually if unwanted", op.path));
                report.informational += 1;
            }
            (OpType::FileDeploy, Action::Executed) => {
                report.informational += 1;
            }
        }
    }

    for err in &report.errors {
        log.warn(&err.to_string());
    }
    report
}

fn rollback_err(path: &Path, source: std::io::Error) -> FileOpError {
    FileOpError::Rollback {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::engine::backup::{BACKUPS_SUBDIR, BackupStore};
    use crate::logging::Logger;
    use crate::state::BACKUP_KEY;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn log() -> Logger {
        Logger::new("test")
    }

    /// Sorted listing of every path under `root` with file contents.
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<String>> {
        walkdir::WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .map(|e| {
                let content = if e.path_is_symlink() {
                    std::fs::read_link(e.path())
                        .ok()
                        .map(|t| format!("-> {}", t.display()))
                } else {
                    std::fs::read_to_string(e.path()).ok()
                };
                (e.path().to_path_buf(), content)
            })
            .collect()
    }

    #[test]
    fn created_file_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        std::fs::write(&file, "x").unwrap();
        let report = rollback(&[Operation::file_deploy(Action::Created, &file)], &log(), false);
        assert!(!file.exists());
        assert_eq!(report.reverted, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn absent_path_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let ops = [Operation::file_deploy(Action::Symlinked, &tmp.path().join("gone"))];
        let report = rollback(&ops, &log(), false);
        assert!(report.is_clean());
    }

    #[test]
    fn non_empty_directory_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("d");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("user-file"), "mine").unwrap();
        let report = rollback(&[Operation::dir_create(&dir)], &log(), false);
        assert!(dir.join("user-file").exists());
        assert_eq!(report.reverted, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn scripts_and_packages_are_informational() {
        let ops = [
            Operation::script_run(Path::new("/m/install.sh")),
            Operation::package_install("ripgrep"),
        ];
        let report = rollback(&ops, &log(), false);
        assert_eq!(report.informational, 2);
        assert_eq!(report.reverted, 0);
    }

    #[test]
    fn modified_file_is_restored_and_backup_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("conf");
        std::fs::write(&file, "user").unwrap();
        let store = BackupStore::new(&tmp.path().join(BACKUPS_SUBDIR));
        let saved = store.backup("m", &file, "pre-existing file").unwrap();
        std::fs::write(&file, "deployed").unwrap();

        let op = Operation::file_deploy(Action::Modified, &file)
            .with_metadata(BACKUP_KEY, saved.path.display().to_string());
        let report = rollback(&[op], &log(), false);

        assert!(report.is_clean());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "user");
        assert!(!saved.path.exists());
    }

    #[test]
    fn missing_backup_is_collected_not_raised() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("conf");
        std::fs::write(&file, "deployed").unwrap();
        let created = tmp.path().join("other");
        std::fs::write(&created, "x").unwrap();

        let ops = [
            Operation::file_deploy(Action::Created, &created),
            Operation::file_deploy(Action::Modified, &file)
                .with_metadata(BACKUP_KEY, tmp.path().join("no-such-backup").display().to_string()),
        ];
        let report = rollback(&ops, &log(), false);

        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], FileOpError::Rollback { .. }));
        // the earlier operation is still reversed
        assert!(!created.exists());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        std::fs::write(&file, "x").unwrap();
        let report = rollback(&[Operation::file_deploy(Action::Created, &file)], &log(), true);
        assert!(file.exists());
        assert_eq!(report.reverted, 0);
    }

    #[cfg(unix)]
    #[test]
    fn replay_restores_pre_run_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home");
        std::fs::create_dir(&home).unwrap();
        std::fs::write(home.join(".bashrc"), "user bashrc").unwrap();
        let source = tmp.path().join("source");
        std::fs::write(&source, "repo").unwrap();
        let before = snapshot(&home);

        // Simulate a run: back up and overwrite .bashrc, create a nested
        // directory with a link in it, and run a script.
        let store = BackupStore::new(&tmp.path().join("state").join(BACKUPS_SUBDIR));
        let saved = store.backup("m", &home.join(".bashrc"), "pre-existing file").unwrap();
        std::fs::write(home.join(".bashrc"), "managed bashrc").unwrap();
        std::fs::create_dir_all(home.join(".config/app")).unwrap();
        std::os::unix::fs::symlink(&source, home.join(".config/app/conf")).unwrap();
        std::fs::write(home.join(".profile"), "copied").unwrap();

        let ops = vec![
            Operation::file_deploy(Action::Modified, &home.join(".bashrc"))
                .with_metadata(BACKUP_KEY, saved.path.display().to_string()),
            Operation::script_run(Path::new("/m/install.sh")),
            Operation::dir_create(&home.join(".config")),
            Operation::dir_create(&home.join(".config/app")),
            Operation::file_deploy(Action::Symlinked, &home.join(".config/app/conf")),
            Operation::file_deploy(Action::Created, &home.join(".profile")),
        ];
        assert_ne!(snapshot(&home), before);

        let report = rollback(&ops, &log(), false);
        assert!(report.is_clean());
        assert_eq!(report.reverted, 5);
        assert_eq!(report.informational, 1);
        assert_eq!(snapshot(&home), before);
    }
}
