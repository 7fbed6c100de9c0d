//! Uninstall command implementation.
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

use crate::cli::{GlobalOpts, UninstallOpts};
use crate::config::Config;
use crate::engine::rollback::rollback;
use crate::logging::{Log, Logger, ModuleOutcome};
use crate::state::{JsonStateStore, ModuleStatus, StateStore};

/// Run the uninstall command.
///
/// # Errors
///
/// Returns an error if configuration loading fails or any module could not
/// be fully uninstalled.
pub fn run(global: &GlobalOpts, opts: &UninstallOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let store = JsonStateStore::new(&setup.state_dir);
    uninstall(
        &store,
        &setup.config,
        &opts.modules,
        global.dry_run,
        log.as_ref(),
    );
    super::finish(log)
}

/// Reverse every recorded operation of `modules` and drop their records.
///
/// A module whose operations cannot all be reversed keeps its record with
/// status `removed` so a later uninstall can retry.
pub fn uninstall(
    store: &dyn StateStore,
    config: &Config,
    modules: &[String],
    dry_run: bool,
    log: &dyn Log,
) {
    for name in modules {
        log.stage(&format!("Uninstalling {name}"));
        let state = match store.load(name) {
            Ok(Some(state)) => state,
            Ok(None) => {
                log.warn(&format!("{name} is not installed"));
                log.record_module(name, ModuleOutcome::Skipped, Some("not installed"));
                continue;
            }
            Err(e) => {
                log.error(&e.to_string());
                log.record_module(name, ModuleOutcome::Failed, Some("unreadable state"));
                continue;
            }
        };

        let dependents = dependents(store, config, name, modules);
        if !dependents.is_empty() {
            log.warn(&format!(
                "{name} is required by installed module(s): {}",
                dependents.join(", ")
            ));
        }

        let report = rollback(&state.operations, log, dry_run);
        if dry_run {
            log.record_module(name, ModuleOutcome::DryRun, None);
            continue;
        }

        if report.is_clean() {
            match store.delete(name) {
                Ok(()) => log.record_module(
                    name,
                    ModuleOutcome::Removed,
                    Some(&format!("{} operation(s) reverted", report.reverted)),
                ),
                Err(e) => {
                    log.error(&e.to_string());
                    log.record_module(name, ModuleOutcome::Failed, Some("state not deleted"));
                }
            }
            continue;
        }

        let message = format!(
            "{} operation(s) could not be reversed",
            report.errors.len()
        );
        let mut state = state;
        state.status = ModuleStatus::Removed;
        state.updated_at = Utc::now();
        state.last_error = Some(message.clone());
        if let Err(e) = store.save(&state) {
            log.warn(&e.to_string());
        }
        log.record_module(name, ModuleOutcome::Failed, Some(&message));
    }
}

/// Installed modules that declare a dependency on `name` and are not being
/// uninstalled with it.
fn dependents(
    store: &dyn StateStore,
    config: &Config,
    name: &str,
    removing: &[String],
) -> Vec<String> {
    store
        .list()
        .unwrap_or_default()
        .into_iter()
        .filter(|s| s.status == ModuleStatus::Installed && !removing.contains(&s.name))
        .filter(|s| {
            config
                .module(&s.name)
                .is_some_and(|m| m.dependencies.iter().any(|d| d == name))
        })
        .map(|s| s.name)
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config::settings::Settings;
    use crate::module::Module;
    use crate::state::{Action, MemoryStateStore, ModuleState, Operation};
    use std::path::Path;

    fn record(name: &str, operations: Vec<Operation>) -> ModuleState {
        let now = Utc::now();
        ModuleState {
            name: name.into(),
            status: ModuleStatus::Installed,
            version: "1.0.0".into(),
            checksum: Some("sum".into()),
            config_hash: String::new(),
            installed_at: now,
            updated_at: now,
            last_error: None,
            files: Vec::new(),
            operations,
        }
    }

    fn config(modules: Vec<Module>) -> Config {
        Config {
            root: "/repo".into(),
            settings: Settings::default(),
            modules,
        }
    }

    #[test]
    fn uninstall_reverts_operations_and_deletes_record() {
        let tmp = tempfile::tempdir().unwrap();
        let deployed = tmp.path().join(".gitconfig");
        std::fs::write(&deployed, "x").unwrap();
        let store = MemoryStateStore::new();
        store
            .save(&record("git", vec![Operation::file_deploy(Action::Created, &deployed)]))
            .unwrap();
        let log = Logger::new("test");

        uninstall(&store, &config(Vec::new()), &["git".into()], false, &log);

        assert!(!deployed.exists());
        assert!(store.load("git").unwrap().is_none());
        assert_eq!(log.entries()[0].outcome, ModuleOutcome::Removed);
    }

    #[test]
    fn dry_run_keeps_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let deployed = tmp.path().join(".gitconfig");
        std::fs::write(&deployed, "x").unwrap();
        let store = MemoryStateStore::new();
        store
            .save(&record("git", vec![Operation::file_deploy(Action::Created, &deployed)]))
            .unwrap();
        let log = Logger::new("test");

        uninstall(&store, &config(Vec::new()), &["git".into()], true, &log);

        assert!(deployed.exists());
        assert!(store.load("git").unwrap().is_some());
        assert_eq!(log.entries()[0].outcome, ModuleOutcome::DryRun);
    }

    #[test]
    fn unknown_module_is_skipped() {
        let store = MemoryStateStore::new();
        let log = Logger::new("test");
        uninstall(&store, &config(Vec::new()), &["nope".into()], false, &log);
        assert_eq!(log.entries()[0].outcome, ModuleOutcome::Skipped);
        assert_eq!(log.failure_count(), 0);
    }

    #[test]
    fn partial_failure_keeps_removed_record() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("conf");
        std::fs::write(&file, "deployed").unwrap();
        let op = Operation::file_deploy(Action::Modified, &file).with_metadata(
            crate::state::BACKUP_KEY,
            tmp.path().join("missing-backup").display().to_string(),
        );
        let store = MemoryStateStore::new();
        store.save(&record("app", vec![op])).unwrap();
        let log = Logger::new("test");

        uninstall(&store, &config(Vec::new()), &["app".into()], false, &log);

        let kept = store.load("app").unwrap().unwrap();
        assert_eq!(kept.status, ModuleStatus::Removed);
        assert!(kept.last_error.is_some());
        assert_eq!(log.failure_count(), 1);
    }

    #[test]
    fn dependents_exclude_modules_removed_together() {
        let store = MemoryStateStore::new();
        for name in ["git", "zsh", "tmux"] {
            store.save(&record(name, Vec::new())).unwrap();
        }
        let config = config(vec![
            Module::new("git", Path::new("/repo/modules/git")),
            Module::new("zsh", Path::new("/repo/modules/zsh")).with_dependencies(&["git"]),
            Module::new("tmux", Path::new("/repo/modules/tmux")).with_dependencies(&["git"]),
        ]);

        assert_eq!(
            dependents(&store, &config, "git", &["git".into()]),
            vec!["tmux", "zsh"]
        );
        assert_eq!(
            dependents(&store, &config, "git", &["git".into(), "zsh".into()]),
            vec!["tmux"]
        );
        assert!(dependents(&store, &config, "zsh", &["zsh".into()]).is_empty());
    }
}
