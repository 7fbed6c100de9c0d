//! Idempotence decisions.
//!
//! Everything here is a pure function of its arguments: the runner gathers
//! live facts (hashes, what is on disk) and persisted state, and these
//! functions say what to do.  Rules are evaluated in order; the first match
//! wins.
use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::context::RunFlags;
use crate::hash;
use crate::logging::ModuleOutcome;
use crate::module::{FileEntry, FileKind, Module};
use crate::state::{FileState, ModuleState, ModuleStatus};

/// What to do with a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No record exists.
    InstallFresh,
    /// `--force` was given.
    Force,
    /// Last run failed; try again.
    InstallRetry,
    /// Manifest, scripts or version changed.
    UpdateModule,
    /// Module configuration changed.
    UpdateConfig,
    /// Nothing to do.
    Skip,
}

impl Decision {
    /// Whether the module's steps run.
    #[must_use]
    pub const fn runs(self) -> bool {
        !matches!(self, Self::Skip)
    }

    /// Outcome recorded when a run with this decision succeeds.
    #[must_use]
    pub const fn outcome(self) -> ModuleOutcome {
        match self {
            Self::InstallFresh | Self::Force | Self::InstallRetry => ModuleOutcome::Installed,
            Self::UpdateModule | Self::UpdateConfig => ModuleOutcome::Updated,
            Self::Skip => ModuleOutcome::Skipped,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InstallFresh => "install",
            Self::Force => "force",
            Self::InstallRetry => "retry",
            Self::UpdateModule => "update",
            Self::UpdateConfig => "update-config",
            Self::Skip => "skip",
        })
    }
}

/// A module decision with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDecision {
    /// What to do.
    pub decision: Decision,
    /// Human-readable reason.
    pub reason: String,
}

impl ModuleDecision {
    fn new(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
        }
    }
}

/// Live hashes of a module, computed once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Module checksum; `None` when it could not be computed.
    pub checksum: Option<String>,
    /// Config hash.
    pub config_hash: String,
}

/// Decide what to do with `module`.
///
/// A missing live checksum (hashing failed) is treated as a definition
/// change, never as up to date.
#[must_use]
pub fn decide_module(
    module: &Module,
    existing: Option<&ModuleState>,
    live: &Fingerprint,
    flags: &RunFlags,
) -> ModuleDecision {
    let Some(state) = existing else {
        return ModuleDecision::new(Decision::InstallFresh, "not previously installed");
    };
    if state.status == ModuleStatus::Removed {
        return ModuleDecision::new(Decision::InstallFresh, "previously uninstalled");
    }
    if flags.force {
        return ModuleDecision::new(Decision::Force, "forced");
    }
    if state.status == ModuleStatus::Failed {
        return if flags.skip_failed {
            ModuleDecision::new(Decision::Skip, "previous run failed (--skip-failed)")
        } else {
            ModuleDecision::new(Decision::InstallRetry, "previous run failed")
        };
    }
    match (&live.checksum, &state.checksum) {
        (None, _) => {
            return ModuleDecision::new(Decision::UpdateModule, "module checksum unavailable");
        }
        (Some(current), Some(stored)) if current != stored => {
            return ModuleDecision::new(Decision::UpdateModule, "module definition changed");
        }
        _ => {}
    }
    if live.config_hash != state.config_hash {
        return ModuleDecision::new(Decision::UpdateConfig, "configuration changed");
    }
    if module.version != state.version {
        return ModuleDecision::new(
            Decision::UpdateModule,
            format!("version changed ({} -> {})", state.version, module.version),
        );
    }
    ModuleDecision::new(Decision::Skip, "already up to date")
}

/// What is currently at a destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationState {
    /// Nothing.
    Missing,
    /// A symbolic link.
    Symlink {
        /// Link target as stored in the link.
        target: PathBuf,
    },
    /// A regular file or directory with the given content hash.
    Content {
        /// Content hash (tree hash for directories).
        hash: String,
    },
}

impl DestinationState {
    /// Inspect `path` without following symlinks.
    ///
    /// # Errors
    ///
    /// Returns an error if the path exists but cannot be read.
    pub fn inspect(path: &Path) -> std::io::Result<Self> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::Missing),
            Err(e) => return Err(e),
        };
        if meta.file_type().is_symlink() {
            return Ok(Self::Symlink {
                target: std::fs::read_link(path)?,
            });
        }
        Ok(Self::Content {
            hash: hash::path_hash(path)?,
        })
    }

    /// Hash comparable with [`FileState::deployed_hash`].
    #[must_use]
    pub fn hash(&self) -> Option<String> {
        match self {
            Self::Missing => None,
            Self::Symlink { target } => Some(link_hash(target)),
            Self::Content { hash } => Some(hash.clone()),
        }
    }

    /// Whether something exists at the path.
    #[must_use]
    pub const fn exists(&self) -> bool {
        !matches!(self, Self::Missing)
    }
}

/// Hash recorded for a deployed symlink: the hash of its target path.
#[must_use]
pub fn link_hash(target: &Path) -> String {
    hash::bytes_hash(target.to_string_lossy().as_bytes())
}

/// A file decision with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDecision {
    /// Whether to (re)deploy the file.
    pub deploy: bool,
    /// Whether the destination diverged from what was last deployed.
    pub user_modified: bool,
    /// Set when the current destination must be backed up before deploying.
    pub backup: Option<&'static str>,
    /// Human-readable reason.
    pub reason: &'static str,
}

impl FileDecision {
    const fn deploy(reason: &'static str) -> Self {
        Self {
            deploy: true,
            user_modified: false,
            backup: None,
            reason,
        }
    }

    const fn skip(reason: &'static str) -> Self {
        Self {
            deploy: false,
            user_modified: false,
            backup: None,
            reason,
        }
    }
}

/// Decide whether to deploy `entry`.
///
/// `source_hash` is the hash of what would be deployed (rendered output for
/// templates); `expected_source` is the absolute path a symlink must point
/// at.  When the decision is to deploy over an existing destination,
/// [`FileDecision::backup`] carries the reason for backing it up first.
#[must_use]
pub fn decide_file(
    entry: &FileEntry,
    source_hash: &str,
    existing: Option<&FileState>,
    dest: &DestinationState,
    expected_source: &Path,
    flags: &RunFlags,
) -> FileDecision {
    let mut decision = file_rule(entry, source_hash, existing, dest, expected_source, flags);
    if decision.deploy {
        decision.backup = backup_reason(existing, dest);
    }
    decision
}

fn file_rule(
    entry: &FileEntry,
    source_hash: &str,
    existing: Option<&FileState>,
    dest: &DestinationState,
    expected_source: &Path,
    flags: &RunFlags,
) -> FileDecision {
    if flags.force {
        return FileDecision::deploy("forced");
    }
    let Some(state) = existing else {
        return FileDecision::deploy("not previously deployed");
    };
    if state.source_hash != source_hash {
        return FileDecision::deploy("source changed");
    }
    if !dest.exists() {
        return FileDecision::deploy("destination missing");
    }
    match entry.kind {
        FileKind::Symlink => match dest {
            DestinationState::Symlink { target } if target == expected_source => {
                FileDecision::skip("already correct")
            }
            _ => FileDecision::deploy("wrong target"),
        },
        FileKind::Copy | FileKind::Template => {
            if dest.hash().as_deref() == Some(state.deployed_hash.as_str()) {
                FileDecision::skip("unchanged")
            } else {
                FileDecision {
                    user_modified: true,
                    ..FileDecision::skip("modified since last deploy")
                }
            }
        }
    }
}

/// Backup reason for a destination that still holds what was last deployed.
///
/// The copy only exists so a failed run can be rolled back.
pub const PREVIOUS_DEPLOYMENT: &str = "previous deployment";

fn backup_reason(existing: Option<&FileState>, dest: &DestinationState) -> Option<&'static str> {
    if matches!(dest, DestinationState::Missing) {
        return None;
    }
    let Some(state) = existing else {
        return Some("pre-existing file");
    };
    if state.user_modified || dest.hash().as_deref() != Some(state.deployed_hash.as_str()) {
        Some("user-modified file")
    } else {
        Some(PREVIOUS_DEPLOYMENT)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn module() -> Module {
        Module::new("git", Path::new("/repo/modules/git"))
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint {
            checksum: Some("sum".into()),
            config_hash: "cfg".into(),
        }
    }

    fn state(status: ModuleStatus) -> ModuleState {
        let now = Utc::now();
        ModuleState {
            name: "git".into(),
            status,
            version: "0.0.0".into(),
            checksum: Some("sum".into()),
            config_hash: "cfg".into(),
            installed_at: now,
            updated_at: now,
            last_error: None,
            files: Vec::new(),
            operations: Vec::new(),
        }
    }

    fn entry(kind: FileKind) -> FileEntry {
        FileEntry {
            source: PathBuf::from("gitconfig"),
            dest: "~/.gitconfig".into(),
            kind,
        }
    }

    fn file_state(kind: FileKind, source_hash: &str, deployed_hash: &str) -> FileState {
        FileState {
            source: PathBuf::from("/repo/modules/git/gitconfig"),
            dest: PathBuf::from("/home/u/.gitconfig"),
            kind,
            source_hash: source_hash.into(),
            deployed_hash: deployed_hash.into(),
            user_modified: false,
            last_checked: Utc::now(),
        }
    }

    fn flags() -> RunFlags {
        RunFlags::default()
    }

    // ------------------------------------------------------------------
    // decide_module
    // ------------------------------------------------------------------

    #[test]
    fn no_state_installs_fresh() {
        let d = decide_module(&module(), None, &fingerprint(), &flags());
        assert_eq!(d.decision, Decision::InstallFresh);
        assert_eq!(d.decision.outcome(), ModuleOutcome::Installed);
    }

    #[test]
    fn removed_record_installs_fresh() {
        let existing = state(ModuleStatus::Removed);
        let d = decide_module(&module(), Some(&existing), &fingerprint(), &flags());
        assert_eq!(d.decision, Decision::InstallFresh);
        assert_eq!(d.reason, "previously uninstalled");
    }

    #[test]
    fn no_state_wins_over_force() {
        let forced = RunFlags {
            force: true,
            ..flags()
        };
        let d = decide_module(&module(), None, &fingerprint(), &forced);
        assert_eq!(d.decision, Decision::InstallFresh);
    }

    #[test]
    fn force_wins_over_everything_else() {
        let forced = RunFlags {
            force: true,
            skip_failed: true,
            ..flags()
        };
        let failed = state(ModuleStatus::Failed);
        let d = decide_module(&module(), Some(&failed), &fingerprint(), &forced);
        assert_eq!(d.decision, Decision::Force);
    }

    #[test]
    fn failed_state_retries_or_skips() {
        let failed = state(ModuleStatus::Failed);
        let d = decide_module(&module(), Some(&failed), &fingerprint(), &flags());
        assert_eq!(d.decision, Decision::InstallRetry);

        let skip = RunFlags {
            skip_failed: true,
            ..flags()
        };
        let d = decide_module(&module(), Some(&failed), &fingerprint(), &skip);
        assert_eq!(d.decision, Decision::Skip);
    }

    #[test]
    fn checksum_change_updates_module() {
        let mut live = fingerprint();
        live.checksum = Some("other".into());
        let d = decide_module(&module(), Some(&state(ModuleStatus::Installed)), &live, &flags());
        assert_eq!(d.decision, Decision::UpdateModule);
        assert_eq!(d.decision.outcome(), ModuleOutcome::Updated);
    }

    #[test]
    fn missing_stored_checksum_does_not_force_update() {
        let mut stored = state(ModuleStatus::Installed);
        stored.checksum = None;
        let d = decide_module(&module(), Some(&stored), &fingerprint(), &flags());
        assert_eq!(d.decision, Decision::Skip);
    }

    #[test]
    fn unavailable_live_checksum_is_conservative() {
        let live = Fingerprint {
            checksum: None,
            config_hash: "cfg".into(),
        };
        let d = decide_module(&module(), Some(&state(ModuleStatus::Installed)), &live, &flags());
        assert_eq!(d.decision, Decision::UpdateModule);
    }

    #[test]
    fn config_change_updates_config() {
        let mut live = fingerprint();
        live.config_hash = "new".into();
        let d = decide_module(&module(), Some(&state(ModuleStatus::Installed)), &live, &flags());
        assert_eq!(d.decision, Decision::UpdateConfig);
    }

    #[test]
    fn version_change_updates_module() {
        let mut stored = state(ModuleStatus::Installed);
        stored.version = "0.9.0".into();
        let d = decide_module(&module(), Some(&stored), &fingerprint(), &flags());
        assert_eq!(d.decision, Decision::UpdateModule);
        assert_eq!(d.reason, "version changed (0.9.0 -> 0.0.0)");
    }

    #[test]
    fn checksum_rule_precedes_config_rule() {
        let live = Fingerprint {
            checksum: Some("other".into()),
            config_hash: "new".into(),
        };
        let d = decide_module(&module(), Some(&state(ModuleStatus::Installed)), &live, &flags());
        assert_eq!(d.decision, Decision::UpdateModule);
    }

    #[test]
    fn unchanged_module_skips_and_is_pure() {
        let stored = state(ModuleStatus::Installed);
        let first = decide_module(&module(), Some(&stored), &fingerprint(), &flags());
        let second = decide_module(&module(), Some(&stored), &fingerprint(), &flags());
        assert_eq!(first, second);
        assert_eq!(first.decision, Decision::Skip);
        assert_eq!(first.reason, "already up to date");
        assert!(!first.decision.runs());
    }

    // ------------------------------------------------------------------
    // decide_file
    // ------------------------------------------------------------------

    #[test]
    fn unrecorded_file_deploys_and_backs_up_existing() {
        let dest = DestinationState::Content { hash: "h".into() };
        let d = decide_file(&entry(FileKind::Copy), "s", None, &dest, Path::new("/x"), &flags());
        assert!(d.deploy);
        assert_eq!(d.reason, "not previously deployed");
        assert_eq!(d.backup, Some("pre-existing file"));

        let d = decide_file(
            &entry(FileKind::Copy),
            "s",
            None,
            &DestinationState::Missing,
            Path::new("/x"),
            &flags(),
        );
        assert_eq!(d.backup, None);
    }

    #[test]
    fn source_change_redeploys() {
        let rec = file_state(FileKind::Copy, "old", "old");
        let dest = DestinationState::Content { hash: "old".into() };
        let d = decide_file(&entry(FileKind::Copy), "new", Some(&rec), &dest, Path::new("/x"), &flags());
        assert!(d.deploy);
        assert_eq!(d.reason, "source changed");
        assert_eq!(d.backup, Some(PREVIOUS_DEPLOYMENT));
    }

    #[test]
    fn source_change_backs_up_user_edits() {
        let rec = file_state(FileKind::Copy, "old", "old");
        let dest = DestinationState::Content {
            hash: "edited".into(),
        };
        let d = decide_file(&entry(FileKind::Copy), "new", Some(&rec), &dest, Path::new("/x"), &flags());
        assert!(d.deploy);
        assert_eq!(d.backup, Some("user-modified file"));
    }

    #[test]
    fn missing_destination_redeploys() {
        let rec = file_state(FileKind::Copy, "s", "s");
        let d = decide_file(
            &entry(FileKind::Copy),
            "s",
            Some(&rec),
            &DestinationState::Missing,
            Path::new("/x"),
            &flags(),
        );
        assert!(d.deploy);
        assert_eq!(d.reason, "destination missing");
    }

    #[test]
    fn correct_symlink_is_never_redeployed() {
        let target = PathBuf::from("/repo/modules/git/gitconfig");
        let rec = file_state(FileKind::Symlink, "s", &link_hash(&target));
        let dest = DestinationState::Symlink {
            target: target.clone(),
        };
        let d = decide_file(&entry(FileKind::Symlink), "s", Some(&rec), &dest, &target, &flags());
        assert!(!d.deploy);
        assert_eq!(d.reason, "already correct");
    }

    #[test]
    fn wrong_symlink_target_redeploys() {
        let rec = file_state(FileKind::Symlink, "s", "x");
        let dest = DestinationState::Symlink {
            target: PathBuf::from("/elsewhere"),
        };
        let d = decide_file(
            &entry(FileKind::Symlink),
            "s",
            Some(&rec),
            &dest,
            Path::new("/repo/modules/git/gitconfig"),
            &flags(),
        );
        assert!(d.deploy);
        assert_eq!(d.reason, "wrong target");
    }

    #[test]
    fn unchanged_copy_is_skipped() {
        let rec = file_state(FileKind::Copy, "s", "d");
        let dest = DestinationState::Content { hash: "d".into() };
        let d = decide_file(&entry(FileKind::Copy), "s", Some(&rec), &dest, Path::new("/x"), &flags());
        assert!(!d.deploy);
        assert!(!d.user_modified);
        assert_eq!(d.reason, "unchanged");
    }

    #[test]
    fn edited_copy_is_protected() {
        let rec = file_state(FileKind::Template, "s", "d");
        let dest = DestinationState::Content {
            hash: "edited".into(),
        };
        let d = decide_file(&entry(FileKind::Template), "s", Some(&rec), &dest, Path::new("/x"), &flags());
        assert!(!d.deploy);
        assert!(d.user_modified);
        assert_eq!(d.backup, None);
    }

    #[test]
    fn force_redeploys_and_backs_up_edits() {
        let rec = file_state(FileKind::Copy, "s", "d");
        let dest = DestinationState::Content {
            hash: "edited".into(),
        };
        let forced = RunFlags {
            force: true,
            ..flags()
        };
        let d = decide_file(&entry(FileKind::Copy), "s", Some(&rec), &dest, Path::new("/x"), &forced);
        assert!(d.deploy);
        assert_eq!(d.reason, "forced");
        assert_eq!(d.backup, Some("user-modified file"));
    }

    #[test]
    fn decide_file_is_pure() {
        let rec = file_state(FileKind::Copy, "s", "d");
        let dest = DestinationState::Content { hash: "d".into() };
        let a = decide_file(&entry(FileKind::Copy), "s", Some(&rec), &dest, Path::new("/x"), &flags());
        let b = decide_file(&entry(FileKind::Copy), "s", Some(&rec), &dest, Path::new("/x"), &flags());
        assert_eq!(a, b);
    }

    // ------------------------------------------------------------------
    // DestinationState
    // ------------------------------------------------------------------

    #[test]
    fn inspect_reports_missing_content_and_links() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        assert_eq!(DestinationState::inspect(&file).unwrap(), DestinationState::Missing);

        std::fs::write(&file, "hello").unwrap();
        assert_eq!(
            DestinationState::inspect(&file).unwrap(),
            DestinationState::Content {
                hash: hash::bytes_hash(b"hello")
            }
        );

        #[cfg(unix)]
        {
            let link = tmp.path().join("l");
            std::os::unix::fs::symlink(&file, &link).unwrap();
            assert_eq!(
                DestinationState::inspect(&link).unwrap(),
                DestinationState::Symlink {
                    target: file.clone()
                }
            );
        }
    }
}
