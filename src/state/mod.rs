//! Persisted per-module state.
//!
//! One JSON document per module lives under `<state-dir>/modules/`.  A
//! document is replaced as a whole on every commit; there is no partial
//! update and no locking, so concurrent runs are last-writer-wins.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::module::FileKind;

/// Sub-directory of the state dir that holds module documents.
pub const MODULES_SUBDIR: &str = "modules";

/// Metadata key under which a file operation records its backup location.
pub const BACKUP_KEY: &str = "backup";

/// Persisted lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Last run completed every step.
    Installed,
    /// Last run stopped at a failing step.
    Failed,
    /// Module was uninstalled but its record was kept.
    Removed,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Installed => "installed",
            Self::Failed => "failed",
            Self::Removed => "removed",
        })
    }
}

/// Kind of recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    /// A file was written, copied or linked at `path`.
    FileDeploy,
    /// A directory was created at `path`.
    DirCreate,
    /// A script was executed.
    ScriptRun,
    /// A script reported installing a package.
    PackageInstall,
}

/// What happened to the operation's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Path did not exist before.
    Created,
    /// Path existed and was overwritten.
    Modified,
    /// Path is now a symlink.
    Symlinked,
    /// Script or package step ran.
    Executed,
}

/// One entry of a module's append-only operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation type.
    #[serde(rename = "type")]
    pub op_type: OpType,
    /// Action verb.
    pub action: Action,
    /// Affected path (or package name for `package_install`).
    pub path: String,
    /// When the operation was performed.
    pub timestamp: DateTime<Utc>,
    /// Free-form details such as the backup location.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Operation {
    fn new(op_type: OpType, action: Action, path: String) -> Self {
        Self {
            op_type,
            action,
            path,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// A file written or linked at `path`.
    #[must_use]
    pub fn file_deploy(action: Action, path: &Path) -> Self {
        Self::new(OpType::FileDeploy, action, path.display().to_string())
    }

    /// A directory created at `path`.
    #[must_use]
    pub fn dir_create(path: &Path) -> Self {
        Self::new(OpType::DirCreate, Action::Created, path.display().to_string())
    }

    /// A script executed from `path`.
    #[must_use]
    pub fn script_run(path: &Path) -> Self {
        Self::new(OpType::ScriptRun, Action::Executed, path.display().to_string())
    }

    /// A package reported as installed by a script.
    #[must_use]
    pub fn package_install(name: &str) -> Self {
        Self::new(OpType::PackageInstall, Action::Executed, name.to_string())
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The backup recorded for this operation, if any.
    #[must_use]
    pub fn backup_path(&self) -> Option<PathBuf> {
        self.metadata.get(BACKUP_KEY).map(PathBuf::from)
    }
}

/// Deployment record for one file entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Absolute source path.
    pub source: PathBuf,
    /// Absolute destination path.
    pub dest: PathBuf,
    /// Deployment kind.
    pub kind: FileKind,
    /// Hash of the source (rendered output for templates) at deploy time.
    pub source_hash: String,
    /// Hash of what was written to the destination.
    pub deployed_hash: String,
    /// Destination content diverged from what was deployed.
    #[serde(default)]
    pub user_modified: bool,
    /// Last time the destination was inspected.
    pub last_checked: DateTime<Utc>,
}

/// Persisted record for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleState {
    /// Module name (document key).
    pub name: String,
    /// Lifecycle status.
    pub status: ModuleStatus,
    /// Module version at the last run.
    pub version: String,
    /// Module checksum at the last successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Config hash at the last run.
    #[serde(default)]
    pub config_hash: String,
    /// First time the module was recorded.
    pub installed_at: DateTime<Utc>,
    /// Last time the record was written.
    pub updated_at: DateTime<Utc>,
    /// Error text of the last failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Deployed files, in manifest order.
    #[serde(default)]
    pub files: Vec<FileState>,
    /// Operation log, oldest first.
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl ModuleState {
    /// Look up the file record for `dest`.
    #[must_use]
    pub fn file(&self, dest: &Path) -> Option<&FileState> {
        self.files.iter().find(|f| f.dest == dest)
    }

    /// Files currently flagged as user-modified.
    pub fn user_modified_files(&self) -> impl Iterator<Item = &FileState> {
        self.files.iter().filter(|f| f.user_modified)
    }
}

/// Key → document store for module state.
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Load the record for `name`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or decoded.
    fn load(&self, name: &str) -> Result<Option<ModuleState>, StateError>;

    /// Replace the record for `state.name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    fn save(&self, state: &ModuleState) -> Result<(), StateError>;

    /// Remove the record for `name`; a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    fn delete(&self, name: &str) -> Result<(), StateError>;

    /// Every stored record, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed or a record is invalid.
    fn list(&self) -> Result<Vec<ModuleState>, StateError>;
}

/// JSON-file store rooted at a state directory.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    /// Create a store under `state_dir/modules`.
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join(MODULES_SUBDIR),
        }
    }

    /// Path of the document for `name`.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl StateStore for JsonStateStore {
    fn load(&self, name: &str) -> Result<Option<ModuleState>, StateError> {
        let path = self.path_for(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Read {
                    module: name.to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StateError::Decode {
                module: name.to_string(),
                source,
            })
    }

    fn save(&self, state: &ModuleState) -> Result<(), StateError> {
        let write_err = |source| StateError::Write {
            module: state.name.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(state).map_err(|source| StateError::Encode {
            module: state.name.clone(),
            source,
        })?;

        std::fs::create_dir_all(&self.dir).map_err(write_err)?;
        let path = self.path_for(&state.name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &path).map_err(write_err)?;
        tracing::debug!("saved state for {} to {}", state.name, path.display());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StateError> {
        match std::fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Write {
                module: name.to_string(),
                source,
            }),
        }
    }

    fn list(&self) -> Result<Vec<ModuleState>, StateError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StateError::Read {
                    module: String::from("*"),
                    source,
                });
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        names.sort();

        let mut states = Vec::with_capacity(names.len());
        for name in names {
            if let Some(state) = self.load(&name)? {
                states.push(state);
            }
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }
}

/// In-memory store for tests and previews.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, ModuleState>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, ModuleState>> {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, name: &str) -> Result<Option<ModuleState>, StateError> {
        Ok(self.guard().get(name).cloned())
    }

    fn save(&self, state: &ModuleState) -> Result<(), StateError> {
        self.guard().insert(state.name.clone(), state.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StateError> {
        self.guard().remove(name);
        Ok(())
    }

    fn list(&self) -> Result<Vec<ModuleState>, StateError> {
        let mut states: Vec<ModuleState> = self.guard().values().cloned().collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }
}
