//! Module manifest parsing and discovery.
//!
//! Each module lives in its own directory under `modules/` with a
//! `module.toml` manifest and optional scripts next to it:
//!
//! ```text
//! modules/git/
//! ├── module.toml
//! ├── install.sh          primary install script
//! ├── install-macos.sh    OS-specific script, run before install.sh
//! ├── verify.sh           verification script, run after file deployment
//! └── files/gitconfig.hbs
//! ```
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::toml_loader;
use crate::error::ConfigError;
use crate::module::{DEFAULT_PRIORITY, FileEntry, FileKind, Module, ModuleScripts, PromptSpec};

/// Manifest file name inside each module directory.
pub const MANIFEST_FILE: &str = "module.toml";
/// Primary install script name.
pub const INSTALL_SCRIPT: &str = "install.sh";
/// Verification script name.
pub const VERIFY_SCRIPT: &str = "verify.sh";

/// On-disk manifest shape.
#[derive(Debug, Deserialize)]
struct ManifestFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    os: Vec<String>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    files: Vec<FileSpec>,
    #[serde(default)]
    prompts: Vec<PromptSpec>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    notes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FileSpec {
    source: PathBuf,
    dest: String,
    #[serde(default, alias = "type")]
    kind: FileKind,
}

/// Parse a single module directory.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read or parsed, declares an
/// empty name, or has an invalid timeout.
pub fn load_module(dir: &Path) -> Result<Module, ConfigError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&manifest_path).map_err(|source| ConfigError::Io {
        path: manifest_path.clone(),
        source,
    })?;
    let raw: ManifestFile = toml_loader::parse_str(&manifest_path, &content)?;

    if raw.name.trim().is_empty() {
        return Err(ConfigError::InvalidManifest {
            path: manifest_path,
            message: "module name must not be empty".to_string(),
        });
    }

    let timeout = raw
        .timeout
        .as_deref()
        .map(toml_loader::parse_duration)
        .transpose()?;

    Ok(Module {
        name: raw.name,
        description: raw.description,
        version: raw.version.unwrap_or_else(|| "0.0.0".to_string()),
        priority: raw.priority.unwrap_or(DEFAULT_PRIORITY),
        dependencies: raw.dependencies,
        os: raw.os,
        requires: raw.requires,
        files: raw
            .files
            .into_iter()
            .map(|f| FileEntry {
                source: f.source,
                dest: f.dest,
                kind: f.kind,
            })
            .collect(),
        prompts: raw.prompts,
        tags: raw.tags,
        timeout,
        notes: raw.notes,
        dir: dir.to_path_buf(),
        manifest_path,
        scripts: discover_scripts(dir),
    })
}

/// Discover every module under `modules_dir`.
///
/// Directories without a manifest are ignored.  The result is sorted by
/// module name so discovery order never leaks into later stages.
///
/// # Errors
///
/// Returns an error if the directory cannot be read, any manifest is
/// invalid, or two manifests declare the same name.
pub fn discover(modules_dir: &Path) -> Result<Vec<Module>, ConfigError> {
    if !modules_dir.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(modules_dir).map_err(|source| ConfigError::Io {
        path: modules_dir.to_path_buf(),
        source,
    })?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.join(MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();

    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut modules = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let module = load_module(&dir)?;
        if let Some(first) = seen.get(&module.name) {
            return Err(ConfigError::DuplicateModule {
                name: module.name,
                first: first.clone(),
                second: module.manifest_path,
            });
        }
        seen.insert(module.name.clone(), module.manifest_path.clone());
        modules.push(module);
    }

    modules.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(modules)
}

/// Find `install.sh`, `verify.sh` and `install-<os>.sh` next to the manifest.
fn discover_scripts(dir: &Path) -> ModuleScripts {
    let install = Some(dir.join(INSTALL_SCRIPT)).filter(|p| p.is_file());
    let verify = Some(dir.join(VERIFY_SCRIPT)).filter(|p| p.is_file());

    let mut os_specific: Vec<(String, PathBuf)> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter_map(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    let os = name.strip_prefix("install-")?.strip_suffix(".sh")?;
                    (!os.is_empty() && e.path().is_file()).then(|| (os.to_string(), e.path()))
                })
                .collect()
        })
        .unwrap_or_default();
    os_specific.sort();

    ModuleScripts {
        install,
        verify,
        os_specific,
    }
}
