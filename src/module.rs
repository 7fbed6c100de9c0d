//! In-memory model of a discovered module.
//!
//! A [`Module`] is built once per run by [`crate::config::manifest`] and is
//! never mutated afterwards; every later stage (resolver, decision engine,
//! runner) borrows it.
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::platform::Os;

/// Default module priority; lower values run earlier within a topological level.
pub const DEFAULT_PRIORITY: i32 = 50;

/// How a file entry is materialised at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Destination is a symbolic link to the absolute source path.
    #[default]
    Symlink,
    /// Destination is a byte-for-byte copy of the source.
    Copy,
    /// Destination is the rendered output of the source template.
    Template,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Symlink => "symlink",
            Self::Copy => "copy",
            Self::Template => "template",
        })
    }
}

/// One file deployment declared by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Source path relative to the module directory.
    pub source: PathBuf,
    /// Destination as written in the manifest (`~/` and home-relative paths allowed).
    pub dest: String,
    /// Deployment kind.
    pub kind: FileKind,
}

impl FileEntry {
    /// Absolute source path inside `module_dir`.
    #[must_use]
    pub fn source_in(&self, module_dir: &Path) -> PathBuf {
        module_dir.join(&self.source)
    }

    /// Absolute destination path, expanding `~` and home-relative paths.
    #[must_use]
    pub fn dest_in(&self, home: &Path) -> PathBuf {
        expand_home(&self.dest, home)
    }
}

/// Expand a destination string against `home`.
///
/// `~` and `~/x` map into `home`; absolute paths are kept; any other relative
/// path is taken relative to `home`.
#[must_use]
pub fn expand_home(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return home.join(rest);
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

/// A question asked before a module's scripts run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    /// Answer key; exported to scripts as `MODKIT_PROMPT_<KEY>`.
    pub key: String,
    /// Question shown to the user.
    #[serde(default)]
    pub message: String,
    /// Answer used in unattended mode or when the user accepts the default.
    #[serde(default)]
    pub default: Option<String>,
    /// Secret reference resolved through the secrets provider instead of asking.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Script files discovered next to a module manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleScripts {
    /// Primary install script (`install.sh`).
    pub install: Option<PathBuf>,
    /// Verification script (`verify.sh`).
    pub verify: Option<PathBuf>,
    /// OS-specific scripts (`install-<os>.sh`), keyed by OS identifier.
    pub os_specific: Vec<(String, PathBuf)>,
}

impl ModuleScripts {
    /// The OS-specific script for `os`, if one exists.
    #[must_use]
    pub fn for_os(&self, os: Os) -> Option<&Path> {
        self.os_specific
            .iter()
            .find(|(id, _)| Os::from_id(id) == Some(os))
            .map(|(_, p)| p.as_path())
    }

    /// Every script path, in no particular order.
    pub fn all(&self) -> impl Iterator<Item = &Path> {
        self.install
            .iter()
            .chain(self.verify.iter())
            .map(PathBuf::as_path)
            .chain(self.os_specific.iter().map(|(_, p)| p.as_path()))
    }
}

/// An immutable, discovered module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Unique module name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Declared version string.
    pub version: String,
    /// Ordering hint within a topological level (lower runs earlier).
    pub priority: i32,
    /// Names of modules that must run before this one.
    pub dependencies: Vec<String>,
    /// Compatible OS identifiers; empty means all.
    pub os: Vec<String>,
    /// Commands that must be available on `PATH`.
    pub requires: Vec<String>,
    /// File deployments.
    pub files: Vec<FileEntry>,
    /// Questions asked before scripts run.
    pub prompts: Vec<PromptSpec>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Per-module script timeout override.
    pub timeout: Option<Duration>,
    /// Notes shown after a successful install.
    pub notes: Vec<String>,
    /// Directory containing the manifest.
    pub dir: PathBuf,
    /// Path of the manifest file.
    pub manifest_path: PathBuf,
    /// Scripts discovered next to the manifest.
    pub scripts: ModuleScripts,
}

impl Module {
    /// Create a module with defaults for everything but its name and
    /// directory.  Mostly useful for tests and programmatic construction.
    #[must_use]
    pub fn new(name: &str, dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            version: "0.0.0".to_string(),
            priority: DEFAULT_PRIORITY,
            dependencies: Vec::new(),
            os: Vec::new(),
            requires: Vec::new(),
            files: Vec::new(),
            prompts: Vec::new(),
            tags: Vec::new(),
            timeout: None,
            notes: Vec::new(),
            dir: dir.to_path_buf(),
            manifest_path: dir.join(crate::config::manifest::MANIFEST_FILE),
            scripts: ModuleScripts::default(),
        }
    }

    /// Builder-style: set dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(ToString::to_string).collect();
        self
    }

    /// Builder-style: set priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder-style: set OS compatibility list.
    #[must_use]
    pub fn with_os(mut self, os: &[&str]) -> Self {
        self.os = os.iter().map(ToString::to_string).collect();
        self
    }

    /// Script timeout: the module override or `default`.
    #[must_use]
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_handles_tilde_forms() {
        let home = Path::new("/home/me");
        assert_eq!(expand_home("~", home), PathBuf::from("/home/me"));
        assert_eq!(
            expand_home("~/.gitconfig", home),
            PathBuf::from("/home/me/.gitconfig")
        );
        assert_eq!(
            expand_home(".config/nvim", home),
            PathBuf::from("/home/me/.config/nvim")
        );
    }

    #[cfg(unix)]
    #[test]
    fn expand_home_keeps_absolute_paths() {
        let home = Path::new("/home/me");
        assert_eq!(expand_home("/etc/motd", home), PathBuf::from("/etc/motd"));
    }

    #[test]
    fn new_module_uses_defaults() {
        let m = Module::new("git", Path::new("/repo/modules/git"));
        assert_eq!(m.priority, DEFAULT_PRIORITY);
        assert_eq!(m.version, "0.0.0");
        assert!(m.dependencies.is_empty());
        assert!(m.manifest_path.ends_with("module.toml"));
    }

    #[test]
    fn effective_timeout_prefers_override() {
        let mut m = Module::new("slow", Path::new("/m"));
        let default = Duration::from_secs(600);
        assert_eq!(m.effective_timeout(default), default);
        m.timeout = Some(Duration::from_secs(5));
        assert_eq!(m.effective_timeout(default), Duration::from_secs(5));
    }

    #[test]
    fn scripts_for_os_matches_aliases() {
        let scripts = ModuleScripts {
            install: None,
            verify: None,
            os_specific: vec![("darwin".to_string(), PathBuf::from("install-darwin.sh"))],
        };
        assert_eq!(
            scripts.for_os(Os::MacOs),
            Some(Path::new("install-darwin.sh"))
        );
        assert!(scripts.for_os(Os::Linux).is_none());
    }

    #[test]
    fn file_kind_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: FileKind,
        }
        let w: Wrapper = toml::from_str("kind = \"template\"").unwrap();
        assert_eq!(w.kind, FileKind::Template);
    }
}
