pub mod completions;
pub mod install;
pub mod list;
pub mod status;
pub mod uninstall;
pub mod version;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::cli::GlobalOpts;
use crate::config::{Config, MODULES_DIR};
use crate::logging::Logger;

/// Environment variable overriding the repository root.
pub const ROOT_ENV: &str = "MODKIT_ROOT";

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "MODKIT_STATE_DIR";

/// Shared state produced by the common command setup sequence.
#[derive(Debug)]
pub struct CommandSetup {
    pub config: Config,
    pub state_dir: PathBuf,
}

impl CommandSetup {
    /// Resolve the root and state directories and load all configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the root or state directory cannot be determined,
    /// or any manifest or the settings file fails to parse.
    pub fn init(global: &GlobalOpts, log: &Logger) -> Result<Self> {
        let root = resolve_root(global)?;
        let state_dir = resolve_state_dir(global)?;

        log.stage("Loading modules");
        let config = Config::load(&root)?;
        log.info(&format!(
            "found {} module(s) in {}",
            config.modules.len(),
            root.join(MODULES_DIR).display()
        ));
        log.debug(&format!("state directory: {}", state_dir.display()));

        Ok(Self { config, state_dir })
    }
}

/// Print the summary and bail if any module failed.
///
/// # Errors
///
/// Returns an error if one or more modules recorded a failure.
pub fn finish(log: &Logger) -> Result<()> {
    log.print_summary();

    let count = log.failure_count();
    if count > 0 {
        anyhow::bail!("{count} module(s) failed");
    }
    Ok(())
}

/// Resolve the repository root: `--root`, then `MODKIT_ROOT`, then the
/// current directory when it holds a `modules/` directory.
///
/// # Errors
///
/// Returns an error if none of those yields a root.
pub fn resolve_root(global: &GlobalOpts) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    root_from(
        global.root.as_deref(),
        std::env::var(ROOT_ENV).ok(),
        &cwd,
    )
    .ok_or_else(|| {
        anyhow::anyhow!("cannot determine module repository root. Use --root or set {ROOT_ENV}")
    })
}

fn root_from(explicit: Option<&Path>, env: Option<String>, cwd: &Path) -> Option<PathBuf> {
    if let Some(root) = explicit {
        return Some(root.to_path_buf());
    }
    if let Some(root) = env.filter(|r| !r.is_empty()) {
        return Some(PathBuf::from(root));
    }
    cwd.join(MODULES_DIR).is_dir().then(|| cwd.to_path_buf())
}

/// Resolve the state directory: `--state-dir`, then `MODKIT_STATE_DIR`, then
/// `$XDG_STATE_HOME/modkit`, then `~/.local/state/modkit`.
///
/// # Errors
///
/// Returns an error if no home directory is known.
pub fn resolve_state_dir(global: &GlobalOpts) -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok();
    state_dir_from(
        global.state_dir.as_deref(),
        std::env::var(STATE_DIR_ENV).ok(),
        std::env::var("XDG_STATE_HOME").ok(),
        home,
    )
    .ok_or_else(|| {
        anyhow::anyhow!("cannot determine state directory. Use --state-dir or set {STATE_DIR_ENV}")
    })
}

fn state_dir_from(
    explicit: Option<&Path>,
    env: Option<String>,
    xdg_state_home: Option<String>,
    home: Option<String>,
) -> Option<PathBuf> {
    if let Some(dir) = explicit {
        return Some(dir.to_path_buf());
    }
    if let Some(dir) = env.filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    if let Some(xdg) = xdg_state_home.filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(xdg).join("modkit"));
    }
    home.map(|h| PathBuf::from(h).join(".local").join("state").join("modkit"))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn explicit_root_wins() {
        let root = root_from(
            Some(Path::new("/explicit")),
            Some("/env".into()),
            Path::new("/"),
        );
        assert_eq!(root, Some(PathBuf::from("/explicit")));
    }

    #[test]
    fn env_root_before_cwd() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join(MODULES_DIR)).unwrap();
        let root = root_from(None, Some("/env".into()), tmp.path());
        assert_eq!(root, Some(PathBuf::from("/env")));
    }

    #[test]
    fn cwd_used_only_with_modules_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(root_from(None, None, tmp.path()), None);

        std::fs::create_dir(tmp.path().join(MODULES_DIR)).unwrap();
        assert_eq!(
            root_from(None, Some(String::new()), tmp.path()),
            Some(tmp.path().to_path_buf())
        );
    }

    #[test]
    fn state_dir_precedence() {
        let home = Some("/home/me".to_string());
        assert_eq!(
            state_dir_from(Some(Path::new("/flag")), Some("/env".into()), None, home.clone()),
            Some(PathBuf::from("/flag"))
        );
        assert_eq!(
            state_dir_from(None, Some("/env".into()), Some("/xdg".into()), home.clone()),
            Some(PathBuf::from("/env"))
        );
        assert_eq!(
            state_dir_from(None, None, Some("/xdg".into()), home.clone()),
            Some(PathBuf::from("/xdg/modkit"))
        );
        assert_eq!(
            state_dir_from(None, None, None, home),
            Some(PathBuf::from("/home/me/.local/state/modkit"))
        );
        assert_eq!(state_dir_from(None, None, None, None), None);
    }
}
