use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::config::settings::{RollbackPolicy, Settings};
use crate::engine::backup::{BACKUPS_SUBDIR, BackupStore};
use crate::engine::prompts::{Prompter, TerminalPrompter, UnattendedPrompter};
use crate::exec::{Executor, SystemExecutor};
use crate::logging::Log;
use crate::platform::Platform;
use crate::secrets::{EnvSecrets, SecretsProvider};
use crate::state::{JsonStateStore, StateStore};
use crate::template::{HandlebarsRenderer, TemplateRenderer};

/// Script timeout used when neither the module nor the run sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Run-wide flags, fixed before the first module runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlags {
    /// Preview only; no scripts, writes, backups or state commits.
    pub dry_run: bool,
    /// Re-run modules and redeploy files regardless of recorded state.
    pub force: bool,
    /// Never prompt; prompts take their defaults.
    pub unattended: bool,
    /// Stop scheduling modules after the first failure.
    pub fail_fast: bool,
    /// Skip modules whose last run failed instead of retrying them.
    pub skip_failed: bool,
    /// Show script output even on success.
    pub verbose: bool,
    /// Script timeout for modules without their own.
    pub default_timeout: Duration,
    /// What to do with a failed module's operations.
    pub rollback: RollbackPolicy,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            unattended: false,
            fail_fast: false,
            skip_failed: false,
            verbose: false,
            default_timeout: DEFAULT_TIMEOUT,
            rollback: RollbackPolicy::Prompt,
        }
    }
}

/// Shared context for a run.
pub struct Context {
    /// Repository root.
    pub root: PathBuf,
    /// State directory (module documents and backups).
    pub state_dir: PathBuf,
    /// User's home directory path.
    pub home: PathBuf,
    /// Detected platform information.
    pub platform: Arc<Platform>,
    /// Logger for output and module recording.
    pub log: Arc<dyn Log>,
    /// Immutable run flags.
    pub flags: RunFlags,
    /// Script executor (for testing or real system calls).
    pub executor: Arc<dyn Executor>,
    /// Persisted module state.
    pub state: Arc<dyn StateStore>,
    /// Live settings from `modkit.toml`.
    pub settings: Arc<Settings>,
    /// Renderer for template file entries.
    pub renderer: Arc<dyn TemplateRenderer>,
    /// Source of prompt answers.
    pub prompter: Arc<dyn Prompter>,
    /// Source of secret values.
    pub secrets: Arc<dyn SecretsProvider>,
    /// Backup writer for this run.
    pub backups: Arc<BackupStore>,
    /// Set by the Ctrl-C handler; no new module starts once it is `true`.
    pub interrupted: Arc<AtomicBool>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.root)
            .field("state_dir", &self.state_dir)
            .field("home", &self.home)
            .field("platform", &self.platform)
            .field("log", &"<dyn Log>")
            .field("flags", &self.flags)
            .field("executor", &"<dyn Executor>")
            .field("state", &self.state)
            .field("settings", &"<Settings>")
            .field("renderer", &"<dyn TemplateRenderer>")
            .field("prompter", &"<dyn Prompter>")
            .field("secrets", &"<dyn SecretsProvider>")
            .field("backups", &self.backups)
            .field("interrupted", &self.interrupted)
            .finish()
    }
}

impl Context {
    /// Creates a context with the real system collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the HOME (or USERPROFILE on Windows) environment variable
    /// is not set.
    pub fn new(config: &Config, state_dir: &Path, log: Arc<dyn Log>, flags: RunFlags) -> Result<Self> {
        let home = if cfg!(target_os = "windows") {
            std::env::var("USERPROFILE")
                .or_else(|_| std::env::var("HOME"))
                .map_err(|_| {
                    anyhow::anyhow!("neither USERPROFILE nor HOME environment variable is set")
                })?
        } else {
            std::env::var("HOME")
                .map_err(|_| anyhow::anyhow!("HOME environment variable is not set"))?
        };
        Ok(Self::with_home_dir(config, state_dir, Path::new(&home), log, flags))
    }

    /// Creates a context for an explicit home directory.
    #[must_use]
    pub fn with_home_dir(
        config: &Config,
        state_dir: &Path,
        home: &Path,
        log: Arc<dyn Log>,
        flags: RunFlags,
    ) -> Self {
        let prompter: Arc<dyn Prompter> = if flags.unattended {
            Arc::new(UnattendedPrompter)
        } else {
            Arc::new(TerminalPrompter)
        };

        Self {
            root: config.root.clone(),
            state_dir: state_dir.to_path_buf(),
            home: home.to_path_buf(),
            platform: Arc::new(Platform::detect()),
            log,
            flags,
            executor: Arc::new(SystemExecutor),
            state: Arc::new(JsonStateStore::new(state_dir)),
            settings: Arc::new(config.settings.clone()),
            renderer: Arc::new(HandlebarsRenderer::new()),
            prompter,
            secrets: Arc::new(EnvSecrets::new()),
            backups: Arc::new(BackupStore::new(&state_dir.join(BACKUPS_SUBDIR))),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether Ctrl-C was pressed.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Replace the platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Arc::new(platform);
        self
    }

    /// Replace the logger.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn Log>) -> Self {
        self.log = log;
        self
    }

    /// Replace the script executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the state store.
    #[must_use]
    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = state;
        self
    }

    /// Replace the prompter.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Replace the secrets provider.
    #[must_use]
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretsProvider>) -> Self {
        self.secrets = secrets;
        self
    }
}
