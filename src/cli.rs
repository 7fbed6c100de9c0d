use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::config::settings::RollbackPolicy;

/// Top-level CLI entry point for the module installer.
#[derive(Parser, Debug)]
#[command(
    name = "modkit",
    about = "Dependency-ordered, idempotent module installer",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,

    /// Override the module repository root
    #[arg(long, global = true)]
    pub root: Option<std::path::PathBuf>,

    /// Override the state directory
    #[arg(long, global = true)]
    pub state_dir: Option<std::path::PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install modules and their dependencies
    Install(InstallOpts),
    /// Reverse everything recorded for installed modules
    Uninstall(UninstallOpts),
    /// Show persisted module state
    Status(StatusOpts),
    /// List discovered modules
    List,
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
    /// Print version information
    Version,
}

/// Options for the `install` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct InstallOpts {
    /// Modules to install (default: all)
    pub modules: Vec<String>,

    /// Re-run modules and redeploy files even when up to date
    #[arg(long)]
    pub force: bool,

    /// Never prompt; use defaults for every question
    #[arg(short = 'y', long)]
    pub unattended: bool,

    /// Stop after the first failed module
    #[arg(long)]
    pub fail_fast: bool,

    /// Skip modules whose last run failed instead of retrying them
    #[arg(long)]
    pub skip_failed: bool,

    /// Default script timeout (e.g. 90, 30s, 5m, 1h30m)
    #[arg(long)]
    pub timeout: Option<String>,

    /// What to do with a failed module's changes (prompt, always, never)
    #[arg(long)]
    pub rollback: Option<RollbackPolicy>,
}

/// Options for the `uninstall` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct UninstallOpts {
    /// Modules to uninstall
    #[arg(required = true)]
    pub modules: Vec<String>,
}

/// Options for the `status` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct StatusOpts {
    /// Modules to show (default: every recorded module)
    pub modules: Vec<String>,
}
