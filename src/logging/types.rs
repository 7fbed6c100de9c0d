//! Core logging types: module outcomes, progress handles, and the [`Log`] trait.

/// Per-module result for summary reporting.
#[derive(Debug, Clone)]
pub struct ModuleEntry {
    /// Module name.
    pub name: String,
    /// Final outcome of the module in this run.
    pub outcome: ModuleOutcome,
    /// Optional detail message (e.g., skip reason or error description).
    pub message: Option<String>,
}

/// Outcome of one module in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// Module was installed for the first time (or reinstalled with `--force`).
    Installed,
    /// Module was re-run because its definition, config or version changed.
    Updated,
    /// Module was already up to date or deliberately not run.
    Skipped,
    /// Module would have run; dry-run mode applied no changes.
    DryRun,
    /// Module does not support the current OS.
    NotApplicable,
    /// A step failed.
    Failed,
    /// Module was uninstalled.
    Removed,
}

impl ModuleOutcome {
    /// Every outcome, in summary order.
    pub const ALL: [Self; 7] = [
        Self::Installed,
        Self::Updated,
        Self::Skipped,
        Self::DryRun,
        Self::NotApplicable,
        Self::Failed,
        Self::Removed,
    ];

    /// Summary icon.
    #[must_use]
    pub const fn icon(self) -> &'static str {
        match self {
            Self::Installed => "✓",
            Self::Updated => "↻",
            Self::Skipped => "○",
            Self::DryRun => "~",
            Self::NotApplicable => "·",
            Self::Failed => "✗",
            Self::Removed => "-",
        }
    }

    /// ANSI colour prefix used in the summary.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Installed => "\x1b[32m",
            Self::Updated => "\x1b[36m",
            Self::Skipped => "\x1b[33m",
            Self::DryRun => "\x1b[37m",
            Self::NotApplicable => "\x1b[2m",
            Self::Failed => "\x1b[31m",
            Self::Removed => "\x1b[35m",
        }
    }

    /// Word used in the summary counts.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::DryRun => "dry-run",
            Self::NotApplicable => "n/a",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }
}

/// What kind of work a progress step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// No subprocess involvement; a transient progress line is safe.
    Quiet,
    /// Runs a subprocess that may prompt on the terminal (e.g. `sudo`).
    Interactive,
}

/// Handle returned by [`Log::begin_step`] and consumed by [`Log::end_step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepHandle {
    /// A transient progress line is on screen and must be erased.
    Animated {
        /// Step label.
        label: String,
    },
    /// A static status line was printed; nothing to erase.
    Static {
        /// Step label.
        label: String,
    },
}

impl StepHandle {
    /// Step label.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Animated { label } | Self::Static { label } => label,
        }
    }
}

/// Abstraction over logging backends.
///
/// The runner only sees `Arc<dyn Log>`, so tests can substitute a logger
/// without touching the console.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a module result for the summary.
    fn record_module(&self, name: &str, outcome: ModuleOutcome, message: Option<&str>);
    /// Announce the start of a step.
    ///
    /// [`StepKind::Interactive`] steps always get a static line so nothing
    /// redraws over a password prompt.
    fn begin_step(&self, label: &str, kind: StepKind) -> StepHandle;
    /// Finish a step started with [`Log::begin_step`].
    fn end_step(&self, handle: StepHandle, ok: bool);
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels_are_distinct() {
        let mut labels: Vec<&str> = ModuleOutcome::ALL.iter().map(|o| o.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), ModuleOutcome::ALL.len());
    }

    #[test]
    fn step_handle_label() {
        let a = StepHandle::Animated {
            label: "hashing".into(),
        };
        let s = StepHandle::Static {
            label: "install.sh".into(),
        };
        assert_eq!(a.label(), "hashing");
        assert_eq!(s.label(), "install.sh");
    }
}
