//! The [`Log`] implementation used by every command.
use std::io::{IsTerminal as _, Write as _};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::subscriber::{DRY_RUN_TARGET, STAGE_TARGET};
use super::types::{Log, ModuleEntry, ModuleOutcome, StepHandle, StepKind};
use super::utils::{log_file_path, terminal_columns};

/// Terminal state shared by all output.
#[derive(Debug, Default)]
struct Console {
    /// A transient progress line is on screen.
    progress_shown: bool,
}

impl Console {
    #[allow(clippy::print_stdout)]
    fn clear_progress(&mut self) {
        if self.progress_shown {
            print!("\r\x1b[K");
            std::io::stdout().flush().ok();
            self.progress_shown = false;
        }
    }

    /// Draw `label` on one row, cut to the terminal width.
    #[allow(clippy::print_stdout)]
    fn draw_progress(&mut self, label: &str) {
        print!("  \x1b[2m▹ {}\x1b[0m", fit(label, terminal_columns().saturating_sub(4)));
        std::io::stdout().flush().ok();
        self.progress_shown = true;
    }
}

/// Truncate `label` to `width` characters, marking the cut with `…`.
fn fit(label: &str, width: usize) -> String {
    if label.chars().count() <= width {
        return label.to_string();
    }
    let mut cut: String = label.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Console and file logger that also collects module outcomes for the
/// end-of-run summary.
///
/// Events go through `tracing`; [`init_subscriber`](super::init_subscriber)
/// decides where they land.  The log file path is only kept so the summary
/// can point at it.
#[derive(Debug)]
pub struct Logger {
    modules: Mutex<Vec<ModuleEntry>>,
    log_file: Option<PathBuf>,
    console: Mutex<Console>,
    /// Progress lines are only drawn when stdout is a terminal.
    animate: bool,
}

impl Logger {
    /// Logger for `command`.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            modules: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
            console: Mutex::new(Console::default()),
            animate: std::io::stdout().is_terminal(),
        }
    }

    /// Path of this command's log file, if one could be created.
    #[must_use]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Outcomes recorded so far, in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<ModuleEntry> {
        self.modules
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Log an error.
    pub fn error(&self, msg: &str) {
        self.emit(|| tracing::error!("{msg}"));
    }

    /// Log a warning.
    pub fn warn(&self, msg: &str) {
        self.emit(|| tracing::warn!("{msg}"));
    }

    /// Log a `==>` stage header.
    pub fn stage(&self, msg: &str) {
        self.emit(|| tracing::info!(target: STAGE_TARGET, "{msg}"));
    }

    /// Log a plain message.
    pub fn info(&self, msg: &str) {
        self.emit(|| tracing::info!("{msg}"));
    }

    /// Log detail that only shows on the console with `--verbose`.
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log something a dry run would have done.
    pub fn dry_run(&self, msg: &str) {
        self.emit(|| tracing::info!(target: DRY_RUN_TARGET, "{msg}"));
    }

    /// Record the outcome of module `name`.
    pub fn record_module(&self, name: &str, outcome: ModuleOutcome, message: Option<&str>) {
        if let Ok(mut modules) = self.modules.lock() {
            modules.push(ModuleEntry {
                name: name.to_string(),
                outcome,
                message: message.map(String::from),
            });
        }
    }

    /// Number of modules recorded as failed.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.entries()
            .iter()
            .filter(|m| m.outcome == ModuleOutcome::Failed)
            .count()
    }

    /// Print one line per recorded module, the counts and the log path.
    #[allow(clippy::print_stdout)]
    pub fn print_summary(&self) {
        let modules = self.entries();
        if modules.is_empty() {
            return;
        }

        println!();
        self.stage("Summary");
        for module in &modules {
            let suffix = module
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));
            self.info(&format!(
                "{}{} {}{suffix}\x1b[0m",
                module.outcome.color(),
                module.outcome.icon(),
                module.name
            ));
        }

        println!();
        self.info(&summary_counts(&modules));
        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }

    fn console(&self) -> MutexGuard<'_, Console> {
        self.console.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Erase any progress line, then run `log`.
    fn emit(&self, log: impl FnOnce()) {
        let mut console = self.console();
        console.clear_progress();
        log();
        drop(console);
    }

    /// Start a step; see [`Log::begin_step`].
    pub fn begin_step(&self, label: &str, kind: StepKind) -> StepHandle {
        tracing::debug!("step start: {label}");
        let mut console = self.console();
        console.clear_progress();
        let label = label.to_string();
        let handle = match kind {
            StepKind::Quiet if self.animate => {
                console.draw_progress(&label);
                StepHandle::Animated { label }
            }
            StepKind::Quiet => StepHandle::Static { label },
            StepKind::Interactive => {
                tracing::info!("\x1b[2m▸ {label}\x1b[0m");
                StepHandle::Static { label }
            }
        };
        drop(console);
        handle
    }

    /// Finish a step; see [`Log::end_step`].
    pub fn end_step(&self, handle: StepHandle, ok: bool) {
        if matches!(handle, StepHandle::Animated { .. }) {
            self.console().clear_progress();
        }
        let status = if ok { "done" } else { "failed" };
        tracing::debug!("step {status}: {}", handle.label());
    }

    #[cfg(test)]
    fn progress_is_shown(&self) -> bool {
        self.console().progress_shown
    }

    #[cfg(test)]
    pub(super) fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    #[cfg(test)]
    const fn with_animation(mut self, animate: bool) -> Self {
        self.animate = animate;
        self
    }
}

/// `N modules: a installed, b updated, ...`.
///
/// Removed modules are only mentioned when there are some.
fn summary_counts(modules: &[ModuleEntry]) -> String {
    let parts: Vec<String> = ModuleOutcome::ALL
        .iter()
        .map(|&outcome| {
            let n = modules.iter().filter(|m| m.outcome == outcome).count();
            (outcome, n)
        })
        .filter(|&(outcome, n)| outcome != ModuleOutcome::Removed || n > 0)
        .map(|(outcome, n)| format!("{}{n} {}\x1b[0m", outcome.color(), outcome.label()))
        .collect();
    format!("{} modules: {}", modules.len(), parts.join(", "))
}

impl Log for Logger {
    fn stage(&self, msg: &str) {
        self.stage(msg);
    }

    fn info(&self, msg: &str) {
        self.info(msg);
    }

    fn debug(&self, msg: &str) {
        self.debug(msg);
    }

    fn warn(&self, msg: &str) {
        self.warn(msg);
    }

    fn error(&self, msg: &str) {
        self.error(msg);
    }

    fn dry_run(&self, msg: &str) {
        self.dry_run(msg);
    }

    fn record_module(&self, name: &str, outcome: ModuleOutcome, message: Option<&str>) {
        self.record_module(name, outcome, message);
    }

    fn begin_step(&self, label: &str, kind: StepKind) -> StepHandle {
        self.begin_step(label, kind)
    }

    fn end_step(&self, handle: StepHandle, ok: bool) {
        self.end_step(handle, ok);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::logging::isolated_logger;
    use crate::logging::utils::strip_ansi;
    use std::fs;

    #[test]
    fn logger_new_has_no_entries() {
        let (log, _tmp, _guard) = isolated_logger();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn record_module_with_message() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record_module("git", ModuleOutcome::Skipped, Some("already up to date"));
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "git");
        assert_eq!(entries[0].outcome, ModuleOutcome::Skipped);
        assert_eq!(entries[0].message.as_deref(), Some("already up to date"));
    }

    #[test]
    fn failure_count_counts_failed_only() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record_module("a", ModuleOutcome::Installed, None);
        log.record_module("b", ModuleOutcome::Failed, Some("boom"));
        log.record_module("c", ModuleOutcome::Failed, Some("boom"));
        log.record_module("d", ModuleOutcome::Updated, None);
        assert_eq!(log.failure_count(), 2);
    }

    #[test]
    fn fit_truncates_long_labels() {
        assert_eq!(fit("install.sh", 20), "install.sh");
        assert_eq!(fit("deploying files", 8), "deployi…");
    }

    #[test]
    fn summary_counts_every_outcome() {
        let entry = |outcome| ModuleEntry {
            name: "m".into(),
            outcome,
            message: None,
        };
        let modules = [
            entry(ModuleOutcome::Installed),
            entry(ModuleOutcome::Installed),
            entry(ModuleOutcome::Failed),
        ];
        let line = strip_ansi(&summary_counts(&modules));
        assert_eq!(
            line,
            "3 modules: 2 installed, 0 updated, 0 skipped, 0 dry-run, 0 n/a, 1 failed"
        );

        let removed = [entry(ModuleOutcome::Removed)];
        let line = strip_ansi(&summary_counts(&removed));
        assert!(line.ends_with("0 failed, 1 removed"), "{line}");
    }

    #[test]
    fn log_trait_delegates_to_logger() {
        let (log, _tmp, _guard) = isolated_logger();
        let log_ref: &dyn Log = &log;
        log_ref.record_module("via-trait", ModuleOutcome::Installed, None);
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn interactive_steps_are_never_animated() {
        let (log, _tmp, _guard) = isolated_logger();
        let log = log.with_animation(true);
        let handle = log.begin_step("install.sh", StepKind::Interactive);
        assert!(matches!(handle, StepHandle::Static { .. }));
        assert!(!log.progress_is_shown());
        log.end_step(handle, true);
    }

    #[test]
    fn quiet_steps_animate_on_terminals_and_clear_on_end() {
        let (log, _tmp, _guard) = isolated_logger();
        let log = log.with_animation(true);
        let handle = log.begin_step("hashing", StepKind::Quiet);
        assert!(matches!(handle, StepHandle::Animated { .. }));
        assert!(log.progress_is_shown());
        log.end_step(handle, true);
        assert!(!log.progress_is_shown());
    }

    #[test]
    fn quiet_steps_are_static_without_terminal() {
        let (log, _tmp, _guard) = isolated_logger();
        let log = log.with_animation(false);
        let handle = log.begin_step("hashing", StepKind::Quiet);
        assert!(matches!(handle, StepHandle::Static { .. }));
        log.end_step(handle, false);
    }

    #[test]
    fn output_clears_progress_line() {
        let (log, _tmp, _guard) = isolated_logger();
        let log = log.with_animation(true);
        let _handle = log.begin_step("deploying files", StepKind::Quiet);
        log.info("something happened");
        assert!(!log.progress_is_shown());
    }

    #[test]
    fn debug_always_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("debug-marker-{}", std::process::id());
        log.debug(&marker);
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains(&marker));
    }

    #[test]
    fn warn_written_to_file_with_tag() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("warn-marker-{}", std::process::id());
        log.warn(&marker);
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains("[warn]"));
        assert!(contents.contains(&marker));
    }

    #[test]
    fn stage_written_to_file_with_arrow() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("stage-marker-{}", std::process::id());
        log.stage(&marker);
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains("==>"));
        assert!(contents.contains(&marker));
    }

    #[test]
    fn dry_run_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("dryrun-marker-{}", std::process::id());
        log.dry_run(&marker);
        let contents = fs::read_to_string(log.log_path().expect("log path")).unwrap();
        assert!(contents.contains("[dry run]"));
        assert!(contents.contains(&marker));
    }
}
