//! Command: show persisted module state.
use anyhow::Result;
use std::sync::Arc;

use crate::cli::{GlobalOpts, StatusOpts};
use crate::logging::Logger;
use crate::state::{JsonStateStore, ModuleState, StateStore};

/// Timestamp format used in status output.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Run the status command.
///
/// # Errors
///
/// Returns an error if the state directory cannot be determined or a record
/// cannot be read.
pub fn run(global: &GlobalOpts, opts: &StatusOpts, log: &Arc<Logger>) -> Result<()> {
    let state_dir = super::resolve_state_dir(global)?;
    let store = JsonStateStore::new(&state_dir);

    let states = if opts.modules.is_empty() {
        store.list()?
    } else {
        let mut found = Vec::new();
        for name in &opts.modules {
            match store.load(name)? {
                Some(state) => found.push(state),
                None => log.warn(&format!("{name} is not installed")),
            }
        }
        found
    };

    if states.is_empty() {
        log.info(&format!("no modules recorded in {}", state_dir.display()));
        return Ok(());
    }
    for state in &states {
        log.stage(&state.name);
        for line in describe(state) {
            log.info(&line);
        }
    }
    Ok(())
}

/// Human-readable lines describing one record.
#[must_use]
pub fn describe(state: &ModuleState) -> Vec<String> {
    let mut lines = vec![
        format!("status:    {}", state.status),
        format!("version:   {}", state.version),
        format!("installed: {}", state.installed_at.format(TIME_FORMAT)),
        format!("updated:   {}", state.updated_at.format(TIME_FORMAT)),
    ];

    let modified: Vec<_> = state.user_modified_files().collect();
    lines.push(format!(
        "files:     {} ({} modified locally)",
        state.files.len(),
        modified.len()
    ));
    lines.extend(
        modified
            .iter()
            .map(|f| format!("  modified: {}", f.dest.display())),
    );
    lines.push(format!("operations: {}", state.operations.len()));
    if let Some(err) = &state.last_error {
        lines.push(format!("last error: {err}"));
    }
    lines
}
