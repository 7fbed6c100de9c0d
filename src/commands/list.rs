//! Command: list discovered modules.
use anyhow::Result;
use std::sync::Arc;

use crate::cli::GlobalOpts;
use crate::logging::Logger;
use crate::module::Module;
use crate::platform::{Os, Platform};

/// Run the list command.
///
/// # Errors
///
/// Returns an error if the repository cannot be loaded.
pub fn run(global: &GlobalOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = super::CommandSetup::init(global, log)?;
    let platform = Platform::detect();
    for module in &setup.config.modules {
        log.info(&describe(module, platform.os));
    }
    Ok(())
}

/// One line describing `module` for `os`.
#[must_use]
pub fn describe(module: &Module, os: Os) -> String {
    let mut line = format!("{} {}", module.name, module.version);
    if !module.description.is_empty() {
        line.push_str(" - ");
        line.push_str(&module.description);
    }
    let os_list = if module.os.is_empty() {
        "all".to_string()
    } else {
        module.os.join(", ")
    };
    line.push_str(&format!(" [os: {os_list}]"));
    if !module.dependencies.is_empty() {
        line.push_str(&format!(" [depends on: {}]", module.dependencies.join(", ")));
    }
    if !os.matches_any(&module.os) {
        line.push_str(" (not supported here)");
    }
    line
}
