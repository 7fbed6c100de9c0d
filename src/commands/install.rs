use anyhow::{Context as _, Result};
use std::sync::Arc;

use crate::cli::{GlobalOpts, InstallOpts};
use crate::config::settings::RunDefaults;
use crate::config::toml_loader::parse_duration;
use crate::engine::context::DEFAULT_TIMEOUT;
use crate::engine::{Context, RunFlags, resolve, run_plan};
use crate::logging::{Log, Logger};

/// Run the install command.
///
/// # Errors
///
/// Returns an error if configuration loading or resolution fails, or if any
/// module failed.
pub fn run(global: &GlobalOpts, opts: &InstallOpts, verbose: bool, log: &Arc<Logger>) -> Result<()> {
    log.info(&format!("modkit {}", super::version::version()));
    let setup = super::CommandSetup::init(global, log)?;
    let flags = build_flags(global, opts, verbose, &setup.config.settings.run)?;
    log.debug(&format!("{flags:?}"));

    let ctx = Context::new(
        &setup.config,
        &setup.state_dir,
        Arc::clone(log) as Arc<dyn Log>,
        flags,
    )?;

    log.stage("Resolving modules");
    let plan = resolve(&setup.config.modules, &opts.modules, ctx.platform.os)?;
    log.info(&format!(
        "{} module(s) to process on {}",
        plan.order.len(),
        ctx.platform.os
    ));
    for line in plan.render().lines() {
        log.debug(line);
    }

    let interrupted = Arc::clone(&ctx.interrupted);
    if let Err(e) = ctrlc::set_handler(move || {
        interrupted.store(true, std::sync::atomic::Ordering::SeqCst);
    }) {
        log.debug(&format!("Ctrl-C handler not installed: {e}"));
    }

    run_plan(&ctx, &plan);
    super::finish(log)
}

/// Merge command-line options over `[run]` defaults.
///
/// # Errors
///
/// Returns an error if the timeout is not a valid duration.
pub fn build_flags(
    global: &GlobalOpts,
    opts: &InstallOpts,
    verbose: bool,
    defaults: &RunDefaults,
) -> Result<RunFlags> {
    let default_timeout = opts
        .timeout
        .as_deref()
        .or(defaults.timeout.as_deref())
        .map(parse_duration)
        .transpose()
        .context("invalid timeout")?
        .unwrap_or(DEFAULT_TIMEOUT);

    Ok(RunFlags {
        dry_run: global.dry_run,
        force: opts.force,
        unattended: opts.unattended,
        fail_fast: opts.fail_fast || defaults.fail_fast.unwrap_or(false),
        skip_failed: opts.skip_failed || defaults.skip_failed.unwrap_or(false),
        verbose,
        default_timeout,
        rollback: opts.rollback.or(defaults.rollback).unwrap_or_default(),
    })
}
