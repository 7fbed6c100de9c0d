//! Execution runner.
//!
//! Modules run one at a time in plan order.  Each module goes
//! `Pending -> Skipped` or `Pending -> Running -> Installed | Failed`; a
//! running module works through its steps in a fixed order and stops at the
//! first failing step, keeping every operation recorded so far.
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use serde_json::json;

use crate::config::settings::RollbackPolicy;
use crate::engine::context::Context;
use crate::engine::decision::{
    self, DestinationState, FileDecision, Fingerprint, ModuleDecision, decide_file, decide_module,
};
use crate::engine::graph::ExecutionPlan;
use crate::engine::{prompts, rollback};
use crate::error::FileOpError;
use crate::exec::script_label;
use crate::hash;
use crate::logging::{ModuleOutcome, StepKind};
use crate::module::{FileEntry, FileKind, Module};
use crate::resources::content::{ContentResource, Payload};
use crate::resources::symlink::SymlinkResource;
use crate::resources::{Resource, ResourceChange};
use crate::secrets::env_key;
use crate::state::{Action, BACKUP_KEY, FileState, ModuleState, ModuleStatus, Operation};

/// Sub-directory of the state dir holding per-script operation files.
const OPLOG_SUBDIR: &str = "oplog";

/// Outcome of every module touched by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// `(module, outcome)` in the order modules were considered.
    pub outcomes: Vec<(String, ModuleOutcome)>,
}

impl RunReport {
    /// Number of failed modules.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == ModuleOutcome::Failed)
            .count()
    }

    /// Outcome recorded for `module`.
    #[must_use]
    pub fn outcome(&self, module: &str) -> Option<ModuleOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == module)
            .map(|(_, o)| *o)
    }

    fn push(&mut self, ctx: &Context, module: &str, outcome: ModuleOutcome, message: Option<&str>) {
        ctx.log.record_module(module, outcome, message);
        self.outcomes.push((module.to_string(), outcome));
    }
}

/// Run every module of `plan` in order.
pub fn run_plan(ctx: &Context, plan: &ExecutionPlan) -> RunReport {
    let mut report = RunReport::default();
    let os = ctx.platform.os;

    for (module, dependency) in &plan.dropped_edges {
        ctx.log.warn(&format!(
            "{module} depends on {dependency}, which does not support {os}; continuing without it"
        ));
    }
    for module in &plan.skipped_os {
        let reason = format!("not supported on {os}");
        ctx.log.debug(&format!("{}: {reason}", module.name));
        report.push(ctx, &module.name, ModuleOutcome::NotApplicable, Some(&reason));
    }

    // Modules that failed, are still failed from an earlier run, or were
    // skipped because a dependency failed.
    let mut blocked: HashSet<&str> = HashSet::new();
    let mut aborted = false;
    for module in &plan.order {
        if ctx.is_interrupted() {
            report.push(ctx, &module.name, ModuleOutcome::Skipped, Some("interrupted"));
            continue;
        }
        if aborted {
            report.push(
                ctx,
                &module.name,
                ModuleOutcome::Skipped,
                Some("aborted after an earlier failure"),
            );
            continue;
        }
        if let Some(dep) = module
            .dependencies
            .iter()
            .find(|d| blocked.contains(d.as_str()))
        {
            let reason = format!("dependency '{dep}' failed");
            ctx.log.warn(&format!("skipping {}: {reason}", module.name));
            report.push(ctx, &module.name, ModuleOutcome::Skipped, Some(&reason));
            blocked.insert(&module.name);
            continue;
        }

        let (outcome, message) = run_module(ctx, module);
        report.push(ctx, &module.name, outcome, message.as_deref());
        match outcome {
            ModuleOutcome::Failed => {
                blocked.insert(&module.name);
                aborted = ctx.flags.fail_fast;
            }
            // left failed by --skip-failed
            ModuleOutcome::Skipped if still_failed(ctx, module) => {
                blocked.insert(&module.name);
            }
            _ => {}
        }
    }
    report
}

fn still_failed(ctx: &Context, module: &Module) -> bool {
    ctx.state
        .load(&module.name)
        .ok()
        .flatten()
        .is_some_and(|state| state.status == ModuleStatus::Failed)
}

/// Drive one module through its lifecycle.
fn run_module(ctx: &Context, module: &Module) -> (ModuleOutcome, Option<String>) {
    ctx.log.stage(&format!("{} {}", module.name, module.version));

    let existing = match ctx.state.load(&module.name) {
        Ok(state) => state,
        Err(e) => {
            ctx.log.warn(&format!("{e}; treating {} as not installed", module.name));
            None
        }
    };

    let step = ctx.log.begin_step("computing checksums", StepKind::Quiet);
    let live = fingerprint(ctx, module);
    ctx.log.end_step(step, live.checksum.is_some());

    let decision = decide_module(module, existing.as_ref(), &live, &ctx.flags);
    ctx.log
        .debug(&format!("{}: {} ({})", module.name, decision.decision, decision.reason));

    if !decision.decision.runs() {
        if let Some(state) = existing {
            refresh_skipped(ctx, module, state);
        }
        ctx.log.info(&format!("{}: {}", module.name, decision.reason));
        return (ModuleOutcome::Skipped, Some(decision.reason));
    }

    if ctx.flags.dry_run {
        preview(ctx, module, existing.as_ref(), &decision);
        return (ModuleOutcome::DryRun, Some(decision.reason));
    }

    ctx.log
        .info(&format!("{}: {} ({})", module.name, decision.decision, decision.reason));
    let mut run = ModuleRun::new(ctx, module, existing.as_ref());
    let result = run.execute();
    let (operations, files) = run.into_parts();
    match result {
        Ok(()) => {
            commit(ctx, module, existing, &live, operations, files);
            for note in &module.notes {
                ctx.log.info(&format!("note: {note}"));
            }
            (decision.decision.outcome(), None)
        }
        Err(err) => {
            let message = format!("{err:#}");
            ctx.log.error(&format!("{} failed: {message}", module.name));
            handle_failure(ctx, module, existing, operations, files, &message);
            (ModuleOutcome::Failed, Some(message))
        }
    }
}

fn fingerprint(ctx: &Context, module: &Module) -> Fingerprint {
    let checksum = match hash::module_checksum(module) {
        Ok(sum) => Some(sum),
        Err(e) => {
            ctx.log
                .warn(&format!("{}: cannot compute checksum: {e}", module.name));
            None
        }
    };
    Fingerprint {
        checksum,
        config_hash: hash::config_hash(&ctx.settings, &module.name),
    }
}

// ----------------------------------------------------------------------
// Running a module
// ----------------------------------------------------------------------

/// Mutable record of one module execution.
struct ModuleRun<'a> {
    ctx: &'a Context,
    module: &'a Module,
    existing: Option<&'a ModuleState>,
    timeout: Duration,
    operations: Vec<Operation>,
    files: Vec<FileState>,
}

impl<'a> ModuleRun<'a> {
    fn new(ctx: &'a Context, module: &'a Module, existing: Option<&'a ModuleState>) -> Self {
        Self {
            ctx,
            module,
            existing,
            timeout: module.effective_timeout(ctx.flags.default_timeout),
            operations: Vec::new(),
            files: Vec::new(),
        }
    }

    fn into_parts(self) -> (Vec<Operation>, Vec<FileState>) {
        (self.operations, self.files)
    }

    fn execute(&mut self) -> Result<()> {
        let (ctx, module) = (self.ctx, self.module);
        check_requires(ctx, module)?;

        let answers = prompts::resolve(module, ctx.prompter.as_ref(), ctx.secrets.as_ref(), false)?;
        let env = script_env(ctx, module, &answers);

        if let Some(script) = module.scripts.for_os(ctx.platform.os) {
            self.run_script(script, &env)?;
        }
        if let Some(script) = &module.scripts.install {
            self.run_script(script, &env)?;
        }

        let template_ctx = template_context(ctx, module, &answers);
        self.deploy_files(&template_ctx)?;

        if let Some(script) = &module.scripts.verify {
            self.run_script(script, &env)?;
        }
        Ok(())
    }

    fn run_script(&mut self, script: &Path, env: &[(String, String)]) -> Result<()> {
        let name = script_label(script);
        let oplog = self
            .ctx
            .state_dir
            .join(OPLOG_SUBDIR)
            .join(format!("{}-{name}", self.module.name));
        if let Some(parent) = oplog.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::remove_file(&oplog).ok();
        let mut env = env.to_vec();
        env.push(("MODKIT_OPLOG".to_string(), oplog.display().to_string()));

        let step = self
            .ctx
            .log
            .begin_step(&format!("{}: {name}", self.module.name), StepKind::Interactive);
        let outcome = self
            .ctx
            .executor
            .run_script(script, &self.module.dir, &env, self.timeout);
        self.ctx
            .log
            .end_step(step, outcome.as_ref().is_ok_and(|r| r.success && !r.timed_out));
        let reported = read_oplog(&oplog);
        discard_oplog(&oplog);
        let result = outcome?;

        self.operations.push(Operation::script_run(script));
        self.operations.extend(reported);

        let output = result.combined();
        if !output.is_empty() {
            if self.ctx.flags.verbose && result.success {
                for line in output.lines() {
                    self.ctx.log.info(&format!("  {line}"));
                }
            } else {
                self.ctx.log.debug(&format!("{name} output:\n{output}"));
            }
        }
        result.into_checked(&name, self.timeout)?;
        Ok(())
    }

    fn deploy_files(&mut self, template_ctx: &serde_json::Value) -> Result<()> {
        let module = self.module;
        let step = self
            .ctx
            .log
            .begin_step(&format!("{}: deploying files", module.name), StepKind::Quiet);
        let result = module
            .files
            .iter()
            .try_for_each(|entry| self.deploy_file(entry, template_ctx));
        self.ctx.log.end_step(step, result.is_ok());
        result.map_err(Into::into)
    }

    fn deploy_file(
        &mut self,
        entry: &FileEntry,
        template_ctx: &serde_json::Value,
    ) -> Result<(), FileOpError> {
        let planned = plan_file(self.ctx, self.module, entry, self.existing, template_ctx)?;
        let recorded = self.existing.and_then(|s| s.file(&planned.dest));

        if !planned.decision.deploy {
            self.ctx.log.debug(&format!(
                "{}: {}",
                planned.dest.display(),
                planned.decision.reason
            ));
            if planned.decision.user_modified {
                self.ctx.log.warn(&format!(
                    "{} has local changes; keeping them until its source changes",
                    planned.dest.display()
                ));
            }
            self.files.push(planned.file_state(recorded));
            return Ok(());
        }

        let deploy_err = |source| FileOpError::Deploy {
            path: planned.dest.clone(),
            source,
        };

        let backup = planned
            .decision
            .backup
            .map(|reason| {
                self.ctx
                    .backups
                    .backup(&self.module.name, &planned.dest, reason)
            })
            .transpose()?;
        if let Some(record) = &backup {
            let msg = format!(
                "backed up {} to {}",
                planned.dest.display(),
                record.path.display()
            );
            if record.metadata.reason == decision::PREVIOUS_DEPLOYMENT {
                self.ctx.log.debug(&msg);
            } else {
                self.ctx.log.info(&msg);
            }
        }

        let created = crate::resources::fs::create_parent_dirs(&planned.dest).map_err(deploy_err)?;
        self.operations
            .extend(created.iter().map(|dir| Operation::dir_create(dir)));

        let resource = planned.resource();
        let change = resource
            .apply()
            .map_err(|e| deploy_err(io::Error::other(format!("{e:#}"))))?;
        if let ResourceChange::Skipped { reason } = change {
            return Err(deploy_err(io::Error::other(reason)));
        }

        let action = if planned.dest_state.exists() {
            Action::Modified
        } else if entry.kind == FileKind::Symlink {
            Action::Symlinked
        } else {
            Action::Created
        };
        let mut op = Operation::file_deploy(action, &planned.dest);
        if let Some(record) = &backup {
            op = op.with_metadata(BACKUP_KEY, record.path.display().to_string());
        }
        self.operations.push(op);
        self.ctx.log.debug(&format!(
            "deployed {} ({}): {}",
            resource.description(),
            entry.kind,
            planned.decision.reason
        ));

        let mut state = planned.file_state(None);
        state.user_modified = false;
        self.files.push(state);
        Ok(())
    }
}

fn check_requires(ctx: &Context, module: &Module) -> Result<()> {
    let missing: Vec<&str> = module
        .requires
        .iter()
        .map(String::as_str)
        .filter(|cmd| !ctx.executor.which(cmd))
        .collect();
    if !missing.is_empty() {
        bail!("required commands not found on PATH: {}", missing.join(", "));
    }
    Ok(())
}

/// Read `package <name>` lines a script appended to its operation file.
fn read_oplog(path: &Path) -> Vec<Operation> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package "))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(Operation::package_install)
        .collect()
}

/// Remove a script's operation file, and the oplog directory once empty.
fn discard_oplog(path: &Path) {
    std::fs::remove_file(path).ok();
    if let Some(dir) = path.parent() {
        crate::resources::fs::remove_dir_if_empty(dir).ok();
    }
}

/// Environment passed to every script of `module`.
fn script_env(
    ctx: &Context,
    module: &Module,
    answers: &std::collections::BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let flag = |on: bool| String::from(if on { "1" } else { "0" });
    let mut env = vec![
        ("MODKIT_OS".to_string(), ctx.platform.os.id().to_string()),
        ("MODKIT_ARCH".to_string(), ctx.platform.arch.clone()),
        ("MODKIT_HOME".to_string(), ctx.home.display().to_string()),
        ("MODKIT_ROOT".to_string(), ctx.root.display().to_string()),
        ("MODKIT_MODULE".to_string(), module.name.clone()),
        ("MODKIT_MODULE_DIR".to_string(), module.dir.display().to_string()),
        ("MODKIT_MODULE_VERSION".to_string(), module.version.clone()),
        ("MODKIT_STATE_DIR".to_string(), ctx.state_dir.display().to_string()),
        ("MODKIT_DRY_RUN".to_string(), flag(ctx.flags.dry_run)),
        ("MODKIT_FORCE".to_string(), flag(ctx.flags.force)),
        ("MODKIT_UNATTENDED".to_string(), flag(ctx.flags.unattended)),
        ("MODKIT_VERBOSE".to_string(), flag(ctx.flags.verbose)),
    ];
    env.extend(
        ctx.settings
            .user_strings()
            .into_iter()
            .map(|(k, v)| (format!("MODKIT_USER_{}", env_key(&k)), v)),
    );
    env.extend(
        answers
            .iter()
            .map(|(k, v)| (format!("MODKIT_PROMPT_{}", env_key(k)), v.clone())),
    );
    env
}

/// Data available to templates.
fn template_context(
    ctx: &Context,
    module: &Module,
    answers: &std::collections::BTreeMap<String, String>,
) -> serde_json::Value {
    let user: serde_json::Map<String, serde_json::Value> = ctx
        .settings
        .user
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or_default()))
        .collect();
    let config = ctx
        .settings
        .module_config(&module.name)
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or_else(|| json!({}));
    json!({
        "user": user,
        "config": config,
        "module": {
            "name": module.name,
            "version": module.version,
            "dir": module.dir.display().to_string(),
        },
        "prompts": answers,
        "os": ctx.platform.os.id(),
        "arch": ctx.platform.arch,
        "home": ctx.home.display().to_string(),
    })
}

// ----------------------------------------------------------------------
// File planning
// ----------------------------------------------------------------------

/// Live facts and decision for one file entry.
struct PlannedFile {
    kind: FileKind,
    source: PathBuf,
    dest: PathBuf,
    payload: Option<Payload>,
    source_hash: String,
    dest_state: DestinationState,
    decision: FileDecision,
}

impl PlannedFile {
    fn resource(&self) -> Box<dyn Resource> {
        match &self.payload {
            None => Box::new(SymlinkResource::new(self.source.clone(), self.dest.clone())),
            Some(Payload::Bytes(bytes)) => {
                Box::new(ContentResource::bytes(self.dest.clone(), bytes.clone()))
            }
            Some(Payload::Tree(source)) => {
                Box::new(ContentResource::tree(self.dest.clone(), source.clone()))
            }
        }
    }

    /// Hash of what deploying this file puts at the destination.
    fn deployed_hash(&self) -> String {
        match self.kind {
            FileKind::Symlink => decision::link_hash(&self.source),
            FileKind::Copy | FileKind::Template => self.source_hash.clone(),
        }
    }

    /// File record after this run; a skipped file keeps its recorded hashes.
    fn file_state(&self, recorded: Option<&FileState>) -> FileState {
        let (source_hash, deployed_hash) = recorded.map_or_else(
            || (self.source_hash.clone(), self.deployed_hash()),
            |r| (r.source_hash.clone(), r.deployed_hash.clone()),
        );
        FileState {
            source: self.source.clone(),
            dest: self.dest.clone(),
            kind: self.kind,
            source_hash,
            deployed_hash,
            user_modified: self.decision.user_modified,
            last_checked: Utc::now(),
        }
    }
}

fn plan_file(
    ctx: &Context,
    module: &Module,
    entry: &FileEntry,
    existing: Option<&ModuleState>,
    template_ctx: &serde_json::Value,
) -> Result<PlannedFile, FileOpError> {
    let raw_source = entry.source_in(&module.dir);
    let dest = entry.dest_in(&ctx.home);
    let source_err = |source| FileOpError::Deploy {
        path: raw_source.clone(),
        source,
    };

    let (source, payload, source_hash) = match entry.kind {
        FileKind::Symlink => {
            let abs = dunce::canonicalize(&raw_source).map_err(source_err)?;
            let source_hash = hash::path_hash(&abs).map_err(source_err)?;
            (abs, None, source_hash)
        }
        FileKind::Copy if raw_source.is_dir() => {
            let source_hash = hash::path_hash(&raw_source).map_err(source_err)?;
            (
                raw_source.clone(),
                Some(Payload::Tree(raw_source.clone())),
                source_hash,
            )
        }
        FileKind::Copy => {
            let bytes = std::fs::read(&raw_source).map_err(source_err)?;
            let source_hash = hash::bytes_hash(&bytes);
            (raw_source.clone(), Some(Payload::Bytes(bytes)), source_hash)
        }
        FileKind::Template => {
            let rendered = ctx.renderer.render(&raw_source, template_ctx)?.into_bytes();
            let source_hash = hash::bytes_hash(&rendered);
            (raw_source.clone(), Some(Payload::Bytes(rendered)), source_hash)
        }
    };

    let dest_state = DestinationState::inspect(&dest).map_err(|source| FileOpError::Deploy {
        path: dest.clone(),
        source,
    })?;
    let recorded = existing.and_then(|s| s.file(&dest));
    let decision = decide_file(entry, &source_hash, recorded, &dest_state, &source, &ctx.flags);

    Ok(PlannedFile {
        kind: entry.kind,
        source,
        dest,
        payload,
        source_hash,
        dest_state,
        decision,
    })
}

/// Plan every file of `module` without asking any prompt.
fn plan_files_offline(
    ctx: &Context,
    module: &Module,
    existing: Option<&ModuleState>,
) -> Vec<(PathBuf, Result<PlannedFile, FileOpError>)> {
    let answers = prompts::resolve(module, ctx.prompter.as_ref(), ctx.secrets.as_ref(), true)
        .unwrap_or_default();
    let template_ctx = template_context(ctx, module, &answers);
    module
        .files
        .iter()
        .map(|entry| {
            let mut planned = plan_file(ctx, module, entry, existing, &template_ctx);
            // Rendering with placeholder answers says nothing about the real
            // output, so prompted templates are judged by their destination only.
            if entry.kind == FileKind::Template
                && !module.prompts.is_empty()
                && let Ok(p) = &mut planned
                && let Some(recorded) = existing.and_then(|s| s.file(&p.dest))
            {
                p.source_hash.clone_from(&recorded.source_hash);
                p.decision = decide_file(
                    entry,
                    &recorded.source_hash,
                    Some(recorded),
                    &p.dest_state,
                    &p.source,
                    &ctx.flags,
                );
            }
            (entry.dest_in(&ctx.home), planned)
        })
        .collect()
}

// ----------------------------------------------------------------------
// Skip, preview, commit and failure handling
// ----------------------------------------------------------------------

/// Refresh file records of a skipped module and report drift.
fn refresh_skipped(ctx: &Context, module: &Module, mut state: ModuleState) {
    let now = Utc::now();
    for (dest, planned) in plan_files_offline(ctx, module, Some(&state)) {
        let planned = match planned {
            Ok(p) => p,
            Err(e) => {
                ctx.log.warn(&format!("{}: {e}", module.name));
                continue;
            }
        };
        if planned.decision.deploy {
            ctx.log.warn(&format!(
                "{}: {} ({}); run with --force to redeploy",
                module.name,
                dest.display(),
                planned.decision.reason
            ));
        }
        if let Some(file) = state.files.iter_mut().find(|f| f.dest == dest) {
            if planned.decision.user_modified && !file.user_modified {
                ctx.log.warn(&format!(
                    "{} has local changes; keeping them until its source changes",
                    dest.display()
                ));
            }
            file.user_modified = planned.decision.user_modified;
            file.last_checked = now;
        }
    }

    if ctx.flags.dry_run {
        return;
    }
    if let Err(e) = ctx.state.save(&state) {
        ctx.log.warn(&e.to_string());
    }
}

/// Report what a live run would do.
fn preview(ctx: &Context, module: &Module, existing: Option<&ModuleState>, decision: &ModuleDecision) {
    ctx.log.dry_run(&format!(
        "would {} {}: {}",
        decision.decision, module.name, decision.reason
    ));
    if let Err(e) = check_requires(ctx, module) {
        ctx.log.dry_run(&format!("{} would fail: {e}", module.name));
    }
    let scripts = [
        module.scripts.for_os(ctx.platform.os),
        module.scripts.install.as_deref(),
    ];
    for script in scripts.into_iter().flatten() {
        ctx.log.dry_run(&format!("would run {}", script_label(script)));
    }
    for (dest, planned) in plan_files_offline(ctx, module, existing) {
        match planned {
            Ok(p) if p.decision.deploy => {
                if let Some(reason) = p.decision.backup {
                    ctx.log
                        .dry_run(&format!("would back up {} ({reason})", dest.display()));
                }
                let current = p
                    .resource()
                    .current_state()
                    .map_or_else(|e| e.to_string(), |state| state.summary().to_string());
                ctx.log.dry_run(&format!(
                    "would deploy {} ({}): {}; {current}",
                    dest.display(),
                    p.kind,
                    p.decision.reason
                ));
            }
            Ok(p) => ctx
                .log
                .debug(&format!("{}: {}", dest.display(), p.decision.reason)),
            Err(e) => ctx.log.dry_run(&format!("{} would fail: {e}", module.name)),
        }
    }
    if let Some(script) = &module.scripts.verify {
        ctx.log.dry_run(&format!("would run {}", script_label(script)));
    }
}

/// Persist a successful run.
fn commit(
    ctx: &Context,
    module: &Module,
    existing: Option<ModuleState>,
    live: &Fingerprint,
    run_operations: Vec<Operation>,
    files: Vec<FileState>,
) {
    let step = ctx.log.begin_step("saving state", StepKind::Quiet);
    let now = Utc::now();
    let (installed_at, mut operations) = existing.map_or_else(
        || (now, Vec::new()),
        |prev| (prev.installed_at, prev.operations),
    );
    operations.extend(run_operations);

    let checksum = hash::module_checksum(module).ok().or_else(|| live.checksum.clone());
    let state = ModuleState {
        name: module.name.clone(),
        status: ModuleStatus::Installed,
        version: module.version.clone(),
        checksum,
        config_hash: live.config_hash.clone(),
        installed_at,
        updated_at: now,
        last_error: None,
        files,
        operations,
    };
    let saved = ctx.state.save(&state);
    ctx.log.end_step(step, saved.is_ok());
    if let Err(e) = saved {
        ctx.log.warn(&format!("{e}; the next run will not know {} is installed", module.name));
    }
}

/// Roll back or record a failed run, according to the rollback policy.
fn handle_failure(
    ctx: &Context,
    module: &Module,
    existing: Option<ModuleState>,
    operations: Vec<Operation>,
    files: Vec<FileState>,
    message: &str,
) {
    let roll_back = match ctx.flags.rollback {
        RollbackPolicy::Always => true,
        RollbackPolicy::Never => false,
        RollbackPolicy::Prompt if ctx.flags.unattended => false,
        RollbackPolicy::Prompt => ctx
            .prompter
            .confirm(
                &format!("Roll back the changes made by {}?", module.name),
                true,
            )
            .unwrap_or_else(|e| {
                ctx.log.warn(&format!("{e:#}; not rolling back"));
                false
            }),
    };

    if roll_back {
        let report = rollback::rollback(&operations, ctx.log.as_ref(), false);
        ctx.log.info(&format!(
            "{}: rolled back {} operation(s), {} not reversible, {} error(s)",
            module.name,
            report.reverted,
            report.informational,
            report.errors.len()
        ));
        let restored = match existing {
            Some(prev) => ctx.state.save(&prev),
            None => ctx.state.delete(&module.name),
        };
        if let Err(e) = restored {
            ctx.log.warn(&e.to_string());
        }
        return;
    }

    let now = Utc::now();
    let mut state = existing.unwrap_or_else(|| ModuleState {
        name: module.name.clone(),
        status: ModuleStatus::Failed,
        version: module.version.clone(),
        checksum: None,
        config_hash: String::new(),
        installed_at: now,
        updated_at: now,
        last_error: None,
        files: Vec::new(),
        operations: Vec::new(),
    });
    state.status = ModuleStatus::Failed;
    state.updated_at = now;
    state.last_error = Some(message.to_string());
    for file in files {
        match state.files.iter_mut().find(|f| f.dest == file.dest) {
            Some(slot) => *slot = file,
            None => state.files.push(file),
        }
    }
    state.operations.extend(operations);
    if let Err(e) = ctx.state.save(&state) {
        ctx.log.warn(&e.to_string());
    }
}
