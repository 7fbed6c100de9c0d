//! Dependency-ordered, idempotent module installer.
//!
//! A repository holds one directory per module under `modules/`, each with a
//! `module.toml` manifest, optional scripts and files to deploy.  `modkit`
//! resolves the requested modules into a dependency order, decides per
//! module and per file whether anything changed since the last run, executes
//! what changed, and records an operation log that can be replayed in
//! reverse to roll back a failed run or uninstall a module.
//!
//! The public API is organised into these layers:
//!
//! - **[`config`]**: discover manifests and load `modkit.toml`
//! - **[`engine`]**: resolution, decisions, execution, backups and rollback
//! - **[`state`]**: persisted per-module records
//! - **[`resources`]**: idempotent `check + apply` file primitives
//! - **[`commands`]**: top-level subcommand orchestration
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod hash;
pub mod logging;
pub mod module;
pub mod platform;
pub mod resources;
pub mod secrets;
pub mod state;
pub mod template;
