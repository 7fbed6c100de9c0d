//! Domain-specific error types for the module installer.
//!
//! Internal layers return typed errors (e.g. [`ResolveError`],
//! [`ScriptError`]) while command handlers at the CLI boundary convert them
//! to [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! ModkitError
//! ├── Config(ConfigError)  : manifest discovery and settings parsing
//! ├── Resolve(ResolveError): unknown module, unknown dependency, cycle
//! ├── Script(ScriptError)  : non-zero exit or timeout of a module script
//! ├── FileOp(FileOpError)  : deploy, backup, render and rollback I/O
//! └── State(StateError)    : reading or writing persisted module state
//! ```
//!
//! Only [`ResolveError`] and [`ConfigError`] abort a run.  Script and file
//! errors are contained to the owning module; state errors are logged and
//! the run continues with in-memory results.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the installer.
#[derive(Error, Debug)]
pub enum ModkitError {
    /// Configuration-related error (manifest parsing, settings, I/O).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency resolution error.
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// A module script failed or timed out.
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// A filesystem operation failed during deploy, backup or rollback.
    #[error("File operation error: {0}")]
    FileOp(#[from] FileOpError),

    /// Persisted state could not be read or written.
    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// Errors that arise from module discovery and settings loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A manifest or settings file contains invalid TOML or unknown values.
    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest {
        /// Path of the offending file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Two module directories declare the same module name.
    #[error("Duplicate module '{name}' declared in {first} and {second}")]
    DuplicateModule {
        /// The duplicated name.
        name: String,
        /// Manifest that declared the name first.
        first: PathBuf,
        /// Manifest that declared the name again.
        second: PathBuf,
    },

    /// A duration string could not be parsed.
    #[error("Invalid duration '{value}': expected e.g. 90, 30s, 5m, 1h30m")]
    InvalidDuration {
        /// The rejected value.
        value: String,
    },

    /// An I/O error occurred while reading a configuration file.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors produced by the dependency resolver.  All are fatal and abort the
/// run before any module executes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A module requested on the command line is not known.
    #[error("requested module '{0}' does not exist")]
    UnknownModule(String),

    /// A module declares a dependency on a name that was never discovered.
    #[error("module {module} depends on {dependency}, which does not exist")]
    MissingDependency {
        /// The module declaring the dependency.
        module: String,
        /// The unknown dependency name.
        dependency: String,
    },

    /// The dependency graph contains a cycle; the payload is a printable path
    /// such as `a -> b -> a`.
    #[error("dependency cycle detected: {0}")]
    Cycle(String),
}

/// Errors from running a module script.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The script exited with a non-zero status.
    #[error("{script} failed (exit {}){}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()), tail(.output))]
    Failed {
        /// Script file name.
        script: String,
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Combined captured output.
        output: String,
    },

    /// The script exceeded its timeout and was terminated.
    #[error("{script} timed out after {}s", .timeout.as_secs())]
    TimedOut {
        /// Script file name.
        script: String,
        /// The timeout that was exceeded.
        timeout: std::time::Duration,
    },

    /// The script process could not be started.
    #[error("failed to start {script}: {source}")]
    Spawn {
        /// Script file name.
        script: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Render the last few lines of captured output for an error message.
fn tail(output: &str) -> String {
    let lines: Vec<&str> = output.trim_end().lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(5);
    let shown = lines.get(start..).unwrap_or_default().join("\n");
    format!(":\n{shown}")
}

/// Errors from filesystem operations during deploy, backup and rollback.
#[derive(Error, Debug)]
pub enum FileOpError {
    /// Deploying a file (symlink, copy or template write) failed.
    #[error("deploy {path}: {source}")]
    Deploy {
        /// Destination being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Backing up a file before overwrite failed.
    #[error("backup {path}: {source}")]
    Backup {
        /// File being backed up.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A template could not be rendered.
    #[error("render {path}: {message}")]
    Render {
        /// Template source path.
        path: PathBuf,
        /// Renderer message.
        message: String,
    },

    /// Reversing a recorded operation failed.
    #[error("rollback {path}: {source}")]
    Rollback {
        /// Path the operation referred to.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors reading or writing persisted module state.
#[derive(Error, Debug)]
pub enum StateError {
    /// The state document could not be read.
    #[error("read state for '{module}': {source}")]
    Read {
        /// Module whose state was being read.
        module: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The state document could not be written or removed.
    #[error("write state for '{module}': {source}")]
    Write {
        /// Module whose state was being written.
        module: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The state document is not valid JSON for the expected shape.
    #[error("decode state for '{module}': {source}")]
    Decode {
        /// Module whose state was being decoded.
        module: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },

    /// The in-memory state could not be encoded.
    #[error("encode state for '{module}': {source}")]
    Encode {
        /// Module whose state was being encoded.
        module: String,
        /// Underlying encode error.
        source: serde_json::Error,
    },
}
