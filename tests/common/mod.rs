// Shared helpers for integration tests.
//
// Provides a temporary module repository with its own home and state
// directories, and a fluent builder for module directories, so each test can
// set up an isolated environment without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use modkit_cli::config::{Config, MODULES_DIR};
use modkit_cli::engine::{Context, RunFlags, RunReport, resolve, run_plan};
use modkit_cli::logging::Logger;
use modkit_cli::state::{JsonStateStore, ModuleState, StateStore};

/// An isolated repository, home and state directory backed by a
/// [`tempfile::TempDir`].
pub struct TestRepo {
    /// Temporary directory holding `repo/`, `home/` and `state/`.
    pub tmp: tempfile::TempDir,
}

impl TestRepo {
    /// Create an empty repository with a `modules/` directory.
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir_all(tmp.path().join("repo").join(MODULES_DIR))
            .expect("create modules dir");
        std::fs::create_dir_all(tmp.path().join("home")).expect("create home dir");
        Self { tmp }
    }

    /// Repository root.
    pub fn root(&self) -> PathBuf {
        self.tmp.path().join("repo")
    }

    /// Fake home directory used as the deployment target.
    pub fn home(&self) -> PathBuf {
        self.tmp.path().join("home")
    }

    /// State directory.
    pub fn state_dir(&self) -> PathBuf {
        self.tmp.path().join("state")
    }

    /// Start building a module directory named `name`.
    pub fn module(&self, name: &str) -> ModuleBuilder {
        let dir = self.root().join(MODULES_DIR).join(name);
        std::fs::create_dir_all(&dir).expect("create module dir");
        ModuleBuilder {
            dir,
            manifest: format!("name = \"{name}\"\nversion = \"1.0.0\"\n"),
        }
    }

    /// Write `modkit.toml`.
    pub fn settings(&self, content: &str) {
        std::fs::write(self.root().join("modkit.toml"), content).expect("write modkit.toml");
    }

    /// Load the repository configuration.
    pub fn config(&self) -> Config {
        Config::load(&self.root()).expect("load config")
    }

    /// A context with the real executor, state store and renderer.
    pub fn context(&self, flags: RunFlags) -> Context {
        Context::with_home_dir(
            &self.config(),
            &self.state_dir(),
            &self.home(),
            Arc::new(Logger::new("test")),
            flags,
        )
    }

    /// Resolve `requested` and run it with `flags`.
    pub fn install(&self, requested: &[&str], flags: RunFlags) -> RunReport {
        let ctx = self.context(flags);
        let requested: Vec<String> = requested.iter().map(ToString::to_string).collect();
        let plan =
            resolve(&self.config().modules, &requested, ctx.platform.os).expect("resolve plan");
        run_plan(&ctx, &plan)
    }

    /// The state store under [`TestRepo::state_dir`].
    pub fn store(&self) -> JsonStateStore {
        JsonStateStore::new(&self.state_dir())
    }

    /// Load the persisted record for `module`.
    pub fn state(&self, module: &str) -> Option<ModuleState> {
        self.store().load(module).expect("load state")
    }

    /// Read a file relative to the home directory.
    pub fn read_home(&self, rel: &str) -> String {
        std::fs::read_to_string(self.home().join(rel)).expect("read home file")
    }
}

/// Unattended flags with an explicit rollback policy of `never`.
pub fn flags() -> RunFlags {
    RunFlags {
        unattended: true,
        rollback: modkit_cli::config::settings::RollbackPolicy::Never,
        ..RunFlags::default()
    }
}

/// Fluent builder for a module directory.
pub struct ModuleBuilder {
    dir: PathBuf,
    manifest: String,
}

impl ModuleBuilder {
    /// Append raw TOML to the manifest (top-level keys only).
    pub fn manifest(mut self, toml: &str) -> Self {
        self.manifest.push_str(toml);
        self.manifest.push('\n');
        self
    }

    /// Write a script next to the manifest.
    pub fn script(self, name: &str, body: &str) -> Self {
        std::fs::write(self.dir.join(name), body).expect("write script");
        self
    }

    /// Write a source file inside the module directory.
    pub fn file(self, rel: &str, content: &str) -> Self {
        let path = self.dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create file parent");
        }
        std::fs::write(path, content).expect("write module file");
        self
    }

    /// Write the manifest and return the module directory.
    pub fn create(self) -> PathBuf {
        std::fs::write(self.dir.join("module.toml"), &self.manifest).expect("write manifest");
        self.dir
    }
}
