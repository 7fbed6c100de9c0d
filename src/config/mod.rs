//! Repository configuration: discovered modules plus live settings.
pub mod manifest;
pub mod settings;
pub mod toml_loader;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::module::Module;
use settings::Settings;

/// Directory under the repository root that holds one sub-directory per module.
pub const MODULES_DIR: &str = "modules";

/// All loaded configuration for a repository.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository root.
    pub root: PathBuf,
    /// Live settings from `modkit.toml`.
    pub settings: Settings,
    /// Every discovered module, sorted by name.
    pub modules: Vec<Module>,
}

impl Config {
    /// Discover modules and load settings under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if any manifest or the settings file is invalid.
    pub fn load(root: &Path) -> Result<Self> {
        let settings = Settings::load(root).context("loading modkit.toml")?;
        let modules =
            manifest::discover(&root.join(MODULES_DIR)).context("discovering modules")?;

        Ok(Self {
            root: root.to_path_buf(),
            settings,
            modules,
        })
    }

    /// Look up a discovered module by name.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }
}
