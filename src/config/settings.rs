//! Live user settings (`modkit.toml`).
//!
//! ```toml
//! [user]
//! name = "Ada Lovelace"
//! email = "ada@example.com"
//!
//! [modules.git]
//! editor = "nvim"
//!
//! [run]
//! timeout = "15m"
//! rollback = "always"
//! ```
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use super::toml_loader;
use crate::error::ConfigError;

/// File name of the settings document at the repository root.
pub const SETTINGS_FILE: &str = "modkit.toml";

/// What to do with a failed module's recorded operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackPolicy {
    /// Ask interactively; behaves like [`RollbackPolicy::Never`] when unattended.
    #[default]
    Prompt,
    /// Roll back automatically.
    Always,
    /// Leave partial changes in place.
    Never,
}

impl FromStr for RollbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prompt" => Ok(Self::Prompt),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "invalid rollback policy '{other}': expected prompt, always or never"
            )),
        }
    }
}

impl fmt::Display for RollbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prompt => "prompt",
            Self::Always => "always",
            Self::Never => "never",
        })
    }
}

/// Defaults for run flags; command-line options take precedence.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RunDefaults {
    /// Default script timeout as a duration string.
    #[serde(default)]
    pub timeout: Option<String>,
    /// Default rollback policy.
    #[serde(default)]
    pub rollback: Option<RollbackPolicy>,
    /// Abort remaining modules after the first failure.
    #[serde(default)]
    pub fail_fast: Option<bool>,
    /// Skip modules whose last run failed instead of retrying them.
    #[serde(default)]
    pub skip_failed: Option<bool>,
}

/// Parsed settings document.
///
/// The maps are deliberately unordered; anything that needs a stable view
/// (the config hash, template contexts) sorts keys itself.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Settings {
    /// Global user identity fields shared by every module.
    #[serde(default)]
    pub user: HashMap<String, toml::Value>,
    /// Per-module configuration subtrees keyed by module name.
    #[serde(default)]
    pub modules: HashMap<String, toml::Value>,
    /// Run defaults.
    #[serde(default)]
    pub run: RunDefaults,
}

impl Settings {
    /// Load settings from `root/modkit.toml`; a missing file yields empty settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        toml_loader::load_config(&root.join(SETTINGS_FILE))
    }

    /// The configuration subtree for `module`, if any.
    #[must_use]
    pub fn module_config(&self, module: &str) -> Option<&toml::Value> {
        self.modules.get(module)
    }

    /// User identity fields rendered as strings, sorted by key.
    #[must_use]
    pub fn user_strings(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .user
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect();
        fields.sort();
        fields
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert!(settings.user.is_empty());
        assert!(settings.modules.is_empty());
        assert_eq!(settings.run, RunDefaults::default());
    }

    #[test]
    fn loads_user_modules_and_run_sections() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"
[user]
name = "Ada"
email = "ada@example.com"

[modules.git]
editor = "nvim"

[run]
timeout = "15m"
rollback = "always"
fail_fast = true
"#,
        )
        .unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(
            settings.user_strings(),
            vec![
                ("email".to_string(), "ada@example.com".to_string()),
                ("name".to_string(), "Ada".to_string()),
            ]
        );
        assert!(settings.module_config("git").is_some());
        assert!(settings.module_config("zsh").is_none());
        assert_eq!(settings.run.timeout.as_deref(), Some("15m"));
        assert_eq!(settings.run.rollback, Some(RollbackPolicy::Always));
        assert_eq!(settings.run.fail_fast, Some(true));
    }

    #[test]
    fn rollback_policy_parses_case_insensitively() {
        assert_eq!("ALWAYS".parse::<RollbackPolicy>(), Ok(RollbackPolicy::Always));
        assert!("sometimes".parse::<RollbackPolicy>().is_err());
    }
}
