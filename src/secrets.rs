//! Secret lookup for prompts that declare a `secret` reference.
use std::collections::HashMap;

/// Source of secret values.
pub trait SecretsProvider: Send + Sync {
    /// Whether the provider can be used at all.
    fn available(&self) -> bool;
    /// Whether the provider is ready to return values (e.g. unlocked).
    fn authenticated(&self) -> bool;
    /// Resolve `reference` to its value.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be resolved.
    fn lookup(&self, reference: &str) -> anyhow::Result<String>;
}

/// Resolves references from environment variables.
///
/// A reference `github/token` is looked up as `MODKIT_SECRET_GITHUB_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets {
    overrides: HashMap<String, String>,
}

impl EnvSecrets {
    /// Create a provider reading the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider backed by a fixed map instead of the environment.
    #[must_use]
    pub const fn from_map(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    /// Environment variable consulted for `reference`.
    #[must_use]
    pub fn var_name(reference: &str) -> String {
        format!("MODKIT_SECRET_{}", env_key(reference))
    }
}

impl SecretsProvider for EnvSecrets {
    fn available(&self) -> bool {
        true
    }

    fn authenticated(&self) -> bool {
        true
    }

    fn lookup(&self, reference: &str) -> anyhow::Result<String> {
        let var = Self::var_name(reference);
        if let Some(value) = self.overrides.get(&var) {
            return Ok(value.clone());
        }
        std::env::var(&var)
            .map_err(|_| anyhow::anyhow!("secret '{reference}' not found (set {var})"))
    }
}

/// Upper-case `raw` and replace every non-alphanumeric character with `_`.
#[must_use]
pub fn env_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
