//! Prompt resolution before a module's scripts run.
use std::collections::BTreeMap;

use anyhow::{Context as _, Result, bail};

use crate::module::{Module, PromptSpec};
use crate::secrets::SecretsProvider;

/// Asks the user questions.
pub trait Prompter: Send + Sync {
    /// Ask for a free-form answer.
    ///
    /// # Errors
    ///
    /// Returns an error if no answer can be obtained.
    fn ask(&self, prompt: &PromptSpec) -> Result<String>;

    /// Ask a yes/no question.
    ///
    /// # Errors
    ///
    /// Returns an error if no answer can be obtained.
    fn confirm(&self, message: &str, default: bool) -> Result<bool>;
}

/// Prompts on the terminal via `dialoguer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, prompt: &PromptSpec) -> Result<String> {
        let message = if prompt.message.is_empty() {
            prompt.key.as_str()
        } else {
            prompt.message.as_str()
        };
        let mut input = dialoguer::Input::<String>::new()
            .with_prompt(message)
            .allow_empty(true);
        if let Some(default) = &prompt.default {
            input = input.default(default.clone());
        }
        input
            .interact_text()
            .with_context(|| format!("reading answer for '{}'", prompt.key))
    }

    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(message)
            .default(default)
            .interact()
            .context("Failed to read confirmation")
    }
}

/// Answers every question with its default; used with `--unattended`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnattendedPrompter;

impl Prompter for UnattendedPrompter {
    fn ask(&self, prompt: &PromptSpec) -> Result<String> {
        prompt.default.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "prompt '{}' has no default and cannot be answered unattended",
                prompt.key
            )
        })
    }

    fn confirm(&self, _message: &str, default: bool) -> Result<bool> {
        Ok(default)
    }
}

/// Resolve every prompt of `module`, keyed by prompt key.
///
/// Prompts with a `secret` reference are answered by `secrets`; the rest go
/// to `prompter`.  With `preview` set nothing is asked or looked up:
/// defaults (or empty strings) stand in so templates can still be rendered.
///
/// # Errors
///
/// Returns an error if a prompt cannot be answered or a secret cannot be
/// resolved.
pub fn resolve(
    module: &Module,
    prompter: &dyn Prompter,
    secrets: &dyn SecretsProvider,
    preview: bool,
) -> Result<BTreeMap<String, String>> {
    let mut answers = BTreeMap::new();
    for prompt in &module.prompts {
        let answer = if preview {
            prompt.default.clone().unwrap_or_default()
        } else if let Some(reference) = &prompt.secret {
            if !secrets.available() || !secrets.authenticated() {
                bail!(
                    "secret '{reference}' for prompt '{}' unavailable: secrets provider is not ready",
                    prompt.key
                );
            }
            secrets
                .lookup(reference)
                .with_context(|| format!("resolving prompt '{}'", prompt.key))?
        } else {
            prompter.ask(prompt)?
        };
        answers.insert(prompt.key.clone(), answer);
    }
    Ok(answers)
}
