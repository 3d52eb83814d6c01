//! Process-wide runtime settings.
//!
//! Prompt templates, the output-token budget, the retrieval depth and the MMR
//! trade-off can be changed while the process runs. Every generation request
//! reads them once through [`RuntimeSettings::snapshot`] at its start; a change
//! made mid-request only affects later requests.
//!
//! Each setter replaces a single field. Two callers updating different fields
//! concurrently both succeed, and two callers updating the same field leave
//! the last write in place. Nothing here is persisted.

use std::sync::{LazyLock, RwLock};

use regex::{Captures, Regex};

use crate::config::ScenaristConfig;
use crate::error::ConfigError;

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{(context|criteria)\}").ok());

/// Immutable copy of the runtime settings taken at the start of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsSnapshot {
    pub system_prompt: String,
    pub scenario_prompt: String,
    pub max_tokens: usize,
    pub max_relevant_chunks: usize,
    pub diversity_lambda: f32,
}

impl SettingsSnapshot {
    /// Compose the full prompt: instruction template, then the task template
    /// with `{context}` and `{criteria}` substituted in a single pass, so
    /// placeholder-like text inside the substituted values is left as is.
    pub fn compose_prompt(&self, context: &str, criteria: &str) -> String {
        let task = match PLACEHOLDER.as_ref() {
            Some(re) => re
                .replace_all(&self.scenario_prompt, |caps: &Captures| {
                    if &caps[1] == "context" { context } else { criteria }
                })
                .into_owned(),
            None => self
                .scenario_prompt
                .replace("{criteria}", criteria)
                .replace("{context}", context),
        };
        format!("{}\n\n{}", self.system_prompt, task)
    }
}

/// Mutable settings shared by every request in the process.
#[derive(Debug)]
pub struct RuntimeSettings {
    inner: RwLock<SettingsSnapshot>,
}

impl RuntimeSettings {
    pub fn new(snapshot: SettingsSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    /// Seed runtime settings from loaded configuration.
    pub fn from_config(config: &ScenaristConfig) -> Self {
        Self::new(SettingsSnapshot {
            system_prompt: config.prompts.system_prompt.clone(),
            scenario_prompt: config.prompts.scenario_prompt.clone(),
            max_tokens: config.llm.max_tokens,
            max_relevant_chunks: config.rag.max_relevant_chunks,
            diversity_lambda: config.rag.diversity_lambda,
        })
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn system_prompt(&self) -> String {
        self.snapshot().system_prompt
    }

    pub fn scenario_prompt(&self) -> String {
        self.snapshot().scenario_prompt
    }

    pub fn max_tokens(&self) -> usize {
        self.snapshot().max_tokens
    }

    pub fn max_relevant_chunks(&self) -> usize {
        self.snapshot().max_relevant_chunks
    }

    pub fn diversity_lambda(&self) -> f32 {
        self.snapshot().diversity_lambda
    }

    pub fn set_system_prompt(&self, prompt: impl Into<String>) -> Result<(), ConfigError> {
        let prompt = non_empty("system_prompt", prompt.into())?;
        self.update(|s| s.system_prompt = prompt);
        Ok(())
    }

    pub fn set_scenario_prompt(&self, prompt: impl Into<String>) -> Result<(), ConfigError> {
        let prompt = non_empty("scenario_prompt", prompt.into())?;
        self.update(|s| s.scenario_prompt = prompt);
        Ok(())
    }

    pub fn set_max_tokens(&self, max_tokens: usize) -> Result<(), ConfigError> {
        if max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_tokens".into(),
                reason: "must be greater than zero".into(),
            });
        }
        self.update(|s| s.max_tokens = max_tokens);
        Ok(())
    }

    pub fn set_max_relevant_chunks(&self, count: usize) -> Result<(), ConfigError> {
        if count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_relevant_chunks".into(),
                reason: "must be greater than zero".into(),
            });
        }
        self.update(|s| s.max_relevant_chunks = count);
        Ok(())
    }

    pub fn set_diversity_lambda(&self, lambda: f32) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(ConfigError::InvalidValue {
                field: "diversity_lambda".into(),
                reason: format!("{lambda} is outside [0, 1]"),
            });
        }
        self.update(|s| s.diversity_lambda = lambda);
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut SettingsSnapshot)) {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

fn non_empty(field: &str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "must not be empty".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RuntimeSettings {
        RuntimeSettings::from_config(&ScenaristConfig::default())
    }

    #[test]
    fn test_seeded_from_config() {
        let s = settings();
        assert_eq!(s.max_tokens(), 8192);
        assert_eq!(s.max_relevant_chunks(), 10);
        assert!(s.system_prompt().starts_with("You are a test scenario generator"));
    }

    #[test]
    fn test_compose_prompt_leaves_placeholders_in_context_alone() {
        let mut snapshot = settings().snapshot();
        snapshot.system_prompt = "SYS".into();
        snapshot.scenario_prompt = "CTX:{context}|CRIT:{criteria}".into();

        let prompt = snapshot.compose_prompt("Template field {criteria} is required", "login");
        assert_eq!(prompt, "SYS\n\nCTX:Template field {criteria} is required|CRIT:login");

        let prompt = snapshot.compose_prompt("plain", "mention {context} literally");
        assert_eq!(prompt, "SYS\n\nCTX:plain|CRIT:mention {context} literally");
    }

    #[test]
    fn test_set_and_get() {
        let s = settings();
        s.set_system_prompt("Only cite the documents.").unwrap();
        s.set_max_tokens(1024).unwrap();
        s.set_diversity_lambda(0.25).unwrap();
        assert_eq!(s.system_prompt(), "Only cite the documents.");
        assert_eq!(s.max_tokens(), 1024);
        assert!((s.diversity_lambda() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let s = settings();
        assert!(s.set_system_prompt("   ").is_err());
        assert!(s.set_scenario_prompt("").is_err());
        assert!(s.set_max_tokens(0).is_err());
        assert!(s.set_max_relevant_chunks(0).is_err());
        assert!(s.set_diversity_lambda(1.5).is_err());
        assert_eq!(s.max_tokens(), 8192);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let s = settings();
        let before = s.snapshot();
        s.set_max_tokens(16).unwrap();
        assert_eq!(before.max_tokens, 8192);
        assert_eq!(s.snapshot().max_tokens, 16);
    }

    #[test]
    fn test_compose_prompt_substitutes_placeholders() {
        let snap = SettingsSnapshot {
            system_prompt: "SYS".into(),
            scenario_prompt: "ctx={context}; crit={criteria}".into(),
            max_tokens: 10,
            max_relevant_chunks: 2,
            diversity_lambda: 0.5,
        };
        assert_eq!(
            snap.compose_prompt("A", "B"),
            "SYS\n\nctx=A; crit=B"
        );
    }
}
