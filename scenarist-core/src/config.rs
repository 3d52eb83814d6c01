//! Configuration system for Scenarist.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment. Configuration is loaded from
//! `~/.config/scenarist/config.toml` and/or `.scenarist/config.toml` in the
//! workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::embeddings::EmbeddingConfig;
use crate::error::ConfigError;

/// Default instruction template placed ahead of every scenario prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a test scenario generator that creates comprehensive test scenarios based on given context and criteria. Your role is to analyze the provided content and generate relevant test scenarios that verify the described elements, relationships, and requirements.

IMPORTANT: You must ONLY use information from the provided context documents to create the test scenario. Do not rely on general knowledge or assumptions. Every aspect of the generated scenario must be traceable back to specific content in the provided context.";

/// Default task template. `{context}` and `{criteria}` are substituted per request.
pub const DEFAULT_SCENARIO_PROMPT: &str = "Based on the following context documents and criteria, generate a detailed test scenario that adheres to the IEEE 829 standard for test documentation. The scenario must be specifically derived from and reference the provided context documents.

Context Documents:
{context}

Criteria:
{criteria}

IMPORTANT INSTRUCTIONS:
1. You MUST use ONLY information from the provided context documents
2. Do NOT use general knowledge or assumptions
3. Every test step must reference specific content from the context
4. If context is insufficient, state what information is missing
5. Include document references for traceability

Generate a comprehensive test scenario with the following structure:

1. Test Scenario ID and Name (include source document reference)
2. Test Case Objective (state which context document(s) it is based on)
3. Preconditions (with document references)
4. Test Steps, formatted as: [Doc Ref] Step Description
5. Post-conditions (with document references)
6. Test Data Requirements (only data elements mentioned in context)
7. Environmental Needs (only systems/components mentioned in context)
8. Special Procedural Requirements
9. Inter-case Dependencies
10. Pass/Fail Criteria (with document references for each criterion)

If any section cannot be completed due to missing information in the context, explicitly state:
\"[MISSING] Required information not found in provided context: <description of what's missing>\"";

/// Top-level Scenarist configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenaristConfig {
    /// Retrieval pipeline settings.
    #[serde(default)]
    pub rag: RagConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Completion endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Prompt templates.
    #[serde(default)]
    pub prompts: PromptConfig,
    /// Where completed scenarios are recorded.
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
}

/// Retrieval pipeline configuration.
impl Default for ScenaristConfig {
    fn default() -> Self {
        Self {
            rag: RagConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            prompts: PromptConfig::default(),
            history_path: default_history_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Root directory holding one storage directory per namespace.
    #[serde(default = "default_vector_store_path")]
    pub vector_store_path: PathBuf,
    /// Maximum chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Number of chunks handed to the prompt after diversity ranking.
    #[serde(default = "default_max_relevant_chunks")]
    pub max_relevant_chunks: usize,
    /// MMR trade-off: 1.0 = pure relevance, 0.0 = pure diversity.
    #[serde(default = "default_diversity_lambda")]
    pub diversity_lambda: f32,
    /// Documents per ingestion batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Coverage below which a scenario without document references is flagged.
    #[serde(default = "default_min_context_coverage")]
    pub min_context_coverage: f64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            vector_store_path: default_vector_store_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_relevant_chunks: default_max_relevant_chunks(),
            diversity_lambda: default_diversity_lambda(),
            batch_size: default_batch_size(),
            min_context_coverage: default_min_context_coverage(),
        }
    }
}

/// Completion endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (the `/chat/completions` path is appended).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Model identifier sent with every request.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Environment variable holding the API key. Local servers need none.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Maximum output tokens per generation (the "context window" setting).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Connect timeout for the completion endpoint.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_scenario_prompt")]
    pub scenario_prompt: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            scenario_prompt: default_scenario_prompt(),
        }
    }
}

fn default_history_path() -> PathBuf {
    PathBuf::from(".scenarist/history.json")
}

fn default_vector_store_path() -> PathBuf {
    PathBuf::from(".scenarist/vector_store")
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_relevant_chunks() -> usize {
    10
}

fn default_diversity_lambda() -> f32 {
    0.5
}

fn default_batch_size() -> usize {
    5
}

fn default_min_context_coverage() -> f64 {
    0.05
}

fn default_llm_base_url() -> String {
    "http://localhost:1234/v1".to_string()
}

fn default_llm_model() -> String {
    "local-model".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
    8192
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_scenario_prompt() -> String {
    DEFAULT_SCENARIO_PROMPT.to_string()
}

impl ScenaristConfig {
    /// Resolve relative storage paths against a workspace root.
    pub fn resolve_paths(mut self, workspace: &Path) -> Self {
        if self.rag.vector_store_path.is_relative() {
            self.rag.vector_store_path = workspace.join(&self.rag.vector_store_path);
        }
        if self.history_path.is_relative() {
            self.history_path = workspace.join(&self.history_path);
        }
        self
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `SCENARIST_`)
/// 2. Workspace-local config (`.scenarist/config.toml`)
/// 3. User config (`~/.config/scenarist/config.toml`)
/// 4. Built-in defaults
pub fn load_config(workspace: Option<&Path>) -> Result<ScenaristConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ScenaristConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "scenarist", "scenarist") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // SCENARIST_LLM__MODEL, SCENARIST_RAG__MAX_RELEVANT_CHUNKS, ...
    figment = figment.merge(Env::prefixed("SCENARIST_").split("__"));

    figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".scenarist").join("config.toml")
}

/// Write prompt and token-budget settings into the workspace config file.
///
/// Loads the existing `.scenarist/config.toml` (or defaults), replaces the
/// `[prompts]` section and `llm.max_tokens`, preserves everything else, and
/// writes back. Returns the path to the config file.
pub fn save_prompt_settings(
    workspace: &Path,
    prompts: &PromptConfig,
    max_tokens: usize,
) -> anyhow::Result<PathBuf> {
    let config_path = workspace_config_path(workspace);
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut config: ScenaristConfig = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content)?
    } else {
        ScenaristConfig::default()
    };

    config.prompts = prompts.clone();
    config.llm.max_tokens = max_tokens;

    let toml_str = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, &toml_str)?;
    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScenaristConfig::default();
        assert_eq!(config.rag.chunk_size, 1000);
        assert_eq!(config.rag.chunk_overlap, 200);
        assert_eq!(config.rag.max_relevant_chunks, 10);
        assert!((config.rag.diversity_lambda - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.llm.max_tokens, 8192);
        assert_eq!(config.llm.model, "local-model");
        assert!(config.prompts.scenario_prompt.contains("{context}"));
        assert!(config.prompts.scenario_prompt.contains("{criteria}"));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = ScenaristConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let restored: ScenaristConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.rag.chunk_size, config.rag.chunk_size);
        assert_eq!(restored.prompts.system_prompt, config.prompts.system_prompt);
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: ScenaristConfig = toml::from_str("[rag]\nchunk_size = 400\n").unwrap();
        assert_eq!(config.rag.chunk_size, 400);
        assert_eq!(config.rag.chunk_overlap, 200);
        assert_eq!(config.llm.max_tokens, 8192);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let scenarist_dir = dir.path().join(".scenarist");
        std::fs::create_dir_all(&scenarist_dir).unwrap();
        std::fs::write(
            scenarist_dir.join("config.toml"),
            r#"
[rag]
max_relevant_chunks = 4
diversity_lambda = 0.8

[llm]
model = "qwen2.5:7b"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.rag.max_relevant_chunks, 4);
        assert!((config.rag.diversity_lambda - 0.8).abs() < 1e-6);
        assert_eq!(config.llm.model, "qwen2.5:7b");
        assert_eq!(config.rag.chunk_size, 1000);
    }

    #[test]
    fn test_resolve_paths() {
        let config = ScenaristConfig::default().resolve_paths(Path::new("/srv/ws"));
        assert_eq!(
            config.rag.vector_store_path,
            PathBuf::from("/srv/ws/.scenarist/vector_store")
        );
        assert_eq!(
            config.history_path,
            PathBuf::from("/srv/ws/.scenarist/history.json")
        );
    }

    #[test]
    fn test_default_history_path_is_a_file_under_workspace() {
        let config = ScenaristConfig::default();
        assert_eq!(config.history_path, PathBuf::from(".scenarist/history.json"));

        let dir = tempfile::tempdir().unwrap();
        let resolved = load_config(Some(dir.path()))
            .unwrap()
            .resolve_paths(dir.path());
        assert_eq!(resolved.history_path, dir.path().join(".scenarist/history.json"));
        assert!(!resolved.history_path.is_dir());
    }

    #[test]
    fn test_malformed_workspace_config_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[rag]\nchunk_size = \"large\"\n").unwrap();

        let err = load_config(Some(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }

    #[test]
    fn test_save_prompt_settings_preserves_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[rag]\nchunk_size = 321\n").unwrap();

        let prompts = PromptConfig {
            system_prompt: "Be terse.".into(),
            scenario_prompt: "{context}\n{criteria}".into(),
        };
        save_prompt_settings(dir.path(), &prompts, 2048).unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.rag.chunk_size, 321);
        assert_eq!(config.prompts.system_prompt, "Be terse.");
        assert_eq!(config.llm.max_tokens, 2048);
    }
}
