//! Pluggable embedding providers.
//!
//! Provides a trait-based abstraction over embedding models, with
//! implementations for a local hashed bag-of-words model (always available),
//! the OpenAI embeddings API, and the Ollama API.
//!
//! Callers on the retrieval path use [`embed_or_zero`], which never fails:
//! a provider error degrades to a zero vector of the configured dimension and
//! the returned [`Embedding`] is flagged as degraded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::EmbedError;

/// Trait for embedding providers.
///
/// Implementations must be deterministic for identical input and always
/// produce vectors of length [`Embedder::dimensions`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;
}

/// Configuration for embedding providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "local" (default), "openai", "ollama".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Provider-specific model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Embedding dimensions.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Optional base URL override for remote providers.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "local".into()
}

fn default_dimensions() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dimensions: default_dimensions(),
            base_url: None,
        }
    }
}

/// Outcome of an embedding call on a path that must not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    /// True when the provider failed and `vector` is the zero fallback.
    pub degraded: bool,
}

/// Embed `text`, substituting a zero vector of the embedder's dimension on failure.
pub async fn embed_or_zero(embedder: &dyn Embedder, text: &str) -> Embedding {
    match embedder.embed(text).await {
        Ok(vector) => Embedding {
            vector,
            degraded: false,
        },
        Err(e) => {
            warn!(
                provider = embedder.provider_name(),
                error = %e,
                "Embedding failed, substituting zero vector"
            );
            Embedding {
                vector: vec![0.0; embedder.dimensions()],
                degraded: true,
            }
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths, empty input, or a zero-magnitude
/// vector on either side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Local hashed bag-of-words embedder (no external dependencies).
///
/// Each lowercase alphanumeric term is hashed into a dimension and its term
/// frequency accumulated; the result is L2-normalised.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return vector;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// OpenAI API embedder (uses text-embedding-3-small by default).
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "text-embedding-3-small".into());
        let dims = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            dims,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".into()),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Request {
                message: e.to_string(),
            })?;
        let json = read_json(resp).await?;
        let vector = parse_vector(&json["data"][0]["embedding"])?;
        check_dimensions(vector, self.dims)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Ollama embedder (uses local Ollama API).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
}

impl OllamaEmbedder {
    pub fn new(model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "all-minilm".into());
        let dims = match model.as_str() {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            _ => 384,
        };
        Self {
            client: reqwest::Client::new(),
            model,
            dims,
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".into()),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Request {
                message: e.to_string(),
            })?;
        let json = read_json(resp).await?;
        let vector = parse_vector(&json["embeddings"][0])?;
        check_dimensions(vector, self.dims)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, EmbedError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(EmbedError::Request {
            message: format!("HTTP {}", status.as_u16()),
        });
    }
    resp.json::<serde_json::Value>()
        .await
        .map_err(|e| EmbedError::ResponseParse {
            message: e.to_string(),
        })
}

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>, EmbedError> {
    let array = value.as_array().ok_or_else(|| EmbedError::ResponseParse {
        message: "missing embedding array".into(),
    })?;
    Ok(array
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect())
}

fn check_dimensions(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbedError> {
    if vector.len() != expected {
        return Err(EmbedError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// Factory function to create an embedder based on configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Box<dyn Embedder> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            if api_key.is_empty() {
                warn!("OPENAI_API_KEY not set, falling back to local embedder");
                Box::new(LocalEmbedder::new(config.dimensions))
            } else {
                Box::new(OpenAiEmbedder::new(
                    api_key,
                    config.model.clone(),
                    config.base_url.clone(),
                ))
            }
        }
        "ollama" => Box::new(OllamaEmbedder::new(
            config.model.clone(),
            config.base_url.clone(),
        )),
        "local" => Box::new(LocalEmbedder::new(config.dimensions)),
        other => {
            warn!(provider = other, "Unknown embedding provider, using local");
            Box::new(LocalEmbedder::new(config.dimensions))
        }
    }
}
