//! Error types for the Scenarist core.
//!
//! Uses `thiserror` for public API error types, one enum per subsystem:
//! ingestion, embedding, vector index, LLM transport, and configuration.
//! Degradation-capable failures (embedding, retrieval) are usually absorbed
//! into outcome types instead of surfacing here; see `embeddings::Embedding`
//! and `index::Retrieval`.

use std::path::PathBuf;

/// Top-level error type for the Scenarist core library.
#[derive(Debug, thiserror::Error)]
pub enum ScenaristError {
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while turning source documents into chunks.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Unsupported file type: {extension}")]
    UnsupportedSource { extension: String },

    #[error("No extractor registered for {kind} sources")]
    NoExtractor { kind: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("Embedding request failed: {message}")]
    Request { message: String },

    #[error("Embedding response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors from the namespaced vector index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Failed to open namespace '{namespace}': {message}")]
    Open { namespace: String, message: String },

    #[error("Namespace '{namespace}' storage is corrupted: {message}")]
    Corrupted { namespace: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Vector has {actual} dimensions but namespace '{namespace}' stores {expected}")]
    DimensionMismatch {
        namespace: String,
        expected: usize,
        actual: usize,
    },

    #[error("Namespace IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the completion endpoint.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed with HTTP {status}: {message}")]
    ApiRequest { status: u16, message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from configuration loading and runtime settings updates.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration load error: {message}")]
    Load { message: String },
}

/// Convenience type alias for Scenarist results.
pub type Result<T> = std::result::Result<T, ScenaristError>;
