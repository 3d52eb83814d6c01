//! # scenarist-core
//!
//! Retrieval-augmented test scenario generation. Documents are chunked,
//! embedded and stored in per-task vector namespaces; a generation request
//! retrieves the most relevant, least redundant chunks (MMR), renders them
//! into a source-attributed context block, streams a completion from an
//! OpenAI-compatible endpoint and checks afterwards whether the output
//! actually drew on that context.

// Foundation
pub mod config;
pub mod error;
pub mod settings;
pub mod types;

// Retrieval
pub mod chunker;
pub mod embeddings;
pub mod index;
pub mod ingest;
pub mod rerank;

// Generation
pub mod context;
pub mod generation;
pub mod grounding;
pub mod orchestrator;

// Records
pub mod catalog;
pub mod history;

// Re-exports
pub use catalog::DocumentCatalog;
pub use chunker::{ChunkPiece, Chunker, TextSegment};
pub use config::{ScenaristConfig, load_config};
pub use context::{NO_CONTEXT_MARKER, format_context};
pub use embeddings::{Embedder, Embedding, EmbeddingConfig, LocalEmbedder, create_embedder, embed_or_zero};
pub use error::{ConfigError, EmbedError, IndexError, IngestError, LlmError, Result, ScenaristError};
pub use generation::{
    FragmentStream, GenerationClient, GenerationRequest, OpenAiCompatibleClient, ScriptedClient,
};
pub use grounding::{ContextValidator, ValidationReport};
pub use history::{ScenarioHistory, ScenarioRecord};
pub use index::{IndexManager, NamespaceStore, Retrieval, RetrievalStatus};
pub use ingest::{
    BatchProgress, BatchReport, DocumentIngestor, ExtractorRegistry, FailedDocument,
    IngestedDocument, PlainTextExtractor, SourceDocument, SourceKind, TextExtractor,
};
pub use orchestrator::{GenerationEvent, GenerationSession, GenerationStats, ScenarioGenerator};
pub use rerank::MmrReranker;
pub use settings::{RuntimeSettings, SettingsSnapshot};
pub use types::{DocumentChunk, DocumentId, Namespace, ScoredChunk, TaskId};
