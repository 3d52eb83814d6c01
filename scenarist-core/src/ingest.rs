//! Document ingestion: extraction, chunking, embedding and storage.
//!
//! Format-specific text extraction is pluggable through [`TextExtractor`].
//! Plain text is handled in-process; PDF and word-processor extractors are
//! supplied by the caller. Image sources carry a pre-computed caption and are
//! stored as a single chunk.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunker::{Chunker, TextSegment};
use crate::embeddings::{Embedder, embed_or_zero};
use crate::error::{IngestError, Result};
use crate::index::NamespaceStore;
use crate::types::{DocumentChunk, DocumentId, Namespace, meta};

/// Document formats the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    Docx,
    Text,
    Image,
}

impl SourceKind {
    /// Classify a path by extension (case-insensitive).
    pub fn from_path(path: &Path) -> std::result::Result<Self, IngestError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Text),
            "png" | "jpg" | "jpeg" => Ok(Self::Image),
            _ => Err(IngestError::UnsupportedSource { extension }),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "text",
            Self::Image => "image",
        };
        f.write_str(name)
    }
}

/// A source file queued for ingestion.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub document_id: DocumentId,
    pub path: PathBuf,
    /// Display name; becomes the chunks' source label.
    pub name: String,
    pub kind: SourceKind,
    /// Pre-computed description for image sources.
    pub caption: Option<String>,
}

impl SourceDocument {
    /// Classify `path`, failing fast on unsupported types.
    pub fn from_path(path: impl Into<PathBuf>) -> std::result::Result<Self, IngestError> {
        let path = path.into();
        let kind = SourceKind::from_path(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            document_id: DocumentId::new(),
            path,
            name,
            kind,
            caption: None,
        })
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Turns a file of one format into ordered text segments.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn extract(&self, path: &Path) -> std::result::Result<Vec<TextSegment>, IngestError>;
}

/// Reads UTF-8 text files; form feeds separate pages.
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn kind(&self) -> SourceKind {
        SourceKind::Text
    }

    async fn extract(&self, path: &Path) -> std::result::Result<Vec<TextSegment>, IngestError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| IngestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(text
            .split('\u{c}')
            .enumerate()
            .map(|(i, page)| TextSegment::new(page, i + 1))
            .collect())
    }
}

/// Extractors keyed by the format they handle.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<SourceKind, Arc<dyn TextExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PlainTextExtractor));
        registry
    }
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Register an extractor, replacing any previous one for its format.
    pub fn register(&mut self, extractor: Arc<dyn TextExtractor>) {
        self.extractors.insert(extractor.kind(), extractor);
    }

    pub fn get(&self, kind: SourceKind) -> std::result::Result<Arc<dyn TextExtractor>, IngestError> {
        self.extractors
            .get(&kind)
            .cloned()
            .ok_or_else(|| IngestError::NoExtractor {
                kind: kind.to_string(),
            })
    }
}

/// Summary of one stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocument {
    pub document_id: DocumentId,
    pub name: String,
    pub chunks: usize,
    /// Chunks stored with a zero vector because embedding failed.
    pub degraded_embeddings: usize,
}

/// A document the batch could not store, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub name: String,
    pub error: String,
}

/// Per-document outcome of [`DocumentIngestor::ingest_batch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub ingested: Vec<IngestedDocument>,
    pub failed: Vec<FailedDocument>,
}

impl BatchReport {
    pub fn total_chunks(&self) -> usize {
        self.ingested.iter().map(|d| d.chunks).sum()
    }
}

/// Progress reported after each batch of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Zero-based batch number.
    pub batch_index: usize,
    /// Documents in this batch.
    pub processed_files: usize,
    pub total_files: usize,
    pub batch_chunks: usize,
    pub cumulative_chunks: usize,
    pub progress_percentage: f64,
}

/// Extracts, chunks, embeds and stores documents in one namespace.
pub struct DocumentIngestor {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    extractors: ExtractorRegistry,
}

impl DocumentIngestor {
    pub fn new(chunker: Chunker, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunker,
            embedder,
            extractors: ExtractorRegistry::default(),
        }
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    /// Build the chunks for one document without storing them.
    ///
    /// A source with no text, or an image without a caption, yields no
    /// chunks rather than an error.
    pub async fn prepare(
        &self,
        doc: &SourceDocument,
        namespace: Namespace,
    ) -> std::result::Result<(Vec<DocumentChunk>, usize), IngestError> {
        let mut base = BTreeMap::new();
        base.insert(meta::SOURCE.to_string(), doc.name.clone());
        if let Some(task) = namespace.task_id() {
            base.insert(meta::TASK_ID.to_string(), task.to_string());
        }

        let pieces: Vec<(String, BTreeMap<String, String>)> = match doc.kind {
            SourceKind::Image => {
                match doc.caption.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                    Some(caption) => {
                        let mut metadata = base.clone();
                        metadata.insert(meta::KIND.to_string(), "visual_test_elements".into());
                        metadata.insert(meta::CONTENT_TYPE.to_string(), "image_analysis".into());
                        vec![(caption.to_string(), metadata)]
                    }
                    None => {
                        warn!(document = doc.name.as_str(), "Image has no caption, nothing to index");
                        Vec::new()
                    }
                }
            }
            kind => {
                let extractor = self.extractors.get(kind)?;
                let segments = extractor.extract(&doc.path).await?;
                self.chunker
                    .chunk_segments(&segments)
                    .into_iter()
                    .map(|piece| {
                        let mut metadata = base.clone();
                        metadata.insert(meta::KIND.to_string(), "document".into());
                        metadata.insert(meta::CONTENT_TYPE.to_string(), doc.extension());
                        metadata.insert(meta::PAGE.to_string(), piece.page.to_string());
                        metadata.insert(meta::CHUNK_INDEX.to_string(), piece.chunk_index.to_string());
                        metadata.insert(meta::TOTAL_CHUNKS.to_string(), piece.total_chunks.to_string());
                        (piece.text, metadata)
                    })
                    .collect()
            }
        };

        if pieces.is_empty() {
            if doc.kind != SourceKind::Image {
                warn!(document = doc.name.as_str(), "Source produced no text");
            }
            return Ok((Vec::new(), 0));
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        let mut degraded = 0;
        for (content, metadata) in pieces {
            let embedding = embed_or_zero(self.embedder.as_ref(), &content).await;
            if embedding.degraded {
                degraded += 1;
            }
            chunks.push(DocumentChunk {
                content,
                metadata,
                embedding: embedding.vector,
                document_id: doc.document_id.clone(),
                task_id: namespace.task_id(),
            });
        }
        Ok((chunks, degraded))
    }

    /// Ingest one document into `store`.
    pub async fn ingest(&self, store: &NamespaceStore, doc: &SourceDocument) -> Result<IngestedDocument> {
        let (chunks, degraded_embeddings) = self.prepare(doc, store.namespace()).await?;
        let stored = store.add(chunks).await?;
        debug!(
            namespace = %store.namespace(),
            document = doc.name.as_str(),
            chunks = stored,
            "Document ingested"
        );
        Ok(IngestedDocument {
            document_id: doc.document_id.clone(),
            name: doc.name.clone(),
            chunks: stored,
            degraded_embeddings,
        })
    }

    /// Ingest documents sequentially in batches of `batch_size`, calling
    /// `on_progress` after each batch. A document that fails is logged and
    /// recorded in the report; the rest of the batch carries on.
    pub async fn ingest_batch<F>(
        &self,
        store: &NamespaceStore,
        docs: &[SourceDocument],
        batch_size: usize,
        mut on_progress: F,
    ) -> BatchReport
    where
        F: FnMut(&BatchProgress),
    {
        let batch_size = batch_size.max(1);
        let total_files = docs.len();
        let mut report = BatchReport::default();
        let mut cumulative_chunks = 0;
        let mut seen = 0;

        for (batch_index, batch) in docs.chunks(batch_size).enumerate() {
            let mut batch_chunks = 0;
            for doc in batch {
                match self.ingest(store, doc).await {
                    Ok(ingested) => {
                        batch_chunks += ingested.chunks;
                        report.ingested.push(ingested);
                    }
                    Err(e) => {
                        warn!(
                            namespace = %store.namespace(),
                            document = doc.name.as_str(),
                            error = %e,
                            "Document ingestion failed"
                        );
                        report.failed.push(FailedDocument {
                            name: doc.name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            seen += batch.len();
            cumulative_chunks += batch_chunks;

            let progress = BatchProgress {
                batch_index,
                processed_files: batch.len(),
                total_files,
                batch_chunks,
                cumulative_chunks,
                progress_percentage: seen as f64 / total_files as f64 * 100.0,
            };
            info!(
                namespace = %store.namespace(),
                batch = batch_index,
                files = progress.processed_files,
                chunks = cumulative_chunks,
                progress = progress.progress_percentage,
                "Batch ingested"
            );
            on_progress(&progress);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::LocalEmbedder;
    use crate::types::TaskId;

    fn ingestor(size: usize) -> DocumentIngestor {
        DocumentIngestor::new(Chunker::new(size, 0), Arc::new(LocalEmbedder::new(32)))
    }

    #[test]
    fn test_source_kind_from_path() {
        assert_eq!(SourceKind::from_path(Path::new("a.PDF")).unwrap(), SourceKind::Pdf);
        assert_eq!(SourceKind::from_path(Path::new("b.docx")).unwrap(), SourceKind::Docx);
        assert_eq!(SourceKind::from_path(Path::new("c.txt")).unwrap(), SourceKind::Text);
        assert_eq!(SourceKind::from_path(Path::new("d.jpeg")).unwrap(), SourceKind::Image);
        let err = SourceKind::from_path(Path::new("e.xlsx")).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported file type: xlsx");
        assert!(SourceDocument::from_path("noext").is_err());
    }

    #[tokio::test]
    async fn test_text_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.txt");
        std::fs::write(&path, "Passwords need eight characters.\u{c}Accounts lock after five tries.").unwrap();
        let doc = SourceDocument::from_path(&path).unwrap();

        let (chunks, degraded) = ingestor(1000)
            .prepare(&doc, Namespace::Task(TaskId(3)))
            .await
            .unwrap();
        assert_eq!(degraded, 0);
        assert_eq!(chunks.len(), 2);
        let second = &chunks[1];
        assert_eq!(second.source(), Some("auth.txt"));
        assert_eq!(second.meta(meta::KIND), Some("document"));
        assert_eq!(second.meta(meta::CONTENT_TYPE), Some("txt"));
        assert_eq!(second.meta(meta::PAGE), Some("2"));
        assert_eq!(second.meta(meta::CHUNK_INDEX), Some("1"));
        assert_eq!(second.meta(meta::TOTAL_CHUNKS), Some("2"));
        assert_eq!(second.meta(meta::TASK_ID), Some("3"));
        assert_eq!(second.task_id, Some(TaskId(3)));
        assert_eq!(second.embedding.len(), 32);
    }

    #[tokio::test]
    async fn test_image_caption_is_single_chunk() {
        let doc = SourceDocument::from_path("/tmp/screen.png")
            .unwrap()
            .with_caption("Login form with username, password and a submit button");
        let (chunks, _) = ingestor(10).prepare(&doc, Namespace::Shared).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].meta(meta::KIND), Some("visual_test_elements"));
        assert_eq!(chunks[0].meta(meta::CONTENT_TYPE), Some("image_analysis"));
        assert_eq!(chunks[0].meta(meta::TASK_ID), None);
    }

    #[tokio::test]
    async fn test_missing_extractor_and_caption() {
        let pdf = SourceDocument::from_path("/tmp/spec.pdf").unwrap();
        let err = ingestor(10).prepare(&pdf, Namespace::Shared).await.unwrap_err();
        assert!(matches!(err, IngestError::NoExtractor { ref kind } if kind == "pdf"));

        let image = SourceDocument::from_path("/tmp/shot.jpg").unwrap();
        let (chunks, degraded) = ingestor(10).prepare(&image, Namespace::Shared).await.unwrap();
        assert!(chunks.is_empty());
        assert_eq!(degraded, 0);
    }

    #[tokio::test]
    async fn test_empty_text_file_yields_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "   \n").unwrap();
        let doc = SourceDocument::from_path(&path).unwrap();
        let (chunks, _) = ingestor(10).prepare(&doc, Namespace::Shared).await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_batch_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(dir.path().join("task_1"), Namespace::Task(TaskId(1))).unwrap();
        let mut docs = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("doc{i}.txt"));
            std::fs::write(&path, format!("document number {i}")).unwrap();
            docs.push(SourceDocument::from_path(&path).unwrap());
        }

        let mut seen = Vec::new();
        let report = ingestor(1000)
            .ingest_batch(&store, &docs, 2, |p| seen.push(p.clone()))
            .await;

        assert_eq!(report.ingested.len(), 3);
        assert!(report.failed.is_empty());
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].batch_index, 0);
        assert_eq!(seen[0].processed_files, 2);
        assert_eq!(seen[1].processed_files, 1);
        assert_eq!(seen[1].cumulative_chunks, 3);
        assert_eq!(seen[1].progress_percentage, 100.0);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_batch_continues_past_blank_and_unreadable_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(dir.path().join("shared"), Namespace::Shared).unwrap();
        let blank = dir.path().join("blank.txt");
        std::fs::write(&blank, "").unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "Orders ship within two business days.").unwrap();
        let docs = vec![
            SourceDocument::from_path(&blank).unwrap(),
            SourceDocument::from_path(dir.path().join("missing.txt")).unwrap(),
            SourceDocument::from_path(&good).unwrap(),
        ];

        let report = ingestor(100).ingest_batch(&store, &docs, 5, |_| {}).await;

        let stored: Vec<_> = report
            .ingested
            .iter()
            .map(|d| (d.name.as_str(), d.chunks))
            .collect();
        assert_eq!(stored, vec![("blank.txt", 0), ("good.txt", 1)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "missing.txt");
        assert_eq!(report.total_chunks(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
