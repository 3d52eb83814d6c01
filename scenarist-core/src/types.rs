//! Core data types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata keys written on every chunk.
pub mod meta {
    pub const SOURCE: &str = "source";
    pub const KIND: &str = "type";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const PAGE: &str = "page";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const TOTAL_CHUNKS: &str = "total_chunks";
    pub const TASK_ID: &str = "task_id";
}

/// Identifier of a generation task (a scenario being built).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an ingested source document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Isolation boundary for stored chunks.
///
/// Chunks written without a task land in the shared namespace; everything
/// else is partitioned per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Shared,
    Task(TaskId),
}

impl Namespace {
    /// Directory name used for this namespace's storage.
    pub fn dir_name(&self) -> String {
        match self {
            Namespace::Shared => "shared".to_string(),
            Namespace::Task(id) => format!("task_{}", id.0),
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Namespace::Shared => None,
            Namespace::Task(id) => Some(*id),
        }
    }

    /// Owner key stored with every row and used as the unconditional search filter.
    pub(crate) fn owner_key(&self) -> String {
        self.dir_name()
    }
}

impl From<Option<TaskId>> for Namespace {
    fn from(task: Option<TaskId>) -> Self {
        task.map(Namespace::Task).unwrap_or(Namespace::Shared)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// A bounded text segment with provenance and its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub embedding: Vec<f32>,
    pub document_id: DocumentId,
    pub task_id: Option<TaskId>,
}

impl DocumentChunk {
    /// Source label, if one has been assigned.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(meta::SOURCE).map(String::as_str)
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}
