//! Namespace-isolated vector index.
//!
//! Each namespace (the shared pool or one task) owns an independent SQLite
//! database in its own directory under the vector store root. Vectors are
//! stored as little-endian `f32` blobs and searched by brute-force cosine
//! similarity. Every row carries its namespace owner key and every search
//! filters on it, so a handle can never surface another namespace's chunks.
//!
//! [`IndexManager`] is the keyed collection of open handles: one handle per
//! namespace, created lazily and dropped when the namespace is deleted.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, params};
use tracing::{debug, error, info, warn};

use crate::embeddings::{Embedder, cosine_similarity, embed_or_zero};
use crate::error::IndexError;
use crate::types::{DocumentChunk, DocumentId, Namespace, ScoredChunk, TaskId, meta};

const DB_FILE: &str = "index.db";
const DIMENSION_KEY: &str = "dimension";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    document_id TEXT NOT NULL,
    task_id INTEGER,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_owner ON chunks(owner);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Why a retrieval returned what it did.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalStatus {
    /// Search ran normally and found candidates.
    Ok,
    /// Search ran normally but the namespace holds nothing to return.
    Empty,
    /// Something failed along the way; hits may be empty or low quality.
    Degraded { reason: String },
}

/// Outcome of a namespace search.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Candidates ranked by similarity, highest first.
    pub hits: Vec<ScoredChunk>,
    /// The vector the search ran with (zero vector when embedding failed).
    pub query_vector: Vec<f32>,
    pub status: RetrievalStatus,
}

impl Retrieval {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, RetrievalStatus::Degraded { .. })
    }

    fn failed(query_vector: Vec<f32>, reason: String) -> Self {
        Self {
            hits: Vec::new(),
            query_vector,
            status: RetrievalStatus::Degraded { reason },
        }
    }
}

/// Handle to one namespace's storage.
#[derive(Debug)]
pub struct NamespaceStore {
    namespace: Namespace,
    dir: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl NamespaceStore {
    /// Create or attach to the namespace's storage under `dir`.
    ///
    /// Storage that fails to open or fails `PRAGMA integrity_check` is
    /// deleted and recreated empty.
    pub fn open(dir: impl Into<PathBuf>, namespace: Namespace) -> Result<Self, IndexError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let conn = match open_checked(&dir) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    path = %dir.display(),
                    error = %e,
                    "Namespace storage corrupted, recreating empty"
                );
                if dir.exists() {
                    std::fs::remove_dir_all(&dir)?;
                }
                std::fs::create_dir_all(&dir)?;
                open_checked(&dir).map_err(|e| IndexError::Open {
                    namespace: namespace.to_string(),
                    message: e.to_string(),
                })?
            }
        };

        debug!(namespace = %namespace, path = %dir.display(), "Namespace opened");
        Ok(Self {
            namespace,
            dir,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append chunks to the namespace and persist them immediately.
    ///
    /// Chunks without a source label get `Document_{n}` from their position in
    /// the batch. The first insert fixes the namespace's embedding dimension;
    /// later vectors of another length are rejected and nothing is written.
    pub async fn add(&self, chunks: Vec<DocumentChunk>) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let conn = Arc::clone(&self.conn);
        let namespace = self.namespace;
        let count = run_blocking(move || {
            let mut conn = lock(&conn);
            insert_chunks(&mut conn, namespace, chunks)
        })
        .await?;
        debug!(namespace = %self.namespace, chunks = count, "Chunks stored");
        Ok(count)
    }

    /// Embed `query` and return up to `2k` candidates from this namespace,
    /// ranked by cosine similarity.
    ///
    /// Never fails: a query embedding failure searches with a zero vector and
    /// a storage failure returns no hits, both flagged as degraded.
    pub async fn search(&self, embedder: &dyn Embedder, query: &str, k: usize) -> Retrieval {
        let embedding = embed_or_zero(embedder, query).await;
        let query_vector = embedding.vector;

        if k == 0 {
            return Retrieval {
                hits: Vec::new(),
                query_vector,
                status: RetrievalStatus::Empty,
            };
        }

        let conn = Arc::clone(&self.conn);
        let namespace = self.namespace;
        let probe = query_vector.clone();
        let scanned =
            run_blocking(move || scan(&lock(&conn), namespace, &probe, k.saturating_mul(2))).await;

        match scanned {
            Ok(hits) => {
                let status = if embedding.degraded {
                    RetrievalStatus::Degraded {
                        reason: "query embedding unavailable, ranked with zero vector".into(),
                    }
                } else if hits.is_empty() {
                    RetrievalStatus::Empty
                } else {
                    RetrievalStatus::Ok
                };
                debug!(namespace = %self.namespace, hits = hits.len(), "Search complete");
                Retrieval {
                    hits,
                    query_vector,
                    status,
                }
            }
            Err(e) => {
                error!(namespace = %self.namespace, error = %e, "Retrieval failed");
                Retrieval::failed(query_vector, e.to_string())
            }
        }
    }

    /// Number of chunks stored in this namespace.
    pub async fn count(&self) -> Result<usize, IndexError> {
        let conn = Arc::clone(&self.conn);
        let owner = self.namespace.owner_key();
        run_blocking(move || {
            let conn = lock(&conn);
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE owner = ?1",
                params![owner],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }

    /// Embedding dimension recorded by the first insert, if any.
    pub async fn dimension(&self) -> Result<Option<usize>, IndexError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || read_dimension(&lock(&conn))).await
    }

    /// Delete every chunk of one document from this namespace.
    pub async fn remove_document(&self, document_id: &DocumentId) -> Result<usize, IndexError> {
        let conn = Arc::clone(&self.conn);
        let owner = self.namespace.owner_key();
        let document = document_id.0.clone();
        run_blocking(move || {
            let conn = lock(&conn);
            Ok(conn.execute(
                "DELETE FROM chunks WHERE owner = ?1 AND document_id = ?2",
                params![owner, document],
            )?)
        })
        .await
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, IndexError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, IndexError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IndexError::Io(std::io::Error::other(format!("Task join error: {e}"))))?
}

fn open_checked(dir: &Path) -> Result<Connection, IndexError> {
    let conn = Connection::open(dir.join(DB_FILE))?;
    conn.execute_batch(SCHEMA)?;
    let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if verdict != "ok" {
        return Err(IndexError::Corrupted {
            namespace: dir.display().to_string(),
            message: verdict,
        });
    }
    Ok(conn)
}

fn read_dimension(conn: &Connection) -> Result<Option<usize>, IndexError> {
    let mut stmt = conn.prepare("SELECT value FROM index_meta WHERE key = ?1")?;
    let mut rows = stmt.query(params![DIMENSION_KEY])?;
    match rows.next()? {
        Some(row) => {
            let value: String = row.get(0)?;
            Ok(value.parse().ok())
        }
        None => Ok(None),
    }
}

fn insert_chunks(
    conn: &mut Connection,
    namespace: Namespace,
    chunks: Vec<DocumentChunk>,
) -> Result<usize, IndexError> {
    let expected = match read_dimension(conn)? {
        Some(dim) => dim,
        None => chunks[0].embedding.len(),
    };
    if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != expected) {
        return Err(IndexError::DimensionMismatch {
            namespace: namespace.to_string(),
            expected,
            actual: bad.embedding.len(),
        });
    }

    let owner = namespace.owner_key();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO index_meta (key, value) VALUES (?1, ?2)",
        params![DIMENSION_KEY, expected.to_string()],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO chunks (owner, document_id, task_id, content, metadata, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (i, mut chunk) in chunks.iter().cloned().enumerate() {
            chunk
                .metadata
                .entry(meta::SOURCE.to_string())
                .or_insert_with(|| format!("Document_{}", i + 1));
            let metadata = serde_json::to_string(&chunk.metadata)
                .map_err(|e| IndexError::Io(std::io::Error::other(e)))?;
            stmt.execute(params![
                owner,
                chunk.document_id.0,
                chunk.task_id.map(|t| t.0 as i64),
                chunk.content,
                metadata,
                encode_vector(&chunk.embedding),
            ])?;
        }
    }
    tx.commit()?;
    Ok(chunks.len())
}

fn scan(
    conn: &Connection,
    namespace: Namespace,
    query: &[f32],
    limit: usize,
) -> Result<Vec<ScoredChunk>, IndexError> {
    if let Some(dim) = read_dimension(conn)?
        && dim != query.len()
    {
        return Err(IndexError::DimensionMismatch {
            namespace: namespace.to_string(),
            expected: dim,
            actual: query.len(),
        });
    }

    let mut stmt = conn.prepare(
        "SELECT document_id, task_id, content, metadata, embedding
         FROM chunks WHERE owner = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![namespace.owner_key()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<i64>>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Vec<u8>>(4)?,
        ))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let (document_id, task_id, content, metadata, blob) = row?;
        let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata).map_err(|e| {
            IndexError::Corrupted {
                namespace: namespace.to_string(),
                message: format!("bad metadata: {e}"),
            }
        })?;
        let embedding = decode_vector(&blob);
        let score = cosine_similarity(query, &embedding);
        hits.push(ScoredChunk {
            chunk: DocumentChunk {
                content,
                metadata,
                embedding,
                document_id: DocumentId(document_id),
                task_id: task_id.map(|t| TaskId(t as u64)),
            },
            score,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    Ok(hits)
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Keyed collection of open namespace handles under one root directory.
#[derive(Debug)]
pub struct IndexManager {
    root: PathBuf,
    stores: Mutex<HashMap<Namespace, Arc<NamespaceStore>>>,
}

impl IndexManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the handle for `namespace`, opening its storage on first use.
    pub fn open(&self, namespace: Namespace) -> Result<Arc<NamespaceStore>, IndexError> {
        let mut stores = match self.stores.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(store) = stores.get(&namespace) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(NamespaceStore::open(
            self.root.join(namespace.dir_name()),
            namespace,
        )?);
        stores.insert(namespace, Arc::clone(&store));
        Ok(store)
    }

    /// Drop the namespace's handle and delete its storage directory.
    ///
    /// Returns `false` when there was nothing on disk to delete.
    pub fn delete(&self, namespace: Namespace) -> Result<bool, IndexError> {
        {
            let mut stores = match self.stores.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            stores.remove(&namespace);
        }
        let dir = self.root.join(namespace.dir_name());
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        info!(namespace = %namespace, path = %dir.display(), "Namespace deleted");
        Ok(true)
    }

    /// Namespaces with storage on disk, in sorted order.
    pub fn namespaces(&self) -> Result<Vec<Namespace>, IndexError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "shared" {
                found.push(Namespace::Shared);
            } else if let Some(id) = name.strip_prefix("task_")
                && let Ok(id) = id.parse::<u64>()
            {
                found.push(Namespace::Task(TaskId(id)));
            }
        }
        found.sort();
        Ok(found)
    }
}
