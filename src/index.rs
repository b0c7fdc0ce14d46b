//! Loading and querying the vector index persisted by the ingestion step.
//!
//! The on-disk layout is the framework's default storage context: a document
//! store with node text and metadata, a simple vector store with one embedding
//! per node id, and an index store naming the nodes that belong to the index.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::models::{Chunk, RetrievalResult};

const DOCSTORE_FILE: &str = "docstore.json";
const INDEX_STORE_FILE: &str = "index_store.json";
const VECTOR_STORE_FILES: [&str; 2] = ["default__vector_store.json", "vector_store.json"];

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Persist dir not found at {}. Run ingestion first to build the index.", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed index file {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("index load task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IndexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound { .. })
    }
}

/// In-memory vector index. Read-only once loaded.
#[derive(Debug)]
pub struct VectorIndex {
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top `k` chunks by cosine similarity to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 || self.chunks.is_empty() {
            return Ok(vec![]);
        }

        let mut scored = Vec::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            if chunk.embedding.len() != query.len() {
                anyhow::bail!(
                    "embedding dimension mismatch for node {}: index has {}, query has {}; \
                     was the index built with a different embedding model?",
                    chunk.id,
                    chunk.embedding.len(),
                    query.len()
                );
            }
            scored.push((cosine_similarity(query, &chunk.embedding), chunk));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| RetrievalResult {
                chunk: chunk.clone(),
                score: Some(score.clamp(0.0, 1.0)),
            })
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub trait IndexLoader: Send + Sync {
    fn load(&self) -> Result<VectorIndex, IndexError>;
}

/// Loads the index from a persisted storage directory.
#[derive(Clone, Debug)]
pub struct PersistDir {
    path: PathBuf,
}

impl PersistDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IndexLoader for PersistDir {
    fn load(&self) -> Result<VectorIndex, IndexError> {
        if !self.path.is_dir() {
            return Err(IndexError::NotFound {
                path: self.path.clone(),
            });
        }

        let docstore_path = self.path.join(DOCSTORE_FILE);
        let docstore = read_json(&docstore_path)?;
        let docs = docstore
            .get("docstore/data")
            .and_then(Value::as_object)
            .ok_or_else(|| malformed(&docstore_path, "missing \"docstore/data\" object"))?;

        let vector_path = VECTOR_STORE_FILES
            .iter()
            .map(|name| self.path.join(name))
            .find(|path| path.is_file())
            .unwrap_or_else(|| self.path.join(VECTOR_STORE_FILES[0]));
        let vector_store = read_json(&vector_path)?;
        let embeddings = vector_store
            .get("embedding_dict")
            .and_then(Value::as_object)
            .ok_or_else(|| malformed(&vector_path, "missing \"embedding_dict\" object"))?;

        let index_path = self.path.join(INDEX_STORE_FILE);
        let node_ids = vector_index_node_ids(&index_path, &read_json(&index_path)?)?;

        let mut chunks = Vec::with_capacity(node_ids.len());
        for id in node_ids {
            let entry = docs
                .get(&id)
                .ok_or_else(|| malformed(&docstore_path, &format!("node {id} not in docstore")))?;
            let data = decode_data(entry)
                .ok_or_else(|| malformed(&docstore_path, &format!("node {id} has no data")))?;

            let embedding = embeddings
                .get(&id)
                .and_then(Value::as_array)
                .ok_or_else(|| malformed(&vector_path, &format!("node {id} has no embedding")))?
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| malformed(&vector_path, &format!("node {id} embedding is not numeric")))?;

            chunks.push(Chunk {
                text: data
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                metadata: data
                    .get("metadata")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                id,
                embedding,
            });
        }

        tracing::info!(
            "loaded index from {} ({} nodes)",
            self.path.display(),
            chunks.len()
        );
        Ok(VectorIndex::new(chunks))
    }
}

fn read_json(path: &Path) -> Result<Value, IndexError> {
    let raw = std::fs::read_to_string(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|err| malformed(path, &err.to_string()))
}

fn malformed(path: &Path, reason: &str) -> IndexError {
    IndexError::Malformed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Store entries keep their payload under `__data__`, either inline or as an encoded string.
fn decode_data(entry: &Value) -> Option<Map<String, Value>> {
    match entry.get("__data__")? {
        Value::Object(map) => Some(map.clone()),
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()?
            .as_object()
            .cloned(),
        _ => None,
    }
}

fn vector_index_node_ids(path: &Path, index_store: &Value) -> Result<Vec<String>, IndexError> {
    let indexes = index_store
        .get("index_store/data")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed(path, "missing \"index_store/data\" object"))?;

    let data = indexes
        .values()
        .find(|entry| entry.get("__type__").and_then(Value::as_str) == Some("vector_store"))
        .and_then(decode_data)
        .ok_or_else(|| malformed(path, "no vector_store index found"))?;

    let nodes = data
        .get("nodes_dict")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed(path, "vector_store index has no nodes_dict"))?;

    Ok(nodes
        .iter()
        .map(|(key, value)| value.as_str().unwrap_or(key.as_str()).to_string())
        .collect())
}

/// Process-wide, load-once access to the index.
///
/// A failed load is not cached; the next call tries again.
#[derive(Clone)]
pub struct IndexAccessor {
    loader: Arc<dyn IndexLoader>,
    cell: Arc<OnceCell<Arc<VectorIndex>>>,
}

impl IndexAccessor {
    pub fn new(loader: Arc<dyn IndexLoader>) -> Self {
        Self {
            loader,
            cell: Arc::new(OnceCell::new()),
        }
    }

    pub fn from_persist_dir(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(PersistDir::new(path)))
    }

    pub async fn get(&self) -> Result<Arc<VectorIndex>, IndexError> {
        self.cell
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                let index = tokio::task::spawn_blocking(move || loader.load()).await??;
                Ok::<_, IndexError>(Arc::new(index))
            })
            .await
            .cloned()
    }
}
