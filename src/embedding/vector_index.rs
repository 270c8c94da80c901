/// Vector index interface and HNSW-backed implementation
use crate::retrieval::{DocumentMetadata, WhereClause};
use ahash::AHashMap;
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Column-oriented nearest-neighbour result, best match first
#[derive(Debug, Clone, Default)]
pub struct VectorQueryResult {
    pub ids: Vec<String>,
    /// Cosine distances in [0, 2]
    pub distances: Vec<f32>,
    pub documents: Vec<String>,
    pub metadatas: Vec<DocumentMetadata>,
}

impl VectorQueryResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn push(&mut self, entry: &IndexEntry, distance: f32) {
        self.ids.push(entry.id.clone());
        self.distances.push(distance);
        self.documents.push(entry.document.clone());
        self.metadatas.push(entry.metadata.clone());
    }
}

/// Nearest-neighbour index over one document class
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add or replace entries; all four columns must have equal length
    async fn add(
        &self,
        ids: Vec<String>,
        vectors: Vec<Vec<f32>>,
        documents: Vec<String>,
        metadatas: Vec<DocumentMetadata>,
    ) -> Result<(), VectorIndexError>;

    /// Up to `k` nearest entries matching `filter`
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&WhereClause>,
    ) -> Result<VectorQueryResult, VectorIndexError>;

    /// Number of live entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HNSW construction parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    pub dimension: usize,
    pub max_nb_connection: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_elements: usize,
}

impl From<&crate::config::IndexingConfig> for HnswParams {
    fn from(config: &crate::config::IndexingConfig) -> Self {
        Self {
            dimension: config.vector_dim,
            max_nb_connection: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
            ef_search: config.hnsw_ef_search,
            max_elements: config.max_elements,
        }
    }
}

const MAX_LAYER: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    id: String,
    vector: Vec<f32>,
    document: String,
    metadata: DocumentMetadata,
}

struct Inner {
    graph: Hnsw<'static, f32, DistCosine>,
    /// Slot per graph insertion; replaced entries leave stale slots behind
    entries: Vec<IndexEntry>,
    live: AHashMap<String, usize>,
}

impl Inner {
    fn new(params: &HnswParams) -> Self {
        Self {
            graph: Hnsw::<f32, DistCosine>::new(
                params.max_nb_connection,
                params.max_elements,
                MAX_LAYER,
                params.ef_construction,
                DistCosine,
            ),
            entries: Vec::new(),
            live: AHashMap::new(),
        }
    }

    fn insert(&mut self, entry: IndexEntry) {
        let slot = self.entries.len();
        self.graph.insert((entry.vector.as_slice(), slot));
        self.live.insert(entry.id.clone(), slot);
        self.entries.push(entry);
    }

    fn is_live(&self, slot: usize) -> bool {
        self.entries
            .get(slot)
            .and_then(|e| self.live.get(&e.id))
            .is_some_and(|&s| s == slot)
    }

    fn live_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(slot, _)| self.is_live(*slot))
            .map(|(_, e)| e)
    }
}

/// HNSW vector index
///
/// Unfiltered queries go through the HNSW graph. Filtered queries scan the
/// live entries exactly, so a selective filter never starves the result.
/// Persisted as a zstd-compressed JSON snapshot; the graph is rebuilt on open.
pub struct HnswVectorIndex {
    inner: RwLock<Inner>,
    params: HnswParams,
    path: Option<PathBuf>,
}

impl HnswVectorIndex {
    /// Create an empty in-memory index
    pub fn new(params: HnswParams) -> Self {
        Self {
            inner: RwLock::new(Inner::new(&params)),
            params,
            path: None,
        }
    }

    /// Open a persisted index, or start empty if the snapshot does not exist
    pub fn open(path: impl Into<PathBuf>, params: HnswParams) -> Result<Self, VectorIndexError> {
        let path = path.into();
        let mut inner = Inner::new(&params);

        if path.exists() {
            let entries = Self::read_snapshot(&path)?;
            tracing::info!("Loading {} vectors from {:?}", entries.len(), path);
            for entry in entries {
                if entry.vector.len() != params.dimension {
                    return Err(VectorIndexError::InvalidDimension {
                        expected: params.dimension,
                        actual: entry.vector.len(),
                    });
                }
                inner.insert(entry);
            }
        }

        Ok(Self {
            inner: RwLock::new(inner),
            params,
            path: Some(path),
        })
    }

    /// Write the snapshot back to the path given to `open`
    pub fn save(&self) -> Result<(), VectorIndexError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let inner = self.read()?;
        let entries: Vec<&IndexEntry> = inner.live_entries().collect();
        let json = serde_json::to_vec(&entries)
            .map_err(|e| VectorIndexError::SerializationError(e.to_string()))?;
        drop(inner);

        let compressed = zstd::encode_all(json.as_slice(), 3)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, compressed)?;

        tracing::debug!("Saved vector snapshot to {:?}", path);
        Ok(())
    }

    fn read_snapshot(path: &Path) -> Result<Vec<IndexEntry>, VectorIndexError> {
        let compressed = std::fs::read(path)?;
        let json = zstd::decode_all(compressed.as_slice())?;
        serde_json::from_slice(&json).map_err(|e| VectorIndexError::SerializationError(e.to_string()))
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, VectorIndexError> {
        self.inner
            .read()
            .map_err(|_| VectorIndexError::SearchError("Index lock poisoned".to_string()))
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.params.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.params.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn exact_scan(inner: &Inner, vector: &[f32], k: usize, filter: &WhereClause) -> VectorQueryResult {
        let mut scored: Vec<(&IndexEntry, f32)> = inner
            .live_entries()
            .filter(|e| filter.matches(&e.metadata))
            .map(|e| (e, cosine_distance(vector, &e.vector)))
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut result = VectorQueryResult::default();
        for (entry, distance) in scored.into_iter().take(k) {
            result.push(entry, distance);
        }
        result
    }

    fn graph_search(&self, inner: &Inner, vector: &[f32], k: usize) -> VectorQueryResult {
        let stale = inner.entries.len() - inner.live.len();
        let want = k + stale;
        let ef = self.params.ef_search.max(want);

        let mut result = VectorQueryResult::default();
        for neighbour in inner.graph.search(vector, want, ef) {
            if result.len() >= k {
                break;
            }
            if !inner.is_live(neighbour.d_id) {
                continue;
            }
            if let Some(entry) = inner.entries.get(neighbour.d_id) {
                result.push(entry, neighbour.distance.clamp(0.0, 2.0));
            }
        }
        result
    }
}

#[async_trait]
impl VectorIndex for HnswVectorIndex {
    async fn add(
        &self,
        ids: Vec<String>,
        vectors: Vec<Vec<f32>>,
        documents: Vec<String>,
        metadatas: Vec<DocumentMetadata>,
    ) -> Result<(), VectorIndexError> {
        let n = ids.len();
        if vectors.len() != n || documents.len() != n || metadatas.len() != n {
            return Err(VectorIndexError::InsertError(format!(
                "Column length mismatch: {} ids, {} vectors, {} documents, {} metadatas",
                n,
                vectors.len(),
                documents.len(),
                metadatas.len()
            )));
        }

        for vector in &vectors {
            self.check_dimension(vector)?;
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| VectorIndexError::InsertError("Index lock poisoned".to_string()))?;

        for (((id, vector), document), metadata) in ids
            .into_iter()
            .zip(vectors)
            .zip(documents)
            .zip(metadatas)
        {
            inner.insert(IndexEntry {
                id,
                vector,
                document,
                metadata,
            });
        }

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&WhereClause>,
    ) -> Result<VectorQueryResult, VectorIndexError> {
        self.check_dimension(vector)?;

        let inner = self.read()?;
        if k == 0 || inner.live.is_empty() {
            return Ok(VectorQueryResult::default());
        }

        let result = match filter {
            Some(clause) => Self::exact_scan(&inner, vector, k, clause),
            None => self.graph_search(&inner, vector, k),
        };

        Ok(result)
    }

    fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.live.len()).unwrap_or(0)
    }
}

/// Cosine distance in [0, 2]; zero vectors are treated as orthogonal
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a * norm_b)).clamp(0.0, 2.0)
}
