mod batch;
mod keyword_index;
/// Embedding & Indexing
///
/// Local embedding generation and the three stores retrieval reads from.
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - HNSW vector indexes for primary documents and attachments
/// - Tantivy for lexical search
/// - Batch processing for import
mod provider;
mod vector_index;

pub use batch::{chunk_text, BatchProcessor, BatchResult, IndexItem};
pub use keyword_index::{
    LexicalHit, LexicalIndex, LexicalIndexError, LexicalRecord, TantivyLexicalIndex,
};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{
    HnswParams, HnswVectorIndex, VectorIndex, VectorIndexError, VectorQueryResult,
};

/// Build a chunk id from its parent email id and position
pub fn chunk_id(email_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", email_id, index)
}

/// Recover the parent email id from a chunk id
///
/// Ids without a chunk suffix are returned unchanged.
pub fn parent_of_chunk(id: &str) -> &str {
    match id.split_once("_chunk_") {
        Some((parent, _)) => parent,
        None => id,
    }
}
