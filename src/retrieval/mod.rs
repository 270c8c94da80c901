//! Retrieval: vector search, merging, deduplication and reranking
//!
//! The engine embeds one query, searches the primary and attachment
//! indexes concurrently, collapses chunks of the same email and applies the
//! keyword/entity reranker. Fusion of semantic and lexical result sets used
//! by paginated search also lives here.

mod deduplication;
mod document;
mod engine;
mod filter;
mod fusion;
mod reranker;

pub use deduplication::{deduplicate_by_id, deduplicate_by_parent};
pub use document::{
    similarity_from_distance, DocumentMetadata, RetrievalResult, RetrievedDocument, SourceClass,
};
pub(crate) use document::sort_by_score_desc;
pub use engine::{RetrievalEngine, RetrievalOptions, RetrievalRequest};
pub use filter::{
    combine, FilterScalar, FilterValue, MetadataFilters, ScopeFilter, WhereClause, DATE_GTE,
    DATE_LTE, PARTICIPANTS,
};
pub use fusion::{best_per_id, weighted_fusion, BranchHit, FusedHit, FusionOrigin, FusionWeights};
pub use reranker::{RerankWeights, Reranker};
