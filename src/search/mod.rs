//! Paginated hybrid search
//!
//! Semantic and lexical branches run concurrently, are fused by weighted
//! score and the requested page is enriched from the store. Filter-only
//! listing, suggestions and facets go straight to the store.

mod service;
mod snippet;

pub use crate::storage::SearchFilters;
pub use service::SearchService;
pub use snippet::make_snippet;

use crate::embedding::{EmbeddingError, LexicalIndexError, VectorIndexError};
use crate::error::ErrorKind;
use crate::query::StructuredQuery;
use crate::retrieval::FusionOrigin;
use crate::storage::{FacetCount, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),

    #[error(transparent)]
    LexicalIndex(#[from] LexicalIndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid search request: {0}")]
    InvalidRequest(String),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::Embedding(_)
            | SearchError::VectorIndex(_)
            | SearchError::LexicalIndex(_) => ErrorKind::RetrievalFailure,
            SearchError::Store(_) => ErrorKind::StoreFailure,
            SearchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}

/// Which branches a search runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Semantic,
    Lexical,
}

impl SearchMode {
    pub fn semantic(&self) -> bool {
        matches!(self, SearchMode::Hybrid | SearchMode::Semantic)
    }

    pub fn lexical(&self) -> bool {
        matches!(self, SearchMode::Hybrid | SearchMode::Lexical)
    }
}

impl FromStr for SearchMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" => Ok(SearchMode::Semantic),
            "lexical" | "fulltext" => Ok(SearchMode::Lexical),
            other => Err(SearchError::InvalidRequest(format!(
                "unknown search mode '{}'",
                other
            ))),
        }
    }
}

/// How a result was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Lexical,
    Hybrid,
    /// Listed by metadata filters alone
    Filter,
}

impl From<FusionOrigin> for MatchType {
    fn from(origin: FusionOrigin) -> Self {
        match origin {
            FusionOrigin::Semantic => MatchType::Semantic,
            FusionOrigin::Lexical => MatchType::Lexical,
            FusionOrigin::Both => MatchType::Hybrid,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchType::Semantic => "semantic",
            MatchType::Lexical => "lexical",
            MatchType::Hybrid => "hybrid",
            MatchType::Filter => "filter",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub filters: SearchFilters,
    /// 1-based
    pub page: usize,
    /// 0 means the configured default
    pub page_size: usize,
    pub mode: SearchMode,
    pub include_attachments: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: SearchFilters::default(),
            page: 1,
            page_size: 0,
            mode: SearchMode::default(),
            include_attachments: true,
        }
    }

    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }
}

/// One email in a result page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub sender_name: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub score: f32,
    pub match_type: MatchType,
    pub has_attachments: bool,
    pub attachment_count: u32,
    /// File name when the hit came from attachment text
    pub matched_attachment: Option<String>,
    pub folder: Option<String>,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub page: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub has_more: bool,
    /// Absent for filter-only listings
    pub query: Option<StructuredQuery>,
    pub elapsed_ms: u64,
}

/// Filter options with counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFacets {
    pub senders: Vec<FacetCount>,
    pub folders: Vec<FacetCount>,
}

pub(crate) fn epoch_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert_eq!("fulltext".parse::<SearchMode>().unwrap(), SearchMode::Lexical);
        let err = "fuzzy".parse::<SearchMode>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_mode_branches() {
        assert!(SearchMode::Hybrid.semantic() && SearchMode::Hybrid.lexical());
        assert!(!SearchMode::Semantic.lexical());
        assert!(!SearchMode::Lexical.semantic());
    }
}
