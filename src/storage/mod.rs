//! System of record
//!
//! The [`Store`] trait is what the pipeline reads live counts, document
//! metadata and stored backend settings from. [`SqliteStore`] is the
//! bundled implementation.

mod database;
mod sql;

pub use database::{DbPool, SqliteStore, StoreStats};

use crate::retrieval::{ScopeFilter, WhereClause};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration {version} failed: {message}")]
    Migration { version: i32, message: String },

    #[error("Filter field '{0}' has no column")]
    UnsupportedFilter(String),

    #[error("Blocking task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Constraints for count and group-by aggregates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateFilter {
    /// Sender in this set; empty means any sender
    pub senders: Vec<String>,
    /// Epoch seconds, inclusive
    pub date_gte: Option<i64>,
    /// Epoch seconds, inclusive
    pub date_lte: Option<i64>,
    pub scope: Option<ScopeFilter>,
}

impl AggregateFilter {
    /// True when nothing beyond the scope constrains the aggregate
    pub fn is_unfiltered(&self) -> bool {
        self.senders.is_empty() && self.date_gte.is_none() && self.date_lte.is_none()
    }
}

/// Metadata filters for listing, facets and search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub source_ids: Vec<String>,
    pub senders: Vec<String>,
    /// Epoch seconds, inclusive
    pub date_from: Option<i64>,
    /// Epoch seconds, inclusive
    pub date_to: Option<i64>,
    pub has_attachments: Option<bool>,
    /// Folder path prefixes
    pub folders: Vec<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self == &SearchFilters::default()
    }

    /// The part of these filters the indexes can evaluate
    ///
    /// Folder prefixes are only applied by the store.
    pub fn to_where_clause(&self) -> Option<WhereClause> {
        let mut clauses = Vec::new();

        if let Some(clause) = WhereClause::any_of("source_id", self.source_ids.iter().cloned()) {
            clauses.push(clause);
        }
        if let Some(clause) = WhereClause::any_of("sender", self.senders.iter().cloned()) {
            clauses.push(clause);
        }
        if let Some(from) = self.date_from {
            clauses.push(WhereClause::Gte {
                field: "date".to_string(),
                value: from as f64,
            });
        }
        if let Some(to) = self.date_to {
            clauses.push(WhereClause::Lte {
                field: "date".to_string(),
                value: to as f64,
            });
        }
        if let Some(flag) = self.has_attachments {
            clauses.push(WhereClause::eq("has_attachments", flag));
        }

        WhereClause::all_of(clauses)
    }
}

/// One email row in the system of record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub source_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub sender_name: Option<String>,
    /// Epoch seconds UTC
    pub date: Option<i64>,
    pub folder: Option<String>,
    pub has_attachments: bool,
    pub attachment_count: u32,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderCount {
    pub sender: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Date,
    Subject,
    Sender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSort {
    pub field: SortField,
    pub descending: bool,
}

impl Default for ListSort {
    fn default() -> Self {
        Self {
            field: SortField::Date,
            descending: true,
        }
    }
}

/// One page of a listing plus the unpaginated total
#[derive(Debug, Clone, Default)]
pub struct DocumentPage {
    pub documents: Vec<StoredDocument>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetField {
    Sender,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

/// A stored generation backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSetting {
    /// `None` for the system-wide row
    pub scope: Option<String>,
    pub provider: String,
    pub model: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Read interface over the system of record
#[async_trait]
pub trait Store: Send + Sync {
    async fn count_documents(&self, filter: &AggregateFilter) -> Result<u64, StoreError>;

    /// Ingested sources; with a scope, only sources holding matching emails
    async fn count_sources(&self, scope: Option<&ScopeFilter>) -> Result<u64, StoreError>;

    /// Senders by descending email count, ties by sender
    async fn top_senders(
        &self,
        filter: &AggregateFilter,
        limit: usize,
    ) -> Result<Vec<SenderCount>, StoreError>;

    /// Rows for the ids that exist, in no particular order
    async fn fetch_documents(&self, ids: &[String]) -> Result<Vec<StoredDocument>, StoreError>;

    async fn list_documents(
        &self,
        filters: &SearchFilters,
        offset: usize,
        limit: usize,
        sort: ListSort,
    ) -> Result<DocumentPage, StoreError>;

    /// Distinct subjects, then sender names, containing `prefix`
    async fn suggest(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    async fn facet_counts(
        &self,
        field: FacetField,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<FacetCount>, StoreError>;

    /// Default setting for `scope`, else the system default
    async fn backend_settings(
        &self,
        scope: Option<&str>,
    ) -> Result<Option<BackendSetting>, StoreError>;
}
