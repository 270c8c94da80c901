//! Query understanding
//!
//! Turns a raw question into a [`StructuredQuery`]: a type label, an
//! optional time range, entities, keywords, abbreviation notes, and the
//! optional LLM enrichments (sub-queries and a HyDE passage).

mod classifier;
mod enrichment;
mod extract;
mod processor;
mod time_range;

pub use classifier::{label_to_query_type, PatternClassifier, QUERY_TYPE_PATTERNS};
pub use extract::{expand_abbreviations, TextExtractor, ABBREVIATIONS, COMMON_WORDS, STOP_WORDS};
pub use processor::QueryProcessor;
pub use time_range::{resolve_time_range, TimeExpression, TimeRangeExtractor, TIME_EXPRESSIONS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Degradation;
use crate::retrieval::MetadataFilters;

/// Question taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Factual,
    Temporal,
    Topical,
    Relational,
    Summarization,
    Analytical,
    Attachment,
}

impl QueryType {
    pub const ALL: [QueryType; 7] = [
        QueryType::Factual,
        QueryType::Temporal,
        QueryType::Topical,
        QueryType::Relational,
        QueryType::Summarization,
        QueryType::Analytical,
        QueryType::Attachment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Factual => "factual",
            QueryType::Temporal => "temporal",
            QueryType::Topical => "topical",
            QueryType::Relational => "relational",
            QueryType::Summarization => "summarization",
            QueryType::Analytical => "analytical",
            QueryType::Attachment => "attachment",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        QueryType::ALL
            .into_iter()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| format!("Unknown query type: {}", s))
    }
}

/// A concrete UTC interval named by a time expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// The matched expression, e.g. "last week"
    pub description: String,
    /// `end` itself lies outside the range
    #[serde(default)]
    pub end_exclusive: bool,
}

impl TimeRange {
    /// Latest epoch second inside the range, for inclusive `<=` filters
    pub fn last_second(&self) -> i64 {
        let end = self.end.timestamp();
        if self.end_exclusive {
            end - 1
        } else {
            end
        }
    }
}

/// The processed form of one question
///
/// Produced once by [`QueryProcessor`] and only read afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredQuery {
    original: String,
    normalized: String,
    query_type: QueryType,
    time_range: Option<TimeRange>,
    entities: Vec<String>,
    keywords: Vec<String>,
    expansions: Vec<String>,
    sub_queries: Vec<String>,
    hyde_text: Option<String>,
    filters: MetadataFilters,
    degradations: Vec<Degradation>,
}

impl StructuredQuery {
    pub fn builder(original: impl Into<String>) -> StructuredQueryBuilder {
        StructuredQueryBuilder::new(original)
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn time_range(&self) -> Option<&TimeRange> {
        self.time_range.as_ref()
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Entities that look like email addresses
    pub fn email_entities(&self) -> Vec<String> {
        self.entities
            .iter()
            .filter(|e| e.contains('@'))
            .cloned()
            .collect()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn expansions(&self) -> &[String] {
        &self.expansions
    }

    pub fn sub_queries(&self) -> &[String] {
        &self.sub_queries
    }

    pub fn hyde_text(&self) -> Option<&str> {
        self.hyde_text.as_deref()
    }

    pub fn filters(&self) -> &MetadataFilters {
        &self.filters
    }

    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    /// Short echo of the query for responses
    pub fn summary(&self) -> QuerySummary {
        QuerySummary {
            original: self.original.clone(),
            query_type: self.query_type,
            entities: self.entities.clone(),
            keywords: self.keywords.clone(),
            time_range: self.time_range.clone(),
        }
    }
}

/// Echoed subset of a [`StructuredQuery`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub original: String,
    pub query_type: QueryType,
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    pub time_range: Option<TimeRange>,
}

/// Assembles a [`StructuredQuery`]
///
/// Used by the processor and by callers that already know the structure.
#[derive(Debug, Clone)]
pub struct StructuredQueryBuilder {
    query: StructuredQuery,
}

impl StructuredQueryBuilder {
    fn new(original: impl Into<String>) -> Self {
        let original = original.into();
        let normalized = normalize(&original);
        Self {
            query: StructuredQuery {
                original,
                normalized,
                query_type: QueryType::default(),
                time_range: None,
                entities: Vec::new(),
                keywords: Vec::new(),
                expansions: Vec::new(),
                sub_queries: Vec::new(),
                hyde_text: None,
                filters: MetadataFilters::new(),
                degradations: Vec::new(),
            },
        }
    }

    pub fn query_type(mut self, query_type: QueryType) -> Self {
        self.query.query_type = query_type;
        self
    }

    pub fn time_range(mut self, time_range: Option<TimeRange>) -> Self {
        self.query.time_range = time_range;
        self
    }

    pub fn entities(mut self, entities: Vec<String>) -> Self {
        self.query.entities = entities;
        self
    }

    pub fn keywords(mut self, keywords: Vec<String>) -> Self {
        self.query.keywords = keywords;
        self
    }

    pub fn expansions(mut self, expansions: Vec<String>) -> Self {
        self.query.expansions = expansions;
        self
    }

    pub fn sub_queries(mut self, sub_queries: Vec<String>) -> Self {
        self.query.sub_queries = sub_queries;
        self
    }

    pub fn hyde_text(mut self, hyde_text: Option<String>) -> Self {
        self.query.hyde_text = hyde_text;
        self
    }

    pub fn filters(mut self, filters: MetadataFilters) -> Self {
        self.query.filters = filters;
        self
    }

    pub fn degradation(mut self, degradation: Degradation) -> Self {
        self.query.degradations.push(degradation);
        self
    }

    pub fn build(self) -> StructuredQuery {
        self.query
    }
}

/// Collapse whitespace runs and trim
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
