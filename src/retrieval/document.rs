//! Retrieved documents and their index-time metadata

use crate::retrieval::WhereClause;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Which vector index a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceClass {
    /// Email body chunks
    Primary,
    /// Extracted attachment text
    Attachment,
}

impl SourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceClass::Primary => "email",
            SourceClass::Attachment => "attachment",
        }
    }
}

/// Metadata stored alongside each indexed chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Parent email id; chunks of one email share it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Sent date, epoch seconds UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    /// Ingested source (mail container) id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_attachments: Option<bool>,
    /// Attachment file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DocumentMetadata {
    /// Look up a field by its filter name
    pub fn field(&self, key: &str) -> Option<Value> {
        let text = |v: &Option<String>| v.as_ref().map(|s| Value::String(s.clone()));

        match key {
            "email_id" => text(&self.email_id),
            "subject" => text(&self.subject),
            "sender" => text(&self.sender),
            "sender_name" => text(&self.sender_name),
            "date" => self.date.map(Value::from),
            "source_id" => text(&self.source_id),
            "folder" => text(&self.folder),
            "has_attachments" => self.has_attachments.map(Value::Bool),
            "filename" => text(&self.filename),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// One ranked document returned by the retrieval engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// Index id (chunk id)
    pub id: String,
    pub content: String,
    pub source: SourceClass,
    /// Similarity in [0, 1]
    pub score: f32,
    pub rerank_score: Option<f32>,
    pub metadata: DocumentMetadata,
}

impl RetrievedDocument {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        source: SourceClass,
        score: f32,
        metadata: DocumentMetadata,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source,
            score,
            rerank_score: None,
            metadata,
        }
    }

    /// Rerank score when present, otherwise the raw similarity
    pub fn effective_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.score)
    }

    /// Id of the email this chunk belongs to
    pub fn parent_id(&self) -> &str {
        self.metadata.email_id.as_deref().unwrap_or(&self.id)
    }

    pub fn is_attachment(&self) -> bool {
        self.source == SourceClass::Attachment
    }
}

/// Output of a retrieval call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub documents: Vec<RetrievedDocument>,
    pub query: String,
    /// Candidate count before truncation
    pub total_retrieved: usize,
    pub filters_applied: Option<WhereClause>,
}

/// Convert a cosine distance in [0, 2] to a similarity in [0, 1]
pub fn similarity_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Stable sort, highest score first
pub(crate) fn sort_by_score_desc<T>(items: &mut [T], score: impl Fn(&T) -> f32) {
    items.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
