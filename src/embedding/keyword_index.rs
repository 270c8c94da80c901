/// Lexical index interface and Tantivy implementation
use crate::retrieval::{DocumentMetadata, WhereClause};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, TantivyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LexicalIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// A document to index
#[derive(Debug, Clone)]
pub struct LexicalRecord {
    /// Email id
    pub id: String,
    pub body: String,
    /// Subject and sender are indexed from here
    pub metadata: DocumentMetadata,
}

/// One relevance-ranked match
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    /// BM25 relevance, unbounded
    pub score: f32,
    pub body: String,
    pub metadata: DocumentMetadata,
}

/// Full-text index over subject, sender and body
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Relevance-ranked matches only; terms are OR-ed
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&WhereClause>,
    ) -> Result<Vec<LexicalHit>, LexicalIndexError>;

    /// Add or replace documents by id
    async fn add(&self, records: Vec<LexicalRecord>) -> Result<(), LexicalIndexError>;
}

const SUBJECT_BOOST: f32 = 2.0;
const SENDER_BOOST: f32 = 2.0;
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    subject: Field,
    sender: Field,
    body: Field,
    metadata: Field,
}

struct TantivyInner {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

/// Tantivy-backed lexical index with stemming and field boosts
///
/// Filters are applied to stored metadata after ranking.
#[derive(Clone)]
pub struct TantivyLexicalIndex {
    inner: Arc<TantivyInner>,
}

impl TantivyLexicalIndex {
    /// Open the index in `index_path`, creating it when missing
    pub fn open(index_path: impl Into<PathBuf>) -> Result<Self, LexicalIndexError> {
        let index_path = index_path.into();
        std::fs::create_dir_all(&index_path)?;

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)
                .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?
        } else {
            Index::create_in_dir(&index_path, Self::schema())
                .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?
        };

        Self::from_index(index)
    }

    /// In-memory index, mainly for tests
    pub fn in_memory() -> Result<Self, LexicalIndexError> {
        Self::from_index(Index::create_in_ram(Self::schema()))
    }

    fn schema() -> Schema {
        let stemmed = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("en_stem")
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("id", STRING | STORED);
        schema_builder.add_text_field("subject", stemmed.clone());
        schema_builder.add_text_field("sender", stemmed.clone());
        schema_builder.add_text_field("body", stemmed);
        schema_builder.add_text_field("metadata", STORED);
        schema_builder.build()
    }

    fn from_index(index: Index) -> Result<Self, LexicalIndexError> {
        let schema = index.schema();
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                LexicalIndexError::InitializationError(format!("Missing '{}' field in schema", name))
            })
        };

        let fields = Fields {
            id: field("id")?,
            subject: field("subject")?,
            sender: field("sender")?,
            body: field("body")?,
            metadata: field("metadata")?,
        };

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(TantivyInner {
                index,
                reader,
                writer: Mutex::new(writer),
                fields,
            }),
        })
    }

    /// Get the number of documents in the index
    pub fn len(&self) -> u64 {
        self.inner.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TantivyInner {
    fn add_blocking(&self, records: Vec<LexicalRecord>) -> Result<(), LexicalIndexError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| LexicalIndexError::InsertError("Writer lock poisoned".to_string()))?;

        let f = self.fields;
        for record in records {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| LexicalIndexError::InsertError(e.to_string()))?;

            writer.delete_term(Term::from_field_text(f.id, &record.id));
            writer
                .add_document(doc!(
                    f.id => record.id.as_str(),
                    f.subject => record.metadata.subject.as_deref().unwrap_or_default(),
                    f.sender => record.metadata.sender.as_deref().unwrap_or_default(),
                    f.body => record.body.as_str(),
                    f.metadata => metadata,
                ))
                .map_err(|e| LexicalIndexError::InsertError(e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| LexicalIndexError::InsertError(e.to_string()))?;
        drop(writer);

        self.reader
            .reload()
            .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    fn search_blocking(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&WhereClause>,
    ) -> Result<Vec<LexicalHit>, LexicalIndexError> {
        let searcher = self.reader.searcher();
        let total = searcher.num_docs() as usize;
        if limit == 0 || total == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let f = self.fields;
        let mut query_parser =
            QueryParser::for_index(&self.index, vec![f.subject, f.sender, f.body]);
        query_parser.set_field_boost(f.subject, SUBJECT_BOOST);
        query_parser.set_field_boost(f.sender, SENDER_BOOST);

        let (parsed, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Lenient query parse dropped {} clause(s)", errors.len());
        }

        // Post-filtering needs the full ranked list
        let fetch = if filter.is_some() { total } else { limit };
        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(fetch))
            .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;

        let mut hits = Vec::new();
        for (score, doc_address) in top_docs {
            if hits.len() >= limit {
                break;
            }

            let retrieved: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;

            let text = |field: Field| {
                retrieved
                    .get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };

            let metadata: DocumentMetadata = serde_json::from_str(&text(f.metadata))
                .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;

            if filter.is_some_and(|clause| !clause.matches(&metadata)) {
                continue;
            }

            hits.push(LexicalHit {
                id: text(f.id),
                score,
                body: text(f.body),
                metadata,
            });
        }

        Ok(hits)
    }
}

#[async_trait]
impl LexicalIndex for TantivyLexicalIndex {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: Option<&WhereClause>,
    ) -> Result<Vec<LexicalHit>, LexicalIndexError> {
        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        let filter = filter.cloned();

        tokio::task::spawn_blocking(move || inner.search_blocking(&query, limit, filter.as_ref()))
            .await
            .map_err(|e| LexicalIndexError::SearchError(format!("Search task failed: {}", e)))?
    }

    async fn add(&self, records: Vec<LexicalRecord>) -> Result<(), LexicalIndexError> {
        if records.is_empty() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.add_blocking(records))
            .await
            .map_err(|e| LexicalIndexError::InsertError(format!("Insert task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, subject: &str, sender: &str, body: &str, source: &str) -> LexicalRecord {
        LexicalRecord {
            id: id.to_string(),
            body: body.to_string(),
            metadata: DocumentMetadata {
                email_id: Some(id.to_string()),
                subject: Some(subject.to_string()),
                sender: Some(sender.to_string()),
                source_id: Some(source.to_string()),
                ..Default::default()
            },
        }
    }

    async fn populated() -> TantivyLexicalIndex {
        let index = TantivyLexicalIndex::in_memory().unwrap();
        index
            .add(vec![
                record("e1", "Budget planning", "alice@example.com", "Numbers for next quarter", "s1"),
                record("e2", "Lunch", "bob@example.com", "The budget meeting moved to Friday", "s2"),
                record("e3", "Offsite", "carol@example.com", "Hiking trip details", "s1"),
            ])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_only_true_matches_returned() {
        let index = populated().await;
        let hits = index.search("budget", 10, None).await.unwrap();

        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"e1") && ids.contains(&"e2"));
    }

    #[tokio::test]
    async fn test_subject_boosted_above_body() {
        let index = populated().await;
        let hits = index.search("budget", 10, None).await.unwrap();
        assert_eq!(hits[0].id, "e1");
    }

    #[tokio::test]
    async fn test_stemming() {
        let index = populated().await;
        let hits = index.search("planned", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "e1");
    }

    #[tokio::test]
    async fn test_filter_applied() {
        let index = populated().await;
        let filter = WhereClause::eq("source_id", "s2");
        let hits = index.search("budget", 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "e2");
    }

    #[tokio::test]
    async fn test_replace_by_id() {
        let index = populated().await;
        index
            .add(vec![record("e3", "Offsite", "carol@example.com", "Budget for the hike", "s1")])
            .await
            .unwrap();

        assert_eq!(index.len(), 3);
        let hits = index.search("hike", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lexical");

        {
            let index = TantivyLexicalIndex::open(&path).unwrap();
            index
                .add(vec![record("e1", "Invoice", "a@example.com", "Please pay", "s1")])
                .await
                .unwrap();
        }

        let index = TantivyLexicalIndex::open(&path).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.search("invoice", 5, None).await.unwrap();
        assert_eq!(hits[0].metadata.sender.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_special_characters_do_not_fail() {
        let index = populated().await;
        let hits = index.search("budget AND (", 10, None).await;
        assert!(hits.is_ok());
    }
}
