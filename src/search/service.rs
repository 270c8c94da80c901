use super::{
    epoch_to_datetime, make_snippet, MatchType, SearchError, SearchFacets, SearchFilters,
    SearchRequest, SearchResponse, SearchResult,
};
use crate::config::SearchConfig;
use crate::embedding::{parent_of_chunk, EmbeddingProvider, LexicalIndex, VectorIndex};
use crate::query::{QueryProcessor, StructuredQuery};
use crate::retrieval::{
    similarity_from_distance, sort_by_score_desc, weighted_fusion, BranchHit, DocumentMetadata,
    FusionWeights, WhereClause,
};
use crate::storage::{FacetField, ListSort, Store, StoredDocument};
use ahash::AHashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const FACET_LIMIT: usize = 10;

/// Branch payload carried through fusion
#[derive(Debug, Clone)]
struct Hit {
    metadata: DocumentMetadata,
    snippet: Option<String>,
    matched_attachment: Option<String>,
}

pub struct SearchService {
    processor: Arc<QueryProcessor>,
    embedder: Arc<dyn EmbeddingProvider>,
    primary: Arc<dyn VectorIndex>,
    attachments: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    store: Arc<dyn Store>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(
        processor: Arc<QueryProcessor>,
        embedder: Arc<dyn EmbeddingProvider>,
        primary: Arc<dyn VectorIndex>,
        attachments: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        store: Arc<dyn Store>,
        config: SearchConfig,
    ) -> Self {
        Self {
            processor,
            embedder,
            primary,
            attachments,
            lexical,
            store,
            config,
        }
    }

    fn page_size(&self, requested: usize) -> usize {
        if requested == 0 {
            self.config.default_page_size
        } else {
            requested.min(self.config.max_page_size)
        }
    }

    /// Natural-language search; an empty query lists by filters instead
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let page = request.page.max(1);
        let page_size = self.page_size(request.page_size);

        if request.query.trim().is_empty() {
            return self
                .filter_search(&request.filters, page, page_size, ListSort::default())
                .await;
        }

        let structured = self.processor.process(&request.query).await;
        let clause = request.filters.to_where_clause();
        let limit = page_size * 2;
        let mode = request.mode;

        let semantic = async {
            if mode.semantic() {
                self.semantic_hits(&structured, clause.as_ref(), limit, request.include_attachments)
                    .await
            } else {
                Ok(Vec::new())
            }
        };
        let lexical = async {
            if mode.lexical() {
                self.lexical_hits(&structured, clause.as_ref(), limit).await
            } else {
                Ok(Vec::new())
            }
        };
        let (semantic, lexical) = tokio::try_join!(semantic, lexical)?;

        let semantic = retain_folders(semantic, &request.filters.folders);
        let lexical = retain_folders(lexical, &request.filters.folders);
        debug!(
            "Search branches: {} semantic, {} lexical hits",
            semantic.len(),
            lexical.len()
        );

        let mut fused = weighted_fusion(semantic, lexical, FusionWeights::from(&self.config));
        sort_by_score_desc(&mut fused, |h| h.score);

        let total_count = fused.len();
        let offset = (page - 1).saturating_mul(page_size);
        let mut results: Vec<SearchResult> = fused
            .into_iter()
            .skip(offset)
            .take(page_size)
            .map(|hit| to_result(hit.id, hit.score, hit.origin.into(), hit.item))
            .collect();

        self.enrich(&mut results).await?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Search returned {} of {} results in {}ms",
            results.len(),
            total_count,
            elapsed_ms
        );

        Ok(SearchResponse {
            results,
            page,
            page_size,
            total_count,
            has_more: offset.saturating_add(page_size) < total_count,
            query: Some(structured),
            elapsed_ms,
        })
    }

    async fn semantic_hits(
        &self,
        structured: &StructuredQuery,
        clause: Option<&WhereClause>,
        limit: usize,
        include_attachments: bool,
    ) -> Result<Vec<BranchHit<Hit>>, SearchError> {
        let input = structured.hyde_text().unwrap_or(structured.normalized());
        let vector = self.embedder.embed(input).await?;

        let attachment_k = limit / 2;
        let primary = self.primary.query(&vector, limit, clause);
        let attachments = async {
            if include_attachments && attachment_k > 0 {
                self.attachments.query(&vector, attachment_k, clause).await
            } else {
                Ok(Default::default())
            }
        };
        let (primary, attachments) = tokio::try_join!(primary, attachments)?;

        let mut hits = Vec::with_capacity(primary.len() + attachments.len());

        for (((id, distance), document), metadata) in primary
            .ids
            .into_iter()
            .zip(primary.distances)
            .zip(primary.documents)
            .zip(primary.metadatas)
        {
            let key = document_key(&id, &metadata);
            hits.push(BranchHit::new(
                key,
                similarity_from_distance(distance),
                Hit {
                    metadata,
                    snippet: make_snippet(&document, None),
                    matched_attachment: None,
                },
            ));
        }

        for (((id, distance), document), mut metadata) in attachments
            .ids
            .into_iter()
            .zip(attachments.distances)
            .zip(attachments.documents)
            .zip(attachments.metadatas)
        {
            let key = document_key(&id, &metadata);
            let filename = metadata
                .filename
                .clone()
                .unwrap_or_else(|| "Unknown".to_string());
            metadata.subject = Some(format!("Attachment: {}", filename));
            hits.push(BranchHit::new(
                key,
                similarity_from_distance(distance) * self.config.attachment_penalty,
                Hit {
                    metadata,
                    snippet: make_snippet(&document, None),
                    matched_attachment: Some(filename),
                },
            ));
        }

        Ok(hits)
    }

    async fn lexical_hits(
        &self,
        structured: &StructuredQuery,
        clause: Option<&WhereClause>,
        limit: usize,
    ) -> Result<Vec<BranchHit<Hit>>, SearchError> {
        let terms = if structured.keywords().is_empty() {
            structured.original().to_string()
        } else {
            structured.keywords().join(" ")
        };

        let hits = self.lexical.search(&terms, limit, clause).await?;

        // BM25 is unbounded; scale into [0, 1] against the best hit
        let max = hits.iter().map(|h| h.score).fold(0.0_f32, f32::max);

        Ok(hits
            .into_iter()
            .map(|hit| {
                let score = if max > 0.0 { hit.score / max } else { 0.0 };
                let snippet = make_snippet(&hit.body, Some(structured.original()));
                BranchHit::new(
                    hit.id,
                    score,
                    Hit {
                        metadata: hit.metadata,
                        snippet,
                        matched_attachment: None,
                    },
                )
            })
            .collect())
    }

    /// Overwrite page metadata with the live store rows
    async fn enrich(&self, results: &mut [SearchResult]) -> Result<(), SearchError> {
        if results.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = results.iter().map(|r| r.id.clone()).collect();
        let rows: AHashMap<String, StoredDocument> = self
            .store
            .fetch_documents(&ids)
            .await?
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();

        for result in results.iter_mut() {
            if let Some(doc) = rows.get(&result.id) {
                result.subject = doc.subject.clone();
                result.sender = doc.sender.clone();
                result.sender_name = doc.sender_name.clone();
                result.date = doc.date.and_then(epoch_to_datetime);
                result.has_attachments = doc.has_attachments;
                result.attachment_count = doc.attachment_count;
                result.folder = doc.folder.clone();
                result.source_id = Some(doc.source_id.clone());
            }
        }

        Ok(())
    }

    /// List emails by metadata filters alone, every hit scored 1.0
    pub async fn filter_search(
        &self,
        filters: &SearchFilters,
        page: usize,
        page_size: usize,
        sort: ListSort,
    ) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let page = page.max(1);
        let page_size = self.page_size(page_size);
        let offset = (page - 1).saturating_mul(page_size);

        let listing = self
            .store
            .list_documents(filters, offset, page_size, sort)
            .await?;
        let total_count = listing.total as usize;

        let results = listing
            .documents
            .into_iter()
            .map(|doc| SearchResult {
                date: doc.date.and_then(epoch_to_datetime),
                snippet: None,
                score: 1.0,
                match_type: MatchType::Filter,
                has_attachments: doc.has_attachments,
                attachment_count: doc.attachment_count,
                matched_attachment: None,
                source_id: Some(doc.source_id),
                id: doc.id,
                subject: doc.subject,
                sender: doc.sender,
                sender_name: doc.sender_name,
                folder: doc.folder,
            })
            .collect();

        Ok(SearchResponse {
            results,
            page,
            page_size,
            total_count,
            has_more: page.saturating_mul(page_size) < total_count,
            query: None,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Subjects, then sender names, containing `partial`
    pub async fn suggestions(&self, partial: &str, limit: usize) -> Result<Vec<String>, SearchError> {
        let partial = partial.trim();
        if partial.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.store.suggest(partial, limit).await?)
    }

    /// Top senders and folders under `filters`
    pub async fn facets(&self, filters: &SearchFilters) -> Result<SearchFacets, SearchError> {
        let (senders, folders) = tokio::try_join!(
            self.store
                .facet_counts(FacetField::Sender, filters, FACET_LIMIT),
            self.store
                .facet_counts(FacetField::Folder, filters, FACET_LIMIT),
        )?;
        Ok(SearchFacets { senders, folders })
    }
}

/// Email id a hit belongs to
fn document_key(id: &str, metadata: &DocumentMetadata) -> String {
    metadata
        .email_id
        .clone()
        .unwrap_or_else(|| parent_of_chunk(id).to_string())
}

fn retain_folders(hits: Vec<BranchHit<Hit>>, prefixes: &[String]) -> Vec<BranchHit<Hit>> {
    if prefixes.is_empty() {
        return hits;
    }
    hits.into_iter()
        .filter(|hit| {
            hit.item
                .metadata
                .folder
                .as_deref()
                .is_some_and(|folder| prefixes.iter().any(|p| folder.starts_with(p.as_str())))
        })
        .collect()
}

fn to_result(id: String, score: f32, match_type: MatchType, hit: Hit) -> SearchResult {
    let Hit {
        metadata,
        snippet,
        matched_attachment,
    } = hit;

    SearchResult {
        id,
        subject: metadata.subject,
        sender: metadata.sender,
        sender_name: metadata.sender_name,
        date: metadata.date.and_then(epoch_to_datetime),
        snippet,
        score,
        match_type,
        has_attachments: metadata.has_attachments.unwrap_or(false),
        attachment_count: 0,
        matched_attachment,
        folder: metadata.folder,
        source_id: metadata.source_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{
        EmbeddingError, LexicalHit, LexicalIndexError, LexicalRecord, VectorIndexError,
        VectorQueryResult,
    };
    use crate::error::ErrorKind;
    use crate::search::SearchMode;
    use crate::storage::SqliteStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    /// Returns canned rows and records each requested k
    struct CannedIndex {
        rows: Vec<(&'static str, f32, DocumentMetadata)>,
        ks: Mutex<Vec<usize>>,
    }

    impl CannedIndex {
        fn new(rows: Vec<(&'static str, f32, DocumentMetadata)>) -> Arc<Self> {
            Arc::new(Self {
                rows,
                ks: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VectorIndex for CannedIndex {
        async fn add(
            &self,
            _ids: Vec<String>,
            _vectors: Vec<Vec<f32>>,
            _documents: Vec<String>,
            _metadatas: Vec<DocumentMetadata>,
        ) -> Result<(), VectorIndexError> {
            Ok(())
        }

        async fn query(
            &self,
            _vector: &[f32],
            k: usize,
            filter: Option<&WhereClause>,
        ) -> Result<VectorQueryResult, VectorIndexError> {
            self.ks.lock().unwrap().push(k);
            let mut result = VectorQueryResult::default();
            for (id, distance, metadata) in self.rows.iter().take(k) {
                if filter.map_or(true, |f| f.matches(metadata)) {
                    result.ids.push(id.to_string());
                    result.distances.push(*distance);
                    result.documents.push(format!("text of {}", id));
                    result.metadatas.push(metadata.clone());
                }
            }
            Ok(result)
        }

        fn len(&self) -> usize {
            self.rows.len()
        }
    }

    struct CannedLexical {
        hits: Vec<(&'static str, f32)>,
    }

    #[async_trait]
    impl LexicalIndex for CannedLexical {
        async fn search(
            &self,
            _query: &str,
            limit: usize,
            _filter: Option<&WhereClause>,
        ) -> Result<Vec<LexicalHit>, LexicalIndexError> {
            Ok(self
                .hits
                .iter()
                .take(limit)
                .map(|(id, score)| LexicalHit {
                    id: id.to_string(),
                    score: *score,
                    body: format!("the budget for {}", id),
                    metadata: DocumentMetadata {
                        email_id: Some(id.to_string()),
                        folder: Some("Inbox".to_string()),
                        ..Default::default()
                    },
                })
                .collect())
        }

        async fn add(&self, _records: Vec<LexicalRecord>) -> Result<(), LexicalIndexError> {
            Ok(())
        }
    }

    fn meta(email_id: &str, folder: &str) -> DocumentMetadata {
        DocumentMetadata {
            email_id: Some(email_id.to_string()),
            subject: Some(format!("indexed {}", email_id)),
            folder: Some(folder.to_string()),
            ..Default::default()
        }
    }

    fn attachment_meta(email_id: &str, filename: &str) -> DocumentMetadata {
        DocumentMetadata {
            email_id: Some(email_id.to_string()),
            filename: Some(filename.to_string()),
            folder: Some("Inbox".to_string()),
            ..Default::default()
        }
    }

    fn store() -> Arc<SqliteStore> {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_source("pst-1", "archive.pst", 0).unwrap();
        let docs: Vec<StoredDocument> = ["e1", "e2", "e3", "e4"]
            .iter()
            .enumerate()
            .map(|(i, id)| StoredDocument {
                id: id.to_string(),
                source_id: "pst-1".to_string(),
                subject: Some(format!("Live subject {}", id)),
                sender: Some(format!("{}@x.com", id)),
                date: Some(1_700_000_000 + i as i64),
                folder: Some("Inbox".to_string()),
                body: "body".to_string(),
                ..Default::default()
            })
            .collect();
        store.upsert_documents(&docs).unwrap();
        Arc::new(store)
    }

    fn service(
        primary: Arc<CannedIndex>,
        attachments: Arc<CannedIndex>,
        lexical: Vec<(&'static str, f32)>,
    ) -> SearchService {
        SearchService::new(
            Arc::new(QueryProcessor::offline().unwrap()),
            Arc::new(FixedEmbedder),
            primary,
            attachments,
            Arc::new(CannedLexical { hits: lexical }),
            store(),
            SearchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_hybrid_fusion_and_enrichment() {
        let primary = CannedIndex::new(vec![
            ("e1_chunk_0", 0.2, meta("e1", "Inbox")),
            ("e1_chunk_1", 0.3, meta("e1", "Inbox")),
            ("e2_chunk_0", 0.4, meta("e2", "Inbox")),
        ]);
        let attachments = CannedIndex::new(vec![("e3_att_0", 0.1, attachment_meta("e3", "plan.pdf"))]);
        let svc = service(primary.clone(), attachments.clone(), vec![("e2", 8.0), ("e4", 4.0)]);

        let response = svc
            .search(SearchRequest::new("budget planning").page(1, 10))
            .await
            .unwrap();

        // k = 2 x page_size on the primary, half of that on attachments
        assert_eq!(*primary.ks.lock().unwrap(), vec![20]);
        assert_eq!(*attachments.ks.lock().unwrap(), vec![10]);

        let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        // e1 0.8, e3 0.9 * 0.9 = 0.81, e2 0.6*0.6 + 0.4*1.0 = 0.76, e4 0.5
        assert_eq!(ids, vec!["e3", "e1", "e2", "e4"]);

        let e3 = &response.results[0];
        assert_eq!(e3.match_type, MatchType::Semantic);
        assert_eq!(e3.matched_attachment.as_deref(), Some("plan.pdf"));
        assert!((e3.score - 0.81).abs() < 1e-5);
        assert_eq!(e3.subject.as_deref(), Some("Live subject e3"));

        let e2 = &response.results[2];
        assert_eq!(e2.match_type, MatchType::Hybrid);
        assert!((e2.score - 0.76).abs() < 1e-5);

        assert_eq!(response.results[3].match_type, MatchType::Lexical);
        assert_eq!(response.total_count, 4);
        assert!(!response.has_more);
        assert!(response.query.is_some());
    }

    #[tokio::test]
    async fn test_pagination() {
        let primary = CannedIndex::new(vec![
            ("e1", 0.1, meta("e1", "Inbox")),
            ("e2", 0.2, meta("e2", "Inbox")),
            ("e3", 0.3, meta("e3", "Inbox")),
        ]);
        let svc = service(primary, CannedIndex::new(Vec::new()), Vec::new());

        let response = svc
            .search(
                SearchRequest::new("quarterly numbers")
                    .page(1, 2)
                    .mode(SearchMode::Semantic),
            )
            .await
            .unwrap();
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.total_count, 3);
        assert!(response.has_more);

        let response = svc
            .search(
                SearchRequest::new("quarterly numbers")
                    .page(2, 2)
                    .mode(SearchMode::Semantic),
            )
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, "e3");
        assert!(!response.has_more);
    }

    #[tokio::test]
    async fn test_folder_prefix_filters_hits() {
        let primary = CannedIndex::new(vec![
            ("e1", 0.1, meta("e1", "Sent")),
            ("e2", 0.2, meta("e2", "Inbox/Projects")),
        ]);
        let svc = service(primary, CannedIndex::new(Vec::new()), Vec::new());

        let filters = SearchFilters {
            folders: vec!["Inbox".to_string()],
            ..Default::default()
        };
        let response = svc
            .search(
                SearchRequest::new("status")
                    .filters(filters)
                    .mode(SearchMode::Semantic),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["e2"]);
    }

    #[tokio::test]
    async fn test_empty_query_lists_by_filters() {
        let svc = service(CannedIndex::new(Vec::new()), CannedIndex::new(Vec::new()), Vec::new());

        let response = svc.search(SearchRequest::new("  ").page(1, 3)).await.unwrap();
        assert_eq!(response.total_count, 4);
        assert_eq!(response.results.len(), 3);
        assert!(response.has_more);
        assert!(response.query.is_none());
        assert!(response
            .results
            .iter()
            .all(|r| r.match_type == MatchType::Filter && r.score == 1.0));
        // newest first
        assert_eq!(response.results[0].id, "e4");
    }

    #[tokio::test]
    async fn test_suggestions_and_facets() {
        let svc = service(CannedIndex::new(Vec::new()), CannedIndex::new(Vec::new()), Vec::new());

        let suggestions = svc.suggestions("live", 2).await.unwrap();
        assert_eq!(suggestions.len(), 2);
        assert!(svc.suggestions(" ", 5).await.unwrap().is_empty());

        let facets = svc.facets(&SearchFilters::default()).await.unwrap();
        assert_eq!(facets.folders.len(), 1);
        assert_eq!(facets.folders[0].count, 4);
        assert_eq!(facets.senders.len(), 4);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_retrieval_failure() {
        struct Down;

        #[async_trait]
        impl EmbeddingProvider for Down {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
                Err(EmbeddingError::GenerationError("offline".to_string()))
            }

            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Err(EmbeddingError::GenerationError("offline".to_string()))
            }

            fn dimension(&self) -> usize {
                2
            }

            fn model_name(&self) -> &str {
                "down"
            }
        }

        let svc = SearchService::new(
            Arc::new(QueryProcessor::offline().unwrap()),
            Arc::new(Down),
            CannedIndex::new(Vec::new()),
            CannedIndex::new(Vec::new()),
            Arc::new(CannedLexical { hits: Vec::new() }),
            store(),
            SearchConfig::default(),
        );
        let err = svc.search(SearchRequest::new("anything")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetrievalFailure);
    }
}
