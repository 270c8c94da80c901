//! Vector retrieval over the primary and attachment indexes

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingProvider, VectorIndex, VectorQueryResult};
use crate::error::Result;
use crate::query::{QueryType, StructuredQuery};
use crate::retrieval::document::sort_by_score_desc;
use crate::retrieval::{
    combine, deduplicate_by_id, deduplicate_by_parent, similarity_from_distance, FilterValue,
    MetadataFilters, Reranker, RetrievalResult, RetrievedDocument, ScopeFilter, SourceClass,
    PARTICIPANTS,
};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// Per-call switches shared by every retrieval entry point
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub include_attachments: bool,
    /// Overrides structured-query filters key by key
    pub extra_filters: MetadataFilters,
    /// Conjoined verbatim with the compiled filters
    pub scope: Option<ScopeFilter>,
    /// Embed the HyDE passage instead of the question when one exists
    pub use_hyde: bool,
    pub rerank: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            include_attachments: true,
            extra_filters: MetadataFilters::new(),
            scope: None,
            use_hyde: true,
            rerank: true,
        }
    }
}

impl RetrievalOptions {
    pub fn with_scope(mut self, scope: Option<ScopeFilter>) -> Self {
        self.scope = scope;
        self
    }
}

/// One retrieval call
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub query: &'a str,
    pub structured: Option<&'a StructuredQuery>,
    pub top_k: usize,
    pub options: RetrievalOptions,
}

impl<'a> RetrievalRequest<'a> {
    pub fn new(query: &'a str, top_k: usize) -> Self {
        Self {
            query,
            structured: None,
            top_k,
            options: RetrievalOptions::default(),
        }
    }

    pub fn structured(mut self, structured: &'a StructuredQuery) -> Self {
        self.structured = Some(structured);
        self
    }

    pub fn options(mut self, options: RetrievalOptions) -> Self {
        self.options = options;
        self
    }
}

/// Embeds a query, searches both indexes, merges, dedupes and reranks
pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    primary: Arc<dyn VectorIndex>,
    attachments: Arc<dyn VectorIndex>,
    reranker: Reranker,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        primary: Arc<dyn VectorIndex>,
        attachments: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            primary,
            attachments,
            reranker: Reranker::new((&config).into()),
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn retrieve(&self, request: RetrievalRequest<'_>) -> Result<RetrievalResult> {
        let top_k = request.top_k.min(self.config.max_top_k);
        let options = &request.options;

        let mut filters = request
            .structured
            .map(|s| s.filters().clone())
            .unwrap_or_default();
        filters.merge(&options.extra_filters);
        let clause = combine(filters.to_where_clause(), options.scope.as_ref());

        if top_k == 0 {
            return Ok(RetrievalResult {
                documents: Vec::new(),
                query: request.query.to_string(),
                total_retrieved: 0,
                filters_applied: clause,
            });
        }

        let embedding_input = match request.structured {
            Some(s) if options.use_hyde && s.hyde_text().is_some() => {
                debug!("Using HyDE passage for retrieval");
                s.hyde_text().unwrap_or_default()
            }
            Some(s) => s.normalized(),
            None => request.query,
        };
        let vector = self.embedder.embed(embedding_input).await?;

        let attachment_k = top_k / 2;
        let search_attachments = options.include_attachments && attachment_k > 0;
        let primary_search = self.primary.query(&vector, top_k, clause.as_ref());
        let attachment_search = async {
            if search_attachments {
                self.attachments
                    .query(&vector, attachment_k, clause.as_ref())
                    .await
            } else {
                Ok(VectorQueryResult::default())
            }
        };
        let (primary, attachments) = tokio::try_join!(primary_search, attachment_search)?;

        debug!(
            "Vector hits: {} primary, {} attachment (k={}, filtered={})",
            primary.len(),
            attachments.len(),
            top_k,
            clause.is_some()
        );

        let mut documents = into_documents(primary, SourceClass::Primary);
        documents.extend(into_documents(attachments, SourceClass::Attachment));
        sort_by_score_desc(&mut documents, |d| d.score);
        let mut documents = deduplicate_by_parent(documents);

        if options.rerank {
            let entities = request.structured.map(|s| s.entities()).unwrap_or_default();
            self.reranker.rerank(request.query, entities, &mut documents);
        }

        let total_retrieved = documents.len();
        documents.truncate(top_k);

        Ok(RetrievalResult {
            documents,
            query: request.query.to_string(),
            total_retrieved,
            filters_applied: clause,
        })
    }

    /// Retrieval tuned to the question type
    pub async fn retrieve_for_query_type(
        &self,
        query: &str,
        query_type: QueryType,
        structured: &StructuredQuery,
        top_k: usize,
        mut options: RetrievalOptions,
    ) -> Result<RetrievalResult> {
        let mut top_k = top_k;

        match query_type {
            QueryType::Relational => {
                let participants = structured.email_entities();
                if !participants.is_empty() {
                    options
                        .extra_filters
                        .insert(PARTICIPANTS, FilterValue::List(participants));
                }
            }
            QueryType::Attachment => options.include_attachments = true,
            QueryType::Analytical => {
                top_k = top_k
                    .saturating_mul(self.config.analytical_multiplier)
                    .min(self.config.max_top_k);
                options.include_attachments = false;
            }
            _ => {}
        }

        debug!("Retrieving for {} query with top_k={}", query_type, top_k);

        self.retrieve(
            RetrievalRequest::new(query, top_k)
                .structured(structured)
                .options(options),
        )
        .await
    }

    /// Independent retrievals per query, concatenated in input order
    ///
    /// Reranking is disabled per query; the merged list is sorted by raw
    /// similarity.
    pub async fn multi_query_retrieve(
        &self,
        queries: &[String],
        top_k_per_query: usize,
        dedupe: bool,
        options: &RetrievalOptions,
    ) -> Result<RetrievalResult> {
        let per_query = RetrievalOptions {
            rerank: false,
            ..options.clone()
        };

        let results = try_join_all(queries.iter().map(|query| {
            self.retrieve(
                RetrievalRequest::new(query, top_k_per_query).options(per_query.clone()),
            )
        }))
        .await?;

        let mut documents: Vec<RetrievedDocument> =
            results.into_iter().flat_map(|r| r.documents).collect();
        if dedupe {
            documents = deduplicate_by_id(documents);
        }
        sort_by_score_desc(&mut documents, |d| d.score);

        Ok(RetrievalResult {
            total_retrieved: documents.len(),
            documents,
            query: queries.join(" | "),
            filters_applied: None,
        })
    }
}

fn into_documents(result: VectorQueryResult, source: SourceClass) -> Vec<RetrievedDocument> {
    result
        .ids
        .into_iter()
        .zip(result.distances)
        .zip(result.documents)
        .zip(result.metadatas)
        .map(|(((id, distance), content), metadata)| {
            RetrievedDocument::new(
                id,
                content,
                source,
                similarity_from_distance(distance),
                metadata,
            )
        })
        .collect()
}
