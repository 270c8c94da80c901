use super::backend::BackendResolver;
use super::context::{build_context, citations, stats_block};
use super::fast_path::FastPath;
use super::prompts::{answer_messages, summary_messages};
use super::{
    AnswerRequest, AnswerResponse, BackendIdentity, StreamedAnswer, SummarizeRequest,
};
use crate::config::AnswerConfig;
use crate::error::{Degradation, MailsageError, Result};
use crate::generation::{GenerationBackend, Message, StreamChunk, TokenUsage};
use crate::query::{QueryProcessor, QuerySummary, QueryType, StructuredQuery};
use crate::retrieval::{
    sort_by_score_desc, RetrievalEngine, RetrievalOptions, RetrievalRequest, RetrievalResult,
    RetrievedDocument, ScopeFilter,
};
use crate::storage::{AggregateFilter, Store};
use ahash::AHashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome of the steps shared by blocking and streamed answers
enum Plan {
    Direct {
        answer: String,
        structured: StructuredQuery,
        degradations: Vec<Degradation>,
    },
    Generate(Box<Generation>),
}

struct Generation {
    structured: StructuredQuery,
    documents: Vec<RetrievedDocument>,
    messages: Vec<Message>,
    backend: Arc<dyn GenerationBackend>,
    temperature: f32,
    max_tokens: u32,
    degradations: Vec<Degradation>,
}

/// The question-answering pipeline
pub struct AnswerOrchestrator {
    processor: Arc<QueryProcessor>,
    retrieval: Arc<RetrievalEngine>,
    store: Arc<dyn Store>,
    backends: Arc<dyn BackendResolver>,
    fast_path: FastPath,
    config: AnswerConfig,
}

impl AnswerOrchestrator {
    pub fn new(
        processor: Arc<QueryProcessor>,
        retrieval: Arc<RetrievalEngine>,
        store: Arc<dyn Store>,
        backends: Arc<dyn BackendResolver>,
        config: AnswerConfig,
    ) -> Result<Self> {
        let fast_path = FastPath::new().map_err(|e| MailsageError::Other(e.into()))?;
        Ok(Self {
            processor,
            retrieval,
            store,
            backends,
            fast_path,
            config,
        })
    }

    /// Channel capacity streaming callers should use
    pub fn stream_buffer(&self) -> usize {
        self.config.stream_buffer.max(1)
    }

    pub async fn answer(&self, request: AnswerRequest) -> Result<AnswerResponse> {
        let span = info_span!("answer", request_id = %Uuid::new_v4());

        async move {
            info!("Answering: {}", preview(&request.question));

            match self.plan(&request).await? {
                Plan::Direct {
                    answer,
                    structured,
                    degradations,
                } => {
                    debug!("ASSEMBLE: direct store answer");
                    Ok(AnswerResponse {
                        answer,
                        citations: Vec::new(),
                        query_type: structured.query_type(),
                        query: structured.summary(),
                        backend: BackendIdentity::direct_store_query(),
                        usage: TokenUsage::default(),
                        degradations,
                    })
                }
                Plan::Generate(generation) => {
                    debug!(
                        "GENERATE: {} messages via {}",
                        generation.messages.len(),
                        generation.backend.kind()
                    );
                    let response = generation
                        .backend
                        .generate(
                            &generation.messages,
                            generation.temperature,
                            generation.max_tokens,
                        )
                        .await?;

                    debug!("ASSEMBLE: {} tokens", response.usage.total_tokens);
                    Ok(AnswerResponse {
                        answer: response.content,
                        citations: citations(&generation.documents, self.config.max_citations),
                        query_type: generation.structured.query_type(),
                        query: generation.structured.summary(),
                        backend: BackendIdentity {
                            provider: generation.backend.kind().as_str().to_string(),
                            model: response.model,
                        },
                        usage: response.usage,
                        degradations: generation.degradations,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Stream the answer text into `tx`
    ///
    /// The last chunk sent is final. A fast-path answer is a single final
    /// chunk. Dropping the receiver stops generation.
    pub async fn answer_stream(
        &self,
        request: AnswerRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<StreamedAnswer> {
        let span = info_span!("answer_stream", request_id = %Uuid::new_v4());

        async move {
            info!("Streaming answer: {}", preview(&request.question));

            match self.plan(&request).await? {
                Plan::Direct {
                    answer,
                    structured,
                    degradations,
                } => {
                    let chunk = StreamChunk {
                        content: answer,
                        is_final: true,
                        finish_reason: Some("stop".to_string()),
                    };
                    if tx.send(chunk).await.is_err() {
                        debug!("Receiver dropped before the direct answer was sent");
                    }
                    Ok(StreamedAnswer {
                        citations: Vec::new(),
                        query_type: structured.query_type(),
                        query: structured.summary(),
                        backend: BackendIdentity::direct_store_query(),
                        degradations,
                    })
                }
                Plan::Generate(generation) => {
                    debug!("GENERATE: streaming via {}", generation.backend.kind());
                    generation
                        .backend
                        .generate_stream(
                            &generation.messages,
                            generation.temperature,
                            generation.max_tokens,
                            tx,
                        )
                        .await?;

                    Ok(StreamedAnswer {
                        citations: citations(&generation.documents, self.config.max_citations),
                        query_type: generation.structured.query_type(),
                        query: generation.structured.summary(),
                        backend: BackendIdentity::of(generation.backend.as_ref()),
                        degradations: generation.degradations,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// CLASSIFY, FAST_PATH or RETRIEVE, BUILD_CONTEXT and SELECT_BACKEND
    async fn plan(&self, request: &AnswerRequest) -> Result<Plan> {
        let structured = self.processor.process(&request.question).await;
        let mut degradations = structured.degradations().to_vec();
        debug!(
            "CLASSIFY: {} ({} entities, {} keywords)",
            structured.query_type(),
            structured.entities().len(),
            structured.keywords().len()
        );

        if self.config.fast_path && structured.query_type() == QueryType::Analytical {
            match self
                .fast_path
                .answer(self.store.as_ref(), &structured, request.scope.as_ref())
                .await
            {
                Ok(Some(answer)) => {
                    debug!("FAST_PATH: answered from store");
                    return Ok(Plan::Direct {
                        answer,
                        structured,
                        degradations,
                    });
                }
                Ok(None) => debug!("FAST_PATH: not an aggregate question"),
                Err(e) => {
                    warn!("Fast path aggregate failed, retrieving instead: {}", e);
                    degradations.push(Degradation::Aggregate(e.to_string()));
                }
            }
        }

        let mut documents = self.retrieve(request, &structured).await?;

        let stats = match self.stats(request.scope.as_ref()).await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("System statistics unavailable: {}", e);
                degradations.push(Degradation::Aggregate(e.to_string()));
                None
            }
        };
        let context = build_context(
            stats.as_deref(),
            &documents,
            self.config.context_char_budget,
        );
        debug!(
            "BUILD_CONTEXT: {} of {} documents, {} chars",
            context.documents,
            documents.len(),
            context.text.len()
        );
        // citations cover packed documents only
        documents.truncate(context.documents);

        let backend = self
            .backends
            .resolve(&request.backend, request.settings_scope.as_deref())
            .await?;
        debug!(
            "SELECT_BACKEND: {} / {}",
            backend.kind(),
            backend.model()
        );

        let messages = answer_messages(
            structured.query_type(),
            &request.history,
            self.config.history_turns,
            &context.text,
            &request.question,
        );

        Ok(Plan::Generate(Box::new(Generation {
            structured,
            documents,
            messages,
            backend,
            temperature: request.temperature.unwrap_or(self.config.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            degradations,
        })))
    }

    /// RETRIEVE and MERGE_SUBQUERIES
    async fn retrieve(
        &self,
        request: &AnswerRequest,
        structured: &StructuredQuery,
    ) -> Result<Vec<RetrievedDocument>> {
        let top_k = request
            .top_k
            .unwrap_or(self.retrieval.config().default_top_k);
        let options = RetrievalOptions::default().with_scope(request.scope.clone());

        let primary = self
            .retrieval
            .retrieve_for_query_type(
                &request.question,
                structured.query_type(),
                structured,
                top_k,
                options.clone(),
            )
            .await?;
        debug!(
            "RETRIEVE: {} documents of {} candidates",
            primary.documents.len(),
            primary.total_retrieved
        );

        if structured.sub_queries().is_empty() {
            return Ok(primary.documents);
        }

        let additional = self
            .retrieval
            .multi_query_retrieve(
                structured.sub_queries(),
                self.retrieval.config().sub_query_top_k,
                true,
                &options,
            )
            .await?;
        debug!(
            "MERGE_SUBQUERIES: {} sub-queries added {} candidates",
            structured.sub_queries().len(),
            additional.documents.len()
        );

        Ok(merge_results(primary, additional))
    }

    async fn stats(&self, scope: Option<&ScopeFilter>) -> Result<String> {
        let filter = AggregateFilter {
            scope: scope.cloned(),
            ..Default::default()
        };
        let (emails, sources) = futures::try_join!(
            self.store.count_documents(&filter),
            self.store.count_sources(scope),
        )?;
        Ok(stats_block(emails, sources))
    }

    /// Summarize the emails matching a topic, or the archive in general
    pub async fn summarize(&self, request: SummarizeRequest) -> Result<AnswerResponse> {
        let span = info_span!("summarize", request_id = %Uuid::new_v4());

        async move {
            let query = match request.topic.as_deref() {
                Some(topic) => format!("Summarize all emails about: {}", topic),
                None => "Provide a comprehensive summary of these emails".to_string(),
            };
            info!("Summarizing: {}", preview(&query));

            let max_documents = request
                .max_documents
                .unwrap_or(self.config.summary_max_documents);
            let options = RetrievalOptions {
                use_hyde: false,
                ..RetrievalOptions::default()
            }
            .with_scope(request.scope.clone());

            let result = self
                .retrieval
                .retrieve(RetrievalRequest::new(&query, max_documents).options(options))
                .await?;
            debug!("RETRIEVE: {} documents to summarize", result.documents.len());

            let summary = QuerySummary {
                original: query.clone(),
                query_type: QueryType::Summarization,
                entities: Vec::new(),
                keywords: Vec::new(),
                time_range: None,
            };

            if result.documents.is_empty() {
                return Ok(AnswerResponse {
                    answer: "No emails found to summarize.".to_string(),
                    citations: Vec::new(),
                    query_type: QueryType::Summarization,
                    query: summary,
                    backend: BackendIdentity::none(),
                    usage: TokenUsage::default(),
                    degradations: Vec::new(),
                });
            }

            let context = build_context(None, &result.documents, self.config.context_char_budget);
            let packed = &result.documents[..context.documents];
            let backend = self
                .backends
                .resolve(&request.backend, request.settings_scope.as_deref())
                .await?;
            let messages = summary_messages(request.topic.as_deref(), &context.text);

            let response = backend
                .generate(
                    &messages,
                    self.config.summary_temperature,
                    self.config.max_tokens,
                )
                .await?;

            Ok(AnswerResponse {
                answer: response.content,
                citations: citations(packed, self.config.max_citations),
                query_type: QueryType::Summarization,
                query: summary,
                backend: BackendIdentity {
                    provider: backend.kind().as_str().to_string(),
                    model: response.model,
                },
                usage: response.usage,
                degradations: Vec::new(),
            })
        }
        .instrument(span)
        .await
    }
}

/// Primary documents plus unseen sub-query documents, by effective score
fn merge_results(primary: RetrievalResult, additional: RetrievalResult) -> Vec<RetrievedDocument> {
    let mut seen: AHashSet<String> = primary.documents.iter().map(|d| d.id.clone()).collect();
    let mut documents = primary.documents;

    for doc in additional.documents {
        if seen.insert(doc.id.clone()) {
            documents.push(doc);
        }
    }

    sort_by_score_desc(&mut documents, |d| d.effective_score());
    documents
}

fn preview(text: &str) -> String {
    const MAX: usize = 100;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}
