use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::classifier::{label_to_query_type, PatternClassifier};
use super::enrichment::{
    classification_messages, hyde_messages, parse_sub_queries, sub_query_messages,
};
use super::extract::{expand_abbreviations, TextExtractor};
use super::time_range::TimeRangeExtractor;
use super::{normalize, QueryType, StructuredQuery, TimeRange};
use crate::config::QueryConfig;
use crate::error::{Degradation, Result};
use crate::generation::GenerationBackend;
use crate::retrieval::{FilterValue, MetadataFilters, DATE_GTE, DATE_LTE, PARTICIPANTS};

/// Turns raw question text into a [`StructuredQuery`]
///
/// Never fails once constructed: LLM problems are logged and recorded as
/// degradations on the result.
pub struct QueryProcessor {
    config: QueryConfig,
    backend: Option<Arc<dyn GenerationBackend>>,
    classifier: PatternClassifier,
    time_ranges: TimeRangeExtractor,
    extractor: TextExtractor,
}

impl QueryProcessor {
    pub fn new(config: QueryConfig, backend: Option<Arc<dyn GenerationBackend>>) -> Result<Self> {
        Ok(Self {
            config,
            backend,
            classifier: PatternClassifier::new()?,
            time_ranges: TimeRangeExtractor::new()?,
            extractor: TextExtractor::new()?,
        })
    }

    /// Pattern rules only
    pub fn offline() -> Result<Self> {
        Self::new(QueryConfig::default(), None)
    }

    fn enrichment_backend(&self) -> Option<&Arc<dyn GenerationBackend>> {
        self.backend.as_ref().filter(|_| self.config.llm_enrichment)
    }

    pub async fn process(&self, text: &str) -> StructuredQuery {
        self.process_at(text, Utc::now()).await
    }

    /// Same as [`QueryProcessor::process`] with an explicit clock
    pub async fn process_at(&self, text: &str, now: DateTime<Utc>) -> StructuredQuery {
        let normalized = normalize(text);
        let mut degradations = Vec::new();

        let query_type = match self.classify_with_backend(&normalized).await {
            Ok(Some(query_type)) => query_type,
            Ok(None) => self.classifier.classify(&normalized),
            Err(degradation) => {
                warn!("Query classification degraded: {}", degradation.reason());
                degradations.push(degradation);
                self.classifier.classify(&normalized)
            }
        };

        let time_range = self.time_ranges.extract(&normalized, now);
        let entities = self.extractor.entities(&normalized);
        let keywords = self.extractor.keywords(&normalized);
        let expansions = expand_abbreviations(&normalized);

        let (sub_queries, hyde_text) = match self.enrich(&normalized, query_type).await {
            Ok(enriched) => enriched,
            Err(degradation) => {
                warn!("Query enrichment degraded: {}", degradation.reason());
                degradations.push(degradation);
                (Vec::new(), None)
            }
        };

        let filters = build_filters(time_range.as_ref(), &entities);

        debug!(
            "Processed query: type={}, entities={}, keywords={}, time_range={}, sub_queries={}, hyde={}",
            query_type,
            entities.len(),
            keywords.len(),
            time_range.is_some(),
            sub_queries.len(),
            hyde_text.is_some()
        );

        let mut builder = StructuredQuery::builder(text)
            .query_type(query_type)
            .time_range(time_range)
            .entities(entities)
            .keywords(keywords)
            .expansions(expansions)
            .sub_queries(sub_queries)
            .hyde_text(hyde_text)
            .filters(filters);
        for degradation in degradations {
            builder = builder.degradation(degradation);
        }
        builder.build()
    }

    /// `Ok(None)` when no backend is configured
    async fn classify_with_backend(
        &self,
        text: &str,
    ) -> std::result::Result<Option<QueryType>, Degradation> {
        let Some(backend) = self.enrichment_backend() else {
            return Ok(None);
        };

        let response = backend
            .generate(
                &classification_messages(text),
                self.config.classification_temperature,
                self.config.classification_max_tokens,
            )
            .await
            .map_err(|e| Degradation::Classification(e.to_string()))?;

        label_to_query_type(&response.content)
            .map(Some)
            .ok_or_else(|| {
                Degradation::Classification(format!(
                    "unrecognised label '{}'",
                    response.content.trim()
                ))
            })
    }

    async fn enrich(
        &self,
        text: &str,
        query_type: QueryType,
    ) -> std::result::Result<(Vec<String>, Option<String>), Degradation> {
        let Some(backend) = self.enrichment_backend() else {
            return Ok((Vec::new(), None));
        };
        let failed = |e: crate::generation::BackendError| Degradation::Enrichment(e.to_string());

        let mut sub_queries = Vec::new();
        if matches!(
            query_type,
            QueryType::Analytical | QueryType::Summarization
        ) {
            let response = backend
                .generate(
                    &sub_query_messages(text),
                    self.config.sub_query_temperature,
                    self.config.sub_query_max_tokens,
                )
                .await
                .map_err(failed)?;
            sub_queries = parse_sub_queries(&response.content);
        }

        let mut hyde_text = None;
        if query_type != QueryType::Analytical {
            let response = backend
                .generate(
                    &hyde_messages(text, query_type),
                    self.config.hyde_temperature,
                    self.config.hyde_max_tokens,
                )
                .await
                .map_err(failed)?;
            let passage = response.content.trim();
            if !passage.is_empty() {
                hyde_text = Some(passage.to_string());
            }
        }

        Ok((sub_queries, hyde_text))
    }
}

fn build_filters(time_range: Option<&TimeRange>, entities: &[String]) -> MetadataFilters {
    let mut filters = MetadataFilters::new();

    if let Some(range) = time_range {
        filters.insert(DATE_GTE, FilterValue::Number(range.start.timestamp() as f64));
        filters.insert(DATE_LTE, FilterValue::Number(range.last_second() as f64));
    }

    let participants: Vec<String> = entities
        .iter()
        .filter(|e| e.contains('@'))
        .cloned()
        .collect();
    if !participants.is_empty() {
        filters.insert(PARTICIPANTS, FilterValue::List(participants));
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{
        BackendError, BackendKind, GenerationResponse, Message, StreamChunk, TokenUsage,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Replies in order; an exhausted script fails the call
    struct ScriptedBackend {
        replies: Mutex<Vec<std::result::Result<String, ()>>>,
        calls: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<std::result::Result<&str, ()>>) -> Arc<Self> {
            let mut replies: Vec<_> = replies
                .into_iter()
                .map(|r| r.map(str::to_string))
                .collect();
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Custom
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            messages: &[Message],
            _temperature: f32,
            _max_tokens: u32,
        ) -> std::result::Result<GenerationResponse, BackendError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop() {
                Some(Ok(content)) => Ok(GenerationResponse {
                    content,
                    model: "scripted".to_string(),
                    usage: TokenUsage::new(1, 1),
                    finish_reason: Some("stop".to_string()),
                }),
                _ => Err(BackendError::Request {
                    backend: "custom".to_string(),
                    message: "connection refused".to_string(),
                }),
            }
        }

        async fn generate_stream(
            &self,
            _messages: &[Message],
            _temperature: f32,
            _max_tokens: u32,
            tx: mpsc::Sender<StreamChunk>,
        ) -> std::result::Result<(), BackendError> {
            let _ = tx.send(StreamChunk::final_chunk(None)).await;
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 15, 30, 0).unwrap()
    }

    fn processor(backend: Option<Arc<dyn GenerationBackend>>) -> QueryProcessor {
        QueryProcessor::new(QueryConfig::default(), backend).unwrap()
    }

    #[tokio::test]
    async fn test_offline_relational_last_week() {
        let query = processor(None)
            .process_at("emails between alice@x.com and bob@x.com last week", now())
            .await;

        assert_eq!(query.query_type(), QueryType::Temporal);
        let range = query.time_range().unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());

        assert_eq!(
            query.filters().get(PARTICIPANTS),
            Some(&FilterValue::List(vec![
                "alice@x.com".to_string(),
                "bob@x.com".to_string()
            ]))
        );
        assert_eq!(
            query.filters().get(DATE_GTE),
            Some(&FilterValue::Number(range.start.timestamp() as f64))
        );
        assert!(query.degradations().is_empty());
        assert!(query.hyde_text().is_none());
    }

    #[tokio::test]
    async fn test_whitespace_normalized() {
        let query = processor(None).process_at("  budget   \n report ", now()).await;
        assert_eq!(query.original(), "  budget   \n report ");
        assert_eq!(query.normalized(), "budget report");
        assert_eq!(query.query_type(), QueryType::Topical);
    }

    #[tokio::test]
    async fn test_llm_label_and_hyde() {
        let backend = ScriptedBackend::new(vec![
            Ok("3. Topical"),
            Ok("Hi team, the Falcon launch moved to May."),
        ]);
        let query = processor(Some(backend.clone()))
            .process_at("what happened with falcon", now())
            .await;

        assert_eq!(query.query_type(), QueryType::Topical);
        assert_eq!(
            query.hyde_text(),
            Some("Hi team, the Falcon launch moved to May.")
        );
        assert!(query.sub_queries().is_empty());
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_analytical_gets_sub_queries_without_hyde() {
        let backend = ScriptedBackend::new(vec![
            Ok("analytical"),
            Ok("Sub-queries:\n1. invoices from acme\n2. invoices from globex"),
        ]);
        let query = processor(Some(backend.clone()))
            .process_at("how many invoices per vendor", now())
            .await;

        assert_eq!(query.query_type(), QueryType::Analytical);
        assert_eq!(
            query.sub_queries(),
            &["invoices from acme".to_string(), "invoices from globex".to_string()]
        );
        assert!(query.hyde_text().is_none());
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_patterns() {
        let backend = ScriptedBackend::new(vec![Err(()), Err(())]);
        let query = processor(Some(backend))
            .process_at("Summarize the vendor thread", now())
            .await;

        assert_eq!(query.query_type(), QueryType::Summarization);
        assert_eq!(query.degradations().len(), 2);
        assert!(matches!(
            query.degradations()[0],
            Degradation::Classification(_)
        ));
        assert!(matches!(query.degradations()[1], Degradation::Enrichment(_)));
        assert!(query.sub_queries().is_empty());
    }

    #[tokio::test]
    async fn test_unmappable_label_is_classification_degradation() {
        let backend = ScriptedBackend::new(vec![Ok("banana"), Ok("excerpt")]);
        let query = processor(Some(backend))
            .process_at("who approved the pdf", now())
            .await;

        assert_eq!(query.query_type(), QueryType::Attachment);
        assert_eq!(query.degradations().len(), 1);
        assert_eq!(query.hyde_text(), Some("excerpt"));
    }

    #[tokio::test]
    async fn test_enrichment_disabled_skips_backend() {
        let backend = ScriptedBackend::new(vec![Ok("factual")]);
        let config = QueryConfig {
            llm_enrichment: false,
            ..QueryConfig::default()
        };
        let processor = QueryProcessor::new(config, Some(backend.clone())).unwrap();
        let query = processor.process_at("who sent it", now()).await;

        assert_eq!(query.query_type(), QueryType::Factual);
        assert_eq!(backend.call_count(), 0);
    }
}
