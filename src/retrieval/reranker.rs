//! Heuristic score adjustment after vector retrieval

use crate::config::RetrievalConfig;
use crate::retrieval::document::sort_by_score_desc;
use crate::retrieval::RetrievedDocument;
use ahash::AHashSet;

/// Bonus weights added to the raw similarity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    /// Per query token found in the content
    pub keyword: f32,
    /// Per entity found in the content
    pub entity: f32,
    /// Once, if any query token appears in the subject
    pub subject: f32,
    /// Once, if the sender is an entity or contains a query token
    pub sender: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RerankWeights {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            keyword: config.keyword_bonus,
            entity: config.entity_bonus,
            subject: config.subject_bonus,
            sender: config.sender_bonus,
        }
    }
}

/// Keyword/entity overlap reranker
#[derive(Debug, Clone, Default)]
pub struct Reranker {
    weights: RerankWeights,
}

impl Reranker {
    pub fn new(weights: RerankWeights) -> Self {
        Self { weights }
    }

    /// Set `rerank_score` on every document and stable re-sort by it
    ///
    /// Query tokens are the whitespace-separated words of the lowercased
    /// query; entities are compared lowercased.
    pub fn rerank(&self, query: &str, entities: &[String], documents: &mut [RetrievedDocument]) {
        if documents.is_empty() {
            return;
        }

        let query_lower = query.to_lowercase();
        let keywords: AHashSet<&str> = query_lower.split_whitespace().collect();
        let entities: AHashSet<String> = entities.iter().map(|e| e.to_lowercase()).collect();

        for doc in documents.iter_mut() {
            let bonus = self.bonus(doc, &keywords, &entities);
            doc.rerank_score = Some(doc.score + bonus);
        }

        sort_by_score_desc(documents, RetrievedDocument::effective_score);
    }

    fn bonus(
        &self,
        doc: &RetrievedDocument,
        keywords: &AHashSet<&str>,
        entities: &AHashSet<String>,
    ) -> f32 {
        let content = doc.content.to_lowercase();
        let mut bonus = 0.0;

        let keyword_hits = keywords.iter().filter(|kw| content.contains(**kw)).count();
        bonus += keyword_hits as f32 * self.weights.keyword;

        let entity_hits = entities
            .iter()
            .filter(|e| content.contains(e.as_str()))
            .count();
        bonus += entity_hits as f32 * self.weights.entity;

        let subject = doc
            .metadata
            .subject
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        if keywords.iter().any(|kw| subject.contains(*kw)) {
            bonus += self.weights.subject;
        }

        if let Some(sender) = doc.metadata.sender.as_deref() {
            let sender = sender.to_lowercase();
            if entities.contains(&sender) || keywords.iter().any(|kw| sender.contains(*kw)) {
                bonus += self.weights.sender;
            }
        }

        bonus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{DocumentMetadata, SourceClass};

    fn doc(id: &str, content: &str, subject: &str, sender: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument::new(
            id,
            content,
            SourceClass::Primary,
            score,
            DocumentMetadata {
                subject: Some(subject.to_string()),
                sender: Some(sender.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_bonus_components() {
        let reranker = Reranker::default();
        let mut docs = vec![doc(
            "1",
            "The budget review for bob@example.com",
            "Budget",
            "bob@example.com",
            0.5,
        )];

        reranker.rerank(
            "budget review",
            &["bob@example.com".to_string()],
            &mut docs,
        );

        // 2 keyword hits, 1 entity hit, subject hit, sender is an entity
        let expected = 0.5 + 2.0 * 0.02 + 0.05 + 0.10 + 0.05;
        assert!((docs[0].rerank_score.unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_rerank_reorders_and_keeps_ties_stable() {
        let reranker = Reranker::default();
        let mut docs = vec![
            doc("a", "nothing relevant", "misc", "x@example.com", 0.80),
            doc("b", "quarterly invoice attached", "Invoice", "y@example.com", 0.75),
            doc("c", "nothing relevant", "misc", "z@example.com", 0.80),
        ];

        reranker.rerank("invoice", &[], &mut docs);

        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_missing_sender_gets_no_bonus() {
        let reranker = Reranker::default();
        let mut docs = vec![RetrievedDocument::new(
            "1",
            "text",
            SourceClass::Primary,
            0.3,
            DocumentMetadata::default(),
        )];

        reranker.rerank("unrelated", &[], &mut docs);
        assert_eq!(docs[0].rerank_score, Some(0.3));
    }
}
