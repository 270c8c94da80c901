//! Result deduplication

use crate::retrieval::RetrievedDocument;
use ahash::AHashSet;

/// Collapse chunks of the same email to their best-ranked representative
///
/// Input must already be sorted. Primary chunks are keyed by their parent
/// email id; attachments are keyed by their own id, so an attachment never
/// collapses against the email that carries it.
pub fn deduplicate_by_parent(documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
    let mut seen: AHashSet<String> = AHashSet::new();

    documents
        .into_iter()
        .filter(|doc| {
            let key = if doc.is_attachment() {
                doc.id.as_str()
            } else {
                doc.parent_id()
            };
            seen.insert(key.to_string())
        })
        .collect()
}

/// Drop repeated ids, first occurrence wins
pub fn deduplicate_by_id(documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
    let mut seen: AHashSet<String> = AHashSet::new();

    documents
        .into_iter()
        .filter(|doc| seen.insert(doc.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{DocumentMetadata, SourceClass};

    fn chunk(id: &str, parent: &str, source: SourceClass, score: f32) -> RetrievedDocument {
        RetrievedDocument::new(
            id,
            "text",
            source,
            score,
            DocumentMetadata {
                email_id: Some(parent.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_chunks_collapse_to_parent() {
        let docs = vec![
            chunk("e1_chunk_0", "e1", SourceClass::Primary, 0.9),
            chunk("e2_chunk_0", "e2", SourceClass::Primary, 0.8),
            chunk("e1_chunk_1", "e1", SourceClass::Primary, 0.7),
        ];

        let deduped = deduplicate_by_parent(docs);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "e1_chunk_0");
        assert_eq!(deduped[1].id, "e2_chunk_0");
    }

    #[test]
    fn test_attachments_never_collapse_with_parent() {
        let docs = vec![
            chunk("e1_chunk_0", "e1", SourceClass::Primary, 0.9),
            chunk("att1", "e1", SourceClass::Attachment, 0.8),
            chunk("att2", "e1", SourceClass::Attachment, 0.7),
            chunk("att1", "e1", SourceClass::Attachment, 0.6),
        ];

        let deduped = deduplicate_by_parent(docs);
        let ids: Vec<_> = deduped.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["e1_chunk_0", "att1", "att2"]);
    }

    #[test]
    fn test_dedupe_by_id_keeps_first() {
        let docs = vec![
            chunk("a", "e1", SourceClass::Primary, 0.4),
            chunk("b", "e2", SourceClass::Primary, 0.8),
            chunk("a", "e1", SourceClass::Primary, 0.9),
        ];

        let deduped = deduplicate_by_id(docs);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].score, 0.4);
    }
}
