//! Generation context and citations from ranked documents

use super::Citation;
use crate::retrieval::RetrievedDocument;
use chrono::DateTime;

pub const NO_DOCUMENTS: &str = "No relevant emails found in the database.";

const SUBJECT_CHARS: usize = 100;

pub fn stats_block(emails: u64, sources: u64) -> String {
    format!(
        "SYSTEM STATISTICS:\n- Total Emails Indexed: {}\n- Total Sources Processed: {}\n",
        emails, sources
    )
}

fn document_block(position: usize, doc: &RetrievedDocument) -> String {
    let mut block = format!("\n--- Email {} ---\n", position);

    if let Some(subject) = doc.metadata.subject.as_deref().filter(|s| !s.is_empty()) {
        block.push_str(&format!("Subject: {}\n", subject));
    }
    if let Some(sender) = doc.metadata.sender.as_deref().filter(|s| !s.is_empty()) {
        block.push_str(&format!("From: {}\n", sender));
    }
    if let Some(date) = doc.metadata.date.and_then(|ts| DateTime::from_timestamp(ts, 0)) {
        block.push_str(&format!("Date: {}\n", date.format("%d-%b-%Y %H:%M")));
    }
    block.push_str(&format!("\nContent:\n{}\n", doc.content));
    block
}

/// Assembled generation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedContext {
    pub text: String,
    /// Leading documents that made it into `text`
    pub documents: usize,
}

/// Stats block followed by one block per document in rank order
///
/// Documents are added until the next one would push the whole context past
/// `budget` characters, separators included. When none fit the documents
/// section reads [`NO_DOCUMENTS`].
pub fn build_context(
    stats: Option<&str>,
    documents: &[RetrievedDocument],
    budget: usize,
) -> PackedContext {
    let mut packed = 0;
    let documents_text = if documents.is_empty() {
        NO_DOCUMENTS.to_string()
    } else {
        let mut used = stats.map_or(0, |s| s.chars().count() + 2);
        let mut text = String::new();

        for (i, doc) in documents.iter().enumerate() {
            let block = document_block(i + 1, doc);
            let len = block.chars().count() + usize::from(packed > 0);
            if used + len > budget {
                break;
            }
            if packed > 0 {
                text.push('\n');
            }
            text.push_str(&block);
            used += len;
            packed += 1;
        }
        if packed == 0 {
            text.push_str(NO_DOCUMENTS);
        }
        text
    };

    let text = match stats {
        Some(stats) => format!("{}\n\n{}", stats, documents_text),
        None => documents_text,
    };
    PackedContext {
        text,
        documents: packed,
    }
}

/// Citations for the first `max` documents
pub fn citations(documents: &[RetrievedDocument], max: usize) -> Vec<Citation> {
    documents
        .iter()
        .take(max)
        .map(|doc| {
            let metadata = &doc.metadata;
            Citation {
                id: doc.id.clone(),
                source: doc.source,
                score: round4(doc.effective_score()),
                email_id: metadata.email_id.clone(),
                subject: metadata
                    .subject
                    .as_ref()
                    .map(|s| s.chars().take(SUBJECT_CHARS).collect()),
                sender: metadata.sender.clone(),
                date: metadata
                    .date
                    .and_then(|ts| DateTime::from_timestamp(ts, 0))
                    .map(|d| d.to_rfc3339()),
                filename: if doc.is_attachment() {
                    metadata.filename.clone()
                } else {
                    None
                },
            }
        })
        .collect()
}

fn round4(score: f32) -> f64 {
    (f64::from(score) * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{DocumentMetadata, SourceClass};

    fn doc(id: &str, content: &str) -> RetrievedDocument {
        RetrievedDocument::new(
            id,
            content,
            SourceClass::Primary,
            0.123456,
            DocumentMetadata {
                email_id: Some(id.to_string()),
                subject: Some("Quarterly budget".to_string()),
                sender: Some("alice@x.com".to_string()),
                date: Some(1_704_205_800),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_block_layout() {
        let context = build_context(Some(&stats_block(489, 1)), &[doc("e1", "Numbers attached")], 32_000);
        assert_eq!(context.documents, 1);
        assert_eq!(
            context.text,
            "SYSTEM STATISTICS:\n- Total Emails Indexed: 489\n- Total Sources Processed: 1\n\n\n\
             \n--- Email 1 ---\nSubject: Quarterly budget\nFrom: alice@x.com\n\
             Date: 02-Jan-2024 14:30\n\nContent:\nNumbers attached\n"
        );
    }

    #[test]
    fn test_empty_documents() {
        assert_eq!(build_context(None, &[], 100).text, NO_DOCUMENTS);
        let context = build_context(Some("S"), &[], 100);
        assert!(context.text.ends_with(NO_DOCUMENTS));
        assert_eq!(context.documents, 0);
    }

    #[test]
    fn test_budget_counts_whole_context() {
        let docs = vec![doc("e1", &"a".repeat(300)), doc("e2", &"b".repeat(300))];
        let one = build_context(None, &docs[..1], 10_000).text.chars().count();

        let context = build_context(None, &docs, one + 10);
        assert_eq!(context.text.matches("--- Email").count(), 1);
        assert_eq!(context.documents, 1);

        // the stats block eats into the same budget
        let stats = "x".repeat(20);
        let context = build_context(Some(&stats), &docs, one + 10);
        assert_eq!(context.text.matches("--- Email").count(), 0);
        assert!(context.text.ends_with(NO_DOCUMENTS));
        assert_eq!(context.documents, 0);
    }

    #[test]
    fn test_separators_count_against_budget() {
        let docs: Vec<RetrievedDocument> = (0..5).map(|i| doc(&format!("e{}", i), "same size")).collect();
        let block = document_block(1, &docs[0]).chars().count();

        // five blocks alone fit, five blocks plus four separators do not
        let budget = 5 * block;
        let context = build_context(None, &docs, budget);
        assert!(context.text.chars().count() <= budget);
        assert_eq!(context.documents, 4);

        let exact = build_context(None, &docs, 5 * block + 4);
        assert_eq!(exact.documents, 5);
        assert_eq!(exact.text.chars().count(), 5 * block + 4);

        let stats = stats_block(5, 1);
        let with_stats = build_context(Some(&stats), &docs, budget);
        assert!(with_stats.text.chars().count() <= budget);
    }

    #[test]
    fn test_citations() {
        let mut attachment = doc("e2_att_0", "pdf text");
        attachment.source = SourceClass::Attachment;
        attachment.metadata.filename = Some("plan.pdf".to_string());
        attachment.metadata.subject = Some("s".repeat(150));
        attachment.rerank_score = Some(0.98767);

        let docs: Vec<RetrievedDocument> = std::iter::once(attachment)
            .chain((0..12).map(|i| doc(&format!("e{}", i + 10), "x")))
            .collect();

        let cites = citations(&docs, 10);
        assert_eq!(cites.len(), 10);
        assert_eq!(cites[0].score, 0.9877);
        assert_eq!(cites[0].filename.as_deref(), Some("plan.pdf"));
        assert_eq!(cites[0].subject.as_ref().unwrap().chars().count(), 100);
        assert_eq!(cites[0].date.as_deref(), Some("2024-01-02T14:30:00+00:00"));
        assert_eq!(cites[1].score, 0.1235);
        assert!(cites[1].filename.is_none());
    }
}
