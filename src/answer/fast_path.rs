//! Deterministic answers to pure aggregate questions, read live from the store

use crate::query::{StructuredQuery, TimeRange};
use crate::retrieval::ScopeFilter;
use crate::storage::{AggregateFilter, Store, StoreError};
use regex::Regex;
use tracing::{debug, info};

const GLOBAL_COUNT_PATTERNS: &[&str] = &[
    "how many emails",
    "total emails",
    "email count",
    "count of emails",
    "number of emails",
    "total inbox",
    "inbox size",
    "how many total",
];

const TOP_SENDER_PATTERNS: &[&str] = &[
    "who sends",
    "who sent",
    "who emails",
    "who emailed",
    "most emails from",
    "top senders",
    "sender sending",
    "frequent sender",
    "most frequent",
];

/// Words that make a question about content rather than counts
const CONTENT_FILTER_WORDS: &[&str] = &[
    "about",
    "regarding",
    "concerning",
    "related to",
    "discussing",
    "mentioning",
];

const TOP_SENDERS_FETCHED: usize = 20;
const TOP_SENDERS_REPORTED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateIntent {
    Count,
    TopSenders,
}

pub struct FastPath {
    content_filter: Regex,
}

impl FastPath {
    pub fn new() -> Result<Self, regex::Error> {
        let words: Vec<String> = CONTENT_FILTER_WORDS.iter().map(|w| regex::escape(w)).collect();
        let content_filter = Regex::new(&format!(r"\b(?:{})\b", words.join("|")))?;
        Ok(Self { content_filter })
    }

    /// The aggregate a question asks for, if it asks for nothing else
    ///
    /// Sender rankings win over plain counts when both phrasings appear.
    pub fn intent(&self, question: &str) -> Option<AggregateIntent> {
        let lowered = question.to_lowercase();

        if self.content_filter.is_match(&lowered) {
            return None;
        }
        if TOP_SENDER_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return Some(AggregateIntent::TopSenders);
        }
        if GLOBAL_COUNT_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return Some(AggregateIntent::Count);
        }
        None
    }

    /// Answer text, or `None` when the question needs retrieval
    pub async fn answer(
        &self,
        store: &dyn Store,
        structured: &StructuredQuery,
        scope: Option<&ScopeFilter>,
    ) -> Result<Option<String>, StoreError> {
        let Some(intent) = self.intent(structured.original()) else {
            return Ok(None);
        };

        let senders = structured.email_entities();
        let time_range = structured.time_range();
        let filter = AggregateFilter {
            senders: senders.clone(),
            date_gte: time_range.map(|r| r.start.timestamp()),
            date_lte: time_range.map(TimeRange::last_second),
            scope: scope.cloned(),
        };
        let period = time_range
            .map(|r| format!(" in period '{}'", r.description))
            .unwrap_or_default();

        debug!("Fast path {:?} with filter {:?}", intent, filter);

        let answer = match intent {
            AggregateIntent::Count => {
                let emails = store.count_documents(&filter).await?;

                if filter.is_unfiltered() {
                    let sources = store.count_sources(scope).await?;
                    info!("Answered count from store: {} emails, {} sources", emails, sources);
                    count_table(emails, sources)
                } else {
                    info!("Answered filtered count from store: {} emails", emails);
                    let mut description = String::new();
                    if !senders.is_empty() {
                        description.push_str(&format!(" from {}", senders.join(", ")));
                    }
                    description.push_str(&period);
                    format!(
                        "**Email Count Results:**\n\nThere are **{}** emails found{}.\n\n\
                         (Counted from the complete store)",
                        emails, description
                    )
                }
            }
            AggregateIntent::TopSenders => {
                let (ranking, total) = futures::try_join!(
                    store.top_senders(&filter, TOP_SENDERS_FETCHED),
                    store.count_documents(&filter),
                )?;
                info!(
                    "Answered sender ranking from store: {} senders, {} emails",
                    ranking.len(),
                    total
                );

                let mut description = String::new();
                if !senders.is_empty() {
                    description.push_str(&format!(" for {}", senders.join(", ")));
                }
                description.push_str(&period);

                let rows: Vec<String> = ranking
                    .iter()
                    .take(TOP_SENDERS_REPORTED)
                    .enumerate()
                    .map(|(i, s)| {
                        let pct = if total > 0 {
                            s.count as f64 / total as f64 * 100.0
                        } else {
                            0.0
                        };
                        format!("| {} | {} | {} | {:.1}% |", i + 1, s.sender, s.count, pct)
                    })
                    .collect();

                format!(
                    "**Top 10 Senders by Email Count{}:**\n\n\
                     | Rank | Sender | Email Count | % of Total |\n\
                     |------|--------|-------------|------------|\n\
                     {}\n\n\
                     **Total emails analyzed: {}** (complete store, not a sample)",
                    description,
                    rows.join("\n"),
                    total
                )
            }
        };

        Ok(Some(answer))
    }
}

fn count_table(emails: u64, sources: u64) -> String {
    format!(
        "**Total Emails in System:**\n\n\
         | Category | Count |\n\
         |----------|-------|\n\
         | Total Emails | {} |\n\
         | Total Sources | {} |\n\n\
         This is the complete count of all indexed emails in your system.",
        emails, sources
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_detection() {
        let fast = FastPath::new().unwrap();

        assert_eq!(fast.intent("How many emails do I have?"), Some(AggregateIntent::Count));
        assert_eq!(fast.intent("What is my inbox size"), Some(AggregateIntent::Count));
        assert_eq!(fast.intent("Who sends me the most?"), Some(AggregateIntent::TopSenders));
        // ranking wins over count
        assert_eq!(
            fast.intent("how many emails and who sent the most"),
            Some(AggregateIntent::TopSenders)
        );
        assert_eq!(fast.intent("Summarize the thread"), None);
    }

    #[test]
    fn test_content_words_need_whole_words() {
        let fast = FastPath::new().unwrap();

        assert_eq!(fast.intent("How many emails about the merger?"), None);
        assert_eq!(fast.intent("how many emails related to budgets"), None);
        // "roundabout" does not contain the word "about"
        assert_eq!(
            fast.intent("how many emails from roundabout@x.com"),
            Some(AggregateIntent::Count)
        );
    }

    #[test]
    fn test_count_table() {
        let table = count_table(489, 1);
        assert!(table.contains("| Total Emails | 489 |"));
        assert!(table.contains("| Total Sources | 1 |"));
    }
}
