use regex::{Regex, RegexBuilder};

use super::QueryType;
use crate::error::{MailsageError, Result};

/// Ordered fallback classification table; the first matching type wins
pub const QUERY_TYPE_PATTERNS: &[(QueryType, &[&str])] = &[
    (
        QueryType::Temporal,
        &[
            r"\b(yesterday|today|last\s+week|last\s+month|this\s+week|this\s+month)\b",
            r"\b(before|after|between|during|since|until)\b.*\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec|\d{4})\b",
            r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
        ],
    ),
    (
        QueryType::Relational,
        &[
            r"\b(between|from|to)\s+\w+\s+(and|to)\s+\w+\b",
            r"\b(conversation|thread|discussion)\s+(with|between)\b",
            r"\b(exchanged|sent\s+to|received\s+from)\b",
        ],
    ),
    (
        QueryType::Summarization,
        &[
            r"\b(summarize|summary|overview|brief|recap)\b",
            r"\b(main\s+points|key\s+takeaways|highlights)\b",
        ],
    ),
    (
        QueryType::Analytical,
        &[
            r"\b(how\s+many|count|number\s+of|total)\b",
            r"\b(most|least|top|bottom|average|frequent)\b",
            r"\b(statistics|stats|metrics|analysis)\b",
        ],
    ),
    (
        QueryType::Attachment,
        &[
            r"\b(attachment|attached|file|document|pdf|excel|word|spreadsheet)\b",
            r"\b(with\s+files?|has\s+attachment)\b",
        ],
    ),
    (
        QueryType::Topical,
        &[
            r"\b(about|regarding|concerning|related\s+to|on\s+the\s+topic)\b",
            r"\b(project|meeting|discussion|report|proposal)\b",
        ],
    ),
    (
        QueryType::Factual,
        &[
            r"^(who|what|when|where|which|did)\b",
            r"\b(sender|recipient|subject|sent|received)\b",
        ],
    ),
];

/// Substring rules for near-miss LLM labels, checked in order
const LABEL_FALLBACKS: &[(&[&str], QueryType)] = &[
    (&["analysis", "stat"], QueryType::Analytical),
    (&["summary"], QueryType::Summarization),
    (&["time", "date"], QueryType::Temporal),
    (&["attach", "file"], QueryType::Attachment),
];

/// Deterministic regex classifier over [`QUERY_TYPE_PATTERNS`]
pub struct PatternClassifier {
    table: Vec<(QueryType, Vec<Regex>)>,
}

impl PatternClassifier {
    pub fn new() -> Result<Self> {
        Self::from_table(QUERY_TYPE_PATTERNS)
    }

    pub fn from_table(table: &[(QueryType, &[&str])]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(table.len());

        for (query_type, patterns) in table {
            let regexes = patterns
                .iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            MailsageError::Config(format!(
                                "Invalid {} classification pattern '{}': {}",
                                query_type, p, e
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            compiled.push((*query_type, regexes));
        }

        Ok(Self { table: compiled })
    }

    /// First matching type, else Factual
    pub fn classify(&self, text: &str) -> QueryType {
        let lowered = text.to_lowercase();
        self.table
            .iter()
            .find(|(_, regexes)| regexes.iter().any(|r| r.is_match(&lowered)))
            .map(|(query_type, _)| *query_type)
            .unwrap_or_default()
    }
}

/// Map a free-text classifier label onto the taxonomy
///
/// Numbering such as "6. analytical" is stripped (text after the last
/// '.'), then an exact match is tried before [`LABEL_FALLBACKS`].
pub fn label_to_query_type(label: &str) -> Option<QueryType> {
    let lowered = label.trim().to_lowercase();
    let category = match lowered.rsplit_once('.') {
        Some((_, tail)) => tail.trim(),
        None => lowered.as_str(),
    };
    let category = category.trim_matches(|c: char| c == '"' || c == '\'' || c == '`');

    if let Ok(query_type) = category.parse::<QueryType>() {
        return Some(query_type);
    }

    LABEL_FALLBACKS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| category.contains(n)))
        .map(|(_, query_type)| *query_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_priority() {
        let classifier = PatternClassifier::new().unwrap();

        assert_eq!(classifier.classify("emails from yesterday"), QueryType::Temporal);
        assert_eq!(
            classifier.classify("conversation with the vendor"),
            QueryType::Relational
        );
        assert_eq!(classifier.classify("Summarize the launch"), QueryType::Summarization);
        assert_eq!(classifier.classify("How many emails total?"), QueryType::Analytical);
        assert_eq!(classifier.classify("find the pdf invoice"), QueryType::Attachment);
        assert_eq!(classifier.classify("anything regarding payroll"), QueryType::Topical);
        assert_eq!(classifier.classify("who approved it"), QueryType::Factual);
        assert_eq!(classifier.classify("lunch plans"), QueryType::Factual);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = PatternClassifier::new().unwrap();
        let text = "who emails me most?";
        let first = classifier.classify(text);
        for _ in 0..10 {
            assert_eq!(classifier.classify(text), first);
        }
        assert_eq!(first, QueryType::Analytical);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let table: &[(QueryType, &[&str])] = &[(QueryType::Factual, &["(unclosed"])];
        assert!(PatternClassifier::from_table(table).is_err());
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(label_to_query_type("analytical"), Some(QueryType::Analytical));
        assert_eq!(label_to_query_type("6. Analytical\n"), Some(QueryType::Analytical));
        assert_eq!(label_to_query_type("statistics"), Some(QueryType::Analytical));
        assert_eq!(label_to_query_type("a summary"), Some(QueryType::Summarization));
        assert_eq!(label_to_query_type("date-based"), Some(QueryType::Temporal));
        assert_eq!(label_to_query_type("files"), Some(QueryType::Attachment));
        assert_eq!(label_to_query_type("\"topical\""), Some(QueryType::Topical));
        assert_eq!(label_to_query_type("no idea"), None);
    }
}
