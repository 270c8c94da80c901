use ahash::AHashSet;
use regex::Regex;

use crate::error::{MailsageError, Result};

/// Email shorthand and its expansion, scanned as lowercase substrings
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("re:", "reply to"),
    ("fwd:", "forward"),
    ("fw:", "forward"),
    ("cc", "carbon copy"),
    ("bcc", "blind carbon copy"),
    ("asap", "as soon as possible"),
    ("fyi", "for your information"),
    ("eod", "end of day"),
    ("eow", "end of week"),
    ("wfh", "work from home"),
    ("ooo", "out of office"),
    ("pto", "paid time off"),
    ("mtg", "meeting"),
    ("pls", "please"),
    ("thx", "thanks"),
    ("tbd", "to be determined"),
    ("tbc", "to be confirmed"),
    ("eta", "estimated time of arrival"),
    ("q1", "first quarter"),
    ("q2", "second quarter"),
    ("q3", "third quarter"),
    ("q4", "fourth quarter"),
    ("fy", "fiscal year"),
    ("yoy", "year over year"),
    ("mom", "month over month"),
];

pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
    "this", "that", "these", "those", "i", "you", "he", "she", "it", "we", "they", "what",
    "which", "who", "whom", "whose", "where", "when", "why", "how", "all", "each", "every",
    "both", "few", "more", "most", "other", "some", "such", "no", "not", "only", "same", "so",
    "than", "too", "very", "just", "also", "now", "here", "there", "emails", "email", "find",
    "search", "show", "get", "me",
];

/// Capitalized words that are never entities
pub const COMMON_WORDS: &[&str] = &[
    "email", "emails", "message", "messages", "sent", "received", "from", "to", "subject",
    "about", "regarding", "concerning", "the", "a", "an", "and", "or", "but", "find", "search",
    "show", "all", "any", "some", "with", "without", "has", "have", "had",
];

/// Entity and keyword extraction with precompiled patterns
pub struct TextExtractor {
    email: Regex,
    quoted: Regex,
    word: Regex,
    stop_words: AHashSet<&'static str>,
    common_words: AHashSet<&'static str>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| MailsageError::Config(format!("Invalid pattern '{}': {}", pattern, e)))
}

impl TextExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            email: compile(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")?,
            quoted: compile(r#""([^"]+)""#)?,
            word: compile(r"\w+")?,
            stop_words: STOP_WORDS.iter().copied().collect(),
            common_words: COMMON_WORDS.iter().copied().collect(),
        })
    }

    /// Email addresses, quoted phrases, then capitalized non-initial words
    ///
    /// First-occurrence order, no duplicates.
    pub fn entities(&self, text: &str) -> Vec<String> {
        let mut seen = AHashSet::new();
        let mut entities = Vec::new();
        let mut push = |value: &str| {
            if !value.is_empty() && seen.insert(value.to_string()) {
                entities.push(value.to_string());
            }
        };

        for m in self.email.find_iter(text) {
            push(m.as_str());
        }

        for captures in self.quoted.captures_iter(text) {
            if let Some(m) = captures.get(1) {
                push(m.as_str().trim());
            }
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        for (i, raw) in words.iter().enumerate() {
            if i == 0 || words[i - 1].ends_with(['.', '?', '!']) || raw.contains('@') {
                continue;
            }

            let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
            let starts_upper = word.chars().next().is_some_and(char::is_uppercase);
            if starts_upper && !self.common_words.contains(word.to_lowercase().as_str()) {
                push(word);
            }
        }

        entities
    }

    /// Lowercase `\w+` tokens without stop words or tokens of two chars or fewer
    pub fn keywords(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut seen = AHashSet::new();

        self.word
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .filter(|w| w.chars().count() > 2 && !self.stop_words.contains(w))
            .filter(|w| seen.insert(*w))
            .map(str::to_string)
            .collect()
    }
}

/// Dictionary hits formatted as `"abbr (expansion)"`
pub fn expand_abbreviations(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    ABBREVIATIONS
        .iter()
        .filter(|(abbr, _)| lowered.contains(abbr))
        .map(|(abbr, expansion)| format!("{} ({})", abbr, expansion))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> TextExtractor {
        TextExtractor::new().unwrap()
    }

    #[test]
    fn test_entities() {
        let entities = extractor().entities(
            r#"Emails from bob@corp.com about "Project Falcon" with Alice and the Board?"#,
        );
        assert_eq!(
            entities,
            vec![
                "bob@corp.com".to_string(),
                "Project Falcon".to_string(),
                "Project".to_string(),
                "Falcon".to_string(),
                "Alice".to_string(),
                "Board".to_string(),
            ]
        );
    }

    #[test]
    fn test_sentence_initial_words_skipped() {
        let entities = extractor().entities("Budget review done. Then Carol replied");
        // "Then" follows a word ending in '.', "Budget" is first
        assert_eq!(entities, vec!["Carol".to_string()]);
    }

    #[test]
    fn test_common_words_not_entities() {
        let entities = extractor().entities("show Emails From dave");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_keywords() {
        let keywords = extractor().keywords("Show me the Q3 budget emails about the budget plan");
        assert_eq!(
            keywords,
            vec!["budget".to_string(), "about".to_string(), "plan".to_string()]
        );
    }

    #[test]
    fn test_abbreviations() {
        let expanded = expand_abbreviations("Need the Q3 numbers ASAP");
        assert!(expanded.contains(&"q3 (third quarter)".to_string()));
        assert!(expanded.contains(&"asap (as soon as possible)".to_string()));
        assert!(expand_abbreviations("hello").is_empty());
    }
}
