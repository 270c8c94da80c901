//! Prompts and output parsing for LLM-backed query enrichment

use super::QueryType;
use crate::generation::Message;

pub const MAX_SUB_QUERIES: usize = 4;

const CLASSIFIER_SYSTEM: &str = "You are a precise query classifier.";
const SUB_QUERY_SYSTEM: &str =
    "You are a helpful assistant that breaks down complex search queries into simpler components.";
const HYDE_SYSTEM: &str =
    "You generate realistic email excerpts for search optimization. Be concise.";

pub fn classification_messages(query: &str) -> Vec<Message> {
    let prompt = format!(
        "Classify the following email search query into exactly one of these categories:\n\n\
         1. factual (Specific questions: who, what, when, where)\n\
         2. temporal (Time-based: emails from last week, dates)\n\
         3. topical (Topic-based: about project X, regarding Y)\n\
         4. relational (Between people: emails between John and Mary)\n\
         5. summarization (Summarize threads, key points)\n\
         6. analytical (Counts, stats, most frequent, trends)\n\
         7. attachment (Files, PDFs, specific attachments)\n\n\
         Query: \"{}\"\n\n\
         Return ONLY the category name (lowercase).",
        query
    );
    vec![Message::system(CLASSIFIER_SYSTEM), Message::user(prompt)]
}

pub fn sub_query_messages(query: &str) -> Vec<Message> {
    let prompt = format!(
        "Break down this email search query into 2-4 simpler sub-queries that would help find relevant emails.\n\
         Return only the sub-queries, one per line.\n\n\
         Original query: {}\n\n\
         Sub-queries:",
        query
    );
    vec![Message::system(SUB_QUERY_SYSTEM), Message::user(prompt)]
}

fn hyde_instruction(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::Factual => "Write a brief email excerpt that would answer this question",
        QueryType::Temporal => {
            "Write a brief email from the time period mentioned that would be relevant"
        }
        QueryType::Topical => "Write a brief email about this topic",
        QueryType::Relational => {
            "Write a brief email exchange snippet between the mentioned parties"
        }
        QueryType::Summarization => "Write a brief email that would be included in this summary",
        QueryType::Analytical => "Write a brief email that would be counted in this analysis",
        QueryType::Attachment => {
            "Write a brief email that would have the type of attachment mentioned"
        }
    }
}

pub fn hyde_messages(query: &str, query_type: QueryType) -> Vec<Message> {
    let prompt = format!(
        "{} based on: {}\n\nWrite only the hypothetical email content (2-3 sentences), nothing else.",
        hyde_instruction(query_type),
        query
    );
    vec![Message::system(HYDE_SYSTEM), Message::user(prompt)]
}

/// One sub-query per line with bullets and numbering removed
pub fn parse_sub_queries(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.to_lowercase().starts_with("sub-queries"))
        .map(|line| {
            line.trim_start_matches(|c: char| {
                c.is_ascii_digit() || matches!(c, '-' | '*' | '\u{2022}' | '.' | ')' | ' ')
            })
            .trim()
            .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(MAX_SUB_QUERIES)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sub_queries() {
        let output = "Sub-queries:\n1. budget emails from finance\n- Q3 forecast\n\u{2022} spending approvals\n\n2) vendor invoices\n5. extra one";
        let parsed = parse_sub_queries(output);

        assert_eq!(
            parsed,
            vec![
                "budget emails from finance".to_string(),
                "Q3 forecast".to_string(),
                "spending approvals".to_string(),
                "vendor invoices".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_sub_queries_empty() {
        assert!(parse_sub_queries("").is_empty());
        assert!(parse_sub_queries("-\n 1.\n").is_empty());
    }

    #[test]
    fn test_hyde_prompt_uses_type_template() {
        let messages = hyde_messages("Q3 budget", QueryType::Topical);
        assert_eq!(messages.len(), 2);
        assert!(messages[1]
            .content
            .starts_with("Write a brief email about this topic based on: Q3 budget"));
    }
}
