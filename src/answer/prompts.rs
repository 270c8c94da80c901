//! Prompt templates for answer generation and summaries

use crate::generation::Message;
use crate::query::QueryType;

const FACTUAL_PROMPT: &str = "You are an AI assistant analyzing email data. Answer questions factually and precisely.

OUTPUT FORMAT:
- Be CONCISE and DIRECT, get to the point immediately
- Use bullet points for lists
- Cite the sender, date and subject of referenced emails inline
- If information is missing, say so briefly

Example:
\"John sent 5 emails about the project between Jan 1-15:
- Jan 3: Initial proposal (to: team@company.com)
- Jan 5: Budget revision (to: finance@company.com)\"

Skip lengthy explanations; users want quick, factual answers.";

const TEMPORAL_PROMPT: &str = "You are an AI assistant analyzing email data with a focus on dates and timelines.

OUTPUT FORMAT:
- Present events CHRONOLOGICALLY as a timeline table:
  | Date | Sender | Subject | Key Action |
  |------|--------|---------|------------|
- One line per event
- Group into date ranges when there are many emails

Use the structured timeline instead of prose.";

const TOPICAL_PROMPT: &str = "You are an AI assistant analyzing email discussions on specific topics.

OUTPUT FORMAT:
- Open with a 1-2 sentence summary
- List the key points as bullets, noting who said what
- Group by subtopic where it helps
- Close with the participants

Example:
\"**VPN Access Discussion** - 4 emails between Jan 3-10

Key Points:
- Jan 3: John requested VPN access for the new team
- Jan 5: IT approved and sent credentials
- Jan 10: Resolved after a firewall rule update

Participants: John, IT Team\"

Keep it structured and scannable.";

const RELATIONAL_PROMPT: &str = "You are an AI assistant analyzing communication patterns between people.

OUTPUT FORMAT:
- Open with a one-line summary of the communication
- Show email counts in a table:
  | Direction | Count | Topics |
  |-----------|-------|--------|
- Then list the key interactions briefly

Be concise and data-focused.";

const SUMMARIZATION_PROMPT: &str = "You are an AI assistant summarizing email content.

OUTPUT FORMAT:
- Start with a 2-3 sentence executive summary
- Use bullet points for key points
- Group by theme if several subjects are covered
- End with action items, if any, as a checklist

Example:
\"**Summary: Project Alpha (5 emails, Jan 3-10)**

Key Points:
- Budget approved at $50K
- Timeline: 3 months starting Feb 1

Action Items:
- [ ] John to send the detailed plan by Jan 15\"

Be structured and actionable.";

const ANALYTICAL_PROMPT: &str = "You are an AI assistant providing email analytics and statistics.

OUTPUT FORMAT:
- Present data in TABLES whenever possible
- Show rankings with counts and percentages
- Be precise with numbers and keep prose minimal

GLOBAL COUNTS:
For totals or system-wide statistics, use the SYSTEM STATISTICS block at the top
of the context. The emails listed below it are only a sample of the archive; do
not count them by hand for global questions. Use them only for narrower
questions the statistics do not answer.

Example for \"Who emails me most?\":
\"**Top 10 Senders by Email Count:**
| Rank | Sender | Email Count | % of Total |
|------|--------|-------------|------------|
| 1 | john@company.com | 45 | 23.0% |\"

Always use tables for rankings, counts and comparisons.";

const ATTACHMENT_PROMPT: &str = "You are an AI assistant analyzing email attachments.

OUTPUT FORMAT:
- List attachments in a table:
  | Filename | Type | From | Date | Email Subject |
  |----------|------|------|------|---------------|
- Mention emails whose attachments could not be read

Be structured and informative.";

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "You are an AI assistant that creates clear, structured summaries of email communications.";

const FORMAT_REQUIREMENTS: &str = "RESPONSE FORMAT REQUIREMENTS:
- For questions asking \"who/what is the most/least\" or rankings: USE A TABLE with Rank, Name, Count columns
- For counts/statistics: Show numbers clearly with a table
- For lists: Use bullet points
- For timelines: Use chronological table format
- Be CONCISE - avoid long paragraphs
- Start with the direct answer, then provide supporting details
- If data is missing, state it briefly";

/// Output-format system prompt per question type
pub fn system_prompt(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::Factual => FACTUAL_PROMPT,
        QueryType::Temporal => TEMPORAL_PROMPT,
        QueryType::Topical => TOPICAL_PROMPT,
        QueryType::Relational => RELATIONAL_PROMPT,
        QueryType::Summarization => SUMMARIZATION_PROMPT,
        QueryType::Analytical => ANALYTICAL_PROMPT,
        QueryType::Attachment => ATTACHMENT_PROMPT,
    }
}

/// System prompt, the last `history_turns` turns, then the grounded question
pub fn answer_messages(
    query_type: QueryType,
    history: &[Message],
    history_turns: usize,
    context: &str,
    question: &str,
) -> Vec<Message> {
    let skip = history.len().saturating_sub(history_turns);

    let mut messages = Vec::with_capacity(history.len() - skip + 2);
    messages.push(Message::system(system_prompt(query_type)));
    messages.extend(history.iter().skip(skip).cloned());
    messages.push(Message::user(format!(
        "Based on the following email context, answer my question.\n\n\
         Email Context:\n{}\n\n\
         Question: {}\n\n\
         {}",
        context, question, FORMAT_REQUIREMENTS
    )));
    messages
}

pub fn summary_messages(topic: Option<&str>, context: &str) -> Vec<Message> {
    let focus = match topic {
        Some(topic) => format!("Focus on: {}", topic),
        None => "Include all major topics and themes.".to_string(),
    };

    vec![
        Message::system(SUMMARY_SYSTEM_PROMPT),
        Message::user(format!(
            "Based on the following email context, provide a comprehensive summary.\n\n\
             {}\n\n\
             Structure your summary with:\n\
             1. Overview (2-3 sentences)\n\
             2. Key Topics Discussed\n\
             3. Important Decisions or Action Items\n\
             4. Notable Participants\n\n\
             Email Context:\n{}\n\n\
             Summary:",
            focus, context
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Role;

    #[test]
    fn test_table_prompts_for_table_types() {
        for query_type in [
            QueryType::Analytical,
            QueryType::Temporal,
            QueryType::Relational,
            QueryType::Attachment,
        ] {
            assert!(system_prompt(query_type).contains('|'), "{}", query_type);
        }
        assert!(system_prompt(QueryType::Summarization).contains("Action Items"));
    }

    #[test]
    fn test_history_is_capped() {
        let history: Vec<Message> = (0..14)
            .map(|i| Message::user(format!("turn {}", i)))
            .collect();

        let messages = answer_messages(QueryType::Factual, &history, 10, "ctx", "What now?");
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "turn 4");

        let last = &messages[11];
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("Email Context:\nctx\n\nQuestion: What now?"));
        assert!(last.content.ends_with("If data is missing, state it briefly"));
    }

    #[test]
    fn test_summary_focus() {
        let messages = summary_messages(Some("budget"), "ctx");
        assert_eq!(messages[0].content, SUMMARY_SYSTEM_PROMPT);
        assert!(messages[1].content.contains("Focus on: budget"));

        let messages = summary_messages(None, "ctx");
        assert!(messages[1].content.contains("Include all major topics and themes."));
        assert!(messages[1].content.ends_with("Summary:"));
    }
}
