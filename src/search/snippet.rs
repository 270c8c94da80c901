//! Result snippets around the first query-term hit

const SCAN_CHARS: usize = 1000;
const PREVIEW_CHARS: usize = 200;
const BEFORE_HIT: usize = 50;
const AFTER_HIT: usize = 150;

/// Preview of `text` centred on the earliest occurrence of any query term
///
/// Only the first 1000 characters are scanned. Without a query or a hit the
/// first 200 characters are returned. Cut ends are marked with `...`.
pub fn make_snippet(text: &str, query: Option<&str>) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    let chars: Vec<char> = text.chars().take(SCAN_CHARS).collect();
    let preview = || chars.iter().take(PREVIEW_CHARS).collect::<String>();

    let query = match query.map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => q,
        None => return Some(preview()),
    };

    let lowered: Vec<char> = chars.iter().map(|&c| lower_char(c)).collect();
    let best = query
        .split_whitespace()
        .filter_map(|term| {
            let term: Vec<char> = term.chars().map(lower_char).collect();
            find_chars(&lowered, &term)
        })
        .min();

    let Some(pos) = best else {
        return Some(preview());
    };

    let start = pos.saturating_sub(BEFORE_HIT);
    let end = (pos + AFTER_HIT).min(chars.len());

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str("...");
    }
    Some(snippet)
}

/// One-to-one lowercase so indexes line up with the original
fn lower_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_query_returns_preview() {
        let text = "a".repeat(500);
        assert_eq!(make_snippet(&text, None).unwrap().len(), 200);
        assert_eq!(make_snippet(&text, Some("  ")).unwrap().len(), 200);
        assert!(make_snippet("", Some("x")).is_none());
    }

    #[test]
    fn test_window_around_earliest_hit() {
        let text = format!("{}Budget review{}", "x".repeat(100), "y".repeat(300));
        let snippet = make_snippet(&text, Some("review budget")).unwrap();

        // earliest term is "budget" at 100
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), 3 + 200 + 3);
        assert!(snippet.contains("Budget review"));
    }

    #[test]
    fn test_hit_near_start_has_no_leading_ellipsis() {
        let snippet = make_snippet("Quarterly budget is final", Some("budget")).unwrap();
        assert_eq!(snippet, "Quarterly budget is final");
    }

    #[test]
    fn test_miss_falls_back_to_preview() {
        let snippet = make_snippet("nothing relevant here", Some("budget")).unwrap();
        assert_eq!(snippet, "nothing relevant here");
    }

    #[test]
    fn test_multibyte_text() {
        let text = format!("{}Überweisung bestätigt", "é".repeat(80));
        let snippet = make_snippet(&text, Some("überweisung")).unwrap();
        assert!(snippet.starts_with("..."));
        assert!(snippet.contains("Überweisung bestätigt"));
    }
}
