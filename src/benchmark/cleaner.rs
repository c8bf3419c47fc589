use once_cell::sync::Lazy;
use regex::Regex;

static CLOSED_THINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think[^>]*>.*?</think[^>]*>").expect("valid regex"));
static CLOSED_THINKING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<thinking>.*?</thinking>").expect("valid regex"));
static UNCLOSED_THINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think[^>]*>.*").expect("valid regex"));
static STRAY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?think(?:ing)?[^>]*>").expect("valid regex"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").expect("valid regex"));
static LINE_EDGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]+|[ \t]+$").expect("valid regex"));

/// Removes reasoning spans so only the final answer remains.
///
/// An opening `<think>` without a closing tag swallows the rest of the text.
pub fn strip_thinking(response: &str) -> String {
    if response.is_empty() {
        return String::new();
    }
    let cleaned = CLOSED_THINK.replace_all(response, "");
    let cleaned = CLOSED_THINKING.replace_all(&cleaned, "");
    let cleaned = UNCLOSED_THINK.replace_all(&cleaned, "");
    let cleaned = STRAY_TAG.replace_all(&cleaned, "");
    let cleaned = BLANK_LINES.replace_all(cleaned.trim(), "\n");
    let cleaned = LINE_EDGES.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_closed_spans() {
        assert_eq!(strip_thinking("<think>hmm, 2+2</think>\n\nThe answer is 4."), "The answer is 4.");
        assert_eq!(strip_thinking("<THINKING>x</THINKING>Paris"), "Paris");
        assert_eq!(strip_thinking("<think type=\"deep\">a\nb</think >Done"), "Done");
    }

    #[test]
    fn test_unclosed_span_eats_the_rest() {
        assert_eq!(strip_thinking("Answer first.\n<think>still going"), "Answer first.");
    }

    #[test]
    fn test_stray_closing_tag_and_blank_lines() {
        assert_eq!(strip_thinking("</think>\n\n\n  Line one  \n\n\nLine two"), "Line one\nLine two");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_thinking("H2O"), "H2O");
        assert_eq!(strip_thinking(""), "");
    }
}
