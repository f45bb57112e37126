//! Text extraction and token counting over entry HTML.
//!
//! Rule evaluation measures content length in tokens rather than bytes so
//! that dense scripts (CJK) and spaced scripts (Latin) are compared fairly.
//! The counter is deterministic: one token per CJK ideograph, one token per
//! whitespace-delimited alphanumeric word.

use regex::Regex;
use std::sync::LazyLock;

static INVISIBLE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b[^>]*>.*?</script>|<style\b[^>]*>.*?</style>|<noscript\b[^>]*>.*?</noscript>|<iframe\b[^>]*>.*?</iframe>",
    )
    .expect("invisible block pattern is valid")
});

static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));

/// Strip markup and invisible blocks, returning the visible text with
/// whitespace collapsed to single spaces.
pub fn extract_text(html: &str) -> String {
    let without_blocks = INVISIBLE_BLOCKS.replace_all(html, " ");
    let without_tags = TAGS.replace_all(&without_blocks, " ");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Count tokens in plain text.
pub fn token_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if is_cjk(c) {
            // Each ideograph stands alone, with or without surrounding spaces.
            count += 1;
            in_word = false;
        } else if c.is_alphanumeric() {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }
    count
}

/// Token count of the visible text of an HTML fragment. This is the value
/// `EntryContentLength` rules compare against.
pub fn content_tokens(html: &str) -> usize {
    token_count(&extract_text(html))
}

/// Lowercased token set of an HTML fragment, used for overlap scoring.
pub fn token_set(html: &str) -> std::collections::HashSet<String> {
    let text = extract_text(html).to_lowercase();
    let mut tokens = std::collections::HashSet::new();
    let mut word = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.insert(std::mem::take(&mut word));
            }
            tokens.insert(c.to_string());
        } else if c.is_alphanumeric() {
            word.push(c);
        } else if !word.is_empty() {
            tokens.insert(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.insert(word);
    }
    tokens
}

/// Convert entry HTML to markdown for LLM prompts.
pub fn to_markdown(html: &str) -> String {
    htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "iframe"])
        .build()
        .convert(html)
        .unwrap_or_else(|_| extract_text(html))
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'       // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'     // CJK Extension A
        | '\u{F900}'..='\u{FAFF}'     // CJK Compatibility Ideographs
        | '\u{3040}'..='\u{30FF}'     // Hiragana / Katakana
        | '\u{AC00}'..='\u{D7AF}'     // Hangul Syllables
    )
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}
