//! Text normalization and tokenization.
//!
//! Every scoring stage works on the same canonical form of text: lowercase
//! ASCII alphanumerics separated by single spaces. [`normalize_text`] produces
//! that form and [`tokenize`] splits it into content tokens, dropping
//! single-character tokens and a closed list of English function words.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Function words that carry no retrieval signal.
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "you", "your", "i",
    "me", "my", "we", "our", "about", "what", "which", "who", "how", "when", "where", "why", "can",
    "do", "does",
];

fn stopword_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

/// Returns `true` if `token` is in the stopword list.
pub fn is_stopword(token: &str) -> bool {
    stopword_set().contains(token)
}

/// Lowercase `text`, replace every character outside `[a-z0-9]` with a space,
/// collapse whitespace runs and trim.
///
/// Total and idempotent: `normalize_text(&normalize_text(s)) == normalize_text(s)`.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(lower);
        } else {
            pending_space = true;
        }
    }

    out
}

/// Split `text` into ordered content tokens.
///
/// Tokens keep their left-to-right order and may repeat.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_text(text)
        .split(' ')
        .filter(|token| token.len() > 1 && !is_stopword(token))
        .map(str::to_string)
        .collect()
}
