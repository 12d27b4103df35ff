//! Keyword relevance between a query and an indexed chunk.
//!
//! `score = overlap_ratio + phrase_boost + tag_boost` where
//!
//! - `overlap_ratio` = |query tokens ∩ chunk tokens| / |query tokens|
//! - `phrase_boost` = [`PHRASE_BOOST`] if the chunk text contains the whole
//!   normalized query
//! - `tag_boost` = [`TAG_BOOST`] if any query token is a substring of the
//!   chunk's joined tag text
//!
//! There is no corpus-wide term weighting. The score is not normalized and
//! can exceed 1.0.

use std::collections::HashSet;

use crate::index::IndexedChunk;
use crate::text::normalize_text;

/// Added when the chunk contains the normalized query as a substring.
pub const PHRASE_BOOST: f64 = 0.45;
/// Added when a query token appears inside the chunk's tag text.
pub const TAG_BOOST: f64 = 0.2;

/// Components of a keyword score, kept for `--explain` output.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LexicalBreakdown {
    pub overlap_ratio: f64,
    pub phrase_boost: f64,
    pub tag_boost: f64,
}

impl LexicalBreakdown {
    pub fn total(&self) -> f64 {
        self.overlap_ratio + self.phrase_boost + self.tag_boost
    }
}

/// Score a chunk against a query and return the individual components.
pub fn score_breakdown(
    query_text: &str,
    query_tokens: &[String],
    chunk: &IndexedChunk,
) -> LexicalBreakdown {
    if chunk.normalized_text.is_empty() {
        return LexicalBreakdown::default();
    }

    let query_set: HashSet<&str> = query_tokens.iter().map(String::as_str).collect();
    let overlap = query_set
        .iter()
        .filter(|token| chunk.token_set.contains(**token))
        .count();
    let overlap_ratio = if query_set.is_empty() {
        0.0
    } else {
        overlap as f64 / query_set.len() as f64
    };

    let normalized_query = normalize_text(query_text);
    let phrase_boost =
        if !normalized_query.is_empty() && chunk.normalized_text.contains(&normalized_query) {
            PHRASE_BOOST
        } else {
            0.0
        };

    let tag_boost = if query_tokens
        .iter()
        .any(|token| chunk.tag_text.contains(token.as_str()))
    {
        TAG_BOOST
    } else {
        0.0
    };

    LexicalBreakdown {
        overlap_ratio,
        phrase_boost,
        tag_boost,
    }
}

/// Keyword score of a chunk for a query.
pub fn keyword_score(query_text: &str, query_tokens: &[String], chunk: &IndexedChunk) -> f64 {
    score_breakdown(query_text, query_tokens, chunk).total()
}
