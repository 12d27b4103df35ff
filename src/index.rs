//! In-memory corpus index and hybrid retrieval.
//!
//! The corpus is loaded once at startup, every chunk's tokens and hashed
//! vector are computed up front, and the resulting [`CorpusIndex`] is shared
//! read-only (behind an `Arc`) by all requests.
//!
//! # Ranking Algorithm
//!
//! 1. Rewrite the query ([`rewrite_query`]). No tokens → no results.
//! 2. Embed the rewritten tokens; join them with spaces as the query text.
//! 3. Per chunk: `keyword` = lexical score, `semantic` = cosine similarity.
//! 4. `fused = 0.6 × keyword + 0.4 × semantic`.
//! 5. Drop candidates with `fused <= 0.05`.
//! 6. Stable sort by `fused` (desc); ties keep corpus order.
//! 7. Truncate to `limit`.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use crate::embedding::{cosine_similarity, embed_tokens};
use crate::lexical::{score_breakdown, LexicalBreakdown};
use crate::models::{ChunkId, ChunkRecord};
use crate::rewrite::rewrite_query;
use crate::text::{normalize_text, tokenize};

/// Weight of the keyword score in the fused score.
pub const KEYWORD_WEIGHT: f64 = 0.6;
/// Weight of the semantic score in the fused score.
pub const SEMANTIC_WEIGHT: f64 = 0.4;
/// Candidates must score strictly above this to be returned.
pub const NOISE_FLOOR: f64 = 0.05;
/// Default number of candidates returned by [`CorpusIndex::retrieve`].
pub const DEFAULT_LIMIT: usize = 4;

/// A corpus chunk with its derived, immutable search fields.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    /// Stable identifier (the record's id, or its corpus position).
    pub id: String,
    pub record: ChunkRecord,
    /// Normalized body text, used for phrase matching.
    pub normalized_text: String,
    /// Normalized, space-joined tags, used for tag matching.
    pub tag_text: String,
    /// Tokens of title, section, body and tags, in that order.
    pub tokens: Vec<String>,
    pub token_set: HashSet<String>,
    /// Unit-length hashed vector of `tokens`.
    pub vector: Vec<f64>,
}

impl IndexedChunk {
    /// Derive the search fields for a record.
    pub fn new(record: ChunkRecord) -> Self {
        let id = record
            .id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        let searchable = [
            record.source_title.as_deref().unwrap_or(""),
            record.section.as_deref().unwrap_or(""),
            record.text.as_str(),
            record.tags.join(" ").as_str(),
        ]
        .join(" ");

        let tokens = tokenize(&searchable);
        let token_set = tokens.iter().cloned().collect();
        let vector = embed_tokens(&tokens);

        Self {
            id,
            normalized_text: normalize_text(&record.text),
            tag_text: normalize_text(&record.tags.join(" ")),
            tokens,
            token_set,
            vector,
            record,
        }
    }
}

/// Per-request view of a query after normalization and rewriting.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub raw: String,
    pub normalized: String,
    /// Rewritten (expanded) tokens.
    pub tokens: Vec<String>,
    /// Rewritten tokens joined by single spaces.
    pub text: String,
    pub vector: Vec<f64>,
}

impl QueryContext {
    pub fn new(query: &str) -> Self {
        let tokens = rewrite_query(query);
        let vector = embed_tokens(&tokens);
        Self {
            raw: query.to_string(),
            normalized: normalize_text(query),
            text: tokens.join(" "),
            tokens,
            vector,
        }
    }

    /// `true` when the query has no retrievable tokens.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// A scored chunk for one query.
#[derive(Debug, Clone)]
pub struct RankedCandidate<'a> {
    pub chunk: &'a IndexedChunk,
    pub fused_score: f64,
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub lexical: LexicalBreakdown,
}

/// Serializable score summary of a [`RankedCandidate`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CandidateScores {
    pub id: String,
    pub fused_score: f64,
    pub keyword_score: f64,
    pub semantic_score: f64,
}

impl RankedCandidate<'_> {
    pub fn scores(&self) -> CandidateScores {
        CandidateScores {
            id: self.chunk.id.clone(),
            fused_score: self.fused_score,
            keyword_score: self.keyword_score,
            semantic_score: self.semantic_score,
        }
    }
}

/// Immutable, precomputed index over the whole corpus.
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    chunks: Vec<IndexedChunk>,
}

impl CorpusIndex {
    /// Index records in corpus order. Records without an id get their
    /// zero-based position.
    pub fn from_records(records: Vec<ChunkRecord>) -> Self {
        let chunks = records
            .into_iter()
            .enumerate()
            .map(|(i, mut record)| {
                if record.id.is_none() {
                    record.id = Some(ChunkId::Number(i as i64));
                }
                IndexedChunk::new(record)
            })
            .collect();
        Self { chunks }
    }

    /// Parse a non-empty JSON array of chunk records and index it.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("Corpus is not valid JSON")?;
        if !value.is_array() {
            bail!("Corpus must be a JSON array of chunk records");
        }
        let records: Vec<ChunkRecord> =
            serde_json::from_value(value).context("Corpus contains a malformed chunk record")?;
        if records.is_empty() {
            bail!("Corpus contains no chunk records");
        }
        Ok(Self::from_records(records))
    }

    /// Read and index the corpus file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Failed to load corpus: {}", path.display()))
    }

    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Rewrite and rank `query`, returning at most `limit` candidates, best first.
    pub fn retrieve(&self, query: &str, limit: usize) -> Vec<RankedCandidate<'_>> {
        self.retrieve_with_context(&QueryContext::new(query), limit)
    }

    /// Rank a prepared query.
    pub fn retrieve_with_context(
        &self,
        query: &QueryContext,
        limit: usize,
    ) -> Vec<RankedCandidate<'_>> {
        if query.is_empty() {
            return Vec::new();
        }

        let mut ranked: Vec<RankedCandidate<'_>> = self
            .chunks
            .iter()
            .map(|chunk| {
                let lexical = score_breakdown(&query.text, &query.tokens, chunk);
                let keyword_score = lexical.total();
                let semantic_score = cosine_similarity(&query.vector, &chunk.vector);
                RankedCandidate {
                    chunk,
                    fused_score: KEYWORD_WEIGHT * keyword_score + SEMANTIC_WEIGHT * semantic_score,
                    keyword_score,
                    semantic_score,
                    lexical,
                }
            })
            .filter(|c| c.fused_score > NOISE_FLOOR)
            .collect();

        // `sort_by` is stable, so equal scores keep corpus order.
        ranked.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);
        ranked
    }
}

/// Fraction of `tokens` that appear in at least one candidate's token set.
///
/// Returns 0.0 when there are no tokens.
pub fn coverage(tokens: &[String], candidates: &[RankedCandidate<'_>]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let covered = tokens
        .iter()
        .filter(|token| candidates.iter().any(|c| c.chunk.token_set.contains(*token)))
        .count();
    covered as f64 / tokens.len() as f64
}
