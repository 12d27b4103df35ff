//! Core data models for the knowledge corpus.
//!
//! A [`ChunkRecord`] is one entry of the static corpus file as written by
//! hand. The index wraps each record in an
//! [`IndexedChunk`](crate::index::IndexedChunk) that carries its derived
//! tokens and vector.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chunk identifier. Corpus files use either strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkId::Number(n) => write!(f, "{}", n),
            ChunkId::Text(s) => f.write_str(s),
        }
    }
}

/// One retrievable unit of knowledge with citation metadata.
///
/// Only `text` is required; the rest improves citation quality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(default)]
    pub id: Option<ChunkId>,
    pub text: String,
    #[serde(default)]
    pub source_title: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
