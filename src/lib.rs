//! # Portfolio RAG
//!
//! A retrieval-augmented chat backend over a small, static knowledge base of
//! portfolio facts (projects, skills, education).
//!
//! A question is normalized, tokenized and expanded with domain synonyms,
//! then every chunk of the corpus is scored with a keyword-overlap signal and
//! a hashed bag-of-words cosine signal. The fused ranking feeds a prompt for
//! an external chat model, and the answer is returned (or streamed) with
//! citations and a confidence estimate.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Rewriter   │──▶│ Corpus Index │──▶│  Confidence  │
//! │ text+synonym │   │ lexical+hash │   │  + coverage  │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           ▼                  ▼
//!                      ┌──────────┐       ┌──────────┐
//!                      │  Prompt  │──────▶│   Chat   │
//!                      │ builder  │       │  model   │
//!                      └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! folio check                                   # validate the corpus
//! folio search "rag project" --explain          # inspect the ranking
//! GROQ_API_KEY=... folio ask "What is your stack?"
//! GROQ_API_KEY=... folio serve                  # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Corpus record types |
//! | [`text`] | Normalization and tokenization |
//! | [`embedding`] | Hashed vectors and cosine similarity |
//! | [`rewrite`] | Synonym query expansion |
//! | [`lexical`] | Keyword relevance score |
//! | [`index`] | Corpus index and hybrid ranking |
//! | [`confidence`] | Retrieval confidence |
//! | [`prompt`] | Prompt assembly and citations |
//! | [`llm`] | Chat model providers |
//! | [`rate_limit`] | Per-client sliding-window limiter |
//! | [`search`] | CLI retrieval commands |
//! | [`server`] | HTTP chat server |

pub mod confidence;
pub mod config;
pub mod embedding;
pub mod index;
pub mod lexical;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod rate_limit;
pub mod rewrite;
pub mod search;
pub mod server;
pub mod text;
