//! Query rewriting with a static synonym table.
//!
//! Expands the tokens of a user question with domain terms, e.g.
//! `"rag"` → `"retrieval augmented generation"` or `"cv"` → `"resume"`.
//! Expansion is purely additive: the rewritten token list always contains
//! every original token, in the original order, followed by new tokens.

use std::collections::HashSet;

use crate::text::tokenize;

/// Domain synonym table. Keys are single normalized tokens; values are
/// phrases that get tokenized before being added to the query.
pub const SYNONYMS: &[(&str, &[&str])] = &[
    ("rag", &["retrieval augmented generation"]),
    ("cv", &["resume"]),
    ("resume", &["cv", "experience"]),
    ("stack", &["tech stack", "technology", "tools"]),
    ("tech", &["technology", "tools"]),
    ("tools", &["technology", "frameworks"]),
    ("skills", &["technologies", "languages", "frameworks"]),
    ("ml", &["machine learning"]),
    ("ai", &["artificial intelligence", "machine learning"]),
    ("llm", &["large language model", "language models"]),
    ("nlp", &["natural language processing"]),
    ("dl", &["deep learning"]),
    ("job", &["experience", "work", "role"]),
    ("work", &["experience", "role"]),
    ("internship", &["intern", "experience"]),
    ("education", &["university", "degree", "college"]),
    ("degree", &["education", "university"]),
    ("school", &["education", "university", "college"]),
    ("college", &["education", "university"]),
    ("certs", &["certification", "certifications"]),
    ("certifications", &["certification", "certified"]),
    ("contact", &["email", "linkedin", "github"]),
    ("projects", &["project", "built"]),
    ("project", &["projects", "built"]),
    ("js", &["javascript"]),
    ("ts", &["typescript"]),
    ("py", &["python"]),
    ("db", &["database", "sql"]),
    ("k8s", &["kubernetes"]),
    ("frontend", &["react", "ui"]),
    ("backend", &["api", "server"]),
    ("cloud", &["aws", "gcp", "azure"]),
];

/// Look up the synonym phrases for a normalized token.
pub fn synonyms_for(token: &str) -> Option<&'static [&'static str]> {
    SYNONYMS
        .iter()
        .find(|(key, _)| *key == token)
        .map(|(_, phrases)| *phrases)
}

/// Rewrite a raw question into its expanded, de-duplicated token list.
///
/// Returns an empty list for empty or stopword-only input.
pub fn rewrite_query(query: &str) -> Vec<String> {
    let original = tokenize(query);

    let mut seen: HashSet<String> = HashSet::new();
    let mut expanded: Vec<String> = Vec::new();
    let mut push = |token: String| {
        if seen.insert(token.clone()) {
            expanded.push(token);
        }
    };

    for token in &original {
        push(token.clone());
    }

    for token in &original {
        if let Some(phrases) = synonyms_for(token) {
            for phrase in phrases {
                for extra in tokenize(phrase) {
                    push(extra);
                }
            }
        }
    }

    expanded
}
