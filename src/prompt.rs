//! Prompt assembly and citations.
//!
//! Turns a question plus its ranked chunks into the message list sent to the
//! chat model, and into the citation list returned to the client.

use serde::Serialize;

use crate::index::RankedCandidate;
use crate::llm::{ChatMessage, Role};

/// Instructions sent as the system message of every generation.
pub const SYSTEM_PROMPT: &str = "You are a portfolio assistant. Answer only from the provided context. \
If the answer is not in context, clearly say so. Keep answers concise, professional, and \
recruiter-friendly. Use short bullet points for multi-part answers. Do not fabricate facts.";

/// Answer returned when retrieval finds nothing above the noise floor.
pub const NOT_FOUND_ANSWER: &str = "I could not find that in the portfolio knowledge base yet. \
Try asking about projects, tech stack, education, or certifications.";

/// Answer returned when the model produces no text.
pub const EMPTY_ANSWER: &str = "I could not generate a response at the moment.";

/// Maximum snippet length in characters.
pub const SNIPPET_CHARS: usize = 220;

/// Source reference returned alongside an answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Citation {
    pub title: Option<String>,
    pub url: Option<String>,
    pub section: Option<String>,
    pub snippet: String,
}

/// Build the user prompt: the question followed by numbered sources.
pub fn build_prompt(question: &str, candidates: &[RankedCandidate<'_>]) -> String {
    let context = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let rec = &c.chunk.record;
            [
                format!(
                    "Source {}: {}",
                    i + 1,
                    rec.source_title.as_deref().unwrap_or("(untitled)")
                ),
                format!("URL: {}", rec.source_url.as_deref().unwrap_or("")),
                format!("Section: {}", rec.section.as_deref().unwrap_or("")),
                format!("Content: {}", rec.text),
            ]
            .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    [
        "User question:",
        question,
        "",
        "Retrieved profile context:",
        context.as_str(),
    ]
    .join("\n")
}

/// Collapse whitespace and cut to `max_chars` characters, appending `...`
/// when text was dropped.
pub fn summarize_snippet(text: &str, max_chars: usize) -> String {
    let clean = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.chars().count() <= max_chars {
        return clean;
    }
    let cut: String = clean.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// Citations for ranked chunks, in rank order.
pub fn citations(candidates: &[RankedCandidate<'_>]) -> Vec<Citation> {
    candidates
        .iter()
        .map(|c| {
            let rec = &c.chunk.record;
            Citation {
                title: rec.source_title.clone(),
                url: rec.source_url.clone(),
                section: rec.section.clone(),
                snippet: summarize_snippet(&rec.text, SNIPPET_CHARS),
            }
        })
        .collect()
}

/// Keep only user/assistant turns, the last `max_turns` of them, each cut to
/// `max_chars` characters.
pub fn sanitize_history(history: &[ChatMessage], max_turns: usize, max_chars: usize) -> Vec<ChatMessage> {
    let kept: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .collect();
    let skip = kept.len().saturating_sub(max_turns);

    kept.into_iter()
        .skip(skip)
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content.chars().take(max_chars).collect(),
        })
        .collect()
}

/// Full message list for one generation: system prompt, sanitized history,
/// then the retrieval-augmented question.
pub fn build_messages(
    question: &str,
    candidates: &[RankedCandidate<'_>],
    history: &[ChatMessage],
    max_turns: usize,
    max_chars: usize,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
    messages.extend(sanitize_history(history, max_turns, max_chars));
    messages.push(ChatMessage::user(build_prompt(question, candidates)));
    messages
}
