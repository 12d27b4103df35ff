//! CLI retrieval commands: `folio search`, `folio ask`, and `folio check`.

use anyhow::Result;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::io::Write;

use crate::confidence::confidence;
use crate::config::Config;
use crate::index::{coverage, CorpusIndex, QueryContext};
use crate::llm::create_model;
use crate::prompt::{build_messages, citations, summarize_snippet, EMPTY_ANSWER, NOT_FOUND_ANSWER};

/// Print the ranked chunks for `query` with their scores.
pub fn run_search(
    config: &Config,
    index: &CorpusIndex,
    query: &str,
    limit: Option<usize>,
    explain: bool,
) -> Result<()> {
    let limit = limit.unwrap_or(config.retrieval.final_limit);
    let ctx = QueryContext::new(query);
    let ranked = index.retrieve_with_context(&ctx, limit);

    if ranked.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let cov = coverage(&ctx.tokens, &ranked);
    if explain {
        println!("query tokens: {}", ctx.tokens.join(", "));
    }

    for (i, c) in ranked.iter().enumerate() {
        let rec = &c.chunk.record;
        println!(
            "{}. [{:.3}] {} / {}",
            i + 1,
            c.fused_score,
            rec.source_title.as_deref().unwrap_or("(untitled)"),
            rec.section.as_deref().unwrap_or("-")
        );
        if let Some(ref url) = rec.source_url {
            println!("    url: {}", url);
        }
        println!("    excerpt: \"{}\"", summarize_snippet(&rec.text, 160));
        println!("    id: {}", c.chunk.id);
        if explain {
            println!(
                "    keyword: {:.3} (overlap {:.3} + phrase {:.2} + tag {:.2})  semantic: {:.3}",
                c.keyword_score,
                c.lexical.overlap_ratio,
                c.lexical.phrase_boost,
                c.lexical.tag_boost,
                c.semantic_score
            );
        }
        println!();
    }

    println!(
        "coverage: {:.2}  confidence: {:.2}",
        cov,
        confidence(&ranked, cov)
    );

    Ok(())
}

/// Retrieve context for `question` and stream the model's answer to stdout.
pub async fn run_ask(
    config: &Config,
    index: &CorpusIndex,
    question: &str,
    limit: Option<usize>,
) -> Result<()> {
    let limit = limit.unwrap_or(config.retrieval.final_limit);
    let ctx = QueryContext::new(question);
    let ranked = index.retrieve_with_context(&ctx, limit);

    if ranked.is_empty() {
        println!("{}", NOT_FOUND_ANSWER);
        return Ok(());
    }

    let cov = coverage(&ctx.tokens, &ranked);
    let conf = confidence(&ranked, cov);
    let messages = build_messages(
        question,
        &ranked,
        &[],
        config.server.history_turns,
        config.server.history_chars,
    );
    let cites = citations(&ranked);

    let model = create_model(&config.llm)?;
    let mut stream = model.stream(&messages).await?;

    let mut stdout = std::io::stdout();
    let mut produced = false;
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        produced = true;
        write!(stdout, "{}", fragment)?;
        stdout.flush()?;
    }
    if !produced {
        write!(stdout, "{}", EMPTY_ANSWER)?;
    }
    println!();
    println!();

    println!("Sources (confidence {:.2}):", conf);
    for (i, cite) in cites.iter().enumerate() {
        println!(
            "  [{}] {} {}",
            i + 1,
            cite.title.as_deref().unwrap_or("(untitled)"),
            cite.url.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

/// Print corpus statistics after a successful load.
pub fn run_check(index: &CorpusIndex) -> Result<()> {
    let mut sections: BTreeMap<&str, usize> = BTreeMap::new();
    let mut tags: BTreeMap<&str, usize> = BTreeMap::new();
    let mut token_total = 0usize;

    for chunk in index.chunks() {
        *sections
            .entry(chunk.record.section.as_deref().unwrap_or("(none)"))
            .or_default() += 1;
        for tag in &chunk.record.tags {
            *tags.entry(tag.as_str()).or_default() += 1;
        }
        token_total += chunk.tokens.len();
    }

    println!("chunks: {}", index.len());
    println!("tokens: {}", token_total);
    println!("sections:");
    for (section, count) in &sections {
        println!("  {:<24} {}", section, count);
    }
    println!("tags: {}", tags.len());
    for (tag, count) in &tags {
        println!("  {:<24} {}", tag, count);
    }

    Ok(())
}
