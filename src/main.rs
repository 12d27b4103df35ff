//! # Portfolio RAG CLI (`folio`)
//!
//! The `folio` binary loads the knowledge corpus once, then either serves
//! the chat API or runs a one-off retrieval command.
//!
//! ## Usage
//!
//! ```bash
//! folio --config ./config/folio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folio check` | Load and index the corpus, print statistics |
//! | `folio search "<query>"` | Print ranked chunks with scores |
//! | `folio ask "<question>"` | Stream an answer from the configured model |
//! | `folio serve` | Start the HTTP chat server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use portfolio_rag::{config, index::CorpusIndex, search, server};

/// Portfolio RAG CLI: retrieval-augmented chat over a static portfolio
/// knowledge base.
#[derive(Parser)]
#[command(
    name = "folio",
    about = "Retrieval-augmented chat over a static portfolio knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and index the corpus, then print statistics.
    ///
    /// Fails if the corpus file is missing or is not a JSON array of
    /// chunk records.
    Check,

    /// Rank corpus chunks for a query.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Show the rewritten query and per-chunk score breakdown.
        #[arg(long)]
        explain: bool,
    },

    /// Answer a question with the configured chat model.
    Ask {
        /// The question.
        question: String,

        /// Maximum number of chunks to put in the prompt.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP chat server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    // The corpus is loaded exactly once; a bad corpus stops the process here.
    let index = CorpusIndex::load(&cfg.corpus.path)?;
    tracing::info!(chunks = index.len(), path = %cfg.corpus.path.display(), "corpus loaded");

    match cli.command {
        Commands::Check => {
            search::run_check(&index)?;
        }
        Commands::Search {
            query,
            limit,
            explain,
        } => {
            search::run_search(&cfg, &index, &query, limit, explain)?;
        }
        Commands::Ask { question, limit } => {
            search::run_ask(&cfg, &index, &question, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg, Arc::new(index)).await?;
        }
    }

    Ok(())
}
