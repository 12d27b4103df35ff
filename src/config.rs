//! TOML configuration.
//!
//! ```toml
//! [corpus]
//! path = "./knowledge/chunks.json"
//!
//! [retrieval]
//! final_limit = 4
//!
//! [llm]
//! provider = "groq"
//! model = "llama-3.1-8b-instant"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [rate_limit]
//! requests_per_window = 20
//! window_secs = 60
//! ```
//!
//! Only `[corpus]` is required; every other section falls back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    /// JSON file containing an array of chunk records.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
        }
    }
}

fn default_final_limit() -> usize {
    crate::index::DEFAULT_LIMIT
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Overrides the provider's chat-completions URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overrides the provider's API key environment variable.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    450
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Longest accepted question, in characters.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Number of prior conversation turns forwarded to the model.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Per-turn character cap for forwarded history.
    #[serde(default = "default_history_chars")]
    pub history_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_message_chars: default_max_message_chars(),
            history_turns: default_history_turns(),
            history_chars: default_history_chars(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}
fn default_max_message_chars() -> usize {
    1200
}
fn default_history_turns() -> usize {
    6
}
fn default_history_chars() -> usize {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Upper bound on tracked client identities.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_secs: default_window_secs(),
            max_clients: default_max_clients(),
        }
    }
}

fn default_requests_per_window() -> usize {
    20
}
fn default_window_secs() -> u64 {
    60
}
fn default_max_clients() -> usize {
    10_000
}

/// Parse configuration from a TOML string and validate it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Read, parse and validate the configuration file at `path`.
///
/// A relative `corpus.path` is resolved against the config file's directory.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if config.corpus.path.is_relative() {
        if let Some(dir) = path.parent() {
            config.corpus.path = dir.join(&config.corpus.path);
        }
    }

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if config.server.max_message_chars == 0 {
        anyhow::bail!("server.max_message_chars must be > 0");
    }

    if config.rate_limit.requests_per_window == 0 {
        anyhow::bail!("rate_limit.requests_per_window must be > 0");
    }
    if config.rate_limit.window_secs == 0 {
        anyhow::bail!("rate_limit.window_secs must be > 0");
    }
    if config.rate_limit.max_clients == 0 {
        anyhow::bail!("rate_limit.max_clients must be > 0");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" | "groq" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, groq, or openai.",
            other
        ),
    }

    Ok(())
}
