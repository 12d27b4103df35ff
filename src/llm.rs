//! Chat model abstraction and the OpenAI-compatible provider.
//!
//! Text generation is an external collaborator behind the [`ChatModel`]
//! trait:
//! - **[`DisabledModel`]**: fails every call; used when `llm.provider = "disabled"`.
//! - **[`OpenAiCompatibleModel`]**: calls a `/chat/completions` endpoint
//!   (Groq by default, or OpenAI), either in one shot or as a token stream.
//!
//! # Retry Strategy
//!
//! One-shot completions retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)
//!
//! Streams are not retried; once output has been forwarded to a client it
//! cannot be taken back.
//!
//! # Cancellation
//!
//! A [`TextStream`] owns the upstream HTTP response. Dropping it (for
//! example when the HTTP client of `/chat` disconnects) closes the upstream
//! connection and stops generation.
//!
//! # Timeouts
//!
//! `timeout_secs` bounds connecting and every read. One-shot completions
//! are also capped as a whole; streams are not, so a long answer that keeps
//! arriving is never cut off, while a stalled one fails.

use anyhow::{bail, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

pub const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Incremental model output. Each item is a text fragment.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Any role this service does not forward.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Generate the whole answer.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Generate the answer incrementally.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream>;
}

/// Create the chat model selected by `config.provider`.
///
/// # Errors
///
/// Fails for an unknown provider or when the provider's API key variable is
/// not set.
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledModel)),
        "groq" | "openai" => Ok(Box::new(OpenAiCompatibleModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled Model ============

/// Error returned by [`DisabledModel`] for every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationDisabled;

impl std::fmt::Display for GenerationDisabled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Text generation is disabled. Set [llm] provider in config.")
    }
}

impl std::error::Error for GenerationDisabled {}

/// A model that refuses to generate.
pub struct DisabledModel;

#[async_trait]
impl ChatModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(anyhow::Error::new(GenerationDisabled))
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> Result<TextStream> {
        Err(anyhow::Error::new(GenerationDisabled))
    }
}

// ============ OpenAI-compatible Model ============

/// Chat model speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    /// Whole-request cap for one-shot completions.
    timeout: Duration,
}

impl OpenAiCompatibleModel {
    /// # Errors
    ///
    /// Returns an error if the API key environment variable is not set or
    /// the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let (default_url, default_key_env) = match config.provider.as_str() {
            "openai" => (OPENAI_CHAT_URL, "OPENAI_API_KEY"),
            _ => (GROQ_CHAT_URL, "GROQ_API_KEY"),
        };
        let key_env = config.api_key_env.as_deref().unwrap_or(default_key_env);

        let api_key = match std::env::var(key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", key_env),
        };

        // No total timeout on the client: a long but steady stream must not be
        // cut off. Stalls are caught by the read timeout instead.
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_url.to_string()),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            timeout,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": stream,
            "messages": messages,
        })
    }

    fn request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.request_body(messages, false);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.request(&body).timeout(self.timeout).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "chat completion failed, retrying");
                        last_err = Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "chat completion request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let body = self.request_body(messages, true);
        let response = self.request(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("LLM API error {}: {}", status, body_text);
        }

        let mut bytes = response.bytes_stream();
        let text_stream = stream! {
            let mut decoder = SseDecoder::default();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow::Error::from(e));
                        break 'read;
                    }
                };
                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Done => break 'read,
                        SseEvent::Data(payload) => match parse_stream_delta(&payload) {
                            Ok(Some(text)) => yield Ok(text),
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                break 'read;
                            }
                        },
                    }
                }
            }
        };

        Ok(Box::pin(text_stream))
    }
}

/// Extract `choices[0].message.content` from a completion response.
///
/// An empty answer is returned as an empty string; callers decide the
/// fallback text.
pub fn parse_completion(json: &serde_json::Value) -> Result<String> {
    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid LLM response: missing choices array"))?;

    Ok(choices
        .first()
        .and_then(|c| c.pointer("/message/content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default())
}

/// Extract the text fragment of one streamed chunk, if it carries any.
pub fn parse_stream_delta(payload: &str) -> Result<Option<String>> {
    let json: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| anyhow::anyhow!("Invalid LLM stream chunk: {}", e))?;

    if let Some(err) = json.get("error") {
        bail!("LLM stream error: {}", err);
    }

    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

/// One server-sent event relevant to chat streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Network chunks may split lines anywhere; incomplete lines are buffered
/// until their newline arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes and return the complete `data:` events they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  Hello there.  "}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Hello there.");
    }

    #[test]
    fn test_parse_completion_empty_and_invalid() {
        let empty = serde_json::json!({"choices": []});
        assert_eq!(parse_completion(&empty).unwrap(), "");
        assert!(parse_completion(&serde_json::json!({"oops": 1})).is_err());
    }

    #[test]
    fn test_parse_stream_delta() {
        let chunk = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_stream_delta(chunk).unwrap(), Some("Hi".to_string()));
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_stream_delta(role_only).unwrap(), None);
        assert!(parse_stream_delta(r#"{"error":{"message":"boom"}}"#).is_err());
        assert!(parse_stream_delta("not json").is_err());
    }

    #[test]
    fn test_sse_decoder_split_lines() {
        let mut dec = SseDecoder::default();
        assert!(dec.push(b"data: {\"a\"").is_empty());
        let events = dec.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn test_sse_decoder_ignores_comments_and_crlf() {
        let mut dec = SseDecoder::default();
        let events = dec.push(b": keep-alive\r\nevent: message\r\ndata: x\r\n\r\n");
        assert_eq!(events, vec![SseEvent::Data("x".to_string())]);
    }

    #[test]
    fn test_role_deserialization() {
        let m: ChatMessage =
            serde_json::from_str(r#"{"role": "assistant", "content": "hi"}"#).unwrap();
        assert_eq!(m.role, Role::Assistant);
        let m: ChatMessage = serde_json::from_str(r#"{"role": "tool", "content": "x"}"#).unwrap();
        assert_eq!(m.role, Role::Other);
    }

    #[tokio::test]
    async fn test_disabled_model_fails() {
        let model = DisabledModel;
        let err = model.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(err.downcast_ref::<GenerationDisabled>().is_some());
        assert!(err.to_string().contains("disabled"));
        let err = match model.stream(&[ChatMessage::user("hi")]).await {
            Ok(_) => panic!("disabled model should not stream"),
            Err(e) => e,
        };
        assert!(err.downcast_ref::<GenerationDisabled>().is_some());
    }

    #[test]
    fn test_create_model_requires_key() {
        let config = LlmConfig {
            provider: "groq".to_string(),
            api_key_env: Some("FOLIO_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..LlmConfig::default()
        };
        assert!(create_model(&config).is_err());
        assert!(create_model(&LlmConfig::default()).is_ok());
    }

    /// Serves an SSE completion whose fragments arrive `gap` apart. With
    /// `stall`, the server goes quiet for that long before `[DONE]`.
    async fn spawn_sse_server(
        fragments: Vec<&'static str>,
        gap: Duration,
        stall: Option<Duration>,
    ) -> String {
        use axum::{body::Body, routing::post, Router};

        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let fragments = fragments.clone();
                async move {
                    let body = stream! {
                        for text in fragments {
                            tokio::time::sleep(gap).await;
                            let chunk = serde_json::json!({"choices": [{"delta": {"content": text}}]});
                            yield Ok::<_, std::convert::Infallible>(format!("data: {}\n\n", chunk));
                        }
                        if let Some(pause) = stall {
                            tokio::time::sleep(pause).await;
                        }
                        yield Ok("data: [DONE]\n\n".to_string());
                    };
                    Body::from_stream(body)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    fn local_model(url: String, timeout_secs: u64) -> OpenAiCompatibleModel {
        std::env::set_var("FOLIO_TEST_LOCAL_KEY", "test-key");
        OpenAiCompatibleModel::new(&LlmConfig {
            provider: "openai".to_string(),
            base_url: Some(url),
            api_key_env: Some("FOLIO_TEST_LOCAL_KEY".to_string()),
            timeout_secs,
            max_retries: 0,
            ..LlmConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_stream_outlives_timeout_while_data_flows() {
        let fragments = vec!["one ", "two ", "three ", "four ", "five"];
        let url = spawn_sse_server(fragments, Duration::from_millis(300), None).await;
        let model = local_model(url, 1);

        let mut stream = model.stream(&[ChatMessage::user("hi")]).await.unwrap();
        let mut answer = String::new();
        while let Some(item) = stream.next().await {
            answer.push_str(&item.unwrap());
        }
        assert_eq!(answer, "one two three four five");
    }

    #[tokio::test]
    async fn test_stalled_stream_fails() {
        let url = spawn_sse_server(vec!["partial"], Duration::ZERO, Some(Duration::from_secs(5))).await;
        let model = local_model(url, 1);

        let mut stream = model.stream(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(stream.next().await.unwrap().is_err());
    }
}
