//! Chat HTTP server.
//!
//! Exposes retrieval-augmented chat over a JSON HTTP API for the portfolio
//! widget (or any other client).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question from the knowledge base |
//! | `GET`  | `/health` | Health check (returns version and chunk count) |
//!
//! # Request
//!
//! ```json
//! { "message": "What is your tech stack?",
//!   "history": [{ "role": "user", "content": "hi" }],
//!   "stream": false,
//!   "limit": 4 }
//! ```
//!
//! With `"stream": true` the response is `application/x-ndjson`, one JSON
//! object per line:
//!
//! ```text
//! {"type":"meta","citations":[...],"retrieved_count":3,"confidence":0.71,"coverage":0.8}
//! {"type":"delta","text":"I built"}
//! {"type":"delta","text":" a search service..."}
//! {"type":"done"}
//! ```
//!
//! A generation failure after the stream started is reported as
//! `{"type":"error","message":"..."}` and ends the stream.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `rate_limited` (429),
//! `upstream_error` (502), `generation_disabled` (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the widget can be
//! served from any static host.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::confidence::confidence;
use crate::config::Config;
use crate::index::{coverage, CandidateScores, CorpusIndex, QueryContext};
use crate::llm::{create_model, ChatMessage, ChatModel, GenerationDisabled, TextStream};
use crate::prompt::{build_messages, citations, Citation, EMPTY_ANSWER, NOT_FOUND_ANSWER};
use crate::rate_limit::SlidingWindowLimiter;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    /// Read-only corpus index, built once before the server starts.
    index: Arc<CorpusIndex>,
    model: Arc<dyn ChatModel>,
    limiter: Arc<SlidingWindowLimiter>,
}

impl AppState {
    pub fn new(config: &Config, index: Arc<CorpusIndex>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            limiter: Arc::new(SlidingWindowLimiter::from_config(&config.rate_limit)),
            config: Arc::new(config.clone()),
            index,
            model,
        }
    }
}

/// Starts the chat server with the model configured in `[llm]`.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config, index: Arc<CorpusIndex>) -> anyhow::Result<()> {
    if !config.llm.is_enabled() {
        tracing::warn!("generation is disabled; /chat will only answer not-found questions");
    }
    let model: Arc<dyn ChatModel> = Arc::from(create_model(&config.llm)?);
    run_server_with_model(config, index, model).await
}

/// Starts the chat server with an explicit [`ChatModel`].
pub async fn run_server_with_model(
    config: &Config,
    index: Arc<CorpusIndex>,
    model: Arc<dyn ChatModel>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    tracing::info!(
        chunks = index.len(),
        model = model.model_name(),
        "starting chat server"
    );

    let app = router(AppState::new(config, index, model));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Chat server listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Build the router. Must be served with connect info (`SocketAddr`).
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn rate_limited() -> AppError {
    AppError {
        status: StatusCode::TOO_MANY_REQUESTS,
        code: "rate_limited",
        message: "Too many requests. Please try again in a minute.".to_string(),
    }
}

/// Map a model failure to a status: disabled generation is a 503, anything
/// else is an upstream failure.
fn classify_model_error(err: &anyhow::Error) -> AppError {
    let msg = err.to_string();
    if err.downcast_ref::<GenerationDisabled>().is_some() {
        AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "generation_disabled",
            message: msg,
        }
    } else {
        AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "upstream_error",
            message: format!("LLM request failed: {}", msg),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chunks: state.index.len(),
    })
}

// ============ POST /chat ============

/// Validated body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// JSON response body for a non-streaming `POST /chat`.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub retrieved_count: usize,
    pub confidence: f64,
    pub coverage: f64,
    /// Per-chunk score breakdown, best first.
    pub sources: Vec<CandidateScores>,
}

/// One line of an NDJSON chat stream.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamEvent {
    Meta {
        citations: Vec<Citation>,
        retrieved_count: usize,
        confidence: f64,
        coverage: f64,
    },
    Delta {
        text: String,
    },
    Done,
    Error {
        message: String,
    },
}

fn ndjson_line(event: &StreamEvent) -> Bytes {
    let mut line = serde_json::to_vec(event).unwrap_or_else(|_| b"{\"type\":\"error\"}".to_vec());
    line.push(b'\n');
    Bytes::from(line)
}

fn ndjson_response(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

/// Client identity for rate limiting: first `X-Forwarded-For` hop, else the
/// peer address.
fn client_identity(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Everything a response needs, computed synchronously from the index.
struct Retrieval {
    messages: Vec<ChatMessage>,
    citations: Vec<Citation>,
    sources: Vec<CandidateScores>,
    confidence: f64,
    coverage: f64,
}

/// Handler for `POST /chat`.
async fn handle_chat(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<ChatRequestBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let request_id = Uuid::new_v4();
    let client = client_identity(&headers, peer);

    if !state.limiter.check(&client) {
        tracing::warn!(%request_id, %client, "rate limited");
        return Err(rate_limited());
    }

    let Json(body) = body.map_err(|rejection| bad_request(rejection.body_text()))?;

    let question = body.message.as_deref().unwrap_or("").trim().to_string();
    if question.is_empty() {
        return Err(bad_request("message is required"));
    }
    let max_chars = state.config.server.max_message_chars;
    if question.chars().count() > max_chars {
        return Err(bad_request(format!(
            "message is too long. Keep it under {} characters.",
            max_chars
        )));
    }

    let limit = body.limit.unwrap_or(state.config.retrieval.final_limit);
    if limit == 0 {
        return Err(bad_request("limit must be >= 1"));
    }

    let retrieval = retrieve(&state, &question, &body.history, limit);
    tracing::info!(
        %request_id,
        retrieved = retrieval.sources.len(),
        confidence = retrieval.confidence,
        coverage = retrieval.coverage,
        stream = body.stream,
        "chat request"
    );

    if retrieval.sources.is_empty() {
        return Ok(not_found_response(body.stream));
    }

    if body.stream {
        let text_stream = state.model.stream(&retrieval.messages).await.map_err(|e| {
            tracing::error!(%request_id, error = %e, "failed to start generation stream");
            classify_model_error(&e)
        })?;
        return Ok(stream_response(retrieval, text_stream, request_id));
    }

    let answer = state.model.complete(&retrieval.messages).await.map_err(|e| {
        tracing::error!(%request_id, error = %e, "generation failed");
        classify_model_error(&e)
    })?;
    let answer = if answer.trim().is_empty() {
        EMPTY_ANSWER.to_string()
    } else {
        answer
    };

    let response = ChatResponse {
        answer,
        retrieved_count: retrieval.sources.len(),
        citations: retrieval.citations,
        confidence: retrieval.confidence,
        coverage: retrieval.coverage,
        sources: retrieval.sources,
    };
    Ok(Json(response).into_response())
}

fn retrieve(state: &AppState, question: &str, history: &[ChatMessage], limit: usize) -> Retrieval {
    let query = QueryContext::new(question);
    let ranked = state.index.retrieve_with_context(&query, limit);
    let coverage = coverage(&query.tokens, &ranked);
    let server = &state.config.server;

    Retrieval {
        messages: build_messages(
            question,
            &ranked,
            history,
            server.history_turns,
            server.history_chars,
        ),
        citations: citations(&ranked),
        sources: ranked.iter().map(|c| c.scores()).collect(),
        confidence: confidence(&ranked, coverage),
        coverage,
    }
}

fn not_found_response(stream: bool) -> Response {
    if stream {
        let events = [
            StreamEvent::Meta {
                citations: Vec::new(),
                retrieved_count: 0,
                confidence: 0.0,
                coverage: 0.0,
            },
            StreamEvent::Delta {
                text: NOT_FOUND_ANSWER.to_string(),
            },
            StreamEvent::Done,
        ];
        let lines: Vec<Result<Bytes, Infallible>> = events.iter().map(|e| Ok(ndjson_line(e))).collect();
        return ndjson_response(Body::from_stream(futures::stream::iter(lines)));
    }

    Json(ChatResponse {
        answer: NOT_FOUND_ANSWER.to_string(),
        citations: Vec::new(),
        retrieved_count: 0,
        confidence: 0.0,
        coverage: 0.0,
        sources: Vec::new(),
    })
    .into_response()
}

/// Forward model output as NDJSON. Dropping the body (client disconnect)
/// drops `text_stream` and with it the upstream request.
fn stream_response(retrieval: Retrieval, mut text_stream: TextStream, request_id: Uuid) -> Response {
    let meta = StreamEvent::Meta {
        retrieved_count: retrieval.sources.len(),
        citations: retrieval.citations,
        confidence: retrieval.confidence,
        coverage: retrieval.coverage,
    };

    let body_stream = stream! {
        yield Ok::<Bytes, Infallible>(ndjson_line(&meta));

        let mut produced = false;
        let mut failed = false;
        while let Some(item) = text_stream.next().await {
            match item {
                Ok(text) => {
                    produced = true;
                    yield Ok(ndjson_line(&StreamEvent::Delta { text }));
                }
                Err(e) => {
                    tracing::error!(%request_id, error = %e, "generation stream failed");
                    failed = true;
                    yield Ok(ndjson_line(&StreamEvent::Error {
                        message: format!("LLM request failed: {}", e),
                    }));
                    break;
                }
            }
        }

        if !failed {
            if !produced {
                yield Ok(ndjson_line(&StreamEvent::Delta { text: EMPTY_ANSWER.to_string() }));
            }
            yield Ok(ndjson_line(&StreamEvent::Done));
        }
    };

    ndjson_response(Body::from_stream(body_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_identity_prefers_forwarded_for() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers, peer), "10.0.0.9");

        headers.insert("x-forwarded-for", " 203.0.113.7 , 10.0.0.1".parse().unwrap());
        assert_eq!(client_identity(&headers, peer), "203.0.113.7");

        headers.insert("x-forwarded-for", "".parse().unwrap());
        assert_eq!(client_identity(&headers, peer), "10.0.0.9");
    }

    #[test]
    fn test_stream_event_shapes() {
        let done = String::from_utf8(ndjson_line(&StreamEvent::Done).to_vec()).unwrap();
        assert_eq!(done, "{\"type\":\"done\"}\n");

        let delta = ndjson_line(&StreamEvent::Delta {
            text: "hi".to_string(),
        });
        let value: serde_json::Value = serde_json::from_slice(&delta).unwrap();
        assert_eq!(value["type"], "delta");
        assert_eq!(value["text"], "hi");
    }

    #[test]
    fn test_classify_model_error() {
        let disabled = classify_model_error(&anyhow::Error::new(GenerationDisabled));
        assert_eq!(disabled.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(disabled.code, "generation_disabled");
        let upstream = classify_model_error(&anyhow::anyhow!("LLM API error 500"));
        assert_eq!(upstream.status, StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.code, "upstream_error");
    }

    #[test]
    fn test_upstream_error_mentioning_disabled_is_502() {
        let err = anyhow::anyhow!(
            "LLM API error 403 Forbidden: {{\"error\":{{\"message\":\"This organization has been disabled.\"}}}}"
        );
        let classified = classify_model_error(&err);
        assert_eq!(classified.status, StatusCode::BAD_GATEWAY);
        assert_eq!(classified.code, "upstream_error");

        // Context added on top keeps the disabled classification.
        let wrapped = anyhow::Error::new(GenerationDisabled).context("generation failed");
        assert_eq!(classify_model_error(&wrapped).status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_request_body_defaults() {
        let body: ChatRequestBody = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(body.message.as_deref(), Some("hi"));
        assert!(body.history.is_empty());
        assert!(!body.stream);
        assert!(body.limit.is_none());
    }
}
