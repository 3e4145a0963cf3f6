//! `/api/chat` relay: streams Anthropic answers to chat clients as
//! `data: ` lines.

use crate::agent::{Agent, AgentConfig};
use crate::ai_sdk::{chat_event, decode_line};
use crate::error::ChatError;
use crate::protocol::{StreamEvent, WireMessage};
use crate::stream::LineBuffer;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_SYSTEM_PROMPT: &str = "Du är en hjälpsam assistent. Svara på svenska.";

pub struct ServerConfig {
    pub listen: String,
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
}

struct ServerState {
    agent: Option<Arc<Agent>>,
    default_system_prompt: String,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!(listen = %config.listen, model = %config.model, "loopdesk chat relay listening");
    axum::serve(listener, router(config)).await?;
    Ok(())
}

pub fn router(config: ServerConfig) -> axum::Router {
    let agent = match config.api_key.filter(|key| !key.trim().is_empty()) {
        Some(api_key) => Some(Arc::new(Agent::new(AgentConfig {
            api_key: api_key.trim().to_string(),
            api_url: config.api_url,
            model: config.model,
            max_tokens: config.max_tokens,
        }))),
        None => {
            tracing::warn!("ANTHROPIC_API_KEY not set, chat requests will be rejected");
            None
        }
    };

    let state = Arc::new(ServerState {
        agent,
        default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
    });

    axum::Router::new()
        .route("/api/chat", post(chat))
        .with_state(state)
}

async fn chat(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(%err, "unreadable chat request body");
            return json_error_with_details(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process chat request",
                &err.to_string(),
            );
        }
    };

    let Some(messages) = body.get("messages").filter(|messages| messages.is_array()) else {
        return json_error(StatusCode::BAD_REQUEST, "Messages array is required");
    };
    let messages: Vec<WireMessage> = match serde_json::from_value(messages.clone()) {
        Ok(messages) => messages,
        Err(err) => {
            return json_error_with_details(
                StatusCode::BAD_REQUEST,
                "Each message needs a role of \"user\" or \"assistant\" and string content",
                &err.to_string(),
            );
        }
    };

    let Some(agent) = state.agent.as_ref().map(Arc::clone) else {
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ANTHROPIC_API_KEY not configured",
        );
    };

    let system = body
        .get("systemPrompt")
        .and_then(Value::as_str)
        .filter(|prompt| !prompt.is_empty())
        .map_or_else(|| state.default_system_prompt.clone(), str::to_owned);

    tracing::info!(messages = messages.len(), model = agent.model(), "chat request");

    let (events, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        match agent.stream_inference(system, &messages).await {
            Ok(response) => relay(response.bytes_stream(), &events).await,
            Err(err) => {
                tracing::error!(%err, "upstream request failed");
                let _ = events.send(StreamEvent::Error(err.to_string())).await;
            }
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|event| Ok::<Event, Infallible>(Event::default().data(event.to_payload())));

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

/// Forwards upstream events until the upstream ends, reports an error, or the
/// client goes away.
async fn relay<S, B, E>(upstream: S, events: &mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ChatError>,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut lines = LineBuffer::default();
    let mut pending = Vec::new();

    while let Some(chunk) = upstream.next().await {
        match chunk {
            Ok(chunk) => lines.push(chunk.as_ref(), |line| {
                pending.extend(decode_line(line).and_then(chat_event));
            }),
            Err(err) => {
                let err: ChatError = err.into();
                tracing::error!(%err, "upstream stream broke off");
                pending.push(StreamEvent::Error(err.to_string()));
            }
        }

        if !forward(&mut pending, events).await {
            return;
        }
    }

    lines.finish(|line| pending.extend(decode_line(line).and_then(chat_event)));
    forward(&mut pending, events).await;
}

/// Sends queued events in order. Returns `false` once the relay should stop.
async fn forward(pending: &mut Vec<StreamEvent>, events: &mpsc::Sender<StreamEvent>) -> bool {
    for event in pending.drain(..) {
        let failed = matches!(event, StreamEvent::Error(_));
        if events.send(event).await.is_err() {
            tracing::debug!("chat client disconnected");
            return false;
        }
        if failed {
            return false;
        }
    }
    true
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn json_error_with_details(status: StatusCode, message: &str, details: &str) -> Response {
    (status, Json(json!({ "error": message, "details": details }))).into_response()
}
