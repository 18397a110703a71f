//! HTTP gateway for Ponder.
//!
//! `POST /chat` runs one agent turn and streams its events back as
//! newline-delimited JSON, one record per line, as they are produced.
//! `GET /health` reports liveness.
//!
//! Built on Axum.

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{
    Router,
    extract::State,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use ponder_agent::{AgentLoop, OutputEvent};
use ponder_config::AppConfig;
use ponder_core::event::EventBus;
use ponder_core::session::SessionId;

const NDJSON: &str = "application/x-ndjson";
const SESSION_HEADER: &str = "x-session-id";
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the gateway.
///
/// Startup failures are kept rather than fatal: the server still answers,
/// and every chat request reports why the agent is unavailable.
pub struct GatewayState {
    agent: Result<Arc<AgentLoop>, String>,
}

type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn ready(agent: Arc<AgentLoop>) -> Self {
        Self { agent: Ok(agent) }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            agent: Err(reason.into()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match AgentLoop::from_config(config) {
            Ok(agent) => Self::ready(Arc::new(agent)),
            Err(e) => {
                error!(error = %e, "Agent initialization failed; /chat will report errors");
                Self::failed(e.to_string())
            }
        }
    }

    pub fn agent(&self) -> Option<&Arc<AgentLoop>> {
        self.agent.as_ref().ok()
    }
}

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - Permissive CORS (browser clients on any origin)
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = Arc::new(GatewayState::from_config(&config));
    if let Some(agent) = state.agent() {
        spawn_event_logger(agent.event_bus());
        info!(provider = agent.provider_name(), model = agent.model(), "Agent ready");
    }

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Log every domain event at debug level.
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(kind = event.kind(), event = ?event, "Domain event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    agent_ready: bool,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        agent_ready: state.agent().is_some(),
    })
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    /// Omitted: a fresh session is started and its id returned in a header
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// `POST /chat`: run one turn and stream its events as NDJSON.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let session_id = match payload.session_id.as_deref() {
        Some(raw) => SessionId::parse(raw).map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: e.to_string() }),
            )
        })?,
        None => SessionId::new(),
    };

    info!(session_id = %session_id, "Chat request");

    let rx = match &state.agent {
        Ok(agent) => agent.clone().run_turn(session_id.clone(), payload.message),
        Err(reason) => {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.try_send(OutputEvent::Error(format!("Agent not initialized: {reason}")));
            rx
        }
    };

    let body = Body::from_stream(ReceiverStream::new(rx).map(|event| event.to_ndjson_line()));

    let mut response = ([(header::CONTENT_TYPE, NDJSON)], body).into_response();
    if let Ok(value) = HeaderValue::from_str(session_id.as_str()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    Ok(response)
}
