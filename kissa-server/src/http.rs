//! Kissa HTTP API
//!
//! Axum-based HTTP server exposing the guided conversation and the
//! administrative transcript export.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`, so the behaviour is testable
//! without axum dispatch.
//!
//! Endpoints:
//! - GET  /              - landing page
//! - POST /chat          - process one message `{name, message}`
//! - GET  /conversations - all archived transcripts (`?token=` admin secret)
//! - GET  /health        - health check with DB status
//! - GET  /version       - server version info

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use kissa_core::{KissaConfig, END_OF_CONVERSATION};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::subsystems::archive::ConversationArchive;
use crate::subsystems::ledger::{LedgerError, TurnLedger};

const LANDING_TEMPLATE: &str = include_str!("../templates/index.html");

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub ledger: Arc<TurnLedger>,
    pub archive: ConversationArchive,
    pub config: KissaConfig,
    pub admin_token: Option<String>,
    pub landing_page: String,
}

impl HttpState {
    pub fn new(
        ledger: Arc<TurnLedger>,
        archive: ConversationArchive,
        config: KissaConfig,
    ) -> Result<Self> {
        let admin_token = config.admin.resolve_token();
        if admin_token.is_none() {
            tracing::warn!("No admin token configured; /conversations will refuse every request");
        }
        let landing_page = render_landing_page(&config)?;

        Ok(Self {
            ledger,
            archive,
            config,
            admin_token,
            landing_page,
        })
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(landing_handler))
        .route("/chat", post(chat_handler))
        .route("/conversations", get(conversations_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(state: HttpState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Kissa HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

pub fn render_landing_page(config: &KissaConfig) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("index.html", LANDING_TEMPLATE)?;
    env.get_template("index.html")?.render(context! {
        title => "Kissa",
        turn_limit => config.conversation.turn_limit,
        sentinel => END_OF_CONVERSATION,
    })
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub ended: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct ConversationsQuery {
    pub token: Option<String>,
}

fn error_body(msg: &str) -> serde_json::Value {
    serde_json::json!({
        "error": msg,
        "status": "error",
    })
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner chat: runs one turn through the ledger.
pub async fn chat_inner(ledger: &TurnLedger, req: ChatRequest) -> (StatusCode, serde_json::Value) {
    if req.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_body("name field is required"));
    }

    match ledger.process_message(&req.name, &req.message).await {
        Ok(outcome) => {
            let body = ChatResponse {
                response: outcome.reply,
                ended: outcome.ended,
            };
            (
                StatusCode::OK,
                serde_json::to_value(body).unwrap_or_else(|_| serde_json::json!({})),
            )
        }
        Err(LedgerError::Engine(e)) => {
            tracing::error!(subject = %req.name, error = %e, "Engine call failed");
            (
                StatusCode::BAD_GATEWAY,
                error_body("The conversation service is temporarily unavailable"),
            )
        }
        Err(LedgerError::Archive(e)) => {
            tracing::error!(subject = %req.name, error = %e, "Archival failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("The conversation could not be saved"),
            )
        }
    }
}

/// Inner conversations: exact-match token check, then the full archive.
pub async fn conversations_inner(
    archive: &ConversationArchive,
    admin_token: Option<&str>,
    provided: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let authorized = matches!((admin_token, provided), (Some(expected), Some(given)) if expected == given);
    if !authorized {
        tracing::warn!("Rejected /conversations request with invalid token");
        return (
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": "Unauthorized" }),
        );
    }

    match archive.list_conversations().await {
        Ok(conversations) => (
            StatusCode::OK,
            serde_json::to_value(conversations).unwrap_or_else(|_| serde_json::json!([])),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read archived conversations");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("Failed to read archived conversations"),
            )
        }
    }
}

/// Inner health check: queries DB and returns (status_code, json_body).
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let sqlite_ver = match kissa_core::db::health_check(state.archive.pool()).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            );
        }
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "sqlite": sqlite_ver,
            "active_sessions": state.ledger.active_sessions().await,
            "turn_limit": state.ledger.turn_limit(),
        }),
    )
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "kissa",
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn landing_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Html(state.landing_page.clone())
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let (status, body) = chat_inner(&state.ledger, req).await;
    (status, Json(body))
}

pub async fn conversations_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<ConversationsQuery>,
) -> impl IntoResponse {
    let (status, body) = conversations_inner(
        &state.archive,
        state.admin_token.as_deref(),
        query.token.as_deref(),
    )
    .await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================
