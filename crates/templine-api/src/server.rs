//! HTTP server: router, shared state and lifecycle.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

use templine_core::ServerConfig;

use crate::assistant::Assistant;
use crate::relay::{relay_handler, RELAY_PATH};
use crate::session::SessionRegistry;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(assistant: Assistant) -> Self {
        Self {
            assistant: Arc::new(assistant),
            sessions: SessionRegistry::new(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(RELAY_PATH, get(relay_handler))
        .with_state(state)
}

/// Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": "templine",
        "version": env!("CARGO_PKG_VERSION"),
        "pending_requests": state.assistant.readings().registry().pending_count(),
        "active_sessions": state.sessions.active_count(),
    }))
}

/// Bind `config.bind_addr()` and serve until `shutdown` completes.
pub async fn serve<F>(config: &ServerConfig, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind = config.bind_addr();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    serve_on(listener, state, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_on<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Templine server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
