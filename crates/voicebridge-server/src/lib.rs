//! Voicebridge server library logic.
//!
//! Two axum listeners share one [`AppState`]: the telephony listener
//! accepts the media stream of a live call and relays it to the voice
//! agent, while the client listener serves companion clients through the
//! broadcast hub.

pub mod chat;
pub mod config;
pub mod hub;
pub mod lifecycle;
pub mod recorder;
pub mod telephony;

use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use voicebridge_agent::AgentConfig;
use voicebridge_db::DbPool;
use voicebridge_functions::FunctionRegistry;

/// Application state shared across all call and client handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Broadcast hub for companion clients.
    pub hub: hub::BroadcastHub,
    /// In-memory metadata (including plaintext passcodes) for sessions
    /// whose calls are currently live. Never persisted.
    pub active_sessions: lifecycle::ActiveSessions,
    /// Agent service connection settings.
    pub agent: Arc<AgentConfig>,
    /// Function dispatch table.
    pub functions: Arc<FunctionRegistry>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the telephony listener router.
pub fn telephony_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/call", get(telephony::call_handler))
        .layer(Extension(state))
}

/// Builds the companion-client listener router.
pub fn client_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(hub::client_ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(state))
}

impl AppState {
    /// Builds a state around an existing pool with an inert agent config.
    /// Used by tests; `main` assembles the real thing from loaded config.
    pub fn for_tests(pool: DbPool) -> Arc<Self> {
        use voicebridge_functions::{MemoryAppointmentStore, MemoryOrderStore};

        Arc::new(Self {
            pool,
            hub: hub::BroadcastHub::new(),
            active_sessions: lifecycle::ActiveSessions::default(),
            agent: Arc::new(AgentConfig {
                url: "ws://127.0.0.1:0/agent".to_string(),
                api_key: "test-key".to_string(),
                settings: json!({"type": "Settings"}),
            }),
            functions: Arc::new(FunctionRegistry::with_default_handlers(
                Arc::new(MemoryAppointmentStore::new()),
                Arc::new(MemoryOrderStore::new()),
            )),
        })
    }
}
