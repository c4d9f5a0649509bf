//! Voicebridge server binary.
//!
//! Starts two axum listeners — one accepting the telephony media stream,
//! one serving companion clients — with structured logging, database
//! initialization, and graceful shutdown on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use voicebridge_agent::AgentConfig;
use voicebridge_functions::{FunctionRegistry, MemoryAppointmentStore, MemoryOrderStore};
use voicebridge_server::{client_app, config, hub::BroadcastHub, telephony_app, AppState};

/// Config file location: first CLI argument, then `VOICEBRIDGE_CONFIG_PATH`,
/// then `config.toml` beside the binary (which may be absent — defaults and
/// env overrides then carry the whole configuration).
fn config_path() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VOICEBRIDGE_CONFIG_PATH").ok())
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "config.toml".to_string())
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let path = config_path();
    let config = config::load_config(Some(&path))
        .expect("failed to load configuration — the server cannot start without valid config");

    init_tracing(&config.logging);
    tracing::info!(path = %path, "configuration loaded");

    // The agent credential and settings are required; without them every
    // call would fail at connect, so refuse to start instead.
    assert!(
        !config.agent.url.trim().is_empty(),
        "agent.url is not configured — set it in config or VOICEBRIDGE_AGENT_URL"
    );
    assert!(
        !config.agent.api_key.trim().is_empty(),
        "agent.api_key is not configured — set it in config or VOICEBRIDGE_AGENT_API_KEY"
    );

    let settings_raw = std::fs::read_to_string(&config.agent.settings_path).unwrap_or_else(|e| {
        panic!(
            "failed to read agent settings file '{}': {}",
            config.agent.settings_path, e
        )
    });
    let agent_settings: serde_json::Value =
        serde_json::from_str(&settings_raw).expect("agent settings file is not valid JSON");

    let pool = voicebridge_db::open_pool(
        &config.database.path,
        voicebridge_db::PoolSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool.get().expect("failed to get database connection for migrations");
        let applied =
            voicebridge_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let state = Arc::new(AppState {
        pool,
        hub: BroadcastHub::new(),
        active_sessions: Default::default(),
        agent: Arc::new(AgentConfig {
            url: config.agent.url.clone(),
            api_key: config.agent.api_key.clone(),
            settings: agent_settings,
        }),
        functions: Arc::new(FunctionRegistry::with_default_handlers(
            Arc::new(MemoryAppointmentStore::new()),
            Arc::new(MemoryOrderStore::new()),
        )),
    });

    let telephony_addr = SocketAddr::new(config.server.host, config.server.telephony_port);
    let client_addr = SocketAddr::new(config.server.host, config.server.client_port);

    let telephony_listener = TcpListener::bind(telephony_addr)
        .await
        .expect("failed to bind telephony listener — is another process using this port?");
    let client_listener = TcpListener::bind(client_addr)
        .await
        .expect("failed to bind client listener — is another process using this port?");

    tracing::info!(%telephony_addr, %client_addr, "voicebridge server started");

    let telephony_server = axum::serve(telephony_listener, telephony_app(state.clone()))
        .with_graceful_shutdown(shutdown_signal());
    let client_server = axum::serve(client_listener, client_app(state))
        .with_graceful_shutdown(shutdown_signal());

    let (telephony_result, client_result) = tokio::join!(telephony_server, client_server);
    telephony_result.expect("telephony server error");
    client_result.expect("client server error");

    tracing::info!("voicebridge server shut down");
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.expect("failed to install Ctrl+C handler");
            tracing::info!("received SIGINT, shutting down");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
