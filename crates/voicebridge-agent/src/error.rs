use thiserror::Error;

/// Errors from the agent connection.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The WebSocket connection failed or dropped.
    #[error("agent transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The configured endpoint or credential could not form a valid
    /// connection request.
    #[error("invalid agent connection request: {0}")]
    Request(String),

    /// The agent settings payload could not be serialized.
    #[error("agent settings serialization failed: {0}")]
    Settings(#[from] serde_json::Error),
}
