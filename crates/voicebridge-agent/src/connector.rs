//! Outbound connection to the agent service.

use crate::error::AgentError;
use futures_util::SinkExt;
use std::fmt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The duplex stream to the agent service.
pub type AgentStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for the agent service.
#[derive(Clone)]
pub struct AgentConfig {
    /// WebSocket endpoint of the agent service.
    pub url: String,
    /// Service credential, sent as the second WebSocket subprotocol.
    pub api_key: String,
    /// Agent session settings, sent as the first text frame after connect
    /// (voice, model, and function definitions — opaque to the bridge).
    pub settings: serde_json::Value,
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Dials the agent service and performs the session handshake.
///
/// Authentication rides on the `Sec-WebSocket-Protocol: token, <api_key>`
/// subprotocol pair; the settings payload is sent as the first frame so the
/// agent knows how to run the session before any audio arrives.
pub async fn connect(config: &AgentConfig) -> Result<AgentStream, AgentError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| AgentError::Request(e.to_string()))?;

    let protocols = format!("token, {}", config.api_key);
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_str(&protocols)
            .map_err(|e| AgentError::Request(format!("invalid credential header: {e}")))?,
    );

    tracing::debug!(url = %config.url, "connecting to agent service");
    let (mut stream, _response) = connect_async(request).await?;

    let settings = serde_json::to_string(&config.settings)?;
    stream.send(Message::Text(settings.into())).await?;
    tracing::info!(url = %config.url, "agent session established");

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_the_credential() {
        let config = AgentConfig {
            url: "wss://agent.example/v1/converse".to_string(),
            api_key: "super-secret".to_string(),
            settings: serde_json::json!({"type": "Settings"}),
        };

        let rendered = format!("{config:?}");
        assert!(rendered.contains("wss://agent.example/v1/converse"));
        assert!(!rendered.contains("super-secret"));
    }
}
