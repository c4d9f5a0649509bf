//! Companion-client WebSocket handler and broadcast hub.
//!
//! The hub keeps the set of live companion connections and fans call
//! events out to all of them; each connection also gets a request/response
//! command channel for history, credentials, recent conversations, and the
//! standalone text-chat path.

use crate::{chat, lifecycle, AppState};
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use voicebridge_store::SessionDocument;

/// Per-connection outbound buffer. Beyond this the client is too slow and
/// messages are dropped.
const CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Default and maximum result counts for `get_recent_conversations`.
const DEFAULT_RECENT_LIMIT: usize = 5;
const MAX_RECENT_LIMIT: usize = 50;

/// Live credentials for one in-progress session, shown to operators.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveSessionInfo {
    pub session_id: String,
    pub phone_number: String,
    pub username: String,
    pub passcode: String,
}

/// Server-to-client events, tagged by `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    ConnectionEstablished {
        timestamp: String,
        message: String,
    },
    ActiveSessions {
        sessions: Vec<ActiveSessionInfo>,
        timestamp: String,
    },
    SessionStarted {
        session_id: String,
        phone_number: String,
        username: String,
        passcode: String,
        timestamp: String,
    },
    SessionCompleted {
        session_id: String,
        timestamp: String,
    },
    Transcription {
        text: String,
        is_final: bool,
        timestamp: String,
    },
    AgentResponse {
        text: String,
        timestamp: String,
    },
    FunctionCall {
        function_name: String,
        parameters: Value,
        result: Value,
        timestamp: String,
    },
    History {
        history: SessionDocument,
    },
    HistoryError {
        message: String,
    },
    RecentConversations {
        conversations: Vec<SessionDocument>,
    },
    RecentConversationsError {
        message: String,
    },
    CredentialsUpdated {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: String,
    },
    CredentialsError {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: String,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Client-to-server commands, tagged by `command`. Older clients use the
/// `get_history`/`set_credentials` names, newer ones
/// `fetch_history`/`update_credentials`; both are accepted.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    #[serde(alias = "fetch_history")]
    GetHistory {
        #[serde(default)]
        phone_number: Option<String>,
        #[serde(default)]
        passcode: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(alias = "update_credentials")]
    SetCredentials {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        passcode: Option<String>,
    },
    GetRecentConversations {
        #[serde(default)]
        limit: Option<usize>,
    },
    Ping,
}

/// The `user_message` event rides on an `event` tag instead of `command`,
/// matching what the companion app sends for text chat.
#[derive(Debug, Deserialize)]
struct UserMessageEvent {
    event: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// Maintains the set of live companion connections.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    clients: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, returning its membership id.
    pub async fn register(&self, sender: mpsc::Sender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.write().await.insert(id, sender);
        id
    }

    /// Removes a connection.
    pub async fn unregister(&self, id: Uuid) {
        self.clients.write().await.remove(&id);
    }

    /// Number of live connections.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Fans a serialized event out to every member.
    ///
    /// Delivery iterates a snapshot of the membership map, so concurrent
    /// registration never blocks or skews a broadcast in flight. Members
    /// whose channel has closed are pruned afterwards; a full channel only
    /// drops that one message.
    pub async fn broadcast(&self, message_json: String) {
        let snapshot: Vec<(Uuid, mpsc::Sender<String>)> = {
            let clients = self.clients.read().await;
            clients.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut closed = Vec::new();
        for (id, sender) in snapshot {
            match sender.try_send(message_json.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(client_id = %id, "dropping broadcast for slow companion client");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(id);
                }
            }
        }

        if !closed.is_empty() {
            let mut clients = self.clients.write().await;
            for id in &closed {
                clients.remove(id);
            }
            tracing::info!(pruned = closed.len(), "removed disconnected companion clients");
        }
    }

    /// Serializes and broadcasts an event.
    pub async fn broadcast_event(&self, event: &ClientEvent) {
        match serde_json::to_string(event) {
            Ok(json) => self.broadcast(json).await,
            Err(e) => tracing::error!("failed to serialize broadcast event: {}", e),
        }
    }
}

/// Sends an event to one connection's outbound channel.
fn send_event(tx: &mpsc::Sender<String>, event: &ClientEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to send event to companion client: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize companion client event: {}", e);
        }
    }
}

/// WebSocket handler for companion clients: `GET /ws`.
pub async fn client_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client_socket(socket, state))
}

async fn handle_client_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_CHANNEL_CAPACITY);
    let client_id = state.hub.register(tx.clone()).await;
    let client_total = state.hub.client_count().await;
    tracing::info!(
        client_id = %client_id,
        total = client_total,
        "companion client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    send_event(
        &tx,
        &ClientEvent::ConnectionEstablished {
            timestamp: Utc::now().to_rfc3339(),
            message: "Connected to Voicebridge".to_string(),
        },
    );

    // A newly connected operator should see the calls already in flight.
    let sessions = lifecycle::active_session_snapshot(&state);
    if !sessions.is_empty() {
        send_event(
            &tx,
            &ClientEvent::ActiveSessions {
                sessions,
                timestamp: Utc::now().to_rfc3339(),
            },
        );
    }

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                handle_client_payload(&text, &tx, &state).await;
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    state.hub.unregister(client_id).await;
    send_task.abort();
    let client_total = state.hub.client_count().await;
    tracing::info!(
        client_id = %client_id,
        total = client_total,
        "companion client disconnected"
    );
}

async fn handle_client_payload(text: &str, tx: &mpsc::Sender<String>, state: &Arc<AppState>) {
    if let Ok(command) = serde_json::from_str::<ClientCommand>(text) {
        match command {
            ClientCommand::GetHistory {
                phone_number,
                passcode,
                session_id,
            } => handle_get_history(tx, state, phone_number, passcode, session_id).await,
            ClientCommand::SetCredentials {
                session_id,
                username,
                passcode,
            } => handle_set_credentials(tx, state, session_id, username, passcode).await,
            ClientCommand::GetRecentConversations { limit } => {
                handle_recent_conversations(tx, state, limit).await
            }
            ClientCommand::Ping => send_event(tx, &ClientEvent::Pong),
        }
        return;
    }

    if let Ok(user) = serde_json::from_str::<UserMessageEvent>(text) {
        if user.event == "user_message" {
            chat::handle_user_message(state, &user.message, user.session_id.as_deref()).await;
            return;
        }
    }

    tracing::warn!("failed to parse companion client payload");
    send_event(
        tx,
        &ClientEvent::Error {
            message: "invalid message format".to_string(),
        },
    );
}

/// The one history error shape. Unknown phone numbers, wrong passcodes,
/// and internal lookup failures all produce this exact event, so a caller
/// probing the command cannot enumerate accounts.
fn generic_history_error() -> ClientEvent {
    ClientEvent::HistoryError {
        message: "No matching conversation found".to_string(),
    }
}

async fn handle_get_history(
    tx: &mpsc::Sender<String>,
    state: &Arc<AppState>,
    phone_number: Option<String>,
    passcode: Option<String>,
    session_id: Option<String>,
) {
    let (Some(phone_number), Some(passcode)) = (phone_number, passcode) else {
        send_event(
            tx,
            &ClientEvent::HistoryError {
                message: "phone_number and passcode are required".to_string(),
            },
        );
        return;
    };

    let passcode_hash = voicebridge_store::hash_passcode(&passcode);
    let pool = state.pool.clone();

    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        voicebridge_store::find_history(
            &conn,
            &phone_number,
            &passcode_hash,
            session_id.as_deref(),
        )
        .map_err(|e| e.to_string())
    })
    .await;

    match result {
        Ok(Ok(Some(history))) => send_event(tx, &ClientEvent::History { history }),
        Ok(Ok(None)) => send_event(tx, &generic_history_error()),
        Ok(Err(e)) => {
            tracing::error!("history lookup failed: {}", e);
            send_event(tx, &generic_history_error());
        }
        Err(e) => {
            tracing::error!("history lookup task failed: {}", e);
            send_event(tx, &generic_history_error());
        }
    }
}

async fn handle_set_credentials(
    tx: &mpsc::Sender<String>,
    state: &Arc<AppState>,
    session_id: Option<String>,
    username: Option<String>,
    passcode: Option<String>,
) {
    let Some(session_id) = session_id else {
        send_event(
            tx,
            &ClientEvent::CredentialsError {
                session_id: None,
                message: "session_id is required".to_string(),
            },
        );
        return;
    };

    match lifecycle::update_credentials(state, &session_id, username, passcode).await {
        Ok(()) => send_event(
            tx,
            &ClientEvent::CredentialsUpdated {
                session_id: Some(session_id),
                message: "Credentials updated".to_string(),
            },
        ),
        Err(lifecycle::LifecycleError::SessionNotFound(_)) => send_event(
            tx,
            &ClientEvent::CredentialsError {
                session_id: Some(session_id),
                message: "Session not found".to_string(),
            },
        ),
        Err(lifecycle::LifecycleError::Persistence(e)) => {
            tracing::error!(session_id = %session_id, "credential update failed: {}", e);
            send_event(
                tx,
                &ClientEvent::CredentialsError {
                    session_id: Some(session_id),
                    message: "Failed to update credentials".to_string(),
                },
            );
        }
    }
}

async fn handle_recent_conversations(
    tx: &mpsc::Sender<String>,
    state: &Arc<AppState>,
    limit: Option<usize>,
) {
    let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_RECENT_LIMIT);
    let pool = state.pool.clone();

    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        voicebridge_store::recent_sessions(&conn, limit).map_err(|e| e.to_string())
    })
    .await;

    match result {
        Ok(Ok(conversations)) if !conversations.is_empty() => {
            send_event(tx, &ClientEvent::RecentConversations { conversations });
        }
        Ok(Ok(_)) => send_event(
            tx,
            &ClientEvent::RecentConversationsError {
                message: "No recent conversations found".to_string(),
            },
        ),
        Ok(Err(e)) => {
            tracing::error!("recent conversations lookup failed: {}", e);
            send_event(
                tx,
                &ClientEvent::RecentConversationsError {
                    message: "No recent conversations found".to_string(),
                },
            );
        }
        Err(e) => {
            tracing::error!("recent conversations task failed: {}", e);
            send_event(
                tx,
                &ClientEvent::RecentConversationsError {
                    message: "No recent conversations found".to_string(),
                },
            );
        }
    }
}
