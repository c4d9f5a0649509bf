//! Conversation recording: live broadcast plus persistence dispatch.
//!
//! Every recorded event is pushed to companion clients immediately; the
//! database write is spawned onto the blocking pool and never awaited on
//! the audio-critical path. A failed write means the call continues with
//! no history, which is the intended degraded mode.

use crate::hub::ClientEvent;
use crate::AppState;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use voicebridge_store::{BufferedMessage, NewFunctionCall, NewMessage};
use voicebridge_types::{MessageKind, MessageRole};

/// Records a caller transcription (final or the barge-in placeholder).
pub async fn transcription(
    state: &Arc<AppState>,
    session_id: Option<&str>,
    text: &str,
    is_final: bool,
) {
    let now = Utc::now();
    state
        .hub
        .broadcast_event(&ClientEvent::Transcription {
            text: text.to_string(),
            is_final,
            timestamp: now.to_rfc3339(),
        })
        .await;

    if let Some(session_id) = session_id {
        spawn_append_message(
            state.clone(),
            session_id.to_string(),
            NewMessage {
                role: MessageRole::User,
                kind: MessageKind::Transcription,
                text: text.to_string(),
                is_final: Some(is_final),
                timestamp: now,
            },
        );
    }
}

/// Records a spoken (or text-chat) agent response.
pub async fn agent_response(state: &Arc<AppState>, session_id: Option<&str>, text: &str) {
    let now = Utc::now();
    state
        .hub
        .broadcast_event(&ClientEvent::AgentResponse {
            text: text.to_string(),
            timestamp: now.to_rfc3339(),
        })
        .await;

    if let Some(session_id) = session_id {
        spawn_append_message(
            state.clone(),
            session_id.to_string(),
            NewMessage {
                role: MessageRole::Assistant,
                kind: MessageKind::AgentResponse,
                text: text.to_string(),
                is_final: None,
                timestamp: now,
            },
        );
    }
}

/// Records a typed message from the standalone text-chat path. Persisted
/// only — the client that typed it does not need it echoed back.
pub async fn user_text_message(state: &Arc<AppState>, session_id: Option<&str>, text: &str) {
    if let Some(session_id) = session_id {
        spawn_append_message(
            state.clone(),
            session_id.to_string(),
            NewMessage {
                role: MessageRole::User,
                kind: MessageKind::TextMessage,
                text: text.to_string(),
                is_final: None,
                timestamp: Utc::now(),
            },
        );
    }
}

/// Records an executed function call.
pub async fn function_call(
    state: &Arc<AppState>,
    session_id: Option<&str>,
    name: &str,
    parameters: Value,
    result: Value,
) {
    let now = Utc::now();
    state
        .hub
        .broadcast_event(&ClientEvent::FunctionCall {
            function_name: name.to_string(),
            parameters: parameters.clone(),
            result: result.clone(),
            timestamp: now.to_rfc3339(),
        })
        .await;

    if let Some(session_id) = session_id {
        let state = state.clone();
        let session_id = session_id.to_string();
        let record = NewFunctionCall {
            name: name.to_string(),
            parameters,
            result,
            timestamp: now,
        };
        tokio::spawn(async move {
            let pool = state.pool.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let conn = pool.get().map_err(|e| e.to_string())?;
                voicebridge_store::append_function_call(&conn, &session_id, &record)
                    .map_err(|e| e.to_string())
            })
            .await;
            log_persist_outcome("function call", outcome);
        });
    }
}

/// Bulk-persists the conversation text buffered during a call. Runs at
/// teardown, off the relay loops, and is awaited so the flush lands before
/// the call handler returns.
pub async fn flush_conversation(
    state: &Arc<AppState>,
    session_id: &str,
    entries: Vec<BufferedMessage>,
) {
    if entries.is_empty() {
        return;
    }

    let count = entries.len();
    let pool = state.pool.clone();
    let sid = session_id.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        voicebridge_store::flush_messages(&conn, &sid, &entries, Utc::now())
            .map_err(|e| e.to_string())
    })
    .await;

    match outcome {
        Ok(Ok(written)) => {
            tracing::info!(session_id = %session_id, count = written, "flushed conversation buffer")
        }
        Ok(Err(e)) => {
            tracing::warn!(session_id = %session_id, count, "failed to flush conversation buffer: {}", e)
        }
        Err(e) => tracing::warn!(session_id = %session_id, "conversation flush task failed: {}", e),
    }
}

fn spawn_append_message(state: Arc<AppState>, session_id: String, message: NewMessage) {
    tokio::spawn(async move {
        let pool = state.pool.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            voicebridge_store::append_message(&conn, &session_id, &message)
                .map_err(|e| e.to_string())
        })
        .await;
        log_persist_outcome("message", outcome);
    });
}

fn log_persist_outcome(what: &str, outcome: Result<Result<(), String>, tokio::task::JoinError>) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("failed to persist {}: {}", what, e),
        Err(e) => tracing::warn!("{} persist task failed: {}", what, e),
    }
}
