//! Session lifecycle: start, end, and credential overrides.
//!
//! A session is born when the telephony stream reports `start` and dies on
//! `stop` or call teardown. The lifecycle manager owns the only place the
//! plaintext passcode exists: an in-memory cache that is evicted the
//! moment the session completes.

use crate::hub::{ActiveSessionInfo, ClientEvent};
use crate::telephony::StartMeta;
use crate::AppState;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use voicebridge_store::{generate_passcode, hash_passcode, StartSessionParams};

/// In-memory metadata for one live session.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub phone_number: String,
    pub username: String,
    pub passcode: String,
}

/// The live-session cache.
///
/// Uses `std::sync::RwLock` intentionally: every acquisition is a brief
/// HashMap operation that never spans an `.await` point.
pub type ActiveSessions = Arc<RwLock<HashMap<String, SessionMetadata>>>;

/// Errors from credential updates.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No session document matches the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The store was unreachable or the write failed.
    #[error("persistence unavailable: {0}")]
    Persistence(String),
}

/// Registers a session when the telephony stream starts.
///
/// Generates the caller's passcode, upserts the session document
/// (insert-if-absent, so duplicate start signals are harmless), caches the
/// plaintext credentials, and announces the session to companion clients.
/// A persistence failure degrades to a call without history; it never
/// stops the call.
pub async fn start_session(state: &Arc<AppState>, start: &StartMeta) {
    let session_id = start.stream_sid.clone();
    let phone_number = start
        .from
        .clone()
        .or_else(|| start.caller.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let username = start
        .username
        .clone()
        .or_else(|| start.caller.clone())
        .unwrap_or_else(|| phone_number.clone());

    let passcode = generate_passcode();
    let passcode_hash = hash_passcode(&passcode);
    let now = Utc::now();

    let params = StartSessionParams {
        session_id: session_id.clone(),
        call_sid: start.call_sid.clone(),
        phone_number: phone_number.clone(),
        username: username.clone(),
        passcode_hash,
        started_at: now,
    };

    let pool = state.pool.clone();
    let persisted = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        voicebridge_store::start_session(&conn, &params).map_err(|e| e.to_string())
    })
    .await;

    match persisted {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(session_id = %session_id, "failed to persist session start: {}", e)
        }
        Err(e) => tracing::warn!(session_id = %session_id, "session start task failed: {}", e),
    }

    match state.active_sessions.write() {
        Ok(mut sessions) => {
            sessions.insert(
                session_id.clone(),
                SessionMetadata {
                    phone_number: phone_number.clone(),
                    username: username.clone(),
                    passcode: passcode.clone(),
                },
            );
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, "active session lock poisoned: {}", e)
        }
    }

    tracing::info!(session_id = %session_id, phone_number = %phone_number, "session started");

    state
        .hub
        .broadcast_event(&ClientEvent::SessionStarted {
            session_id,
            phone_number,
            username,
            passcode,
            timestamp: now.to_rfc3339(),
        })
        .await;
}

/// Completes a session on telephony stop or call teardown.
///
/// Idempotent: the store update is a no-op once completed, and the
/// completion broadcast is gated on cache eviction, so a stop signal
/// followed by teardown announces exactly once.
pub async fn end_session(state: &Arc<AppState>, session_id: &str) {
    let now = Utc::now();

    let pool = state.pool.clone();
    let sid = session_id.to_string();
    let persisted = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        voicebridge_store::complete_session(&conn, &sid, now).map_err(|e| e.to_string())
    })
    .await;

    match persisted {
        Ok(Ok(_matched)) => {}
        Ok(Err(e)) => {
            tracing::warn!(session_id = %session_id, "failed to persist session end: {}", e)
        }
        Err(e) => tracing::warn!(session_id = %session_id, "session end task failed: {}", e),
    }

    let evicted = match state.active_sessions.write() {
        Ok(mut sessions) => sessions.remove(session_id).is_some(),
        Err(e) => {
            tracing::error!(session_id = %session_id, "active session lock poisoned: {}", e);
            false
        }
    };

    if evicted {
        tracing::info!(session_id = %session_id, "session completed");
        state
            .hub
            .broadcast_event(&ClientEvent::SessionCompleted {
                session_id: session_id.to_string(),
                timestamp: now.to_rfc3339(),
            })
            .await;
    }
}

/// Overrides the generated username and/or passcode for a session.
///
/// The plaintext cache entry is refreshed only after the store accepts the
/// write, so operators never see credentials the store does not hold.
pub async fn update_credentials(
    state: &Arc<AppState>,
    session_id: &str,
    username: Option<String>,
    passcode: Option<String>,
) -> Result<(), LifecycleError> {
    let passcode_hash = passcode.as_deref().map(hash_passcode);
    let now = Utc::now();

    let pool = state.pool.clone();
    let sid = session_id.to_string();
    let stored_username = username.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool
            .get()
            .map_err(|e| LifecycleError::Persistence(e.to_string()))?;
        voicebridge_store::update_credentials(
            &conn,
            &sid,
            stored_username.as_deref(),
            passcode_hash.as_deref(),
            now,
        )
        .map_err(|e| match e {
            voicebridge_store::StoreError::NotFound(id) => LifecycleError::SessionNotFound(id),
            other => LifecycleError::Persistence(other.to_string()),
        })
    })
    .await
    .map_err(|e| LifecycleError::Persistence(e.to_string()))??;

    match state.active_sessions.write() {
        Ok(mut sessions) => {
            if let Some(meta) = sessions.get_mut(session_id) {
                if let Some(name) = username {
                    meta.username = name;
                }
                if let Some(code) = passcode {
                    meta.passcode = code;
                }
            }
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, "active session lock poisoned: {}", e)
        }
    }

    tracing::info!(session_id = %session_id, "session credentials updated");
    Ok(())
}

/// Snapshot of live sessions for a newly connected operator.
pub fn active_session_snapshot(state: &Arc<AppState>) -> Vec<ActiveSessionInfo> {
    match state.active_sessions.read() {
        Ok(sessions) => sessions
            .iter()
            .map(|(session_id, meta)| ActiveSessionInfo {
                session_id: session_id.clone(),
                phone_number: meta.phone_number.clone(),
                username: meta.username.clone(),
                passcode: meta.passcode.clone(),
            })
            .collect(),
        Err(e) => {
            tracing::error!("active session lock poisoned: {}", e);
            Vec::new()
        }
    }
}
