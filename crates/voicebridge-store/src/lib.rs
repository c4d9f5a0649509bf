//! Session-document persistence for Voicebridge.
//!
//! A call session is stored as one `call_sessions` row plus append-only
//! `session_messages` and `session_function_calls` child rows; the
//! [`SessionDocument`] read model assembles them in insertion order. Every
//! operation here is a single statement or a single transaction keyed by
//! `session_id`, so callers need no locking of their own.
//!
//! Functions take a `&rusqlite::Connection`; async callers run them inside
//! `tokio::task::spawn_blocking` with a pooled connection.

mod passcode;

pub use passcode::{generate_passcode, hash_passcode, PASSCODE_LEN};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use voicebridge_types::{MessageKind, MessageRole, SessionStatus};

/// Errors that can occur during session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters for registering a new call session.
#[derive(Debug, Clone)]
pub struct StartSessionParams {
    pub session_id: String,
    pub call_sid: Option<String>,
    pub phone_number: String,
    pub username: String,
    pub passcode_hash: String,
    pub started_at: DateTime<Utc>,
}

/// A conversation message to append.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub kind: MessageKind,
    pub text: String,
    pub is_final: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

/// A function-call record to append.
#[derive(Debug, Clone)]
pub struct NewFunctionCall {
    pub name: String,
    pub parameters: serde_json::Value,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A conversation-text entry buffered during the call and flushed in bulk
/// at call end. The timestamp is whatever the agent stream carried; it is
/// normalized at flush time.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub role: String,
    pub text: String,
    pub timestamp: Option<String>,
}

/// A stored conversation message, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    pub timestamp: String,
}

/// A stored function-call record, as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallEntry {
    pub name: String,
    pub parameters: serde_json::Value,
    pub result: serde_json::Value,
    pub timestamp: String,
}

/// The sanitized session document served to companion clients.
///
/// Deliberately carries neither the passcode digest nor the internal
/// storage id: what is not in the struct cannot leak into a payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    pub phone_number: String,
    pub username: String,
    pub status: SessionStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub messages: Vec<StoredMessage>,
    pub function_calls: Vec<FunctionCallEntry>,
}

/// Registers a call session with insert-if-absent semantics.
///
/// A duplicate start signal for the same `session_id` refreshes the caller
/// fields and `updated_at` but leaves `status` and `created_at` untouched,
/// so a retried start can never reopen a completed session or forge its
/// creation time.
pub fn start_session(conn: &Connection, params: &StartSessionParams) -> Result<(), StoreError> {
    let now = params.started_at.to_rfc3339();
    conn.execute(
        "INSERT INTO call_sessions
            (session_id, call_sid, phone_number, username, passcode_hash,
             status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(session_id) DO UPDATE SET
            call_sid = excluded.call_sid,
            phone_number = excluded.phone_number,
            username = excluded.username,
            passcode_hash = excluded.passcode_hash,
            updated_at = excluded.updated_at",
        params![
            params.session_id,
            params.call_sid,
            params.phone_number,
            params.username,
            params.passcode_hash,
            SessionStatus::InProgress.as_str(),
            now,
        ],
    )?;
    Ok(())
}

/// Marks a session completed, stamping `ended_at` and `updated_at`.
///
/// Returns `false` when no session row matched; callers on the teardown
/// path treat that as a no-op rather than an error.
pub fn complete_session(
    conn: &Connection,
    session_id: &str,
    ended_at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let stamp = ended_at.to_rfc3339();
    let count = conn.execute(
        "UPDATE call_sessions
         SET status = ?2, ended_at = ?3, updated_at = ?3
         WHERE session_id = ?1",
        params![session_id, SessionStatus::Completed.as_str(), stamp],
    )?;
    Ok(count > 0)
}

/// Overrides the generated username and/or passcode digest for a session.
///
/// Only fields that are `Some` are modified; `updated_at` is always
/// stamped. Returns `StoreError::NotFound` when no session row matches.
pub fn update_credentials(
    conn: &Connection,
    session_id: &str,
    username: Option<&str>,
    passcode_hash: Option<&str>,
    updated_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let mut set_parts = vec!["updated_at = ?1".to_string()];
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(updated_at.to_rfc3339())];
    let mut idx = 2usize;

    if let Some(name) = username {
        set_parts.push(format!("username = ?{}", idx));
        values.push(Box::new(name.to_string()));
        idx += 1;
    }
    if let Some(hash) = passcode_hash {
        set_parts.push(format!("passcode_hash = ?{}", idx));
        values.push(Box::new(hash.to_string()));
        idx += 1;
    }

    let sql = format!(
        "UPDATE call_sessions SET {} WHERE session_id = ?{}",
        set_parts.join(", "),
        idx
    );
    values.push(Box::new(session_id.to_string()));

    let params: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let count = conn.execute(&sql, params.as_slice())?;
    if count == 0 {
        return Err(StoreError::NotFound(session_id.to_string()));
    }
    Ok(())
}

/// Inserts a placeholder session row when an append arrives before the
/// start signal. The real start later overwrites the caller fields via its
/// conflict clause.
fn ensure_session_row(
    conn: &Connection,
    session_id: &str,
    stamp: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO call_sessions
            (session_id, phone_number, username, passcode_hash,
             status, created_at, updated_at)
         VALUES (?1, 'unknown', 'unknown', '', ?2, ?3, ?3)",
        params![session_id, SessionStatus::InProgress.as_str(), stamp],
    )?;
    Ok(())
}

/// Atomically appends one message and stamps `updated_at`.
///
/// Upsert-safe: creates the session row if it does not exist yet, which
/// protects against ordering races with the start signal.
pub fn append_message(
    conn: &Connection,
    session_id: &str,
    message: &NewMessage,
) -> Result<(), StoreError> {
    let stamp = message.timestamp.to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    ensure_session_row(&tx, session_id, &stamp)?;
    tx.execute(
        "INSERT INTO session_messages (session_id, role, kind, text, is_final, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            session_id,
            message.role.as_str(),
            message.kind.as_str(),
            message.text,
            message.is_final,
            stamp,
        ],
    )?;
    tx.execute(
        "UPDATE call_sessions SET updated_at = ?2 WHERE session_id = ?1",
        params![session_id, stamp],
    )?;
    tx.commit()?;
    Ok(())
}

/// Atomically appends one function-call record and stamps `updated_at`.
pub fn append_function_call(
    conn: &Connection,
    session_id: &str,
    record: &NewFunctionCall,
) -> Result<(), StoreError> {
    let stamp = record.timestamp.to_rfc3339();
    let parameters_json = serde_json::to_string(&record.parameters)?;
    let result_json = serde_json::to_string(&record.result)?;

    let tx = conn.unchecked_transaction()?;
    ensure_session_row(&tx, session_id, &stamp)?;
    tx.execute(
        "INSERT INTO session_function_calls
            (session_id, name, parameters_json, result_json, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session_id,
            record.name,
            parameters_json,
            result_json,
            stamp,
        ],
    )?;
    tx.execute(
        "UPDATE call_sessions SET updated_at = ?2 WHERE session_id = ?1",
        params![session_id, stamp],
    )?;
    tx.commit()?;
    Ok(())
}

/// Bulk-appends conversation text buffered during the call in one
/// transaction.
///
/// Each entry's timestamp is normalized before writing: parsed when it is
/// valid RFC 3339 text, otherwise replaced by `flushed_at`. Returns the
/// number of messages written.
pub fn flush_messages(
    conn: &Connection,
    session_id: &str,
    entries: &[BufferedMessage],
    flushed_at: DateTime<Utc>,
) -> Result<usize, StoreError> {
    if entries.is_empty() {
        return Ok(0);
    }

    let flush_stamp = flushed_at.to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    ensure_session_row(&tx, session_id, &flush_stamp)?;

    for entry in entries {
        let stamp = entry
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
            .unwrap_or_else(|| flush_stamp.clone());

        tx.execute(
            "INSERT INTO session_messages (session_id, role, kind, text, is_final, timestamp)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![
                session_id,
                MessageRole::from_wire(&entry.role).as_str(),
                MessageKind::TextMessage.as_str(),
                entry.text,
                stamp,
            ],
        )?;
    }

    tx.execute(
        "UPDATE call_sessions SET updated_at = ?2 WHERE session_id = ?1",
        params![session_id, flush_stamp],
    )?;
    tx.commit()?;
    Ok(entries.len())
}

const SESSION_COLUMNS: &str = "session_id, call_sid, phone_number, username, status,
     created_at, updated_at, ended_at";

/// Retrieves a session document by its id.
pub fn get_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Option<SessionDocument>, StoreError> {
    let head = conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM call_sessions WHERE session_id = ?1"),
            [session_id],
            map_row_to_document_head,
        )
        .optional()?;

    match head {
        Some(doc) => Ok(Some(load_entries(conn, doc)?)),
        None => Ok(None),
    }
}

/// Finds the most-recently-updated session matching a phone number and
/// passcode digest, optionally narrowed to one session id.
///
/// Returns `None` for any non-match — an unknown phone number and a wrong
/// passcode are indistinguishable to the caller, which is what keeps the
/// history error generic.
pub fn find_history(
    conn: &Connection,
    phone_number: &str,
    passcode_hash: &str,
    session_id: Option<&str>,
) -> Result<Option<SessionDocument>, StoreError> {
    let head = match session_id {
        Some(sid) => conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM call_sessions
                     WHERE phone_number = ?1 AND passcode_hash = ?2 AND session_id = ?3
                     ORDER BY updated_at DESC LIMIT 1"
                ),
                params![phone_number, passcode_hash, sid],
                map_row_to_document_head,
            )
            .optional()?,
        None => conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM call_sessions
                     WHERE phone_number = ?1 AND passcode_hash = ?2
                     ORDER BY updated_at DESC LIMIT 1"
                ),
                params![phone_number, passcode_hash],
                map_row_to_document_head,
            )
            .optional()?,
    };

    match head {
        Some(doc) => Ok(Some(load_entries(conn, doc)?)),
        None => Ok(None),
    }
}

/// Lists the most recently created sessions, newest first.
pub fn recent_sessions(conn: &Connection, limit: usize) -> Result<Vec<SessionDocument>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM call_sessions
         ORDER BY created_at DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map([limit as i64], map_row_to_document_head)?;

    let mut documents = Vec::new();
    for row in rows {
        documents.push(load_entries(conn, row?)?);
    }
    Ok(documents)
}

fn map_row_to_document_head(row: &Row) -> rusqlite::Result<SessionDocument> {
    let status_str: String = row.get(4)?;
    let status: SessionStatus = status_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(SessionDocument {
        session_id: row.get(0)?,
        call_sid: row.get(1)?,
        phone_number: row.get(2)?,
        username: row.get(3)?,
        status,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        ended_at: row.get(7)?,
        messages: Vec::new(),
        function_calls: Vec::new(),
    })
}

/// Loads the ordered messages and function calls into a document head.
fn load_entries(
    conn: &Connection,
    mut doc: SessionDocument,
) -> Result<SessionDocument, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT role, kind, text, is_final, timestamp
         FROM session_messages WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([&doc.session_id], |row| {
        let role_str: String = row.get(0)?;
        let kind_str: String = row.get(1)?;
        let role: MessageRole = role_str.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let kind: MessageKind = kind_str.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(StoredMessage {
            role,
            kind,
            text: row.get(2)?,
            is_final: row.get(3)?,
            timestamp: row.get(4)?,
        })
    })?;
    for row in rows {
        doc.messages.push(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT name, parameters_json, result_json, timestamp
         FROM session_function_calls WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([&doc.session_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;
    for row in rows {
        let (name, parameters_json, result_json, timestamp) = row?;
        doc.function_calls.push(FunctionCallEntry {
            name,
            parameters: serde_json::from_str(&parameters_json)?,
            result: serde_json::from_str(&result_json)?,
            timestamp,
        });
    }

    Ok(doc)
}
