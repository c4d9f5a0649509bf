//! Integration tests for the companion-client protocol.
//!
//! Each test boots the client listener on an ephemeral port with a
//! file-backed database and drives it over a real WebSocket, validating
//! the command/response surface: history auth symmetry, credentials,
//! recent conversations, text chat, and malformed-payload handling.

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream};
use voicebridge_server::{client_app, AppState};
use voicebridge_store::{
    append_function_call, append_message, complete_session, hash_passcode, start_session,
    NewFunctionCall, NewMessage, StartSessionParams,
};
use voicebridge_types::{MessageKind, MessageRole};

type WsClient = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn setup_test_server() -> (SocketAddr, Arc<AppState>) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let db_path = db_file.path().to_str().unwrap().to_string();
    // Leak the tempfile so it persists for the duration of the test.
    std::mem::forget(db_file);

    let pool =
        voicebridge_db::open_pool(&db_path, voicebridge_db::PoolSettings::default())
            .unwrap();
    {
        let conn = pool.get().unwrap();
        voicebridge_db::run_migrations(&conn).unwrap();
    }

    let state = AppState::for_tests(pool);
    let app = client_app(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Connects and consumes the `connection_established` greeting.
async fn connect_client(addr: SocketAddr) -> WsClient {
    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("failed to connect");

    let greeting = recv_event(&mut ws).await;
    assert_eq!(greeting["event"], "connection_established");
    ws
}

async fn recv_event(ws: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for event")
            .expect("connection closed")
            .expect("frame error");
        match frame {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("event should be JSON")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

async fn send_json(ws: &mut WsClient, payload: Value) {
    ws.send(Message::Text(payload.to_string().into()))
        .await
        .expect("failed to send");
}

fn ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
}

/// Seeds one completed session with two messages and one function call.
fn seed_completed_session(state: &AppState, session_id: &str, phone: &str, passcode: &str) {
    let conn = state.pool.get().unwrap();
    start_session(
        &conn,
        &StartSessionParams {
            session_id: session_id.to_string(),
            call_sid: Some("CA1".to_string()),
            phone_number: phone.to_string(),
            username: phone.to_string(),
            passcode_hash: hash_passcode(passcode),
            started_at: ts(0),
        },
    )
    .unwrap();

    append_message(
        &conn,
        session_id,
        &NewMessage {
            role: MessageRole::User,
            kind: MessageKind::Transcription,
            text: "I need to refill my prescription".to_string(),
            is_final: Some(true),
            timestamp: ts(1),
        },
    )
    .unwrap();
    append_message(
        &conn,
        session_id,
        &NewMessage {
            role: MessageRole::Assistant,
            kind: MessageKind::AgentResponse,
            text: "Sure, which medication?".to_string(),
            is_final: None,
            timestamp: ts(2),
        },
    )
    .unwrap();
    append_function_call(
        &conn,
        session_id,
        &NewFunctionCall {
            name: "get_drug_info".to_string(),
            parameters: json!({"drug_name": "aspirin"}),
            result: json!({"price": 5.99}),
            timestamp: ts(3),
        },
    )
    .unwrap();

    complete_session(&conn, session_id, ts(10)).unwrap();
}

#[tokio::test]
async fn ping_returns_pong() {
    let (addr, _state) = setup_test_server().await;
    let mut ws = connect_client(addr).await;

    send_json(&mut ws, json!({"command": "ping"})).await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event, json!({"event": "pong"}));
}

#[tokio::test]
async fn malformed_payload_returns_error_and_keeps_connection() {
    let (addr, _state) = setup_test_server().await;
    let mut ws = connect_client(addr).await;

    ws.send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "error");
    assert_eq!(event["message"], "invalid message format");

    // Unknown command shapes get the same treatment.
    send_json(&mut ws, json!({"command": "reboot"})).await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "error");

    // The connection survived both.
    send_json(&mut ws, json!({"command": "ping"})).await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "pong");
}

#[tokio::test]
async fn get_history_requires_credentials() {
    let (addr, _state) = setup_test_server().await;
    let mut ws = connect_client(addr).await;

    send_json(&mut ws, json!({"command": "get_history"})).await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "history_error");
    assert_eq!(event["message"], "phone_number and passcode are required");
}

#[tokio::test]
async fn end_to_end_history_fetch_and_auth_symmetry() {
    let (addr, state) = setup_test_server().await;
    seed_completed_session(&state, "S1", "+15550001111", "123456");

    let mut ws = connect_client(addr).await;

    // Correct credentials: the sanitized document, in insertion order.
    send_json(
        &mut ws,
        json!({"command": "fetch_history", "phone_number": "+15550001111", "passcode": "123456"}),
    )
    .await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "history");
    let history = &event["history"];
    assert_eq!(history["sessionId"], "S1");
    assert_eq!(history["status"], "completed");
    assert_eq!(history["messages"].as_array().unwrap().len(), 2);
    assert_eq!(
        history["messages"][0]["text"],
        "I need to refill my prescription"
    );
    assert_eq!(history["messages"][1]["text"], "Sure, which medication?");
    assert_eq!(history["functionCalls"].as_array().unwrap().len(), 1);
    assert_eq!(history["functionCalls"][0]["name"], "get_drug_info");
    assert!(
        history.get("passcodeHash").is_none(),
        "no passcode digest in the payload"
    );

    // Wrong passcode for a real number and an unknown number must be
    // byte-identical error events.
    send_json(
        &mut ws,
        json!({"command": "fetch_history", "phone_number": "+15550001111", "passcode": "654321"}),
    )
    .await;
    let wrong_passcode = recv_event(&mut ws).await;

    send_json(
        &mut ws,
        json!({"command": "fetch_history", "phone_number": "+15559999999", "passcode": "123456"}),
    )
    .await;
    let unknown_phone = recv_event(&mut ws).await;

    assert_eq!(wrong_passcode["event"], "history_error");
    assert_eq!(wrong_passcode, unknown_phone);
}

#[tokio::test]
async fn recent_conversations_lists_newest_first() {
    let (addr, state) = setup_test_server().await;
    let mut ws = connect_client(addr).await;

    // Empty store: the error event, matching the live service.
    send_json(&mut ws, json!({"command": "get_recent_conversations"})).await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "recent_conversations_error");

    {
        let conn = state.pool.get().unwrap();
        for (sid, at) in [("old", 0), ("new", 100)] {
            start_session(
                &conn,
                &StartSessionParams {
                    session_id: sid.to_string(),
                    call_sid: None,
                    phone_number: "+15550001111".to_string(),
                    username: "caller".to_string(),
                    passcode_hash: hash_passcode("123456"),
                    started_at: ts(at),
                },
            )
            .unwrap();
        }
    }

    send_json(
        &mut ws,
        json!({"command": "get_recent_conversations", "limit": 5}),
    )
    .await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "recent_conversations");
    let conversations = event["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0]["sessionId"], "new");
    assert_eq!(conversations[1]["sessionId"], "old");
}

#[tokio::test]
async fn set_credentials_round_trip_and_unknown_session() {
    let (addr, state) = setup_test_server().await;
    seed_completed_session(&state, "S1", "+15550001111", "123456");

    let mut ws = connect_client(addr).await;

    send_json(
        &mut ws,
        json!({"command": "set_credentials", "session_id": "S1",
               "username": "alice", "passcode": "424242"}),
    )
    .await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "credentials_updated");
    assert_eq!(event["session_id"], "S1");

    // The new passcode now authenticates history lookups.
    send_json(
        &mut ws,
        json!({"command": "fetch_history", "phone_number": "+15550001111", "passcode": "424242"}),
    )
    .await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "history");
    assert_eq!(event["history"]["username"], "alice");

    send_json(
        &mut ws,
        json!({"command": "set_credentials", "session_id": "ghost", "username": "x"}),
    )
    .await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "credentials_error");
    assert_eq!(event["message"], "Session not found");

    send_json(&mut ws, json!({"command": "set_credentials"})).await;
    let event = recv_event(&mut ws).await;
    assert_eq!(event["event"], "credentials_error");
    assert_eq!(event["message"], "session_id is required");
}

#[tokio::test]
async fn user_message_flows_like_a_live_exchange() {
    let (addr, state) = setup_test_server().await;
    let mut ws = connect_client(addr).await;

    send_json(
        &mut ws,
        json!({"event": "user_message",
               "message": "Please book an appointment for my headache",
               "session_id": "chat-1"}),
    )
    .await;

    let reply = recv_event(&mut ws).await;
    assert_eq!(reply["event"], "agent_response");

    let call = recv_event(&mut ws).await;
    assert_eq!(call["event"], "function_call");
    assert_eq!(call["function_name"], "schedule_appointment");

    // The exchange was persisted under the chat session. Appends are
    // dispatched fire-and-forget, so assert on presence, not order.
    for _ in 0..50 {
        let conn = state.pool.get().unwrap();
        if let Some(doc) = voicebridge_store::get_session(&conn, "chat-1").unwrap() {
            if doc.messages.len() >= 2 && !doc.function_calls.is_empty() {
                assert!(doc
                    .messages
                    .iter()
                    .any(|m| m.kind == MessageKind::TextMessage && m.role == MessageRole::User));
                assert!(doc
                    .messages
                    .iter()
                    .any(|m| m.kind == MessageKind::AgentResponse));
                assert_eq!(doc.function_calls[0].name, "schedule_appointment");
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("chat exchange was never persisted");
}

#[tokio::test]
async fn active_sessions_snapshot_greets_late_joiners() {
    let (addr, state) = setup_test_server().await;

    // A session is live before this operator connects.
    voicebridge_server::lifecycle::start_session(
        &state,
        &voicebridge_server::telephony::StartMeta {
            stream_sid: "S-live".to_string(),
            call_sid: None,
            from: Some("+15550002222".to_string()),
            caller: None,
            username: None,
        },
    )
    .await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    let greeting = recv_event(&mut ws).await;
    assert_eq!(greeting["event"], "connection_established");

    let snapshot = recv_event(&mut ws).await;
    assert_eq!(snapshot["event"], "active_sessions");
    let sessions = snapshot["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], "S-live");
    assert_eq!(sessions[0]["phone_number"], "+15550002222");
    assert_eq!(sessions[0]["passcode"].as_str().unwrap().len(), 6);
}
