//! End-to-end tests for the per-call relay engine.
//!
//! Each test stands up the telephony listener and a fake agent service on
//! ephemeral ports, then plays both sides of a call over real WebSockets:
//! the telephony client speaks the media protocol, the fake agent speaks
//! the agent protocol, and the assertions watch what crosses the bridge.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};
use voicebridge_agent::AgentConfig;
use voicebridge_functions::{FunctionRegistry, MemoryAppointmentStore, MemoryOrderStore};
use voicebridge_server::{hub::BroadcastHub, telephony_app, AppState};

type CallerWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AgentWs = WebSocketStream<TcpStream>;

const RECV_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Starts a fake agent service that accepts connections (selecting the
/// `token` subprotocol the bridge offers) and hands each socket to the
/// test.
async fn spawn_fake_agent() -> (String, mpsc::Receiver<AgentWs>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let accepted = accept_hdr_async(stream, |_req: &Request, mut resp: Response| {
                resp.headers_mut()
                    .insert("Sec-WebSocket-Protocol", "token".parse().unwrap());
                Ok(resp)
            })
            .await;
            if let Ok(ws) = accepted {
                if tx.send(ws).await.is_err() {
                    break;
                }
            }
        }
    });

    (format!("ws://{}/agent", addr), rx)
}

async fn setup_call() -> (CallerWs, AgentWs, Arc<AppState>) {
    let db_file = tempfile::NamedTempFile::new().unwrap();
    let db_path = db_file.path().to_str().unwrap().to_string();
    std::mem::forget(db_file);

    let pool =
        voicebridge_db::open_pool(&db_path, voicebridge_db::PoolSettings::default())
            .unwrap();
    {
        let conn = pool.get().unwrap();
        voicebridge_db::run_migrations(&conn).unwrap();
    }

    let (agent_url, mut agent_rx) = spawn_fake_agent().await;

    let state = Arc::new(AppState {
        pool,
        hub: BroadcastHub::new(),
        active_sessions: Default::default(),
        agent: Arc::new(AgentConfig {
            url: agent_url,
            api_key: "test-key".to_string(),
            settings: json!({"type": "Settings"}),
        }),
        functions: Arc::new(FunctionRegistry::with_default_handlers(
            Arc::new(MemoryAppointmentStore::new()),
            Arc::new(MemoryOrderStore::new()),
        )),
    });

    let app = telephony_app(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (caller, _) = connect_async(format!("ws://{}/call", addr))
        .await
        .expect("caller should connect");

    let mut agent = tokio::time::timeout(RECV_TIMEOUT, agent_rx.recv())
        .await
        .expect("timeout waiting for agent connection")
        .expect("agent listener closed");

    // The bridge sends its session settings as the first frame.
    let settings = recv_agent_text(&mut agent).await;
    assert_eq!(settings["type"], "Settings");

    (caller, agent, state)
}

async fn recv_agent_text(agent: &mut AgentWs) -> Value {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, agent.next())
            .await
            .expect("timeout waiting for agent frame")
            .expect("agent connection closed")
            .expect("agent frame error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

async fn recv_agent_binary(agent: &mut AgentWs) -> Vec<u8> {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, agent.next())
            .await
            .expect("timeout waiting for agent frame")
            .expect("agent connection closed")
            .expect("agent frame error");
        match frame {
            Message::Binary(bytes) => return bytes.to_vec(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected binary frame, got: {other:?}"),
        }
    }
}

async fn recv_caller_event(caller: &mut CallerWs) -> Value {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, caller.next())
            .await
            .expect("timeout waiting for caller frame")
            .expect("caller connection closed")
            .expect("caller frame error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got: {other:?}"),
        }
    }
}

async fn send_caller(caller: &mut CallerWs, payload: Value) {
    caller
        .send(Message::Text(payload.to_string().into()))
        .await
        .expect("caller send failed");
}

async fn send_agent(agent: &mut AgentWs, payload: Value) {
    agent
        .send(Message::Text(payload.to_string().into()))
        .await
        .expect("agent send failed");
}

fn media_event(payload: &[u8]) -> Value {
    json!({
        "event": "media",
        "media": {"track": "inbound", "payload": BASE64.encode(payload)},
    })
}

fn start_event(stream_sid: &str) -> Value {
    json!({
        "event": "start",
        "start": {"streamSid": stream_sid, "callSid": "CA100", "from": "+15550001111"},
    })
}

/// Polls the store until the session has the given number of messages.
async fn wait_for_persisted(
    state: &Arc<AppState>,
    session_id: &str,
    predicate: impl Fn(&voicebridge_store::SessionDocument) -> bool,
) -> voicebridge_store::SessionDocument {
    for _ in 0..100 {
        let conn = state.pool.get().unwrap();
        if let Some(doc) = voicebridge_store::get_session(&conn, session_id).unwrap() {
            if predicate(&doc) {
                return doc;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("session {session_id} never reached the expected state");
}

#[tokio::test]
async fn audio_is_rebuffered_into_fixed_frames() {
    let (mut caller, mut agent, _state) = setup_call().await;

    send_caller(&mut caller, start_event("MZ1")).await;

    // Two half-frames accumulate into exactly one 3200-byte frame.
    send_caller(&mut caller, media_event(&vec![1u8; 1600])).await;
    send_caller(&mut caller, media_event(&vec![2u8; 1600])).await;

    let frame = recv_agent_binary(&mut agent).await;
    assert_eq!(frame.len(), 3200);
    assert_eq!(&frame[..1600], &vec![1u8; 1600][..]);
    assert_eq!(&frame[1600..], &vec![2u8; 1600][..]);

    // A full frame in one chunk passes straight through.
    send_caller(&mut caller, media_event(&vec![3u8; 3200])).await;
    let frame = recv_agent_binary(&mut agent).await;
    assert_eq!(frame, vec![3u8; 3200]);

    // Outbound tracks are not forwarded to the agent.
    send_caller(
        &mut caller,
        json!({"event": "media",
               "media": {"track": "outbound", "payload": BASE64.encode(vec![9u8; 3200])}}),
    )
    .await;
    send_caller(&mut caller, media_event(&vec![4u8; 3200])).await;
    let frame = recv_agent_binary(&mut agent).await;
    assert_eq!(frame, vec![4u8; 3200], "outbound chunk was skipped");
}

#[tokio::test]
async fn agent_audio_and_barge_in_reach_the_caller() {
    let (mut caller, mut agent, _state) = setup_call().await;
    send_caller(&mut caller, start_event("MZ2")).await;

    agent
        .send(Message::Binary(vec![7u8, 8, 9].into()))
        .await
        .unwrap();

    let media = recv_caller_event(&mut caller).await;
    assert_eq!(media["event"], "media");
    assert_eq!(media["streamSid"], "MZ2");
    let audio = BASE64
        .decode(media["media"]["payload"].as_str().unwrap())
        .unwrap();
    assert_eq!(audio, vec![7, 8, 9]);

    // Caller starts speaking: queued playback is discarded immediately.
    send_agent(&mut agent, json!({"type": "SpeechStarted"})).await;
    let clear = recv_caller_event(&mut caller).await;
    assert_eq!(clear, json!({"event": "clear", "streamSid": "MZ2"}));
}

#[tokio::test]
async fn function_calls_round_trip_with_error_symmetry() {
    let (mut caller, mut agent, _state) = setup_call().await;
    send_caller(&mut caller, start_event("MZ3")).await;

    send_agent(
        &mut agent,
        json!({
            "type": "FunctionCallRequest",
            "functions": [{
                "id": "fc-1",
                "name": "get_drug_info",
                "arguments": "{\"drug_name\": \"aspirin\"}"
            }]
        }),
    )
    .await;

    let response = recv_agent_text(&mut agent).await;
    assert_eq!(response["type"], "FunctionCallResponse");
    assert_eq!(response["id"], "fc-1");
    assert_eq!(response["name"], "get_drug_info");
    let content: Value = serde_json::from_str(response["content"].as_str().unwrap()).unwrap();
    assert_eq!(content["price"], 5.99);

    // Unknown function name: same envelope shape, error content, and the
    // connection keeps serving.
    send_agent(
        &mut agent,
        json!({
            "type": "FunctionCallRequest",
            "functions": [{"id": "fc-2", "name": "does_not_exist", "arguments": "{}"}]
        }),
    )
    .await;

    let error_response = recv_agent_text(&mut agent).await;
    assert_eq!(error_response["type"], "FunctionCallResponse");
    assert_eq!(error_response["id"], "fc-2");
    let ok_keys: Vec<&String> = response.as_object().unwrap().keys().collect();
    let err_keys: Vec<&String> = error_response.as_object().unwrap().keys().collect();
    assert_eq!(ok_keys, err_keys, "error envelope matches success shape");
    let content: Value =
        serde_json::from_str(error_response["content"].as_str().unwrap()).unwrap();
    assert!(content["error"].as_str().unwrap().contains("not found"));

    send_agent(
        &mut agent,
        json!({
            "type": "FunctionCallRequest",
            "functions": [{"id": "fc-3", "name": "get_drug_info", "arguments": "{}"}]
        }),
    )
    .await;
    let bad_args = recv_agent_text(&mut agent).await;
    let content: Value = serde_json::from_str(bad_args["content"].as_str().unwrap()).unwrap();
    assert!(content["error"].as_str().unwrap().contains("failed"));
}

#[tokio::test]
async fn transcripts_persist_and_buffered_text_flushes_on_stop() {
    let (mut caller, mut agent, state) = setup_call().await;
    send_caller(&mut caller, start_event("MZ4")).await;

    send_agent(
        &mut agent,
        json!({"type": "UtteranceEnd", "speech_final": "I need my prescription"}),
    )
    .await;
    send_agent(
        &mut agent,
        json!({"type": "AgentAudioDone", "text": "Of course, which one?"}),
    )
    .await;

    // Noise types must not produce records.
    send_agent(&mut agent, json!({"type": "History", "content": "x"})).await;
    send_agent(&mut agent, json!({"type": "AgentThinking"})).await;

    // Buffered conversation text only lands at call end.
    send_agent(
        &mut agent,
        json!({"type": "ConversationText", "role": "assistant", "content": "buffered turn"}),
    )
    .await;

    wait_for_persisted(&state, "MZ4", |doc| doc.messages.len() >= 2).await;

    send_caller(&mut caller, json!({"event": "stop", "streamSid": "MZ4"})).await;

    let doc = wait_for_persisted(&state, "MZ4", |doc| {
        doc.messages.iter().any(|m| m.text == "buffered turn")
            && doc.status == voicebridge_types::SessionStatus::Completed
    })
    .await;

    // Appends are dispatched fire-and-forget, so assert on presence.
    assert!(doc.messages.iter().any(|m| m.text == "I need my prescription"));
    assert!(doc.messages.iter().any(|m| m.text == "Of course, which one?"));
    assert!(doc.ended_at.is_some());
    assert_eq!(
        doc.messages.len(),
        3,
        "noise events must not be recorded: {:?}",
        doc.messages
    );
}

#[tokio::test]
async fn agent_failure_cancels_the_telephony_loop_promptly() {
    let (mut caller, mut agent, state) = setup_call().await;
    send_caller(&mut caller, start_event("MZ5")).await;

    // Wait until the session is live so the relay is fully wired.
    wait_for_persisted(&state, "MZ5", |doc| doc.phone_number == "+15550001111").await;

    // The agent side dies while the telephony side is idle, waiting on
    // input. The bridge must cancel the telephony loop and close its
    // socket within a bounded time, not leave it hanging.
    agent.close(None).await.unwrap();
    drop(agent);

    let outcome = tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match caller.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(
        outcome.is_ok(),
        "telephony socket should close promptly after agent failure"
    );

    // Teardown also completed the session.
    wait_for_persisted(&state, "MZ5", |doc| {
        doc.status == voicebridge_types::SessionStatus::Completed
    })
    .await;
}
