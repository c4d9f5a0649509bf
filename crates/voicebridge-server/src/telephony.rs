//! Telephony media-stream adapter and the per-call relay engine.
//!
//! One call is three sibling tasks: the telephony-inbound feeder (decode,
//! re-buffer, push fixed-size frames toward the agent), the agent-outbound
//! pump (sole writer to the agent socket), and the agent-event loop (sole
//! writer to the telephony socket: audio relay, barge-in, classification
//! fan-out). The first task to finish — error or normal end-of-stream —
//! tears the whole call down.

use crate::{lifecycle, recorder, AppState};
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use voicebridge_agent::{AgentEvent, AgentStream, FunctionCallItem, FunctionCallResponse};
use voicebridge_store::BufferedMessage;

/// Fixed audio frame handed to the agent: 20 ms x 160 samples of 8 kHz
/// mu-law per chunk, accumulated to 3200 bytes before sending.
pub const AGENT_FRAME_BYTES: usize = 20 * 160;

/// Capacity of the channel feeding the agent-outbound pump.
const AGENT_OUTBOUND_CAPACITY: usize = 64;

/// A decoded telephony frame, classified by its `event` tag.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelephonyEvent {
    Connected,
    Start {
        start: StartMeta,
    },
    Media {
        media: MediaPayload,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    #[serde(other)]
    Unrecognized,
}

/// Caller metadata carried on the `start` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// One inbound or outbound media chunk.
#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    pub payload: String,
}

/// Builds an outbound media frame tagged with the stream id.
pub fn media_frame(stream_sid: &str, audio: &[u8]) -> String {
    serde_json::json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": BASE64.encode(audio) },
    })
    .to_string()
}

/// Builds the barge-in control frame that discards queued playback.
pub fn clear_frame(stream_sid: &str) -> String {
    serde_json::json!({
        "event": "clear",
        "streamSid": stream_sid,
    })
    .to_string()
}

/// Accumulates inbound audio bytes and slices off exactly-sized frames.
///
/// Never emits a partial frame and never drops a byte: whatever does not
/// fill a frame stays buffered for the next push.
#[derive(Debug)]
pub struct FrameBuffer {
    frame_len: usize,
    buffer: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            buffer: Vec::with_capacity(frame_len * 2),
        }
    }

    /// Appends bytes and returns every complete frame now available.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_len {
            let remainder = self.buffer.split_off(self.frame_len);
            frames.push(std::mem::replace(&mut self.buffer, remainder));
        }
        frames
    }

    /// Bytes currently held back waiting to fill a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Errors that end a relay loop (and with it, the call).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("agent transport error: {0}")]
    Agent(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("telephony transport error: {0}")]
    Telephony(#[from] axum::Error),

    #[error("agent outbound channel closed")]
    AgentGone,
}

/// What the agent-outbound pump sends: audio frames from the telephony
/// side, or JSON (function-call responses) from the event loop.
enum AgentOutbound {
    Audio(Vec<u8>),
    Json(String),
}

/// Conversation text buffered during the call, flushed at teardown.
type ConversationBuffer = Arc<Mutex<Vec<BufferedMessage>>>;

/// WebSocket handler for the telephony media stream: `GET /call`.
pub async fn call_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_call(socket, state))
}

/// Runs one call end to end: dials the agent, spawns the three relay
/// siblings, and tears everything down when the first of them finishes.
async fn run_call(telephony: WebSocket, state: Arc<AppState>) {
    let agent = match voicebridge_agent::connect(&state.agent).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("failed to connect agent service: {}", e);
            return;
        }
    };

    let (agent_sink, agent_stream) = agent.split();
    let (telephony_sink, telephony_stream) = telephony.split();

    let (to_agent_tx, to_agent_rx) = mpsc::channel::<AgentOutbound>(AGENT_OUTBOUND_CAPACITY);
    let (sid_tx, sid_rx) = oneshot::channel::<String>();
    let stream_sid: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
    let buffer: ConversationBuffer = Arc::new(Mutex::new(Vec::new()));

    let mut tasks: JoinSet<Result<(), RelayError>> = JoinSet::new();
    tasks.spawn(pump_agent_outbound(to_agent_rx, agent_sink));
    tasks.spawn(run_agent_events(
        agent_stream,
        telephony_sink,
        to_agent_tx.clone(),
        sid_rx,
        state.clone(),
        buffer.clone(),
    ));
    tasks.spawn(run_telephony_inbound(
        telephony_stream,
        to_agent_tx,
        sid_tx,
        state.clone(),
        stream_sid.clone(),
    ));

    // First sibling to finish — cleanly or not — ends the call as a unit.
    if let Some(first) = tasks.join_next().await {
        match first {
            Ok(Ok(())) => tracing::info!("call relay loop finished"),
            Ok(Err(e)) => tracing::warn!("call relay loop failed: {}", e),
            Err(e) => tracing::warn!("call relay task panicked or was cancelled: {}", e),
        }
    }
    tasks.shutdown().await;

    // Teardown: complete the session (idempotent if the stop frame already
    // did) and flush whatever conversation text the call accumulated.
    if let Some(sid) = stream_sid.get() {
        lifecycle::end_session(&state, sid).await;

        let buffered = {
            let mut guard = buffer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        recorder::flush_conversation(&state, sid, buffered).await;
    }

    tracing::info!("call torn down");
}

/// Sole writer to the agent socket. Drains the outbound channel until it
/// closes or the socket errors.
async fn pump_agent_outbound(
    mut rx: mpsc::Receiver<AgentOutbound>,
    mut sink: SplitSink<AgentStream, TungsteniteMessage>,
) -> Result<(), RelayError> {
    while let Some(item) = rx.recv().await {
        match item {
            AgentOutbound::Audio(frame) => {
                sink.send(TungsteniteMessage::Binary(frame.into())).await?;
            }
            AgentOutbound::Json(text) => {
                sink.send(TungsteniteMessage::Text(text.into())).await?;
            }
        }
    }
    Ok(())
}

/// Consumes the telephony stream: re-buffers inbound audio into fixed
/// frames for the agent and drives the session lifecycle from the
/// start/stop signals.
async fn run_telephony_inbound(
    mut stream: SplitStream<WebSocket>,
    audio_tx: mpsc::Sender<AgentOutbound>,
    sid_tx: oneshot::Sender<String>,
    state: Arc<AppState>,
    stream_sid: Arc<OnceLock<String>>,
) -> Result<(), RelayError> {
    let mut rebuffer = FrameBuffer::new(AGENT_FRAME_BYTES);
    let mut sid_tx = Some(sid_tx);

    while let Some(frame) = stream.next().await {
        let text = match frame? {
            AxumMessage::Text(text) => text,
            AxumMessage::Close(_) => break,
            _ => continue,
        };

        let event = match serde_json::from_str::<TelephonyEvent>(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("skipping undecodable telephony frame: {}", e);
                continue;
            }
        };

        match event {
            TelephonyEvent::Connected | TelephonyEvent::Unrecognized => {}

            TelephonyEvent::Start { start } => {
                tracing::info!(stream_sid = %start.stream_sid, "telephony stream started");
                let _ = stream_sid.set(start.stream_sid.clone());
                if let Some(tx) = sid_tx.take() {
                    let _ = tx.send(start.stream_sid.clone());
                }
                lifecycle::start_session(&state, &start).await;
            }

            TelephonyEvent::Media { media } => {
                if media.track.as_deref() != Some("inbound") {
                    continue;
                }
                let chunk = match BASE64.decode(media.payload.as_bytes()) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!("skipping undecodable media payload: {}", e);
                        continue;
                    }
                };
                for frame in rebuffer.push(&chunk) {
                    if audio_tx.send(AgentOutbound::Audio(frame)).await.is_err() {
                        return Err(RelayError::AgentGone);
                    }
                }
            }

            TelephonyEvent::Stop { stream_sid: stop_sid } => {
                let sid = stop_sid.or_else(|| stream_sid.get().cloned());
                if let Some(sid) = sid {
                    lifecycle::end_session(&state, &sid).await;
                }
                break;
            }
        }
    }

    Ok(())
}

/// Consumes the agent stream: relays binary audio to the caller and fans
/// classified events out to barge-in, function dispatch, the recorder, and
/// the broadcast hub.
async fn run_agent_events(
    mut agent: SplitStream<AgentStream>,
    mut telephony: SplitSink<WebSocket, AxumMessage>,
    to_agent: mpsc::Sender<AgentOutbound>,
    sid_rx: oneshot::Receiver<String>,
    state: Arc<AppState>,
    buffer: ConversationBuffer,
) -> Result<(), RelayError> {
    // Outbound media must be tagged with the stream id, so the relay waits
    // for the telephony side to reveal it before touching the stream.
    let stream_sid = match sid_rx.await {
        Ok(sid) => sid,
        Err(_) => return Ok(()),
    };

    while let Some(message) = agent.next().await {
        match message? {
            TungsteniteMessage::Binary(audio) => {
                telephony
                    .send(AxumMessage::Text(media_frame(&stream_sid, &audio).into()))
                    .await?;
            }

            TungsteniteMessage::Text(text) => {
                let event = match serde_json::from_str::<AgentEvent>(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("skipping undecodable agent event: {}", e);
                        continue;
                    }
                };

                if event.is_noise() {
                    continue;
                }

                match event {
                    AgentEvent::UtteranceEnd { speech_final } => {
                        if !speech_final.is_empty() {
                            recorder::transcription(&state, Some(&stream_sid), &speech_final, true)
                                .await;
                        }
                    }

                    AgentEvent::SpeechStarted => {
                        recorder::transcription(
                            &state,
                            Some(&stream_sid),
                            "User started speaking...",
                            false,
                        )
                        .await;
                        // Barge-in: throw away whatever playback is queued.
                        telephony
                            .send(AxumMessage::Text(clear_frame(&stream_sid).into()))
                            .await?;
                    }

                    AgentEvent::AgentAudioDone { text } => {
                        if !text.is_empty() {
                            recorder::agent_response(&state, Some(&stream_sid), &text).await;
                        }
                    }

                    AgentEvent::ConversationText { role, content } => {
                        if !content.is_empty() {
                            let mut guard = buffer
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                            guard.push(BufferedMessage {
                                role,
                                text: content,
                                timestamp: Some(Utc::now().to_rfc3339()),
                            });
                        }
                    }

                    AgentEvent::FunctionCallRequest { functions } => {
                        for item in functions {
                            dispatch_function_call(&item, &to_agent, &state, &stream_sid).await?;
                        }
                    }

                    AgentEvent::Unrecognized => {
                        tracing::debug!("ignoring unrecognized agent event");
                    }

                    // Noise variants were skipped above.
                    _ => {}
                }
            }

            TungsteniteMessage::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}

/// Executes one requested function call and answers on the agent channel.
///
/// Every failure — unknown name, argument mismatch, handler error —
/// becomes an error-content response using the best-known id and name; the
/// agent connection itself is never sacrificed for a function error.
async fn dispatch_function_call(
    item: &FunctionCallItem,
    to_agent: &mpsc::Sender<AgentOutbound>,
    state: &Arc<AppState>,
    stream_sid: &str,
) -> Result<(), RelayError> {
    let id = if item.id.is_empty() { "unknown" } else { &item.id };
    let name = if item.name.is_empty() {
        "unknown"
    } else {
        &item.name
    };

    let response = match item.parse_arguments() {
        Ok(arguments) => {
            tracing::info!(name = %name, id = %id, "executing agent function call");
            match state.functions.dispatch(name, &arguments) {
                Ok(result) => {
                    recorder::function_call(
                        state,
                        Some(stream_sid),
                        name,
                        arguments,
                        result.clone(),
                    )
                    .await;
                    FunctionCallResponse::new(id, name, &result)
                }
                Err(e) => {
                    tracing::warn!(name = %name, id = %id, "function call failed: {}", e);
                    FunctionCallResponse::error(id, name, e)
                }
            }
        }
        Err(e) => {
            tracing::warn!(name = %name, id = %id, "function call arguments unparsable: {}", e);
            FunctionCallResponse::error(id, name, e)
        }
    };

    let json = match serde_json::to_string(&response) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(name = %name, "failed to serialize function call response: {}", e);
            return Ok(());
        }
    };

    to_agent
        .send(AgentOutbound::Json(json))
        .await
        .map_err(|_| RelayError::AgentGone)
}
