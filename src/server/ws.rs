//! WebSocket session handler for device audio streams
//!
//! One independent session per connection. The socket splits into a send
//! half driven by an outbound channel and a receive half that owns the
//! session's [`StreamAssembler`]: binary frames and the close event are
//! ordered through the same loop, so there is no re-entrancy between chunk
//! handling and finalize. The reply pipeline (STT → LLM → TTS → paced
//! delivery) runs as its own task and reaches the client only through the
//! outbound channel; a failure there tears down this session only.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::delivery::{DeliveryPlan, PacedDeliveryScheduler, ReplyTransport, TokioClock};
use super::session::StreamAssembler;
use super::ApiState;
use crate::wav::{self, WavFormat};
use crate::{Error, Result};

/// End-of-audio marker, device to server
const MARKER_DONE: &str = "done";
/// Optional readiness handshake, device to server
const MARKER_READY: &str = "ready";

/// Structured control frame, server to device
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// End-of-reply marker
    Done,
    /// Finalize arrived with zero accumulated audio
    NoAudio,
    /// The in-flight reply failed
    Error { message: String },
}

/// Outbound message to the device
#[derive(Debug)]
pub enum Outbound {
    /// Raw PCM chunk
    Audio(Vec<u8>),
    /// Structured text frame
    Control(ControlFrame),
}

/// Build the WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/stream/{device_id}", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Path(device_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, device_id))
}

/// Handle one device connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, device_id: String) {
    let (mut sender, mut receiver) = socket.split();

    tracing::info!(device_id = %device_id, "device connected");

    let (tx, mut rx) = mpsc::channel::<Outbound>(32);
    let (ready_tx, ready_rx) = watch::channel(false);

    // Forward outbound messages from the channel onto the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg {
                Outbound::Audio(chunk) => Message::Binary(chunk.into()),
                Outbound::Control(control) => match serde_json::to_string(&control) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(error = %e, "control frame serialization failed");
                        continue;
                    }
                },
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Receive loop: owns the assembler, orders chunks and finalize triggers
    let state_for_recv = Arc::clone(&state);
    let tx_for_recv = tx.clone();
    let device_for_recv = device_id.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut assembler = StreamAssembler::new();

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    assembler.push_chunk(&data);
                }
                Message::Text(text) => match text.as_str() {
                    MARKER_DONE => {
                        if let Some(payload) = assembler.finalize() {
                            tracing::info!(
                                device_id = %device_for_recv,
                                bytes = payload.len(),
                                "stream finalized"
                            );
                            spawn_reply_pipeline(
                                Arc::clone(&state_for_recv),
                                payload,
                                tx_for_recv.clone(),
                                ready_rx.clone(),
                            );
                        } else {
                            tracing::debug!(device_id = %device_for_recv, "duplicate finalize ignored");
                        }
                    }
                    MARKER_READY => {
                        let _ = ready_tx.send(true);
                    }
                    other => {
                        tracing::warn!(device_id = %device_for_recv, message = other, "unknown control message");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(device_id = %device_for_recv, "connection closed by device");
                    break;
                }
                _ => {}
            }
        }

        // Connection closure is the second finalize trigger. Delivery will
        // abort against the closed channel, but the utterance itself is not
        // silently dropped.
        if let Some(payload) = assembler.finalize() {
            if !payload.is_empty() {
                tracing::info!(
                    device_id = %device_for_recv,
                    bytes = payload.len(),
                    "finalizing on connection close"
                );
                spawn_reply_pipeline(
                    Arc::clone(&state_for_recv),
                    payload,
                    tx_for_recv.clone(),
                    ready_rx.clone(),
                );
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(device_id = %device_id, "device disconnected");
}

/// Run the reply pipeline as a detached task; failures are surfaced to the
/// client as an error frame and end with this reply only
fn spawn_reply_pipeline(
    state: Arc<ApiState>,
    payload: Vec<u8>,
    tx: mpsc::Sender<Outbound>,
    ready: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        if let Err(e) = run_reply_pipeline(&state, payload, &tx, ready).await {
            tracing::error!(error = %e, "reply pipeline failed");
            let _ = tx
                .send(Outbound::Control(ControlFrame::Error {
                    message: e.to_string(),
                }))
                .await;
        }
    });
}

/// Transcribe the utterance, generate a reply, synthesize it, and stream it
/// back through the paced delivery scheduler
///
/// An empty payload short-circuits to a `no_audio` frame without touching
/// the backend.
///
/// # Errors
///
/// Returns error if any backend stage fails or the connection closes during
/// delivery.
pub async fn run_reply_pipeline(
    state: &ApiState,
    payload: Vec<u8>,
    tx: &mpsc::Sender<Outbound>,
    ready: watch::Receiver<bool>,
) -> Result<()> {
    if payload.is_empty() {
        tracing::info!("finalize with no audio");
        tx.send(Outbound::Control(ControlFrame::NoAudio))
            .await
            .map_err(|_| Error::Transport("connection closed".to_string()))?;
        return Ok(());
    }

    let format = WavFormat {
        sample_rate: state.audio.sample_rate,
        ..WavFormat::default()
    };

    let wav_payload = wav::encode_wav(&payload, format)?;
    let transcript = state.backend.transcribe(&wav_payload).await?;
    tracing::info!(transcript = %transcript, "transcription complete");

    let reply = state.backend.reply(&transcript).await?;
    tracing::info!(reply = %reply, "reply generated");

    let audio = state.backend.synthesize(&reply).await?;
    let audio = wav::ensure_wav(audio, format)?;

    let plan = DeliveryPlan::new(audio, state.audio.chunk_size, state.delivery.burst_fraction);
    let scheduler = PacedDeliveryScheduler::new(TokioClock::new(), &state.delivery);
    let mut transport = ChannelTransport { tx: tx.clone() };
    scheduler.deliver(&plan, &mut transport, Some(ready)).await
}

/// [`ReplyTransport`] over the session's outbound channel
pub struct ChannelTransport {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelTransport {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl ReplyTransport for ChannelTransport {
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.tx
            .send(Outbound::Audio(chunk.to_vec()))
            .await
            .map_err(|_| Error::Transport("connection closed".to_string()))
    }

    async fn send_done(&mut self) -> Result<()> {
        self.tx
            .send(Outbound::Control(ControlFrame::Done))
            .await
            .map_err(|_| Error::Transport("connection closed".to_string()))
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_frame_serializes() {
        let json = serde_json::to_string(&ControlFrame::Done).unwrap();
        assert_eq!(json, r#"{"type":"done"}"#);
    }

    #[test]
    fn no_audio_frame_serializes() {
        let json = serde_json::to_string(&ControlFrame::NoAudio).unwrap();
        assert_eq!(json, r#"{"type":"no_audio"}"#);
    }

    #[test]
    fn error_frame_carries_message() {
        let json = serde_json::to_string(&ControlFrame::Error {
            message: "STT error: boom".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("boom"));
    }

    #[tokio::test]
    async fn channel_transport_reports_closed() {
        let (tx, rx) = mpsc::channel::<Outbound>(1);
        let mut transport = ChannelTransport::new(tx);
        assert!(transport.is_open());

        drop(rx);
        assert!(!transport.is_open());
        assert!(transport.send_chunk(&[0u8; 4]).await.is_err());
        assert!(transport.send_done().await.is_err());
    }
}
