//! Bridges a candidate's WebSocket and their room.

use super::protocol::{ClientMessage, ServerMessage};
use crate::{handlers::ApiError, state::AppState};
use anyhow::Result;
use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use interview_core::TurnOrchestrator;
use interview_core::audio::AudioFormat;
use interview_core::transport::loopback::LoopbackTransport;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Instrument, debug, error, info, instrument, warn};

/// Sample rate assumed for candidate audio when the client does not say.
const DEFAULT_INBOUND_RATE: u32 = 48_000;

#[derive(Deserialize, Debug)]
pub struct SocketParams {
    pub token: String,
    /// Sample rate of the mono PCM16 frames the client sends.
    pub sample_rate: Option<u32>,
}

/// Axum handler admitting a candidate to a room and upgrading to a WebSocket.
pub async fn room_socket(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(params): Query<SocketParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let claims = state
        .tokens
        .verify(&params.token, &room)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    let transport = state
        .hub
        .get(&room)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Room '{room}' not found")))?;
    let orchestrator = state
        .sessions
        .get(&room)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Room '{room}' has no agent")))?;

    let inbound = AudioFormat::pcm16(params.sample_rate.unwrap_or(DEFAULT_INBOUND_RATE), 1);
    if inbound.is_degenerate() {
        return Err(ApiError::BadRequest(
            "sample_rate must be positive".to_string(),
        ));
    }

    let identity = claims.sub;
    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, room, identity, inbound, transport, orchestrator)
    }))
}

#[instrument(name = "room_socket", skip_all, fields(room = %room, participant = %identity))]
async fn handle_socket(
    socket: WebSocket,
    room: String,
    identity: String,
    inbound: AudioFormat,
    transport: LoopbackTransport,
    orchestrator: TurnOrchestrator,
) {
    let (mut socket_tx, mut socket_rx) = socket.split();
    let outbound_format = transport
        .outbound_format()
        .unwrap_or(AudioFormat::PCM16_24K_MONO);
    if send_msg(&mut socket_tx, outbound_format.into()).await.is_err() {
        warn!("Candidate left before the handshake");
        return;
    }

    let mut outbound = transport.subscribe_outbound();
    let mut phases = orchestrator.subscribe_phase();

    if !transport.join_participant(&identity).await {
        error!("Agent is not in the room");
        let _ = send_msg(
            &mut socket_tx,
            ServerMessage::Error {
                message: "the interviewer is not connected yet, try again shortly".to_string(),
            },
        )
        .await;
        return;
    }
    let Some(track) = transport.open_audio_track(&identity, inbound).await else {
        error!("Agent left before the audio track opened");
        return;
    };
    info!(sample_rate = inbound.sample_rate, "Candidate joined");

    let phase = *phases.borrow_and_update();
    if send_msg(&mut socket_tx, ServerMessage::Phase { phase }).await.is_err() {
        transport.leave_participant(&identity).await;
        return;
    }

    loop {
        tokio::select! {
            incoming = socket_rx.next() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    if track.send(data).await.is_err() {
                        warn!("Agent stopped listening");
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Transcript { text }) => {
                            let orchestrator = orchestrator.clone();
                            tokio::spawn(
                                async move {
                                    let outcome = orchestrator.on_transcript(&text).await;
                                    debug!(?outcome, "Typed answer handled");
                                }
                                .in_current_span(),
                            );
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed client message"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Candidate closed the socket");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Error receiving from candidate socket");
                    break;
                }
            },
            frame = outbound.recv() => match frame {
                Ok(frame) => {
                    if socket_tx.send(Message::Binary(frame.data)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Candidate socket fell behind, audio frames skipped");
                }
                Err(RecvError::Closed) => break,
            },
            changed = phases.changed() => {
                if changed.is_err() {
                    break;
                }
                let phase = *phases.borrow_and_update();
                if send_msg(&mut socket_tx, ServerMessage::Phase { phase }).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(track);
    transport.leave_participant(&identity).await;
    info!("Candidate socket finished");
}

async fn send_msg(socket_tx: &mut SplitSink<WebSocket, Message>, msg: ServerMessage) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
