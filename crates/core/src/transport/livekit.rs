//! LiveKit rooms as a [`Transport`].

use super::{Connection, InboundAudio, Transport, TransportEvent, TransportHandle};
use crate::audio::{self, AudioFormat};
use crate::error::TransportError;
use crate::playback::{AudioFrame, AudioSink};
use crate::token::JoinGrant;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use livekit::options::TrackPublishOptions;
use livekit::prelude::*;
use livekit::webrtc::{
    audio_frame::AudioFrame as RtcAudioFrame,
    audio_source::{AudioSourceOptions, RtcAudioSource, native::NativeAudioSource},
    audio_stream::native::NativeAudioStream,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

const TRACK_NAME: &str = "agent-voice";
const EVENT_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;

pub struct LiveKitTransport {
    inbound: AudioFormat,
    queue_ms: u32,
}

impl Default for LiveKitTransport {
    fn default() -> Self {
        Self {
            inbound: AudioFormat::PCM16_48K_MONO,
            queue_ms: 1000,
        }
    }
}

impl LiveKitTransport {
    /// Format remote audio tracks are resampled to before they reach the agent.
    pub fn with_inbound_format(mut self, inbound: AudioFormat) -> Self {
        self.inbound = inbound;
        self
    }
}

#[async_trait]
impl Transport for LiveKitTransport {
    async fn connect(
        &self,
        grant: &JoinGrant,
        outbound: AudioFormat,
    ) -> Result<Connection, TransportError> {
        let (room, room_events) = Room::connect(&grant.url, &grant.token, RoomOptions::default())
            .await
            .map_err(|e| TransportError::Connect {
                room: grant.room.clone(),
                reason: e.to_string(),
            })?;
        let room = Arc::new(room);
        info!(room = %room.name(), identity = %grant.identity, "Joined LiveKit room");

        let source = NativeAudioSource::new(
            AudioSourceOptions::default(),
            outbound.sample_rate,
            u32::from(outbound.channels),
            self.queue_ms,
        );
        let track =
            LocalAudioTrack::create_audio_track(TRACK_NAME, RtcAudioSource::Native(source.clone()));
        let published = room
            .local_participant()
            .publish_track(
                LocalTrack::Audio(track),
                TrackPublishOptions {
                    source: TrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = published {
            // Leave rather than sit in the room without a voice.
            if let Err(close) = room.close().await {
                warn!(error = %close, "Failed to leave after publish error");
            }
            return Err(TransportError::Publish(e.to_string()));
        }

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, events) = mpsc::channel(EVENT_BUFFER);

        // Participants already in the room never produce a connect event.
        for identity in room.remote_participants().keys() {
            let _ = tx
                .send(TransportEvent::ParticipantJoined {
                    identity: identity.to_string(),
                })
                .await;
        }

        let forward = tokio::spawn(forward_room_events(
            room_events,
            tx,
            connected.clone(),
            self.inbound,
        ));

        Ok(Connection {
            sink: Arc::new(LiveKitSink {
                source,
                connected: connected.clone(),
            }),
            events,
            handle: Box::new(LiveKitHandle {
                room,
                connected,
                forward: forward.abort_handle(),
            }),
        })
    }
}

async fn forward_room_events(
    mut room_events: mpsc::UnboundedReceiver<RoomEvent>,
    tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    inbound: AudioFormat,
) {
    while let Some(event) = room_events.recv().await {
        let forwarded = match event {
            RoomEvent::ParticipantConnected(participant) => TransportEvent::ParticipantJoined {
                identity: participant.identity().to_string(),
            },
            RoomEvent::ParticipantDisconnected(participant) => TransportEvent::ParticipantLeft {
                identity: participant.identity().to_string(),
            },
            RoomEvent::TrackSubscribed {
                track: RemoteTrack::Audio(track),
                participant,
                ..
            } => {
                let identity = participant.identity().to_string();
                debug!(participant = %identity, "Subscribed to remote audio track");
                TransportEvent::AudioTrackSubscribed {
                    participant: identity,
                    audio: pump_track(track, inbound),
                }
            }
            RoomEvent::Disconnected { reason } => {
                connected.store(false, Ordering::SeqCst);
                let _ = tx
                    .send(TransportEvent::Disconnected {
                        reason: format!("{reason:?}"),
                    })
                    .await;
                break;
            }
            _ => continue,
        };
        if tx.send(forwarded).await.is_err() {
            break;
        }
    }
    connected.store(false, Ordering::SeqCst);
}

fn pump_track(track: RemoteAudioTrack, format: AudioFormat) -> InboundAudio {
    let (tx, frames) = mpsc::channel(INBOUND_BUFFER);
    let mut stream = NativeAudioStream::new(
        track.rtc_track(),
        format.sample_rate as i32,
        i32::from(format.channels),
    );
    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            if tx
                .send(Bytes::from(audio::pcm16_to_bytes(&frame.data)))
                .await
                .is_err()
            {
                break;
            }
        }
        stream.close();
    });
    InboundAudio { format, frames }
}

struct LiveKitSink {
    source: NativeAudioSource,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl AudioSink for LiveKitSink {
    async fn capture_frame(&self, frame: AudioFrame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let samples = audio::pcm16_from_bytes(&frame.data);
        let rtc_frame = RtcAudioFrame {
            samples_per_channel: frame.samples_per_channel() as u32,
            data: samples.into(),
            sample_rate: frame.format.sample_rate,
            num_channels: u32::from(frame.format.channels),
        };
        self.source
            .capture_frame(&rtc_frame)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct LiveKitHandle {
    room: Arc<Room>,
    connected: Arc<AtomicBool>,
    forward: AbortHandle,
}

#[async_trait]
impl TransportHandle for LiveKitHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.room.connection_state() != ConnectionState::Disconnected
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.forward.abort();
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.room.close().await {
            warn!(error = %e, "LiveKit room did not close cleanly");
            return Err(TransportError::Send(e.to_string()));
        }
        info!(room = %self.room.name(), "Left LiveKit room");
        Ok(())
    }
}
