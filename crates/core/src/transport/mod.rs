//! The real-time transport seam.
//!
//! A [`Transport`] joins a room and hands back a [`Connection`]: the outbound
//! audio sink, a channel of [`TransportEvent`]s and a handle for liveness and
//! teardown. Room callbacks are delivered as events on the channel; nothing
//! registers handlers on the connection.

pub mod loopback;
#[cfg(feature = "livekit")]
pub mod livekit;

use crate::audio::AudioFormat;
use crate::error::TransportError;
use crate::playback::AudioSink;
use crate::token::JoinGrant;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound audio from one remote participant, as PCM16 blocks.
#[derive(Debug)]
pub struct InboundAudio {
    pub format: AudioFormat,
    pub frames: mpsc::Receiver<Bytes>,
}

#[derive(Debug)]
pub enum TransportEvent {
    ParticipantJoined { identity: String },
    AudioTrackSubscribed { participant: String, audio: InboundAudio },
    ParticipantLeft { identity: String },
    Disconnected { reason: String },
}

/// Liveness and teardown of one joined session.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Leaves the room. Calling it again is a no-op.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

pub struct Connection {
    pub sink: Arc<dyn AudioSink>,
    pub events: mpsc::Receiver<TransportEvent>,
    pub handle: Box<dyn TransportHandle>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Joins the room named in `grant` and publishes an outbound audio track
    /// carrying `outbound` audio.
    async fn connect(
        &self,
        grant: &JoinGrant,
        outbound: AudioFormat,
    ) -> Result<Connection, TransportError>;
}
