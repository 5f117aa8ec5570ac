//! An in-process transport with a controllable far end.
//!
//! The agent side joins through [`Transport::connect`] as usual. Whoever holds
//! a clone of the [`LoopbackTransport`] plays the room: announcing
//! participants, opening inbound audio tracks, receiving the agent's audio and
//! dropping the connection. Tests drive it directly and the API's room hub
//! drives it from a candidate's WebSocket.

use super::{Connection, InboundAudio, Transport, TransportEvent, TransportHandle};
use crate::audio::AudioFormat;
use crate::error::TransportError;
use crate::playback::{AudioFrame, AudioSink};
use crate::token::JoinGrant;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

const EVENT_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 1024;

#[derive(Default)]
struct Session {
    events: Option<mpsc::Sender<TransportEvent>>,
    connected: Arc<AtomicBool>,
    outbound_format: Option<AudioFormat>,
}

struct Shared {
    session: Mutex<Session>,
    outbound: broadcast::Sender<AudioFrame>,
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    failing_sends: AtomicBool,
    delivered_frames: AtomicUsize,
    delivered_bytes: AtomicUsize,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_BUFFER);
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session::default()),
                outbound,
                connects: AtomicUsize::new(0),
                failing_connects: AtomicUsize::new(0),
                failing_sends: AtomicBool::new(false),
                delivered_frames: AtomicUsize::new(0),
                delivered_bytes: AtomicUsize::new(0),
            }),
        }
    }

    /// Whether an agent is currently joined.
    pub fn is_connected(&self) -> bool {
        self.shared.session().connected.load(Ordering::SeqCst)
    }

    /// Number of successful joins so far.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Makes every outbound frame delivery fail until switched off.
    pub fn fail_sends(&self, failing: bool) {
        self.shared.failing_sends.store(failing, Ordering::SeqCst);
    }

    /// Format of the agent's published track, once it has joined.
    pub fn outbound_format(&self) -> Option<AudioFormat> {
        self.shared.session().outbound_format
    }

    /// Every frame the agent delivers from now on.
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<AudioFrame> {
        self.shared.outbound.subscribe()
    }

    pub fn delivered_frames(&self) -> usize {
        self.shared.delivered_frames.load(Ordering::SeqCst)
    }

    pub fn delivered_bytes(&self) -> usize {
        self.shared.delivered_bytes.load(Ordering::SeqCst)
    }

    /// Announces a remote participant. Returns false if no agent is joined.
    pub async fn join_participant(&self, identity: &str) -> bool {
        self.emit(TransportEvent::ParticipantJoined {
            identity: identity.to_string(),
        })
        .await
    }

    pub async fn leave_participant(&self, identity: &str) -> bool {
        self.emit(TransportEvent::ParticipantLeft {
            identity: identity.to_string(),
        })
        .await
    }

    /// Opens an inbound audio track from `participant`. Audio sent on the
    /// returned channel reaches the agent; dropping it ends the track.
    pub async fn open_audio_track(
        &self,
        participant: &str,
        format: AudioFormat,
    ) -> Option<mpsc::Sender<Bytes>> {
        let (tx, frames) = mpsc::channel(INBOUND_BUFFER);
        let event = TransportEvent::AudioTrackSubscribed {
            participant: participant.to_string(),
            audio: InboundAudio { format, frames },
        };
        self.emit(event).await.then_some(tx)
    }

    /// Simulates the server dropping the agent.
    pub async fn drop_connection(&self, reason: &str) {
        let events = {
            let mut session = self.shared.session();
            session.connected.store(false, Ordering::SeqCst);
            session.events.take()
        };
        if let Some(events) = events {
            let _ = events
                .send(TransportEvent::Disconnected {
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        let events = self.shared.session().events.clone();
        match events {
            Some(events) => events.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &self,
        grant: &JoinGrant,
        outbound: AudioFormat,
    ) -> Result<Connection, TransportError> {
        let should_fail = self
            .shared
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TransportError::Connect {
                room: grant.room.clone(),
                reason: "loopback refused the connection".to_string(),
            });
        }

        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));
        {
            let mut session = self.shared.session();
            session.connected.store(false, Ordering::SeqCst);
            *session = Session {
                events: Some(tx),
                connected: connected.clone(),
                outbound_format: Some(outbound),
            };
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        debug!(room = %grant.room, identity = %grant.identity, "Loopback agent joined");

        Ok(Connection {
            sink: Arc::new(LoopbackSink {
                shared: self.shared.clone(),
                connected: connected.clone(),
            }),
            events,
            handle: Box::new(LoopbackHandle {
                shared: self.shared.clone(),
                connected,
            }),
        })
    }
}

struct LoopbackSink {
    shared: Arc<Shared>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl AudioSink for LoopbackSink {
    async fn capture_frame(&self, frame: AudioFrame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.shared.failing_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("loopback send failure".to_string()));
        }
        self.shared.delivered_frames.fetch_add(1, Ordering::SeqCst);
        self.shared
            .delivered_bytes
            .fetch_add(frame.data.len(), Ordering::SeqCst);
        // No subscriber just means nobody is listening.
        let _ = self.shared.outbound.send(frame);
        Ok(())
    }
}

struct LoopbackHandle {
    shared: Arc<Shared>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl TransportHandle for LoopbackHandle {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let mut session = self.shared.session();
            if Arc::ptr_eq(&session.connected, &self.connected) {
                session.events = None;
            }
        }
        Ok(())
    }
}
