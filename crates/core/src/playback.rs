//! Hands synthesized audio to the transport and reports how long it plays.
//!
//! The reported duration is computed from the byte length and the format, not
//! measured, so the same input always yields the same duration and the
//! scheduler can be tested without a live transport.

use crate::audio::AudioFormat;
use crate::error::{PlaybackError, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// A block of PCM16 audio on its way to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: Bytes,
    pub format: AudioFormat,
}

impl AudioFrame {
    pub fn samples_per_channel(&self) -> usize {
        self.data.len() / self.format.frame_bytes().max(1)
    }
}

/// The outbound audio track of a transport session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn capture_frame(&self, frame: AudioFrame) -> Result<(), TransportError>;
}

/// Result of one [`AudioPlaybackScheduler::play`] call.
#[derive(Debug)]
pub enum PlaybackOutcome {
    /// Every byte was delivered; the audio lasts `duration`.
    Played { duration: Duration, frames: usize },
    /// Delivery stopped early. Nothing should be waited for.
    Failed(PlaybackError),
}

impl PlaybackOutcome {
    /// Time the caller should wait before the channel is free again.
    pub fn duration(&self) -> Duration {
        match self {
            PlaybackOutcome::Played { duration, .. } => *duration,
            PlaybackOutcome::Failed(_) => Duration::ZERO,
        }
    }

    pub fn is_played(&self) -> bool {
        matches!(self, PlaybackOutcome::Played { .. })
    }
}

/// Exact playback time of `len` bytes of `format` audio.
pub fn playback_duration(len: usize, format: AudioFormat) -> Duration {
    format.duration_of(len)
}

#[derive(Clone)]
pub struct AudioPlaybackScheduler {
    sink: Arc<dyn AudioSink>,
    frame_duration: Option<Duration>,
    send_timeout: Duration,
}

impl AudioPlaybackScheduler {
    /// Delivers each utterance to `sink` in a single capture call.
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            frame_duration: None,
            send_timeout: Duration::from_secs(10),
        }
    }

    /// Splits utterances into frames of `frame_duration` instead. The last
    /// frame carries whatever remains.
    pub fn with_frame_duration(mut self, frame_duration: Duration) -> Self {
        self.frame_duration = Some(frame_duration).filter(|d| !d.is_zero());
        self
    }

    /// Upper bound on a single capture call.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Delivers `audio` to the sink and returns how long it will play.
    ///
    /// Empty input plays for zero seconds without touching the sink. Failures
    /// are reported in the outcome, never raised.
    pub async fn play(&self, audio: &Bytes, format: AudioFormat) -> PlaybackOutcome {
        if audio.is_empty() {
            return PlaybackOutcome::Played {
                duration: Duration::ZERO,
                frames: 0,
            };
        }
        if format.is_degenerate() {
            let reason = format!("{format:?}");
            error!(%reason, "Refusing to play audio in a degenerate format");
            return PlaybackOutcome::Failed(PlaybackError::UnsupportedFormat(reason));
        }

        let chunk_len = match self.frame_duration {
            Some(frame) => format.bytes_for(frame).max(format.frame_bytes()),
            None => audio.len(),
        };

        let mut frames = 0;
        let mut offset = 0;
        while offset < audio.len() {
            let end = (offset + chunk_len).min(audio.len());
            let frame = AudioFrame {
                data: audio.slice(offset..end),
                format,
            };
            if let Err(e) = self.send(frame).await {
                error!(error = %e, delivered = offset, "Audio frame delivery failed");
                return PlaybackOutcome::Failed(e.into());
            }
            frames += 1;
            offset = end;
        }

        let duration = playback_duration(audio.len(), format);
        debug!(
            bytes = audio.len(),
            frames,
            duration_ms = duration.as_millis() as u64,
            "Delivered utterance audio"
        );
        PlaybackOutcome::Played { duration, frames }
    }

    async fn send(&self, frame: AudioFrame) -> Result<(), TransportError> {
        tokio::time::timeout(self.send_timeout, self.sink.capture_frame(frame))
            .await
            .map_err(|_| TransportError::Timeout(self.send_timeout))?
    }
}
