//! Speech synthesis and transcription collaborators.

mod openai;

pub use openai::OpenAISpeech;

use crate::audio::AudioFormat;
use crate::error::{SynthesisError, TranscriptionError};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Synthesized audio for one utterance, owned by whoever asked for it.
///
/// Call [`SpeechArtifact::release`] once playback has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechArtifact {
    /// Raw PCM in `format`.
    pub audio: Bytes,
    pub format: AudioFormat,
    /// The text that was synthesized.
    pub text: String,
}

impl SpeechArtifact {
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.audio.len())
    }

    /// Drops the audio buffer.
    pub fn release(self) {
        debug!(bytes = self.audio.len(), "Released synthesized audio");
    }
}

/// Turns text into audio.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SpeechArtifact, SynthesisError>;
}

/// Turns one utterance of PCM audio into text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// Returns the trimmed transcript, which may be empty when nothing was understood.
    async fn transcribe(
        &self,
        pcm: Bytes,
        format: AudioFormat,
    ) -> Result<String, TranscriptionError>;
}
