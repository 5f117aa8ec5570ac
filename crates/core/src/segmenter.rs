//! Splits an inbound PCM16 stream into candidate utterances.
//!
//! Energy based: a frame whose RMS level rises above the activation
//! threshold opens an utterance, and the utterance closes once the level has
//! stayed below the (lower) release threshold for the silence hang-over.
//! A short stretch of audio from before activation is kept as prefix padding
//! so the first syllable is not clipped.

use crate::audio::{self, AudioFormat};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SegmenterSettings {
    pub activate_threshold: f32,
    pub release_threshold: f32,
    pub silence_hangover: Duration,
    pub prefix_padding: Duration,
    /// Utterances with less voiced audio than this are discarded as noise.
    pub min_speech: Duration,
    /// Longer utterances are cut and emitted as they are.
    pub max_utterance: Duration,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            activate_threshold: 0.035,
            release_threshold: 0.02,
            silence_hangover: Duration::from_millis(700),
            prefix_padding: Duration::from_millis(200),
            min_speech: Duration::from_millis(250),
            max_utterance: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
enum State {
    Idle {
        prefix: VecDeque<u8>,
    },
    Speaking {
        buffer: BytesMut,
        voiced: usize,
        silent: usize,
    },
}

#[derive(Debug)]
pub struct UtteranceSegmenter {
    settings: SegmenterSettings,
    format: AudioFormat,
    state: State,
    prefix_bytes: usize,
    hangover_bytes: usize,
    min_speech_bytes: usize,
    max_bytes: usize,
}

impl UtteranceSegmenter {
    pub fn new(format: AudioFormat, settings: SegmenterSettings) -> Self {
        Self {
            prefix_bytes: format.bytes_for(settings.prefix_padding),
            hangover_bytes: format.bytes_for(settings.silence_hangover),
            min_speech_bytes: format.bytes_for(settings.min_speech),
            max_bytes: format.bytes_for(settings.max_utterance).max(format.frame_bytes()),
            settings,
            format,
            state: State::Idle {
                prefix: VecDeque::new(),
            },
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self.state, State::Speaking { .. })
    }

    /// Feeds one block of PCM16 audio. Returns a finished utterance, if this
    /// block completed one.
    pub fn push(&mut self, pcm: &[u8]) -> Option<Bytes> {
        if pcm.is_empty() {
            return None;
        }
        let level = audio::rms(&audio::pcm16_from_bytes(pcm));

        match &mut self.state {
            State::Idle { prefix } => {
                if level >= self.settings.activate_threshold {
                    let mut buffer = BytesMut::with_capacity(prefix.len() + pcm.len());
                    buffer.extend(prefix.drain(..));
                    buffer.extend_from_slice(pcm);
                    self.state = State::Speaking {
                        buffer,
                        voiced: pcm.len(),
                        silent: 0,
                    };
                } else {
                    prefix.extend(pcm.iter().copied());
                    let excess = prefix.len().saturating_sub(self.prefix_bytes);
                    prefix.drain(..excess);
                }
                None
            }
            State::Speaking {
                buffer,
                voiced,
                silent,
            } => {
                buffer.extend_from_slice(pcm);
                if level >= self.settings.release_threshold {
                    *voiced += pcm.len();
                    *silent = 0;
                } else {
                    *silent += pcm.len();
                }
                if *silent >= self.hangover_bytes || buffer.len() >= self.max_bytes {
                    self.finish()
                } else {
                    None
                }
            }
        }
    }

    /// Closes any open utterance, e.g. when the inbound track ends.
    pub fn flush(&mut self) -> Option<Bytes> {
        match self.state {
            State::Speaking { .. } => self.finish(),
            State::Idle { .. } => None,
        }
    }

    fn finish(&mut self) -> Option<Bytes> {
        let previous = std::mem::replace(
            &mut self.state,
            State::Idle {
                prefix: VecDeque::new(),
            },
        );
        match previous {
            State::Speaking { buffer, voiced, .. } if voiced >= self.min_speech_bytes => {
                Some(buffer.freeze())
            }
            _ => None,
        }
    }
}
