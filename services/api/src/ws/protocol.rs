//! Text messages on the room socket. Audio travels as binary PCM16 frames.

use interview_core::Phase;
use interview_core::audio::AudioFormat;
use serde::{Deserialize, Serialize};

/// Messages sent from the candidate's client to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A typed answer, handled as if it had been spoken.
    Transcript { text: String },
}

/// Messages sent from the server to the candidate's client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent first: the format of every binary frame that follows.
    AudioFormat {
        sample_rate: u32,
        channels: u16,
        sample_width: u16,
    },
    /// The agent started or stopped speaking, finished the interview, or left the room.
    Phase { phase: Phase },
    Error { message: String },
}

impl From<AudioFormat> for ServerMessage {
    fn from(format: AudioFormat) -> Self {
        ServerMessage::AudioFormat {
            sample_rate: format.sample_rate,
            channels: format.channels,
            sample_width: format.sample_width,
        }
    }
}
