//! Error types for each collaborator boundary.
//!
//! Every external call the orchestrator makes returns one of these. Only
//! [`TransportError`] ever escapes the orchestrator; the others are turned
//! into fallbacks at the call site.

use std::time::Duration;

/// The text-generation collaborator failed or produced nothing usable.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("text generation request failed: {0}")]
    Request(String),
    #[error("text generation returned an empty completion")]
    Empty,
    #[error("text generation timed out after {0:?}")]
    Timeout(Duration),
}

/// No audio artifact could be produced for an utterance.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("speech synthesis request failed: {0}")]
    Request(String),
    #[error("speech synthesis returned undecodable audio: {0}")]
    Decode(String),
    #[error("speech synthesis returned no audio")]
    Empty,
    #[error("speech synthesis timed out after {0:?}")]
    Timeout(Duration),
}

/// The transcription collaborator failed. Treated as "no usable input".
#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("transcription request failed: {0}")]
    Request(String),
    #[error("could not encode utterance audio: {0}")]
    Encode(String),
    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
}

/// Connect, send or disconnect on the real-time transport failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not issue join credentials: {0}")]
    Credentials(#[from] TokenError),
    #[error("could not connect to room '{room}': {reason}")]
    Connect { room: String, reason: String },
    #[error("could not publish the outbound audio track: {0}")]
    Publish(String),
    #[error("audio frame delivery failed: {0}")]
    Send(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Issuing or verifying a room access token failed.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token encoding failed: {0}")]
    Encode(String),
    #[error("token rejected: {0}")]
    Invalid(String),
    #[error("token is not valid for room '{0}'")]
    WrongRoom(String),
}

/// Audio could not be handed to the outbound sink.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio format cannot be played: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Sink(#[from] TransportError),
}
