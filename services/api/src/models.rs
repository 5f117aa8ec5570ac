//! Request and response bodies of the REST API, with their OpenAPI schemas.

use interview_core::conversation::{Role, Turn};
use interview_core::{Utterance, UtteranceSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Transcript roles as exposed over HTTP.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Candidate => MessageRole::User,
            Role::Interviewer => MessageRole::Assistant,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HistoryMessage {
    #[schema(value_type = String, example = "assistant")]
    pub role: MessageRole,
    pub content: String,
}

impl From<Turn> for HistoryMessage {
    fn from(turn: Turn) -> Self {
        Self {
            role: turn.role.into(),
            content: turn.text,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HistoryResponse {
    pub room: String,
    pub history: Vec<HistoryMessage>,
    pub current_question_index: usize,
    pub total_questions: usize,
    pub complete: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    pub active_rooms: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct QuestionItem {
    pub index: usize,
    pub text: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct QuestionsResponse {
    pub questions: Vec<QuestionItem>,
    pub total: usize,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct CreateRoomPayload {
    /// Generated when omitted.
    #[schema(example = "voice-interview-room")]
    pub room: Option<String>,
    #[schema(example = "candidate")]
    pub identity: Option<String>,
    #[schema(example = "Candidate")]
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct RoomCreated {
    pub room: String,
    pub identity: String,
    /// Access token for the candidate, passed as `?token=` on the room socket.
    pub token: String,
    pub ws_url: String,
}

#[derive(Deserialize, ToSchema)]
pub struct GeneratePayload {
    #[schema(example = "I have built REST APIs with axum for three years.")]
    pub user_input: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct GenerateResponse {
    pub text: String,
    #[schema(value_type = String, example = "generated")]
    pub source: UtteranceSource,
}

impl From<Utterance> for GenerateResponse {
    fn from(utterance: Utterance) -> Self {
        Self {
            text: utterance.text,
            source: utterance.source,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct TranscribePayload {
    /// Base64-encoded 16-bit PCM WAV file.
    pub audio: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct TranscribeResponse {
    pub text: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SynthesizePayload {
    #[schema(example = "Can you tell me about your experience with REST APIs?")]
    pub text: String,
    /// Defaults to the configured voice.
    #[schema(example = "alloy")]
    pub voice: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SynthesizeResponse {
    /// Base64-encoded WAV file.
    pub audio: String,
    #[schema(example = "wav")]
    pub format: String,
    pub sample_rate: u32,
    pub duration_ms: u64,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}
