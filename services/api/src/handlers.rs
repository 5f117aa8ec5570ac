//! Axum Handlers for the REST API
//!
//! Room lifecycle, conversation inspection and the stand-alone speech
//! endpoints. `utoipa` doc comments generate the OpenAPI document.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use interview_core::audio;
use interview_core::error::{SynthesisError, TranscriptionError};
use interview_core::{ReconnectPolicy, SessionEntry, TurnOrchestrator, supervise};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    models::{
        CreateRoomPayload, ErrorResponse, GeneratePayload, GenerateResponse, HealthResponse,
        HistoryResponse, QuestionItem, QuestionsResponse, RoomCreated, SynthesizePayload,
        SynthesizeResponse, TranscribePayload, TranscribeResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    /// A speech collaborator failed.
    BadGateway(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::BadGateway(message) => {
                warn!(%message, "Upstream speech service failed");
                (StatusCode::BAD_GATEWAY, message)
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn is_valid_room_name(room: &str) -> bool {
    !room.is_empty()
        && room.len() <= 64
        && room
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn session(state: &AppState, room: &str) -> Result<TurnOrchestrator, ApiError> {
    state
        .sessions
        .get(room)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Room '{room}' not found")))
}

fn spawn_supervisor(
    orchestrator: TurnOrchestrator,
    policy: ReconnectPolicy,
    room: &str,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            if let Err(e) = supervise(&orchestrator, policy).await {
                error!(error = %e, "Agent could not rejoin the room");
            }
        }
        .instrument(info_span!("supervisor", %room)),
    )
}

/// Service health.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        active_rooms: state.sessions.len().await,
    })
}

/// The interview agenda, in order.
#[utoipa::path(
    get,
    path = "/api/v1/interview/questions",
    responses(
        (status = 200, description = "Agenda prompts", body = QuestionsResponse)
    )
)]
pub async fn list_questions(State(state): State<Arc<AppState>>) -> Json<QuestionsResponse> {
    let questions: Vec<QuestionItem> = state
        .agenda
        .items()
        .map(|item| QuestionItem {
            index: item.index,
            text: item.text.to_string(),
        })
        .collect();
    Json(QuestionsResponse {
        total: questions.len(),
        questions,
    })
}

/// Open a room, start its interviewer and issue the candidate's token.
#[utoipa::path(
    post,
    path = "/api/v1/rooms",
    request_body = CreateRoomPayload,
    responses(
        (status = 201, description = "Room created and agent joined", body = RoomCreated),
        (status = 400, description = "Invalid room name", body = ErrorResponse),
        (status = 409, description = "Room already exists", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRoomPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let room = match payload.room {
        Some(room) => room.trim().to_string(),
        None => format!("interview-{}", Uuid::new_v4().simple()),
    };
    if !is_valid_room_name(&room) {
        return Err(ApiError::BadRequest(
            "room names are 1-64 characters of letters, digits, '-' or '_'".to_string(),
        ));
    }
    let identity = payload.identity.unwrap_or_else(|| "candidate".to_string());
    let name = payload.name.unwrap_or_else(|| identity.clone());

    let transport = state
        .hub
        .open(&room)
        .await
        .ok_or_else(|| ApiError::Conflict(format!("Room '{room}' already exists")))?;

    let token = match state.tokens.issue(&room, &identity, &name) {
        Ok(token) => token,
        Err(e) => {
            state.hub.close(&room).await;
            return Err(e.into());
        }
    };

    let orchestrator = state.build_session(&room, transport);
    if let Err(e) = orchestrator.connect().await {
        state.hub.close(&room).await;
        return Err(ApiError::InternalServerError(
            anyhow::Error::new(e).context("agent could not join the room"),
        ));
    }

    let supervisor = spawn_supervisor(orchestrator.clone(), state.defaults.reconnect, &room);
    let entry = SessionEntry {
        orchestrator: orchestrator.clone(),
        supervisor: Some(supervisor),
    };
    if !state.sessions.insert(&room, entry).await {
        let _ = orchestrator.disconnect().await;
        return Err(ApiError::Conflict(format!("Room '{room}' already exists")));
    }
    info!(%room, %identity, "Room opened");

    Ok((
        StatusCode::CREATED,
        Json(RoomCreated {
            ws_url: state.server.room_socket_url(&room),
            room,
            identity,
            token,
        }),
    ))
}

/// Stop a room's interviewer and close the room.
#[utoipa::path(
    delete,
    path = "/api/v1/rooms/{room}",
    responses(
        (status = 204, description = "Room closed"),
        (status = 404, description = "Room not found", body = ErrorResponse)
    ),
    params(
        ("room" = String, Path, description = "Room name")
    )
)]
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<StatusCode, ApiError> {
    let entry = state
        .sessions
        .remove(&room)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Room '{room}' not found")))?;

    if let Err(e) = entry.orchestrator.disconnect().await {
        warn!(error = %e, %room, "Agent did not leave cleanly");
    }
    if let Some(supervisor) = entry.supervisor {
        supervisor.abort();
    }
    state.hub.close(&room).await;
    info!(%room, "Room closed");
    Ok(StatusCode::NO_CONTENT)
}

/// Conversation so far, with the agenda position.
#[utoipa::path(
    get,
    path = "/api/v1/rooms/{room}/history",
    responses(
        (status = 200, description = "Transcript", body = HistoryResponse),
        (status = 404, description = "Room not found", body = ErrorResponse)
    ),
    params(
        ("room" = String, Path, description = "Room name")
    )
)]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let orchestrator = session(&state, &room).await?;
    let conversation = orchestrator.conversation().lock().await;
    Ok(Json(HistoryResponse {
        history: conversation.history().into_iter().map(Into::into).collect(),
        current_question_index: conversation.position(),
        total_questions: conversation.agenda().len(),
        complete: conversation.is_complete(),
        room,
    }))
}

/// Produce the interviewer's next line for a typed answer, without speaking it.
#[utoipa::path(
    post,
    path = "/api/v1/rooms/{room}/generate",
    request_body = GeneratePayload,
    responses(
        (status = 200, description = "Next utterance", body = GenerateResponse),
        (status = 404, description = "Room not found", body = ErrorResponse)
    ),
    params(
        ("room" = String, Path, description = "Room name")
    )
)]
pub async fn generate_next(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Json(payload): Json<GeneratePayload>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let orchestrator = session(&state, &room).await?;
    let utterance = orchestrator.generate_next(&payload.user_input).await;
    Ok(Json(utterance.into()))
}

/// Restart the interview from the opening prompt.
#[utoipa::path(
    post,
    path = "/api/v1/rooms/{room}/reset",
    responses(
        (status = 204, description = "Conversation reset"),
        (status = 404, description = "Room not found", body = ErrorResponse)
    ),
    params(
        ("room" = String, Path, description = "Room name")
    )
)]
pub async fn reset_room(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<StatusCode, ApiError> {
    session(&state, &room).await?.reset().await;
    Ok(StatusCode::NO_CONTENT)
}

/// Transcribe a WAV recording.
#[utoipa::path(
    post,
    path = "/api/v1/transcribe",
    request_body = TranscribePayload,
    responses(
        (status = 200, description = "Recognised text", body = TranscribeResponse),
        (status = 400, description = "Audio could not be decoded", body = ErrorResponse),
        (status = 502, description = "Transcription service failed", body = ErrorResponse)
    )
)]
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TranscribePayload>,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let wav = BASE64
        .decode(payload.audio.trim())
        .map_err(|e| ApiError::BadRequest(format!("audio is not valid base64: {e}")))?;
    let (pcm, format) = audio::decode_wav(&wav)
        .map_err(|e| ApiError::BadRequest(format!("audio is not a 16-bit PCM WAV file: {e}")))?;

    let timeout = state.defaults.collaborator_timeout();
    let text = tokio::time::timeout(
        timeout,
        state.transcriber.transcribe(Bytes::from(pcm), format),
    )
    .await
    .unwrap_or(Err(TranscriptionError::Timeout(timeout)))
    .map_err(|e| ApiError::BadGateway(e.to_string()))?;

    Ok(Json(TranscribeResponse { text }))
}

/// Synthesize speech for a line of text.
#[utoipa::path(
    post,
    path = "/api/v1/synthesize",
    request_body = SynthesizePayload,
    responses(
        (status = 200, description = "WAV audio", body = SynthesizeResponse),
        (status = 400, description = "Empty text", body = ErrorResponse),
        (status = 502, description = "Speech service failed", body = ErrorResponse)
    )
)]
pub async fn synthesize(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SynthesizePayload>,
) -> Result<Json<SynthesizeResponse>, ApiError> {
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    let voice = payload
        .voice
        .unwrap_or_else(|| state.defaults.orchestrator.voice.clone());

    let timeout = state.defaults.collaborator_timeout();
    let artifact = tokio::time::timeout(timeout, state.synthesizer.synthesize(text, &voice))
        .await
        .unwrap_or(Err(SynthesisError::Timeout(timeout)))
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;

    let wav = audio::encode_wav(&artifact.audio, artifact.format)?;
    let response = SynthesizeResponse {
        audio: BASE64.encode(wav),
        format: "wav".to_string(),
        sample_rate: artifact.format.sample_rate,
        duration_ms: artifact.duration().as_millis() as u64,
    };
    artifact.release();
    Ok(Json(response))
}
