//! Axum Router Configuration
//!
//! The REST API and the room socket under `/api/v1`, plus the OpenAPI
//! document and Swagger UI.

use crate::{
    handlers,
    models::{
        CreateRoomPayload, ErrorResponse, GeneratePayload, GenerateResponse, HealthResponse,
        HistoryMessage, HistoryResponse, MessageRole, QuestionItem, QuestionsResponse,
        RoomCreated, SynthesizePayload, SynthesizeResponse, TranscribePayload,
        TranscribeResponse,
    },
    state::AppState,
    ws::room_socket,
};

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::list_questions,
        handlers::create_room,
        handlers::delete_room,
        handlers::get_history,
        handlers::generate_next,
        handlers::reset_room,
        handlers::transcribe,
        handlers::synthesize,
    ),
    components(
        schemas(
            HealthResponse, QuestionItem, QuestionsResponse, CreateRoomPayload, RoomCreated,
            HistoryMessage, HistoryResponse, MessageRole, GeneratePayload, GenerateResponse,
            TranscribePayload, TranscribeResponse, SynthesizePayload, SynthesizeResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "Interview API", description = "Rooms and speech services for the voice interview agent")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/health", get(handlers::health))
        .route("/interview/questions", get(handlers::list_questions))
        .route("/rooms", post(handlers::create_room))
        .route("/rooms/{room}", delete(handlers::delete_room))
        .route("/rooms/{room}/history", get(handlers::get_history))
        .route("/rooms/{room}/generate", post(handlers::generate_next))
        .route("/rooms/{room}/reset", post(handlers::reset_room))
        .route("/rooms/{room}/ws", get(room_socket))
        .route("/transcribe", post(handlers::transcribe))
        .route("/synthesize", post(handlers::synthesize))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_router)
}
