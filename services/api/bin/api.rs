//! Main Entrypoint for the Interview API Service
//!
//! This binary is responsible for:
//! 1. Loading the agent and server configuration from the environment.
//! 2. Building the collaborators shared by every room.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Serving until Ctrl+C, then closing every open room.

use anyhow::Context;
use interview_api::{
    config::ServerConfig,
    router::create_router,
    state::{AppState, SessionDefaults},
    ws::RoomHub,
};
use interview_core::{
    AgentConfig, SessionRegistry,
    llm_client::OpenAICompatibleClient,
    speech::OpenAISpeech,
    token::TokenIssuer,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = AgentConfig::from_env().context("Failed to load agent configuration")?;
    let server = ServerConfig::from_env().context("Failed to load server configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let agenda = config.load_agenda().context("Failed to load the agenda")?;
    info!(questions = agenda.len(), "Agenda loaded");

    let speech = Arc::new(OpenAISpeech::new(
        config.speech_config(),
        config.tts_model.clone(),
        config.stt_model.clone(),
    ));
    let llm = Arc::new(OpenAICompatibleClient::new(
        config.llm_config(),
        config.chat_model.clone(),
    ));
    let sessions = SessionRegistry::new();

    let app_state = Arc::new(AppState {
        server: Arc::new(server.clone()),
        defaults: Arc::new(SessionDefaults::from_config(&config)),
        agenda,
        tokens: TokenIssuer::new(
            config.livekit_api_key.clone(),
            config.livekit_api_secret.clone(),
        ),
        llm,
        synthesizer: speech.clone(),
        transcriber: speech,
        sessions: sessions.clone(),
        hub: RoomHub::new(),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %server.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(server.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // --- 6. Close Rooms ---
    for (room, entry) in sessions.drain().await {
        if let Err(e) = entry.orchestrator.disconnect().await {
            warn!(%room, error = %e, "Agent did not leave cleanly");
        }
        if let Some(supervisor) = entry.supervisor {
            supervisor.abort();
        }
    }

    info!("Server has shut down.");
    Ok(())
}
