//! Command-line interview agent.
//!
//! Joins a LiveKit room, interviews whoever joins, and keeps the connection
//! alive until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use interview_core::{
    AgentConfig, Collaborators, ConversationState, GeneratorSettings, OrchestratorSettings,
    ReconnectPolicy, ResponseGenerator, TurnOrchestrator,
    llm_client::OpenAICompatibleClient,
    speech::OpenAISpeech,
    supervise,
    token::TokenIssuer,
    transport::livekit::LiveKitTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "interview-agent", version, about = "Voice interview agent for LiveKit rooms")]
struct Cli {
    /// Room to join. Overrides ROOM_NAME.
    #[arg(long)]
    room: Option<String>,

    /// Log at DEBUG level regardless of RUST_LOG.
    #[arg(long)]
    debug: bool,

    /// Agenda file with one prompt per line. Overrides AGENDA_PATH.
    #[arg(long)]
    agenda: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::from_env().context("Failed to load configuration")?;
    if let Some(room) = cli.room {
        config.room_name = room;
    }
    if let Some(agenda) = cli.agenda {
        config.agenda_path = Some(agenda);
    }

    let level = if cli.debug { Level::DEBUG } else { config.log_level };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let url = config
        .require_livekit_url()
        .context("LIVEKIT_URL is required to join a room")?
        .to_string();
    let agenda = config.load_agenda().context("Failed to load the agenda")?;
    info!(questions = agenda.len(), room = %config.room_name, "Starting interview agent");

    let speech = Arc::new(OpenAISpeech::new(
        config.speech_config(),
        config.tts_model.clone(),
        config.stt_model.clone(),
    ));
    let llm = Arc::new(OpenAICompatibleClient::new(
        config.llm_config(),
        config.chat_model.clone(),
    ));
    let tokens = TokenIssuer::new(
        config.livekit_api_key.clone(),
        config.livekit_api_secret.clone(),
    );
    let generator = ResponseGenerator::new(
        llm,
        GeneratorSettings {
            timeout: config.collaborator_timeout,
            ..GeneratorSettings::default()
        },
    );

    let orchestrator = TurnOrchestrator::new(
        ConversationState::shared(agenda, config.transcript_capacity),
        Collaborators {
            generator,
            synthesizer: speech.clone(),
            transcriber: speech,
            transport: Arc::new(LiveKitTransport::default()),
            tokens: tokens.clone(),
        },
        OrchestratorSettings::from_config(&config, url.clone()),
    );

    orchestrator
        .connect()
        .await
        .context("Failed to join the room")?;

    let candidate_token = tokens
        .issue(&config.room_name, "candidate", "Candidate")
        .context("Failed to issue a candidate token")?;
    println!(
        "Interviewer is waiting in room '{}' at {url}.\nCandidate token:\n{candidate_token}",
        config.room_name
    );

    let policy = ReconnectPolicy::from_config(&config);
    let mut supervisor = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { supervise(&orchestrator, policy).await })
    };

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Received shutdown signal. Leaving the room...");
            None
        }
        finished = &mut supervisor => Some(finished),
    };

    if let Err(e) = orchestrator.disconnect().await {
        warn!(error = %e, "Did not leave the room cleanly");
    }

    match outcome {
        None => {
            supervisor.abort();
            info!("Interview agent stopped");
            Ok(())
        }
        Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(e))) => {
            error!(error = %e, "Gave up reconnecting");
            Err(e).context("Lost the room and could not rejoin")
        }
        Some(Err(e)) => Err(e).context("Supervisor task failed"),
    }
}
