//! Shared Application State
//!
//! Everything a handler needs: the agenda, the collaborators shared by every
//! room, the per-room defaults, and the live sessions.

use crate::config::ServerConfig;
use crate::ws::RoomHub;
use interview_core::llm_client::TextGenerator;
use interview_core::speech::{SpeechSynthesizer, SpeechTranscriber};
use interview_core::token::TokenIssuer;
use interview_core::transport::loopback::LoopbackTransport;
use interview_core::{
    Agenda, AgentConfig, Collaborators, ConversationState, GeneratorSettings,
    OrchestratorSettings, ReconnectPolicy, ResponseGenerator, SessionRegistry, TurnOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;

/// Settings every new room starts from.
#[derive(Clone, Debug)]
pub struct SessionDefaults {
    /// Template; the room name is filled in per room.
    pub orchestrator: OrchestratorSettings,
    pub generator: GeneratorSettings,
    pub transcript_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl SessionDefaults {
    pub fn from_config(config: &AgentConfig) -> Self {
        let generator = GeneratorSettings {
            timeout: config.collaborator_timeout,
            ..GeneratorSettings::default()
        };
        Self {
            orchestrator: OrchestratorSettings::from_config(config, "hub://local"),
            generator,
            transcript_capacity: config.transcript_capacity,
            reconnect: ReconnectPolicy::from_config(config),
        }
    }

    pub fn collaborator_timeout(&self) -> Duration {
        self.orchestrator.collaborator_timeout
    }
}

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<ServerConfig>,
    pub defaults: Arc<SessionDefaults>,
    pub agenda: Agenda,
    pub tokens: TokenIssuer,
    pub llm: Arc<dyn TextGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub transcriber: Arc<dyn SpeechTranscriber>,
    pub sessions: SessionRegistry,
    pub hub: RoomHub,
}

impl AppState {
    /// Builds an orchestrator for `room` with a fresh conversation, joined
    /// through `transport`.
    pub fn build_session(&self, room: &str, transport: LoopbackTransport) -> TurnOrchestrator {
        let defaults = &self.defaults;
        let settings = OrchestratorSettings {
            room: room.to_string(),
            ..defaults.orchestrator.clone()
        };
        let conversation =
            ConversationState::shared(self.agenda.clone(), defaults.transcript_capacity);
        TurnOrchestrator::new(
            conversation,
            Collaborators {
                generator: ResponseGenerator::new(self.llm.clone(), defaults.generator.clone()),
                synthesizer: self.synthesizer.clone(),
                transcriber: self.transcriber.clone(),
                transport: Arc::new(transport),
                tokens: self.tokens.clone(),
            },
            settings,
        )
    }
}
