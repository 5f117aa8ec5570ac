pub mod agenda;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod generator;
pub mod llm_client;
pub mod orchestrator;
pub mod playback;
pub mod registry;
pub mod segmenter;
pub mod speech;
pub mod supervisor;
pub mod token;
pub mod transport;

pub use agenda::Agenda;
pub use config::{AgentConfig, ConfigError, Provider};
pub use conversation::{ConversationState, Role, SharedConversation, Turn};
pub use generator::{GeneratorSettings, ResponseGenerator, Utterance, UtteranceSource};
pub use orchestrator::{
    Collaborators, LinkStatus, OrchestratorSettings, Phase, TurnOrchestrator, TurnOutcome,
};
pub use registry::{SessionEntry, SessionRegistry};
pub use supervisor::{ReconnectPolicy, supervise};
