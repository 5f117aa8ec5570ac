use crate::agenda::{Agenda, AgendaError};
use crate::conversation::DEFAULT_TRANSCRIPT_CAPACITY;
use async_openai::config::OpenAIConfig;
use secrecy::{ExposeSecret, SecretString};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which service answers text-generation requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    fn default_chat_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Gemini => "gemini-1.5-flash",
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
///
/// Passed explicitly to whatever needs it; nothing reads the environment
/// after this is built.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub livekit_url: Option<String>,
    pub livekit_api_key: String,
    pub livekit_api_secret: SecretString,
    pub room_name: String,
    pub agent_identity: String,
    pub agent_name: String,
    pub provider: Provider,
    pub openai_api_key: SecretString,
    pub gemini_api_key: Option<SecretString>,
    pub chat_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub stt_model: String,
    pub agenda_path: Option<PathBuf>,
    pub transcript_capacity: usize,
    pub settling_delay: Duration,
    pub reconnect_interval: Duration,
    pub reconnect_max_attempts: Option<u32>,
    pub collaborator_timeout: Duration,
    pub log_level: Level,
}

impl AgentConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let livekit_api_key = required("LIVEKIT_API_KEY")?;
        let livekit_api_secret = SecretString::from(required("LIVEKIT_API_SECRET")?);
        let livekit_url = std::env::var("LIVEKIT_URL").ok();

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{other}' is not one of openai, gemini"),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map(SecretString::from)
            .map_err(|_| {
                ConfigError::MissingVar(
                    "OPENAI_API_KEY must be set for speech synthesis and transcription"
                        .to_string(),
                )
            })?;
        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .ok()
            .map(SecretString::from);
        if provider == Provider::Gemini && gemini_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "GEMINI_API_KEY or GOOGLE_API_KEY must be set for 'gemini' provider".to_string(),
            ));
        }

        let chat_model = std::env::var("CHAT_MODEL")
            .unwrap_or_else(|_| provider.default_chat_model().to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let reconnect_max_attempts = match std::env::var("RECONNECT_MAX_ATTEMPTS") {
            Ok(raw) => Some(parse_value::<u32>("RECONNECT_MAX_ATTEMPTS", &raw)?),
            Err(_) => None,
        };

        Ok(Self {
            livekit_url,
            livekit_api_key,
            livekit_api_secret,
            room_name: or_default("ROOM_NAME", "voice-interview-room"),
            agent_identity: or_default("AGENT_IDENTITY", "interview-agent"),
            agent_name: or_default("AGENT_NAME", "Interview Agent"),
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            tts_model: or_default("TTS_MODEL", "tts-1"),
            tts_voice: or_default("TTS_VOICE", "alloy"),
            stt_model: or_default("STT_MODEL", "whisper-1"),
            agenda_path: std::env::var("AGENDA_PATH").ok().map(PathBuf::from),
            transcript_capacity: parsed_or("TRANSCRIPT_CAPACITY", DEFAULT_TRANSCRIPT_CAPACITY)?,
            settling_delay: Duration::from_millis(parsed_or("SETTLING_DELAY_MS", 2000)?),
            reconnect_interval: Duration::from_secs(parsed_or("RECONNECT_INTERVAL_SECS", 10)?),
            reconnect_max_attempts,
            collaborator_timeout: Duration::from_secs(parsed_or("COLLABORATOR_TIMEOUT_SECS", 30)?),
            log_level,
        })
    }

    /// The LiveKit server URL, which only the room-joining CLI needs.
    pub fn require_livekit_url(&self) -> Result<&str, ConfigError> {
        self.livekit_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar("LIVEKIT_URL".to_string()))
    }

    /// Client configuration for the chat-completions endpoint of the active provider.
    pub fn llm_config(&self) -> OpenAIConfig {
        match (&self.provider, &self.gemini_api_key) {
            (Provider::Gemini, Some(key)) => OpenAIConfig::new()
                .with_api_key(key.expose_secret())
                .with_api_base(GEMINI_OPENAI_BASE),
            _ => self.speech_config(),
        }
    }

    /// Client configuration for the OpenAI audio endpoints.
    pub fn speech_config(&self) -> OpenAIConfig {
        OpenAIConfig::new().with_api_key(self.openai_api_key.expose_secret())
    }

    /// The configured agenda file, or the built-in agenda when none is set.
    pub fn load_agenda(&self) -> Result<Agenda, AgendaError> {
        match &self.agenda_path {
            Some(path) => Agenda::from_file(path),
            None => Ok(Agenda::default()),
        }
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn or_default(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: &[&str] = &[
        "LIVEKIT_URL",
        "LIVEKIT_API_KEY",
        "LIVEKIT_API_SECRET",
        "ROOM_NAME",
        "AGENT_IDENTITY",
        "AGENT_NAME",
        "LLM_PROVIDER",
        "OPENAI_API_KEY",
        "GEMINI_API_KEY",
        "GOOGLE_API_KEY",
        "CHAT_MODEL",
        "TTS_MODEL",
        "TTS_VOICE",
        "STT_MODEL",
        "AGENDA_PATH",
        "TRANSCRIPT_CAPACITY",
        "SETTLING_DELAY_MS",
        "RECONNECT_INTERVAL_SECS",
        "RECONNECT_MAX_ATTEMPTS",
        "COLLABORATOR_TIMEOUT_SECS",
        "RUST_LOG",
    ];

    fn clear_env_vars() {
        for var in ALL_VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("LIVEKIT_API_KEY", "devkey");
            env::set_var("LIVEKIT_API_SECRET", "devsecret");
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = AgentConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.livekit_api_key, "devkey");
        assert_eq!(config.livekit_api_secret.expose_secret(), "devsecret");
        assert_eq!(config.livekit_url, None);
        assert_eq!(config.room_name, "voice-interview-room");
        assert_eq!(config.agent_identity, "interview-agent");
        assert_eq!(config.agent_name, "Interview Agent");
        assert_eq!(config.provider, Provider::OpenAI);
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.tts_model, "tts-1");
        assert_eq!(config.tts_voice, "alloy");
        assert_eq!(config.stt_model, "whisper-1");
        assert_eq!(config.transcript_capacity, 8);
        assert_eq!(config.settling_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect_interval, Duration::from_secs(10));
        assert_eq!(config.reconnect_max_attempts, None);
        assert_eq!(config.collaborator_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.require_livekit_url().is_err());
        assert_eq!(config.load_agenda().unwrap().len(), 6);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("LIVEKIT_URL", "ws://localhost:7880");
            env::set_var("ROOM_NAME", "panel-b");
            env::set_var("TRANSCRIPT_CAPACITY", "4");
            env::set_var("SETTLING_DELAY_MS", "250");
            env::set_var("RECONNECT_MAX_ATTEMPTS", "3");
            env::set_var("RUST_LOG", "debug");
        }

        let config = AgentConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.require_livekit_url().unwrap(), "ws://localhost:7880");
        assert_eq!(config.room_name, "panel-b");
        assert_eq!(config.transcript_capacity, 4);
        assert_eq!(config.settling_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect_max_attempts, Some(3));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_gemini_provider_accepts_google_key() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("LLM_PROVIDER", "Gemini");
            env::set_var("GOOGLE_API_KEY", "google-key");
        }

        let config = AgentConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.provider, Provider::Gemini);
        assert_eq!(config.chat_model, "gemini-1.5-flash");
        assert_eq!(
            config.gemini_api_key.as_ref().map(|k| k.expose_secret()),
            Some("google-key")
        );
    }

    #[test]
    #[serial]
    fn test_config_missing_gemini_key() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("LLM_PROVIDER", "gemini");
        }

        let err = AgentConfig::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("GEMINI_API_KEY")),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_livekit_secret() {
        clear_env_vars();
        unsafe {
            env::set_var("LIVEKIT_API_KEY", "devkey");
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }

        let err = AgentConfig::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "LIVEKIT_API_SECRET"),
            _ => panic!("Expected MissingVar for LIVEKIT_API_SECRET"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers_and_provider() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("SETTLING_DELAY_MS", "soon");
        }
        match AgentConfig::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SETTLING_DELAY_MS"),
            _ => panic!("Expected InvalidValue for SETTLING_DELAY_MS"),
        }

        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("LLM_PROVIDER", "cohere");
        }
        match AgentConfig::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "LLM_PROVIDER"),
            _ => panic!("Expected InvalidValue for LLM_PROVIDER"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = AgentConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
