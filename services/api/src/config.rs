use interview_core::ConfigError;
use std::net::SocketAddr;

/// HTTP-side settings. The agent settings live in `interview_core::AgentConfig`.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    /// Base URL handed to candidates for the room socket, without a trailing slash.
    pub public_ws_base: String,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let public_ws_base = match std::env::var("PUBLIC_WS_BASE") {
            Ok(base) => {
                if !(base.starts_with("ws://") || base.starts_with("wss://")) {
                    return Err(ConfigError::InvalidValue(
                        "PUBLIC_WS_BASE".to_string(),
                        format!("'{base}' is not a ws:// or wss:// URL"),
                    ));
                }
                base.trim_end_matches('/').to_string()
            }
            Err(_) => format!("ws://localhost:{}", bind_address.port()),
        };

        Ok(Self {
            bind_address,
            public_ws_base,
        })
    }

    /// Where a candidate connects for `room`.
    pub fn room_socket_url(&self, room: &str) -> String {
        format!("{}/api/v1/rooms/{room}/ws", self.public_ws_base)
    }
}
