//! Keeps a session connected.
//!
//! Polls the orchestrator at a fixed interval and re-runs the connect
//! sequence whenever the link has dropped. Returns once the orchestrator is
//! disconnected on request, or with the last error once the attempt budget is
//! spent.

use crate::config::AgentConfig;
use crate::error::TransportError;
use crate::orchestrator::{LinkStatus, TurnOrchestrator};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    /// Consecutive failed attempts allowed; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            interval: config.reconnect_interval,
            max_attempts: config.reconnect_max_attempts,
        }
    }
}

pub async fn supervise(
    orchestrator: &TurnOrchestrator,
    policy: ReconnectPolicy,
) -> Result<(), TransportError> {
    let mut failures: u32 = 0;
    loop {
        match orchestrator.link_status().await {
            LinkStatus::Closed => {
                info!("Session closed, supervisor exiting");
                return Ok(());
            }
            LinkStatus::Connected => failures = 0,
            LinkStatus::Dropped => {
                warn!(attempt = failures + 1, "Connection lost, reconnecting");
                match orchestrator.connect().await {
                    Ok(()) => {
                        info!("Reconnected");
                        failures = 0;
                    }
                    Err(e) => {
                        failures += 1;
                        if policy.max_attempts.is_some_and(|max| failures >= max) {
                            warn!(failures, error = %e, "Giving up on reconnecting");
                            return Err(e);
                        }
                    }
                }
            }
        }
        tokio::time::sleep(policy.interval).await;
    }
}
