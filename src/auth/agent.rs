//! SSH agent authentication.

use std::path::PathBuf;

use async_trait::async_trait;
use russh::keys::agent::client::AgentClient;
use tracing::debug;

use crate::error::{Error, Result};

use super::traits::{AuthStrategy, Credential};

/// SSH agent authentication strategy.
///
/// Connects to the SSH agent (via SSH_AUTH_SOCK unless a socket path is
/// given); signing is delegated to the agent and every identity it holds is
/// offered in turn.
#[derive(Default)]
pub struct AgentAuth {
    socket: Option<PathBuf>,
}

impl AgentAuth {
    /// Create a new SSH agent authentication strategy.
    pub fn new() -> Self {
        Self { socket: None }
    }

    /// Use the agent listening on `socket` instead of SSH_AUTH_SOCK.
    pub fn with_socket(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: Some(socket.into()),
        }
    }
}

#[async_trait]
impl AuthStrategy for AgentAuth {
    async fn credential(&self) -> Result<Credential> {
        let agent = match &self.socket {
            Some(socket) => AgentClient::connect_uds(socket).await.map_err(|e| {
                Error::AgentUnavailable(format!(
                    "failed to connect to SSH agent at {}: {}",
                    socket.display(),
                    e
                ))
            })?,
            None => AgentClient::connect_env().await.map_err(|e| {
                Error::AgentUnavailable(format!("failed to connect to SSH agent: {}", e))
            })?,
        };
        debug!("Connected to SSH agent");
        Ok(Credential::Agent(agent))
    }

    fn name(&self) -> &'static str {
        "agent"
    }
}
