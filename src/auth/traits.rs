//! Authentication strategy trait and the credential it produces.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::PrivateKey;
use russh::keys::agent::client::AgentClient;
use tokio::net::UnixStream;

use crate::error::Result;

/// Credential material handed to the transport during authentication.
///
/// Built once per connection attempt by an [`AuthStrategy`] and consumed by
/// the connector. The `Debug` output never includes secret material.
pub enum Credential {
    Password(String),
    PrivateKey(Arc<PrivateKey>),
    Agent(AgentClient<UnixStream>),
}

impl Credential {
    /// Short method name used in errors and logs.
    pub fn method(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey(_) => "key",
            Credential::Agent(_) => "agent",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Credential::Password(<redacted>)"),
            Credential::PrivateKey(key) => f
                .debug_tuple("Credential::PrivateKey")
                .field(&key.algorithm().as_str())
                .finish(),
            Credential::Agent(_) => f.write_str("Credential::Agent"),
        }
    }
}

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks. A strategy only prepares credentials; it never talks to the
/// remote server. Exactly one strategy is used per connection attempt, and
/// no fallback between strategies happens automatically.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Produce the credential for one connection attempt.
    ///
    /// # Errors
    ///
    /// * `KeyLoad` / `Passphrase` - the private key could not be used
    /// * `AgentUnavailable` - no agent is reachable
    async fn credential(&self) -> Result<Credential>;

    /// Get the name of this authentication strategy.
    ///
    /// Used for logging and error context.
    fn name(&self) -> &'static str;
}
