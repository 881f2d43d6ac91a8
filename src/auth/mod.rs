//! Authentication strategies for SSH connections.
//!
//! Each strategy turns its configuration into a [`Credential`]; the
//! connector then presents that credential to the server through
//! [`authenticate`]. Strategies never perform network I/O themselves and
//! are never chained automatically: a caller wanting "key, then password"
//! makes two connection attempts.
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: Private key file authentication, optionally passphrase-protected
//! - [`AgentAuth`]: SSH agent authentication
//!
//! # Example
//!
//! ```ignore
//! use ssh_transfer::auth::KeyAuth;
//!
//! let auth = KeyAuth::new("/home/alice/.ssh/id_ed25519").with_passphrase("secret");
//! let client = connector.connect("alice", "10.0.0.5:22", &auth, None).await?;
//! ```

mod agent;
mod key;
mod password;
mod traits;

pub use agent::AgentAuth;
pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::{AuthStrategy, Credential};

use russh::client;
use russh::keys::PrivateKeyWithHashAlg;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::ClientHandler;

/// Present `credential` for `username` on an established transport.
///
/// Returns `Ok(false)` when the server rejects the credential and an error
/// only when the exchange itself fails.
pub(crate) async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    username: &str,
    credential: Credential,
) -> Result<bool> {
    match credential {
        Credential::Password(password) => {
            let result = handle.authenticate_password(username, password).await?;
            Ok(result.success())
        }
        Credential::PrivateKey(key) => {
            // For RSA keys, use the best supported hash algorithm
            let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
            debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

            let result = handle
                .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key, hash_alg))
                .await?;
            Ok(result.success())
        }
        Credential::Agent(mut agent) => {
            let identities = agent.request_identities().await.map_err(|e| {
                Error::AgentUnavailable(format!("failed to list agent identities: {}", e))
            })?;

            if identities.is_empty() {
                return Err(Error::AgentUnavailable(
                    "no identities in SSH agent".to_string(),
                ));
            }

            for identity in identities {
                debug!("Trying SSH agent identity: {:?}", identity.comment());

                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                match handle
                    .authenticate_publickey_with(username, identity, hash_alg, &mut agent)
                    .await
                {
                    Ok(result) if result.success() => {
                        info!("Authenticated with SSH agent identity");
                        return Ok(true);
                    }
                    Ok(_) => debug!("Agent identity not accepted, trying next"),
                    Err(e) => debug!("Agent signing failed: {}, trying next", e),
                }
            }

            Ok(false)
        }
    }
}
