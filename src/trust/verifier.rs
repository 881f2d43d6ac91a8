//! Host key verification during the handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::ssh_key::{HashAlg, PublicKey};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::traits::{HostRecord, TrustStore};

/// Answer from a [`HostVerifier`] about an unknown host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostDecision {
    Trusted,
    Rejected,
}

/// Caller-supplied decision for host keys the trust store does not know.
///
/// Typically prompts an operator or compares against out-of-band data.
/// Any `Fn(&str, SocketAddr, &str) -> HostDecision` closure is a verifier.
#[async_trait]
pub trait HostVerifier: Send + Sync {
    /// Decide whether to trust `host`, reached at `remote_addr`, presenting
    /// a key with SHA256 `fingerprint`.
    async fn verify(&self, host: &str, remote_addr: SocketAddr, fingerprint: &str)
    -> HostDecision;
}

#[async_trait]
impl<F> HostVerifier for F
where
    F: Fn(&str, SocketAddr, &str) -> HostDecision + Send + Sync,
{
    async fn verify(
        &self,
        host: &str,
        remote_addr: SocketAddr,
        fingerprint: &str,
    ) -> HostDecision {
        self(host, remote_addr, fingerprint)
    }
}

/// What the trust store says about a presented key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    /// A record with this exact key exists.
    Trusted,
    /// A record exists for the host and algorithm with a different key.
    Changed { known: HostRecord },
    /// No record; someone has to decide.
    Unknown,
}

impl TrustDecision {
    /// Compare `presented` with what `store` holds for its host and algorithm.
    pub fn evaluate(store: &dyn TrustStore, presented: &HostRecord) -> Result<Self> {
        Ok(match store.lookup(&presented.host, &presented.algorithm)? {
            Some(known) if known.public_key == presented.public_key => TrustDecision::Trusted,
            Some(known) => TrustDecision::Changed { known },
            None => TrustDecision::Unknown,
        })
    }
}

/// Host key check run by the transport handler for one connection attempt.
///
/// A key accepted by the verifier is parked in `pending` rather than
/// written, so the connector can persist it only once authentication has
/// succeeded.
pub(crate) struct HostKeyCheck {
    host: String,
    remote_addr: SocketAddr,
    store: Arc<dyn TrustStore>,
    verifier: Option<Arc<dyn HostVerifier>>,
    pending: Arc<Mutex<Option<HostRecord>>>,
}

impl HostKeyCheck {
    pub(crate) fn new(
        host: String,
        remote_addr: SocketAddr,
        store: Arc<dyn TrustStore>,
        verifier: Option<Arc<dyn HostVerifier>>,
        pending: Arc<Mutex<Option<HostRecord>>>,
    ) -> Self {
        Self {
            host,
            remote_addr,
            store,
            verifier,
            pending,
        }
    }

    pub(crate) async fn verify(&self, key: &PublicKey) -> Result<()> {
        let presented = HostRecord::from_key(self.host.clone(), key)?;
        let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();

        match TrustDecision::evaluate(self.store.as_ref(), &presented)? {
            TrustDecision::Trusted => {
                debug!("Host key for {} matches trust store", self.host);
                Ok(())
            }
            TrustDecision::Changed { known } => {
                warn!(
                    "Host key for {} ({}) changed: expected {:?}, got {}",
                    self.host, presented.algorithm, known.fingerprint(), fingerprint
                );
                Err(Error::HostKeyChanged {
                    host: self.host.clone(),
                    algorithm: presented.algorithm,
                    expected: known
                        .fingerprint()
                        .unwrap_or_else(|| known.public_key.clone()),
                    actual: fingerprint,
                })
            }
            TrustDecision::Unknown => {
                let Some(verifier) = &self.verifier else {
                    return Err(Error::UntrustedHost {
                        host: self.host.clone(),
                        algorithm: presented.algorithm,
                        fingerprint,
                    });
                };

                match verifier
                    .verify(&self.host, self.remote_addr, &fingerprint)
                    .await
                {
                    HostDecision::Trusted => {
                        warn!(
                            "Trust-On-First-Use: accepting {} key {} for {}",
                            presented.algorithm, fingerprint, self.host
                        );
                        *self.pending.lock().await = Some(presented);
                        Ok(())
                    }
                    HostDecision::Rejected => Err(Error::HostRejected {
                        host: self.host.clone(),
                        fingerprint,
                    }),
                }
            }
        }
    }
}
