//! Trust store trait and the record it persists.

use russh::keys::ssh_key::{HashAlg, PublicKey};

use crate::error::{Error, Result};

/// A trusted host key: `host algorithm base64-key`, as in known_hosts.
///
/// Unique by (`host`, `algorithm`). Records are appended and never
/// rewritten; a key change is detected, not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub host: String,
    pub algorithm: String,
    /// Base64 of the public key wire encoding.
    pub public_key: String,
}

impl HostRecord {
    pub fn new(
        host: impl Into<String>,
        algorithm: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            algorithm: algorithm.into(),
            public_key: public_key.into(),
        }
    }

    /// Build the record a server presenting `key` as `host` would get.
    pub fn from_key(host: impl Into<String>, key: &PublicKey) -> Result<Self> {
        let host = host.into();
        let encoded = key.to_openssh().map_err(|e| Error::TrustStore {
            path: host.clone(),
            reason: format!("cannot encode host key: {}", e),
        })?;
        let public_key = encoded
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| Error::TrustStore {
                path: host.clone(),
                reason: "encoded host key has no key data".to_string(),
            })?
            .to_string();

        Ok(Self {
            host,
            algorithm: key.algorithm().as_str().to_string(),
            public_key,
        })
    }

    /// Decode the stored key. `None` when the key data is malformed.
    pub fn key(&self) -> Option<PublicKey> {
        PublicKey::from_openssh(&format!("{} {}", self.algorithm, self.public_key)).ok()
    }

    /// SHA256 fingerprint in OpenSSH form (`SHA256:...`).
    ///
    /// `None` when the stored key data does not decode.
    pub fn fingerprint(&self) -> Option<String> {
        self.key()
            .map(|key| key.fingerprint(HashAlg::Sha256).to_string())
    }
}

/// Trait for host key storage.
///
/// Implementations must be thread-safe (`Send + Sync`); the store is shared
/// by every connection a [`Connector`](crate::Connector) makes. Writes are
/// single-writer: only the connector records, after trust was confirmed
/// and authentication succeeded.
pub trait TrustStore: Send + Sync {
    /// Find the record for (`host`, `algorithm`), matching both exactly.
    ///
    /// `Ok(None)` means the host is unknown for that algorithm; `Err` means
    /// the store itself could not be read.
    fn lookup(&self, host: &str, algorithm: &str) -> Result<Option<HostRecord>>;

    /// Persist `record`.
    ///
    /// Recording an identical record is a no-op. A different key for an
    /// existing (host, algorithm) is refused.
    fn record(&self, record: HostRecord) -> Result<()>;
}
