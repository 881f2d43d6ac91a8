//! Host identity trust.
//!
//! A [`TrustStore`] remembers which public key each host presented. On
//! connect the peer key is looked up by (host identifier, algorithm):
//!
//! - a matching record lets the handshake proceed;
//! - a record with a different key fails with `HostKeyChanged`, whatever a
//!   verifier would say;
//! - no record defers to the caller's [`HostVerifier`], or fails with
//!   `UntrustedHost` when there is none.
//!
//! Keys the verifier accepts are written back only after authentication
//! succeeds, so a failed login never pins a host key.
//!
//! # Available Stores
//!
//! - [`MemoryTrustStore`]: Process-local, nothing persisted
//! - [`FileTrustStore`]: OpenSSH known_hosts format on disk

mod file;
mod memory;
mod traits;
mod verifier;

pub use file::FileTrustStore;
pub use memory::MemoryTrustStore;
pub use traits::{HostRecord, TrustStore};
pub use verifier::{HostDecision, HostVerifier, TrustDecision};

pub(crate) use verifier::HostKeyCheck;

/// Host identifier used as the trust store key.
///
/// Follows known_hosts: the bare host on port 22, `[host]:port` otherwise.
pub fn host_identifier(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Split a host identifier back into host and port.
///
/// The inverse of [`host_identifier`]; anything not in `[host]:port` form
/// is a bare host on port 22.
pub(crate) fn split_identifier(identifier: &str) -> (&str, u16) {
    identifier
        .strip_prefix('[')
        .and_then(|rest| rest.rsplit_once("]:"))
        .and_then(|(host, port)| Some((host, port.parse().ok()?)))
        .unwrap_or((identifier, 22))
}
