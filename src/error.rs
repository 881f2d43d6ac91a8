//! Error types for SSH sessions and file transfers.
//!
//! Every failure the crate reports is a variant of [`Error`]. Variants carry
//! enough context (user, host, path, command) to be acted on without
//! inspecting internals, and keep the underlying cause text instead of
//! collapsing it into a generic "failed" message.
//!
//! # Classification
//!
//! Errors fall into three groups that callers usually treat differently:
//!
//! 1. **Trust and credential failures**: [`Error::Authentication`],
//!    [`Error::UntrustedHost`], [`Error::HostRejected`],
//!    [`Error::HostKeyChanged`], and the key/agent loading errors. Retrying
//!    these never helps and may lock accounts out.
//!
//! 2. **Transient network failures**: [`Error::Connect`] and
//!    [`Error::Timeout`]. These are the only errors the connector retries
//!    (see [`Error::is_retryable`]).
//!
//! 3. **Operation failures**: session, command and transfer errors. Local
//!    filesystem problems are reported as [`Error::LocalFile`] so they can be
//!    told apart from remote or protocol failures.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed for {user}@{host} using {method}")]
    Authentication {
        user: String,
        host: String,
        method: &'static str,
    },

    #[error("host {host} is not trusted ({algorithm} {fingerprint}) and no verifier is configured")]
    UntrustedHost {
        host: String,
        algorithm: String,
        fingerprint: String,
    },

    #[error("host {host} rejected by verifier ({fingerprint})")]
    HostRejected { host: String, fingerprint: String },

    #[error("host key for {host} ({algorithm}) changed: expected {expected}, got {actual}")]
    HostKeyChanged {
        host: String,
        algorithm: String,
        expected: String,
        actual: String,
    },

    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("failed to start {operation}: {reason}")]
    Session { operation: String, reason: String },

    #[error("command `{command}` failed: {reason}")]
    Run { command: String, reason: String },

    #[error("upload {local} -> {remote} failed: {reason}")]
    Upload {
        local: PathBuf,
        remote: String,
        reason: String,
    },

    #[error("download {remote} -> {local} failed: {reason}")]
    Download {
        remote: String,
        local: PathBuf,
        reason: String,
    },

    #[error("remote file not found: {path}")]
    FileNotFound { path: String },

    #[error("permission denied on remote path: {path}")]
    PermissionDenied { path: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("invalid file name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("failed to load key from {path}: {reason}")]
    KeyLoad { path: PathBuf, reason: String },

    #[error("wrong or missing passphrase for key {path}")]
    Passphrase { path: PathBuf },

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("local file {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("trust store {path}: {reason}")]
    TrustStore { path: String, reason: String },

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

impl Error {
    /// Whether a failed connection attempt is worth repeating.
    ///
    /// Only network-level failures and timeouts are transient. Trust and
    /// authentication failures are permanent for a given set of inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connect { .. } | Error::Timeout { .. })
    }

    pub(crate) fn local(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::LocalFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    mod retryable {
        use super::*;

        #[test]
        fn test_connect_is_retryable() {
            let err = Error::Connect {
                address: "10.0.0.5:22".to_string(),
                reason: "Connection refused".to_string(),
            };
            assert!(err.is_retryable());
        }

        #[test]
        fn test_timeout_is_retryable() {
            let err = Error::timeout("connect to 10.0.0.5:22", Duration::from_secs(30));
            assert!(err.is_retryable());
        }

        #[test]
        fn test_authentication_not_retryable() {
            let err = Error::Authentication {
                user: "alice".to_string(),
                host: "10.0.0.5".to_string(),
                method: "password",
            };
            assert!(!err.is_retryable());
        }

        #[test]
        fn test_trust_failures_not_retryable() {
            let untrusted = Error::UntrustedHost {
                host: "example.com".to_string(),
                algorithm: "ssh-ed25519".to_string(),
                fingerprint: "SHA256:abc".to_string(),
            };
            let changed = Error::HostKeyChanged {
                host: "example.com".to_string(),
                algorithm: "ssh-ed25519".to_string(),
                expected: "SHA256:abc".to_string(),
                actual: "SHA256:def".to_string(),
            };
            let rejected = Error::HostRejected {
                host: "example.com".to_string(),
                fingerprint: "SHA256:abc".to_string(),
            };
            assert!(!untrusted.is_retryable());
            assert!(!changed.is_retryable());
            assert!(!rejected.is_retryable());
        }

        #[test]
        fn test_key_errors_not_retryable() {
            let err = Error::Passphrase {
                path: PathBuf::from("/home/alice/.ssh/id_ed25519"),
            };
            assert!(!err.is_retryable());
            assert!(!Error::AgentUnavailable("no socket".to_string()).is_retryable());
        }
    }

    mod messages {
        use super::*;

        #[test]
        fn test_upload_message_carries_paths_and_reason() {
            let err = Error::Upload {
                local: PathBuf::from("/tmp/a.txt"),
                remote: "/home/alice/a.txt".to_string(),
                reason: "scp: /home/alice/a.txt: Permission denied".to_string(),
            };
            let msg = err.to_string();
            assert!(msg.contains("/tmp/a.txt"));
            assert!(msg.contains("/home/alice/a.txt"));
            assert!(msg.contains("Permission denied"));
        }

        #[test]
        fn test_local_file_keeps_source() {
            let err = Error::local(
                "/tmp/missing",
                io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            );
            assert!(err.to_string().contains("/tmp/missing"));
            assert!(std::error::Error::source(&err).is_some());
        }

        #[test]
        fn test_timeout_message() {
            let err = Error::timeout("command `sleep 10`", Duration::from_millis(100));
            assert_eq!(err.to_string(), "command `sleep 10` timed out after 100ms");
        }

        #[test]
        fn test_invalid_name_message() {
            let err = Error::InvalidName {
                name: "a\nb".to_string(),
                reason: "contains a newline",
            };
            assert!(err.to_string().contains("contains a newline"));
        }
    }
}
