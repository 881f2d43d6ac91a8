//! Client configuration.
//!
//! [`ClientConfig`] carries the timeouts, retry policy and transport
//! preferences used by the connector and by every operation on a
//! [`Client`](crate::Client). Values can be set explicitly with the builder
//! methods or resolved from the environment with [`ClientConfig::from_env`],
//! which follows a three-tier priority:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONNECT_TIMEOUT` | 30s | Handshake and authentication timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 180s | Command execution timeout in seconds |
//! | `SSH_TRANSFER_TIMEOUT` | 600s | Upload/download timeout in seconds |
//! | `SSH_MAX_RETRIES` | 3 | Maximum connection retry attempts |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |

use std::env;
use std::sync::Arc;
use std::time::Duration;

use russh::client;

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default SSH command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 180;

/// Default file transfer timeout in seconds
pub(crate) const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 600;

/// Default maximum retry attempts for SSH connection
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const TRANSFER_TIMEOUT_ENV_VAR: &str = "SSH_TRANSFER_TIMEOUT";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "SSH_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";

/// Timeouts, retry policy and transport preferences for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on TCP connect, SSH handshake and authentication together.
    pub connect_timeout: Duration,
    /// Default bound on a single remote command.
    pub command_timeout: Duration,
    /// Bound on a single upload or download.
    pub transfer_timeout: Duration,
    /// Retries after a transient connection failure.
    pub max_retries: u32,
    /// Initial backoff delay between connection attempts.
    pub retry_delay: Duration,
    /// Prefer zlib compression on the transport.
    pub compression: bool,
    /// Persist host keys the verifier accepted, once authentication succeeds.
    pub remember_hosts: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            transfer_timeout: Duration::from_secs(DEFAULT_TRANSFER_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            compression: true,
            remember_hosts: true,
        }
    }
}

impl ClientConfig {
    /// Resolve every value from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: Duration::from_secs(resolve_connect_timeout(None)),
            command_timeout: Duration::from_secs(resolve_command_timeout(None)),
            transfer_timeout: Duration::from_secs(resolve_transfer_timeout(None)),
            max_retries: resolve_max_retries(None),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms(None)),
            compression: resolve_compression(None),
            remember_hosts: true,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn remember_hosts(mut self, remember: bool) -> Self {
        self.remember_hosts = remember;
        self
    }

    /// Build the russh client configuration.
    ///
    /// The connection lives as long as the [`Client`](crate::Client), so no
    /// inactivity timeout is set; keepalives detect dead peers instead.
    pub(crate) fn transport(&self) -> Arc<client::Config> {
        let compression = if self.compression {
            (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
        } else {
            (&[russh::compression::NONE][..]).into()
        };

        let preferred = russh::Preferred {
            compression,
            ..Default::default()
        };

        Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            preferred,
            ..Default::default()
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

/// Resolve the connection timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    timeout_param
        .or_else(|| env_parse(CONNECT_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
}

/// Resolve the command timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_command_timeout(timeout_param: Option<u64>) -> u64 {
    timeout_param
        .or_else(|| env_parse(COMMAND_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS)
}

/// Resolve the transfer timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_transfer_timeout(timeout_param: Option<u64>) -> u64 {
    timeout_param
        .or_else(|| env_parse(TRANSFER_TIMEOUT_ENV_VAR))
        .unwrap_or(DEFAULT_TRANSFER_TIMEOUT_SECS)
}

/// Resolve the max retries with priority: parameter -> env var -> default
pub(crate) fn resolve_max_retries(max_retries_param: Option<u32>) -> u32 {
    max_retries_param
        .or_else(|| env_parse(MAX_RETRIES_ENV_VAR))
        .unwrap_or(DEFAULT_MAX_RETRIES)
}

/// Resolve the retry delay with priority: parameter -> env var -> default
pub(crate) fn resolve_retry_delay_ms(retry_delay_param: Option<u64>) -> u64 {
    retry_delay_param
        .or_else(|| env_parse(RETRY_DELAY_MS_ENV_VAR))
        .unwrap_or(DEFAULT_RETRY_DELAY_MS)
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}
