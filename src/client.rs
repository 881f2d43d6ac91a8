//! SSH connection establishment and the connected client.
//!
//! ## Connection Lifecycle
//!
//! 1. **Address Parsing**: `host[:port]`, default port 22. A bad port fails
//!    immediately and is never retried.
//!
//! 2. **Credential**: The [`AuthStrategy`] prepares its credential before
//!    any network I/O, so a missing key file fails fast.
//!
//! 3. **Handshake**: TCP connect, then the SSH handshake on that stream. The
//!    peer host key is checked against the [`TrustStore`] and, for unknown
//!    hosts, the caller's [`HostVerifier`].
//!
//! 4. **Authentication**: Exactly one credential is presented. Rejection
//!    disconnects and fails with `Authentication`.
//!
//! 5. **Trust persistence**: A host key the verifier accepted is recorded
//!    only now, after authentication succeeded.
//!
//! ## Retry Strategy
//!
//! Connection attempts use exponential backoff with jitter via the `backon` crate:
//!
//! - **Initial delay**: [`ClientConfig::retry_delay`] (default: 1000ms)
//! - **Maximum delay**: Capped at 10 seconds
//! - **Maximum attempts**: [`ClientConfig::max_retries`] retries after the first attempt
//! - **Jitter**: Random jitter is added to prevent thundering herd
//!
//! Only [`Error::is_retryable`] failures are retried. Trust and
//! authentication failures never are, to avoid account lockouts.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use backon::{ExponentialBuilder, Retryable};
use russh::{Channel, Disconnect, client};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::auth::{self, AuthStrategy};
use crate::config::{ClientConfig, MAX_RETRY_DELAY};
use crate::error::{Error, Result};
use crate::session::ClientHandler;
use crate::trust::{HostKeyCheck, HostRecord, HostVerifier, TrustStore, host_identifier};
use crate::types::{Direction, TransferDescriptor};

/// Parse address string into host and port components.
///
/// Supports the following formats:
/// - `host:port` - Returns the specified host and port
/// - `host` - Returns the host with default SSH port (22)
/// - `[v6addr]:port` - Brackets are stripped from the host
///
/// Uses `rsplit_once` so the last colon separates the port.
pub(crate) fn parse_address(address: &str) -> std::result::Result<(String, u16), String> {
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port_str)) if !host.contains(':') || host.ends_with(']') => {
            let port = port_str
                .parse::<u16>()
                .map_err(|e| format!("Invalid port number: {}", e))?;
            (host, port)
        }
        // Bare IPv6 address without a port.
        Some(_) => (address, 22),
        None => (address, 22),
    };

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.is_empty() {
        return Err("Missing host".to_string());
    }

    Ok((host.to_string(), port))
}

/// Creates authenticated [`Client`]s.
///
/// Holds the trust store shared by every connection it makes and the
/// configuration applied to them.
pub struct Connector {
    store: Arc<dyn TrustStore>,
    config: ClientConfig,
}

impl Connector {
    pub fn new(store: Arc<dyn TrustStore>) -> Self {
        Self {
            store,
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to `address` as `username`, authenticating with `auth`.
    ///
    /// `verifier` decides about hosts the trust store does not know; without
    /// one, unknown hosts fail with `UntrustedHost`.
    ///
    /// # Errors
    ///
    /// * `Connect` / `Timeout` - network failure, after retries
    /// * `UntrustedHost`, `HostRejected`, `HostKeyChanged` - trust failure
    /// * `Authentication` - the server rejected the credential
    /// * `KeyLoad`, `Passphrase`, `AgentUnavailable` - the strategy failed
    pub async fn connect(
        &self,
        username: &str,
        address: &str,
        auth: &dyn AuthStrategy,
        verifier: Option<Arc<dyn HostVerifier>>,
    ) -> Result<Client> {
        let (host, port) = parse_address(address).map_err(|reason| Error::Connect {
            address: address.to_string(),
            reason,
        })?;

        // Track retry attempts using atomic counter
        let attempt_counter = AtomicU32::new(0);

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.retry_delay)
            .with_max_delay(MAX_RETRY_DELAY)
            .with_max_times(self.config.max_retries as usize)
            .with_jitter();

        let result = (|| async {
            let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);

            if current_attempt > 0 {
                warn!(
                    "SSH connection retry attempt {} to {}@{}",
                    current_attempt, username, address
                );
            }

            self.connect_once(username, &host, port, auth, verifier.clone())
                .await
        })
        .retry(backoff)
        .when(|e| {
            let retryable = e.is_retryable();
            if !retryable {
                warn!(
                    "SSH connection to {}@{} failed with non-retryable error: {}",
                    username, address, e
                );
            }
            retryable
        })
        .notify(|err, dur| {
            warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
        })
        .await;

        let total_attempts = attempt_counter.load(Ordering::SeqCst);

        match result {
            Ok(client) => {
                info!(
                    "Connected to {}@{} using {} ({} attempt(s))",
                    username,
                    address,
                    auth.name(),
                    total_attempts
                );
                Ok(client)
            }
            Err(e) => {
                error!(
                    "SSH connection to {}@{} failed after {} attempt(s). Last error: {}",
                    username, address, total_attempts, e
                );
                Err(e)
            }
        }
    }

    /// One bounded attempt: credential, handshake, authentication.
    async fn connect_once(
        &self,
        username: &str,
        host: &str,
        port: u16,
        auth: &dyn AuthStrategy,
        verifier: Option<Arc<dyn HostVerifier>>,
    ) -> Result<Client> {
        let credential = auth.credential().await?;
        debug!("Prepared {} credential for {}@{}", credential.method(), username, host);

        let timeout = self.config.connect_timeout;
        tokio::time::timeout(
            timeout,
            self.establish(username, host, port, credential, verifier),
        )
        .await
        .map_err(|_| Error::timeout(format!("connect to {}:{}", host, port), timeout))?
    }

    async fn establish(
        &self,
        username: &str,
        host: &str,
        port: u16,
        credential: auth::Credential,
        verifier: Option<Arc<dyn HostVerifier>>,
    ) -> Result<Client> {
        let address = format!("{}:{}", host, port);
        let connect_error = |reason: String| Error::Connect {
            address: address.clone(),
            reason,
        };

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        let remote_addr: SocketAddr = stream
            .peer_addr()
            .map_err(|e| connect_error(e.to_string()))?;
        let _ = stream.set_nodelay(true);

        let host_id = host_identifier(host, port);
        let pending = Arc::new(Mutex::new(None));
        let check = HostKeyCheck::new(
            host_id.clone(),
            remote_addr,
            self.store.clone(),
            verifier,
            pending.clone(),
        );

        let mut handle =
            client::connect_stream(self.config.transport(), stream, ClientHandler::new(check))
                .await
                .map_err(|e| match e {
                    Error::Protocol(russh::Error::IO(io)) => connect_error(io.to_string()),
                    Error::Protocol(russh::Error::Disconnect) => {
                        connect_error("disconnected during handshake".to_string())
                    }
                    other => other,
                })?;
        debug!("SSH handshake with {} ({}) complete", host_id, remote_addr);

        let method = credential.method();
        if !auth::authenticate(&mut handle, username, credential).await? {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(Error::Authentication {
                user: username.to_string(),
                host: host_id,
                method,
            });
        }

        if let Some(record) = pending.lock().await.take() {
            self.remember(record);
        }

        Ok(Client {
            handle: Arc::new(handle),
            user: username.to_string(),
            host: host_id,
            config: self.config.clone(),
        })
    }

    /// Persist a newly trusted host key. Failure to write does not fail the
    /// connection that is already authenticated.
    fn remember(&self, record: HostRecord) {
        if !self.config.remember_hosts {
            debug!("Not recording host key for {}: remember_hosts is off", record.host);
            return;
        }
        let host = record.host.clone();
        match self.store.record(record) {
            Ok(()) => info!("Recorded host key for {}", host),
            Err(e) => warn!("Failed to save host key for {}: {}", host, e),
        }
    }
}

/// An authenticated SSH connection.
///
/// Every operation opens its own channel on the shared connection, so a
/// `Client` can be used from several tasks at once.
pub struct Client {
    handle: Arc<client::Handle<ClientHandler>>,
    user: String,
    host: String,
    config: ClientConfig,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Client {
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Host identifier, as recorded in the trust store.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub(crate) async fn open_channel(&self, operation: &str) -> Result<Channel<client::Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Session {
                operation: operation.to_string(),
                reason: format!("failed to open channel: {}", e),
            })
    }

    /// Run the transfer `descriptor` describes. Returns the bytes moved.
    pub async fn transfer(&self, descriptor: &TransferDescriptor) -> Result<u64> {
        match descriptor.direction {
            Direction::Upload => {
                self.upload(&descriptor.local_path, &descriptor.remote_path)
                    .await
            }
            Direction::Download => {
                self.download(&descriptor.remote_path, &descriptor.local_path)
                    .await
            }
        }
    }

    /// Close the connection.
    pub async fn disconnect(self) -> Result<()> {
        debug!("Disconnecting from {}@{}", self.user, self.host);
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}
