//! russh client handler.
//!
//! [`ClientHandler`] is the per-connection callback object russh drives
//! during the handshake. Its only job is host key verification, delegated to
//! the trust check the connector built for this attempt. A failed check is
//! returned as the handler error, so `connect_stream` fails with the trust
//! error itself rather than a generic "unknown key".
//!
//! # Thread Safety
//!
//! The `client::Handle<ClientHandler>` is wrapped in `Arc<>` by
//! [`Client`](crate::Client) because it's not `Clone`, and every operation
//! opens its own channel on the shared handle.

use russh::{client, keys};

use crate::error::Error;
use crate::trust::HostKeyCheck;

/// Client handler for russh that verifies host keys against a trust store.
pub struct ClientHandler {
    check: HostKeyCheck,
}

impl ClientHandler {
    pub(crate) fn new(check: HostKeyCheck) -> Self {
        Self { check }
    }
}

impl client::Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        self.check.verify(server_public_key).await?;
        Ok(true)
    }
}
