#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! Async SSH client: authenticated sessions, remote commands, SCP upload
//! and SFTP download over one multiplexed connection.
//!
//! # Architecture
//!
//! - [`Connector`]: resolves the address, verifies the host key against a
//!   [`TrustStore`], authenticates with one [`AuthStrategy`] and yields a
//!   [`Client`].
//! - [`Client`]: wraps the connection. Every operation opens its own
//!   channel, so one client serves concurrent commands and transfers.
//! - [`auth`]: password, private key and agent strategies.
//! - [`trust`]: trust stores and the host verifier callback.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ssh_transfer::{Connector, FileTrustStore, HostDecision, KeyAuth};
//!
//! let store = Arc::new(FileTrustStore::open("/home/alice/.ssh/known_hosts")?);
//! let connector = Connector::new(store);
//! let verifier = Arc::new(|_host: &str, _addr, _fp: &str| HostDecision::Trusted);
//!
//! let client = connector
//!     .connect("alice", "10.0.0.5:22", &KeyAuth::new("/home/alice/.ssh/id_ed25519"), Some(verifier))
//!     .await?;
//! let out = client.run("echo hi").await?;
//! client.upload("/tmp/a.txt", "/home/alice/a.txt").await?;
//! client.download("/home/alice/a.txt", "/tmp/b.txt").await?;
//! client.disconnect().await?;
//! ```

pub mod auth;
mod client;
pub mod config;
pub mod error;
mod exec;
mod scp;
mod session;
mod sftp;
pub mod trust;
pub mod types;

pub use auth::{AgentAuth, AuthStrategy, Credential, KeyAuth, PasswordAuth};
pub use client::{Client, Connector};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use trust::{
    FileTrustStore, HostDecision, HostRecord, HostVerifier, MemoryTrustStore, TrustDecision,
    TrustStore, host_identifier,
};
pub use types::{CommandOutput, Direction, TransferDescriptor};
