//! Test support: tracing setup, the in-process test server, and the live
//! SSH server used by `tests/remote.rs`.
//!
//! Live tests need a reachable server and are skipped unless configured:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `SSH_TEST_ADDR` | `host[:port]` of the server |
//! | `SSH_TEST_USER` | login user |
//! | `SSH_TEST_PASSWORD` | password (used when set) |
//! | `SSH_TEST_KEY` | private key path (used when no password is set) |

// Each test binary only uses some of these, so allow dead_code.
#[allow(dead_code)]
pub mod server;

use std::sync::{Arc, Once};

use ssh_transfer::{
    AuthStrategy, Client, Connector, HostDecision, HostVerifier, KeyAuth, MemoryTrustStore,
    PasswordAuth, TrustStore,
};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("ssh_transfer=debug".parse().unwrap())
            .add_directive("russh=info".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Connection details for the live test server.
#[allow(dead_code)]
pub struct LiveServer {
    pub address: String,
    pub user: String,
    password: Option<String>,
    key: Option<String>,
}

#[allow(dead_code)]
impl LiveServer {
    /// Read the server from the environment; `None` skips the test.
    pub fn from_env() -> Option<Self> {
        let address = std::env::var("SSH_TEST_ADDR").ok()?;
        let user = std::env::var("SSH_TEST_USER").ok()?;
        let password = std::env::var("SSH_TEST_PASSWORD").ok();
        let key = std::env::var("SSH_TEST_KEY").ok();
        if password.is_none() && key.is_none() {
            return None;
        }
        init_tracing();
        Some(Self {
            address,
            user,
            password,
            key,
        })
    }

    pub fn auth(&self) -> Box<dyn AuthStrategy> {
        match (&self.password, &self.key) {
            (Some(password), _) => Box::new(PasswordAuth::new(password.clone())),
            (None, Some(key)) => Box::new(KeyAuth::new(key.clone())),
            (None, None) => unreachable!("from_env requires a credential"),
        }
    }

    /// Connect with a fresh in-memory store, trusting the host on first use.
    pub async fn connect(&self) -> Client {
        let store: Arc<dyn TrustStore> = Arc::new(MemoryTrustStore::new());
        Connector::new(store)
            .connect(&self.user, &self.address, self.auth().as_ref(), Some(always_trust()))
            .await
            .expect("connection should succeed")
    }
}

pub fn always_trust() -> Arc<dyn HostVerifier> {
    Arc::new(|_host: &str, _addr: std::net::SocketAddr, _fp: &str| HostDecision::Trusted)
}

/// Skip the current test when no live server is configured.
#[allow(unused_macros)]
macro_rules! live_server {
    () => {
        match support::LiveServer::from_env() {
            Some(server) => server,
            None => {
                eprintln!("skipping: SSH_TEST_ADDR / SSH_TEST_USER and a credential are not set");
                return;
            }
        }
    };
}
