//! Private key file SSH authentication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::keys::{self, PrivateKey};
use tracing::debug;

use crate::error::{Error, Result};

use super::traits::{AuthStrategy, Credential};

/// Private key file authentication strategy.
///
/// Loads an OpenSSH/PEM private key from a file, decrypting it with the
/// passphrase when one is configured.
pub struct KeyAuth {
    key_path: PathBuf,
    passphrase: Option<String>,
}

impl KeyAuth {
    /// Create a new key authentication strategy.
    ///
    /// # Arguments
    ///
    /// * `key_path` - Path to the private key file
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            passphrase: None,
        }
    }

    /// Decrypt the key with `passphrase`.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

/// Decode key text, telling a passphrase problem apart from a malformed key.
fn decode_key(text: &str, passphrase: Option<&str>, path: &Path) -> Result<PrivateKey> {
    match keys::decode_secret_key(text, passphrase) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) => Err(Error::Passphrase {
            path: path.to_path_buf(),
        }),
        // A decryption failure with a passphrase looks like any other parse
        // error; the key is encrypted iff decoding without one says so.
        Err(_)
            if passphrase.is_some()
                && matches!(
                    keys::decode_secret_key(text, None),
                    Err(keys::Error::KeyIsEncrypted)
                ) =>
        {
            Err(Error::Passphrase {
                path: path.to_path_buf(),
            })
        }
        Err(e) => Err(Error::KeyLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn credential(&self) -> Result<Credential> {
        let text = tokio::fs::read_to_string(&self.key_path)
            .await
            .map_err(|e| Error::KeyLoad {
                path: self.key_path.clone(),
                reason: e.to_string(),
            })?;

        let key = decode_key(&text, self.passphrase.as_deref(), &self.key_path)?;
        debug!(
            "Loaded {} key from {}",
            key.algorithm().as_str(),
            self.key_path.display()
        );

        Ok(Credential::PrivateKey(Arc::new(key)))
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
