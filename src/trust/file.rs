//! known_hosts file trust store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use russh::keys::known_hosts::{known_host_keys_path, learn_known_hosts_path};
use tracing::debug;

use crate::error::{Error, Result};

use super::split_identifier;
use super::traits::{HostRecord, TrustStore};

/// Trust store backed by an OpenSSH known_hosts file.
///
/// Reads and appends go through russh's known_hosts support, so an existing
/// `~/.ssh/known_hosts` works as is, hashed (`|1|salt|hash`) entries
/// included. The file is read on every lookup; new records are appended as
/// single lines. Writers in other processes are not coordinated.
pub struct FileTrustStore {
    path: PathBuf,
    // Serializes check-then-append within this process.
    write_lock: Mutex<()>,
}

impl FileTrustStore {
    /// Open the store at `path`. A missing file is an empty store; it is
    /// created on the first [`record`](TrustStore::record).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(Error::TrustStore {
                    path: path.display().to_string(),
                    reason: "not a regular file".to_string(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Trust store {} does not exist yet", path.display());
            }
            Err(e) => return Err(store_error(&path, e)),
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::TrustStore {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

impl TrustStore for FileTrustStore {
    fn lookup(&self, host: &str, algorithm: &str) -> Result<Option<HostRecord>> {
        let (name, port) = split_identifier(host);
        let keys = known_host_keys_path(name, port, &self.path)
            .map_err(|e| store_error(&self.path, e))?;

        // First matching line wins, as with ssh.
        keys.into_iter()
            .map(|(_, key)| key)
            .find(|key| key.algorithm().as_str() == algorithm)
            .map(|key| HostRecord::from_key(host, &key))
            .transpose()
    }

    fn record(&self, record: HostRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match self.lookup(&record.host, &record.algorithm)? {
            Some(existing) if existing == record => Ok(()),
            Some(_) => Err(Error::TrustStore {
                path: self.path.display().to_string(),
                reason: format!(
                    "a different {} key is already recorded for {}",
                    record.algorithm, record.host
                ),
            }),
            None => {
                let key = record.key().ok_or_else(|| Error::TrustStore {
                    path: self.path.display().to_string(),
                    reason: format!("cannot decode {} key for {}", record.algorithm, record.host),
                })?;
                let (name, port) = split_identifier(&record.host);
                learn_known_hosts_path(name, port, &key, &self.path)
                    .map_err(|e| store_error(&self.path, e))?;
                debug!("Recorded {} key for {} in {}", record.algorithm, record.host, self.path.display());
                Ok(())
            }
        }
    }
}
