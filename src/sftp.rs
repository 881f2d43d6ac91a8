//! SFTP download.

use std::io;
use std::path::Path;

use russh::{Channel, client};
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::StatusCode;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{Error, Result};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Failure while moving bytes from the remote reader to the local file.
#[derive(Debug)]
enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

/// Copy `reader` into `local` and flush it to disk.
///
/// Bytes already written stay in place when the copy fails part-way.
async fn copy_to_local<R>(reader: &mut R, local: &mut File) -> std::result::Result<u64, CopyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = reader.read(&mut buf).await.map_err(CopyError::Read)?;
        if n == 0 {
            break;
        }
        local
            .write_all(&buf[..n])
            .await
            .map_err(CopyError::Write)?;
        copied += n as u64;
    }

    local.flush().await.map_err(CopyError::Write)?;
    local.sync_all().await.map_err(CopyError::Write)?;
    Ok(copied)
}

/// Map an SFTP open failure to the crate error for `remote`.
fn remote_error(remote: &str, local: &Path, err: SftpError) -> Error {
    match err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => Error::FileNotFound {
                path: remote.to_string(),
            },
            StatusCode::PermissionDenied => Error::PermissionDenied {
                path: remote.to_string(),
            },
            _ => Error::Download {
                remote: remote.to_string(),
                local: local.to_path_buf(),
                reason: format!("{} ({:?})", status.error_message, status.status_code),
            },
        },
        other => Error::Download {
            remote: remote.to_string(),
            local: local.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

async fn fetch(sftp: &SftpSession, remote: &str, local: &Path) -> Result<u64> {
    // Open the remote side first: a missing remote path leaves no local file.
    let mut remote_file = sftp
        .open(remote)
        .await
        .map_err(|e| remote_error(remote, local, e))?;

    let mut local_file = File::create(local)
        .await
        .map_err(|e| Error::local(local, e))?;

    match copy_to_local(&mut remote_file, &mut local_file).await {
        Ok(copied) => {
            let _ = remote_file.shutdown().await;
            Ok(copied)
        }
        Err(CopyError::Write(e)) => Err(Error::local(local, e)),
        Err(CopyError::Read(e)) => Err(Error::Download {
            remote: remote.to_string(),
            local: local.to_path_buf(),
            reason: format!("read failed: {}", e),
        }),
    }
}

/// Start the SFTP subsystem on `channel`, then fetch `remote`.
///
/// The session is parked in `slot` as soon as it exists, so the caller can
/// close it even when this future is dropped part-way.
async fn start_and_fetch(
    channel: Channel<client::Msg>,
    slot: &mut Option<SftpSession>,
    remote: &str,
    local: &Path,
) -> Result<u64> {
    let session_error = |reason: String| Error::Session {
        operation: format!("download of {}", remote),
        reason,
    };

    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| session_error(format!("failed to request SFTP subsystem: {}", e)))?;

    let sftp = SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| session_error(format!("failed to initialize SFTP: {}", e)))?;
    debug!("SFTP session open for {}", remote);

    fetch(slot.insert(sftp), remote, local).await
}

impl Client {
    /// Download `remote` to `local` over SFTP. Returns the bytes copied.
    ///
    /// `local` is created or truncated, and synced to disk before returning.
    /// A copy that fails part-way leaves the partial local file in place.
    ///
    /// # Errors
    ///
    /// * `FileNotFound` / `PermissionDenied` - the remote file cannot be opened
    /// * `Session` - the SFTP subsystem could not be started
    /// * `LocalFile` - the local file could not be created or written
    /// * `Download` - any other remote or protocol failure
    /// * `Timeout` - the transfer timeout elapsed, including SFTP startup
    pub async fn download(&self, remote: &str, local: impl AsRef<Path>) -> Result<u64> {
        let local = local.as_ref();
        let timeout = self.config().transfer_timeout;

        let channel = self.open_channel("sftp download").await?;

        // Subsystem start, handshake and copy all count against the timeout.
        let mut sftp = None;
        let result = tokio::time::timeout(
            timeout,
            start_and_fetch(channel, &mut sftp, remote, local),
        )
        .await;

        if let Some(sftp) = sftp {
            if let Err(e) = sftp.close().await {
                debug!("Closing SFTP session failed: {}", e);
            }
        }

        match result {
            Ok(Ok(copied)) => {
                info!(
                    "Downloaded {} bytes from {}:{} to {}",
                    copied,
                    self.host(),
                    remote,
                    local.display()
                );
                Ok(copied)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!("Download of {} timed out after {:?}", remote, timeout);
                Err(Error::timeout(
                    format!("download {} -> {}", remote, local.display()),
                    timeout,
                ))
            }
        }
    }
}
