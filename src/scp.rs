//! SCP upload.
//!
//! The local side plays the SCP *source* against a remote `scp -t` sink
//! running on a fresh session channel:
//!
//! ```text
//! sink   -> \0                      ready
//! source -> C0644 5 a.txt\n         control line
//! sink   -> \0                      accepted
//! source -> hello\0                 payload, then terminator
//! sink   -> \0                      stored
//! ```
//!
//! Any acknowledgment other than `\0` fails the upload. `\x01` and `\x02`
//! carry a message line from the sink (permission denied, disk full, ...).
//! The acknowledgments are the only success signal; the sink's exit status
//! and stderr are kept for error detail.
//!
//! Two futures run concurrently and are joined before returning: the
//! sender, which writes to the channel and reads acknowledgments, and the
//! pump, which drains channel messages and feeds stdout bytes to the
//! sender's acknowledgment reader.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use bytes::Bytes;
use futures::channel::mpsc;
use russh::{Channel, ChannelMsg, client};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{Error, Result};

const ACK_OK: u8 = 0;
const ACK_WARNING: u8 = 1;
const ACK_FATAL: u8 = 2;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Reject names the sink would misparse or resolve outside the target.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "is empty"
    } else if name == "." || name == ".." {
        "is a directory reference"
    } else if name.contains(['\n', '\r']) {
        "contains a line break"
    } else if name.contains('\0') {
        "contains a NUL byte"
    } else if name.contains('/') {
        "contains a path separator"
    } else if name.starts_with('C') {
        "starts with the control record marker `C`"
    } else {
        return Ok(());
    };

    Err(Error::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// The `C` record announcing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ControlMessage {
    pub mode: u32,
    pub size: u64,
    pub name: String,
}

impl ControlMessage {
    pub(crate) fn new(mode: u32, size: u64, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            mode: mode & 0o7777,
            size,
            name,
        })
    }

    pub(crate) fn encode(&self) -> String {
        format!("C{:04o} {} {}\n", self.mode, self.size, self.name)
    }
}

/// Why an SCP exchange failed.
#[derive(Debug, Error)]
pub(crate) enum ScpError {
    #[error("remote scp: {0}")]
    Remote(String),

    #[error("remote scp closed the stream before acknowledging the {0}")]
    Closed(&'static str),

    #[error("unexpected acknowledgment byte {0:#04x} after the {1}")]
    UnexpectedAck(u8, &'static str),

    #[error("local read failed: {0}")]
    Local(#[source] io::Error),

    #[error("local file ended after {sent} of {expected} bytes")]
    Truncated { sent: u64, expected: u64 },

    #[error("channel I/O failed: {0}")]
    Stream(#[source] io::Error),
}

/// Read one acknowledgment; `step` names what it acknowledges.
pub(crate) async fn read_ack<R>(acks: &mut R, step: &'static str) -> std::result::Result<(), ScpError>
where
    R: AsyncBufRead + Unpin,
{
    let code = match acks.read_u8().await {
        Ok(code) => code,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ScpError::Closed(step)),
        Err(e) => return Err(ScpError::Stream(e)),
    };

    match code {
        ACK_OK => Ok(()),
        ACK_WARNING | ACK_FATAL => {
            let mut line = Vec::new();
            acks.read_until(b'\n', &mut line)
                .await
                .map_err(ScpError::Stream)?;
            let message = String::from_utf8_lossy(&line).trim_end().to_string();
            Err(ScpError::Remote(if message.is_empty() {
                format!("error code {} after the {}", code, step)
            } else {
                message
            }))
        }
        other => Err(ScpError::UnexpectedAck(other, step)),
    }
}

/// Copy exactly `size` bytes from `file` to `sink`.
async fn copy_exact<F, W>(file: &mut F, sink: &mut W, size: u64) -> std::result::Result<u64, ScpError>
where
    F: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(size.max(1) as usize)];
    let mut remaining = size;

    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want]).await.map_err(ScpError::Local)?;
        if n == 0 {
            return Err(ScpError::Truncated {
                sent: size - remaining,
                expected: size,
            });
        }
        sink.write_all(&buf[..n]).await.map_err(ScpError::Stream)?;
        remaining -= n as u64;
    }

    Ok(size)
}

/// Source side of one file transfer, up to and including the final ack.
pub(crate) async fn send_file<R, W, F>(
    acks: &mut R,
    sink: &mut W,
    file: &mut F,
    control: &ControlMessage,
) -> std::result::Result<u64, ScpError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: AsyncRead + Unpin,
{
    read_ack(acks, "session start").await?;

    sink.write_all(control.encode().as_bytes())
        .await
        .map_err(ScpError::Stream)?;
    sink.flush().await.map_err(ScpError::Stream)?;
    read_ack(acks, "control line").await?;

    let sent = copy_exact(file, sink, control.size).await?;
    sink.write_all(&[ACK_OK]).await.map_err(ScpError::Stream)?;
    sink.flush().await.map_err(ScpError::Stream)?;
    read_ack(acks, "file data").await?;

    Ok(sent)
}

/// What the sink reported besides acknowledgments.
#[derive(Debug, Default)]
struct SinkReport {
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    /// The server answered the exec request with a failure.
    refused: bool,
}

impl SinkReport {
    fn detail(&self, cause: &ScpError) -> String {
        let mut detail = cause.to_string();
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() && !detail.contains(stderr) {
            detail.push_str(&format!("; stderr: {}", stderr));
        }
        if let Some(status) = self.exit_status.filter(|s| *s != 0) {
            detail.push_str(&format!("; exit status {}", status));
        }
        detail
    }
}

/// Follows the sink channel, forwarding stdout as ack bytes.
struct SinkMonitor {
    acks: Option<mpsc::UnboundedSender<io::Result<Bytes>>>,
    report: SinkReport,
    started: bool,
}

impl SinkMonitor {
    fn new(acks: mpsc::UnboundedSender<io::Result<Bytes>>) -> Self {
        Self {
            acks: Some(acks),
            report: SinkReport::default(),
            started: false,
        }
    }

    /// Feed one channel message. Returns `false` once the channel is done.
    fn handle(&mut self, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => {
                self.started = true;
                if let Some(tx) = &self.acks {
                    let _ = tx.unbounded_send(Ok(Bytes::copy_from_slice(&data)));
                }
            }
            ChannelMsg::ExtendedData { data, ext: 1 } => {
                self.started = true;
                self.report.stderr.extend_from_slice(&data);
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.started = true;
                self.report.exit_status = Some(exit_status);
            }
            // No more acks can arrive; let a waiting reader see EOF.
            ChannelMsg::Eof => self.acks = None,
            ChannelMsg::Close => return false,
            // The exec request was refused; the channel may stay open.
            ChannelMsg::Failure if !self.started => {
                self.report.refused = true;
                self.acks = None;
                return false;
            }
            _ => {}
        }
        true
    }
}

/// Drain the channel until it closes or the sink is refused.
async fn pump(
    channel: &mut Channel<client::Msg>,
    acks: mpsc::UnboundedSender<io::Result<Bytes>>,
) -> SinkReport {
    let mut monitor = SinkMonitor::new(acks);
    while let Some(msg) = channel.wait().await {
        if !monitor.handle(msg) {
            break;
        }
    }
    monitor.report
}

/// Quote `path` for the remote shell.
fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// Open the local file and build its control message. No network I/O.
async fn prepare(local: &Path) -> Result<(File, ControlMessage)> {
    let name = match local.file_name() {
        Some(name) => name.to_str().ok_or_else(|| Error::InvalidName {
            name: name.to_string_lossy().into_owned(),
            reason: "is not valid UTF-8",
        })?,
        None => "",
    };
    validate_name(name)?;

    let file = File::open(local).await.map_err(|e| Error::local(local, e))?;
    let metadata = file.metadata().await.map_err(|e| Error::local(local, e))?;
    if !metadata.is_file() {
        return Err(Error::local(
            local,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    let control = ControlMessage::new(metadata.permissions().mode(), metadata.len(), name)?;
    Ok((file, control))
}

fn upload_error(local: &Path, remote: &str, cause: ScpError, report: &SinkReport) -> Error {
    if report.refused {
        return Error::Session {
            operation: format!("upload to {}", remote),
            reason: "server refused to start scp".to_string(),
        };
    }
    match cause {
        ScpError::Local(e) => Error::local(local, e),
        ScpError::Truncated { .. } => Error::local(
            local,
            io::Error::new(io::ErrorKind::UnexpectedEof, cause.to_string()),
        ),
        cause => Error::Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            reason: report.detail(&cause),
        },
    }
}

impl Client {
    /// Upload the file at `local` to `remote` over SCP. Returns the bytes sent.
    ///
    /// The remote path is passed to `scp -t`; an existing directory receives
    /// the file under its local name.
    ///
    /// # Errors
    ///
    /// * `InvalidName` - the local file name cannot be sent; checked before connecting
    /// * `LocalFile` - the local file could not be opened or read
    /// * `Session` - the remote `scp` could not be started or the server refused it
    /// * `Upload` - the sink refused the file or the exchange broke off
    /// * `Timeout` - the transfer timeout elapsed
    pub async fn upload(&self, local: impl AsRef<Path>, remote: &str) -> Result<u64> {
        let local = local.as_ref();
        let (mut file, control) = prepare(local).await?;
        let timeout = self.config().transfer_timeout;

        let mut channel = self.open_channel("scp upload").await?;
        let command = format!("scp -qt {}", shell_quote(remote));
        if let Err(e) = channel.exec(true, command.as_str()).await {
            let _ = channel.close().await;
            return Err(Error::Session {
                operation: format!("upload to {}", remote),
                reason: format!("failed to start scp: {}", e),
            });
        }
        debug!(
            "Uploading {} ({} bytes, mode {:04o}) to {}:{}",
            local.display(),
            control.size,
            control.mode,
            self.host(),
            remote
        );

        let (ack_tx, ack_rx) = mpsc::unbounded();
        let mut acks = StreamReader::new(ack_rx);
        let mut writer = Box::pin(channel.make_writer());

        let send = async {
            let result = send_file(&mut acks, &mut writer, &mut file, &control).await;
            // EOF tells the sink we're done, success or not.
            let _ = writer.shutdown().await;
            result
        };

        let outcome = tokio::time::timeout(timeout, async {
            tokio::join!(send, pump(&mut channel, ack_tx))
        })
        .await;

        let _ = channel.close().await;

        let (sent, report) = outcome.map_err(|_| {
            warn!("Upload of {} timed out after {:?}", local.display(), timeout);
            Error::timeout(format!("upload {} -> {}", local.display(), remote), timeout)
        })?;

        match sent {
            Ok(bytes) => {
                if let Some(status) = report.exit_status.filter(|s| *s != 0) {
                    warn!(
                        "scp exited with status {} after acknowledging {}",
                        status, remote
                    );
                }
                info!("Uploaded {} bytes to {}:{}", bytes, self.host(), remote);
                Ok(bytes)
            }
            Err(cause) => Err(upload_error(local, remote, cause, &report)),
        }
    }
}
