//! In-process SSH server for integration tests.
//!
//! Serves the local filesystem over a loopback port:
//! - `exec` runs the command under `sh -c`, except `scp -qt <target>`,
//!   which is answered by a scripted SCP sink;
//! - the `sftp` subsystem is served by russh-sftp;
//! - user `alice` logs in with password `secret` or the `plain_key` fixture.
//!
//! The host key is `tests/fixtures/host_key`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use russh::keys::ssh_key::HashAlg;
use russh::keys::{PrivateKey, PublicKey, load_secret_key};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_sftp::protocol::{
    Data, FileAttributes, Handle as FileHandle, OpenFlags, Status, StatusCode, Version,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ssh_transfer::host_identifier;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "secret";

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// How the server deviates from a well-behaved OpenSSH.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    /// Answer every exec request with a channel failure, keeping the
    /// channel open.
    pub refuse_exec: bool,
    /// Accept the `sftp` subsystem but never speak SFTP on it.
    pub stall_sftp: bool,
}

/// A running loopback server. Stops accepting when dropped.
pub struct TestServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_behavior(Behavior::default()).await
    }

    pub async fn with_behavior(behavior: Behavior) -> Self {
        super::init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = Arc::new(server_config());
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let config = config.clone();
                let handler = Connection::new(behavior);
                tokio::spawn(async move {
                    match server::run_stream(config, socket, handler).await {
                        Ok(session) => {
                            if let Err(e) = session.await {
                                tracing::debug!("test server session ended: {}", e);
                            }
                        }
                        Err(e) => tracing::debug!("test server handshake failed: {}", e),
                    }
                });
            }
        });

        Self {
            addr,
            accepted,
            task,
        }
    }

    /// `host:port` to connect to.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Trust store identifier of this server.
    pub fn identifier(&self) -> String {
        host_identifier("127.0.0.1", self.addr.port())
    }

    /// TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn host_key() -> PublicKey {
        host_private_key().public_key().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn host_private_key() -> PrivateKey {
    load_secret_key(fixture("host_key"), None).unwrap()
}

fn server_config() -> server::Config {
    server::Config {
        keys: vec![host_private_key()],
        auth_rejection_time: Duration::from_millis(10),
        auth_rejection_time_initial: Some(Duration::ZERO),
        inactivity_timeout: Some(Duration::from_secs(60)),
        ..Default::default()
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

/// Per-connection handler.
struct Connection {
    behavior: Behavior,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl Connection {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            channels: HashMap::new(),
        }
    }
}

impl server::Handler for Connection {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        Ok(if user == USER && password == PASSWORD {
            Auth::Accept
        } else {
            reject()
        })
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let allowed =
            PublicKey::from_openssh(&std::fs::read_to_string(fixture("plain_key.pub")).unwrap())
                .unwrap();
        let same = public_key.fingerprint(HashAlg::Sha256) == allowed.fingerprint(HashAlg::Sha256);
        Ok(if user == USER && same {
            Auth::Accept
        } else {
            reject()
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.behavior.refuse_exec {
            // The channel stays open, as with OpenSSH.
            session.channel_failure(channel_id)?;
            return Ok(());
        }
        let Some(channel) = self.channels.remove(&channel_id) else {
            session.channel_failure(channel_id)?;
            return Ok(());
        };
        session.channel_success(channel_id)?;

        let command = String::from_utf8_lossy(data).into_owned();
        let handle = session.handle();
        match command.strip_prefix("scp -qt ") {
            Some(target) => tokio::spawn(scp_sink(channel, handle, unquote(target))),
            None => tokio::spawn(run_shell(channel, handle, command)),
        };
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let channel = match self.channels.remove(&channel_id) {
            Some(channel) if name == "sftp" => channel,
            _ => {
                session.channel_failure(channel_id)?;
                return Ok(());
            }
        };
        session.channel_success(channel_id)?;

        if self.behavior.stall_sftp {
            tokio::spawn(async move {
                let _held = channel;
                std::future::pending::<()>().await;
            });
        } else {
            russh_sftp::server::run(channel.into_stream(), LocalFiles::default()).await;
        }
        Ok(())
    }
}

/// Undo the single quoting the client applies to the scp target.
fn unquote(quoted: &str) -> String {
    quoted
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .unwrap_or(quoted)
        .replace(r"'\''", "'")
}

async fn run_shell(channel: Channel<Msg>, handle: server::Handle, command: String) {
    let id = channel.id();
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    let status = match output {
        Ok(output) => {
            if !output.stdout.is_empty() {
                let _ = handle.data(id, CryptoVec::from_slice(&output.stdout)).await;
            }
            if !output.stderr.is_empty() {
                let _ = handle
                    .extended_data(id, 1, CryptoVec::from_slice(&output.stderr))
                    .await;
            }
            output.status.code().unwrap_or(255) as u32
        }
        Err(_) => 127,
    };

    let _ = handle.exit_status_request(id, status).await;
    let _ = handle.eof(id).await;
    let _ = handle.close(id).await;
}

/// SCP sink: acknowledge, then store each `C` record under `target`.
async fn scp_sink(channel: Channel<Msg>, handle: server::Handle, target: String) {
    let id = channel.id();
    let mut stream = BufReader::new(channel.into_stream());

    let status = match receive(&mut stream, Path::new(&target)).await {
        Ok(()) => 0,
        Err(message) => {
            let line = format!("\x01scp: {}\n", message);
            let _ = stream.write_all(line.as_bytes()).await;
            let _ = handle
                .extended_data(id, 1, CryptoVec::from_slice(line[1..].as_bytes()))
                .await;
            1
        }
    };
    let _ = stream.flush().await;

    let _ = handle.exit_status_request(id, status).await;
    let _ = handle.eof(id).await;
    let _ = handle.close(id).await;
}

async fn receive<S>(io: &mut BufReader<S>, target: &Path) -> Result<(), String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_err = |e: std::io::Error| e.to_string();
    ack(io).await.map_err(io_err)?;

    loop {
        let mut line = Vec::new();
        if io.read_until(b'\n', &mut line).await.map_err(io_err)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&line).trim_end_matches('\n').to_string();
        let (mode, size, name) = parse_control(&line)?;

        let dest = if target.is_dir() {
            target.join(name)
        } else {
            target.to_path_buf()
        };
        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| format!("{}: {}", dest.display(), e))?;
        ack(io).await.map_err(io_err)?;

        let mut remaining = size;
        let mut buf = vec![0u8; 32 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = io.read(&mut buf[..want]).await.map_err(io_err)?;
            if n == 0 {
                return Err(format!("{}: unexpected end of data", dest.display()));
            }
            file.write_all(&buf[..n]).await.map_err(io_err)?;
            remaining -= n as u64;
        }
        file.flush().await.map_err(io_err)?;
        tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(io_err)?;

        if io.read_u8().await.map_err(io_err)? != 0 {
            return Err("missing data terminator".to_string());
        }
        ack(io).await.map_err(io_err)?;
    }
}

async fn ack<S: AsyncWrite + Unpin>(io: &mut S) -> std::io::Result<()> {
    io.write_all(&[0]).await?;
    io.flush().await
}

fn parse_control(line: &str) -> Result<(u32, u64, &str), String> {
    let bad = || format!("protocol error: bad control record {:?}", line);
    let rest = line.strip_prefix('C').ok_or_else(bad)?;
    let mut fields = rest.splitn(3, ' ');
    let mode = fields
        .next()
        .and_then(|m| u32::from_str_radix(m, 8).ok())
        .ok_or_else(bad)?;
    let size = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(bad)?;
    let name = fields.next().ok_or_else(bad)?;
    Ok((mode, size, name))
}

/// Read-only SFTP over the local filesystem.
#[derive(Default)]
struct LocalFiles {
    open: HashMap<String, std::fs::File>,
    next_handle: u64,
}

fn status_of(e: std::io::Error) -> StatusCode {
    match e.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

impl russh_sftp::server::Handler for LocalFiles {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        _pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<FileHandle, Self::Error> {
        let file = std::fs::File::open(&filename).map_err(status_of)?;
        let handle = self.next_handle.to_string();
        self.next_handle += 1;
        self.open.insert(handle.clone(), file);
        Ok(FileHandle { id, handle })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let file = self.open.get(&handle).ok_or(StatusCode::Failure)?;
        let mut data = vec![0u8; len as usize];
        let n = file.read_at(&mut data, offset).map_err(status_of)?;
        if n == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(n);
        Ok(Data { id, data })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.open.remove(&handle);
        Ok(Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Ok".to_string(),
            language_tag: "en-US".to_string(),
        })
    }
}
