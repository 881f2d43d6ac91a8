//! Result and request types shared by the client operations.

use std::path::PathBuf;

/// Output of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output and standard error, combined in arrival order.
    pub output: String,
    /// Exit status reported by the remote process.
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Transfer direction relative to the local machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local file to remote path, over SCP.
    Upload,
    /// Remote file to local path, over SFTP.
    Download,
}

/// One file transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub direction: Direction,
}

impl TransferDescriptor {
    pub fn upload(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction: Direction::Upload,
        }
    }

    pub fn download(remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            direction: Direction::Download,
        }
    }
}
