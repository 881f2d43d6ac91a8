//! Remote command execution.
//!
//! Each command runs on its own session channel, so concurrent runs on one
//! [`Client`] never see each other's output.

use std::time::Duration;

use russh::ChannelMsg;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::types::CommandOutput;

/// Accumulates what a command channel reports until it finishes.
#[derive(Debug, Default)]
struct OutputCollector {
    output: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    eof: bool,
    refused: bool,
}

impl OutputCollector {
    /// Feed one channel message. Returns `false` once the channel is done.
    fn handle(&mut self, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => self.push(&data),
            // ext == 1 is stderr in SSH protocol
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    self.push(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.exit_status = Some(exit_status);
                return !self.eof;
            }
            ChannelMsg::ExitSignal {
                signal_name,
                error_message,
                ..
            } => {
                let mut signal = format!("{:?}", signal_name);
                if !error_message.is_empty() {
                    signal = format!("{} ({})", signal, error_message);
                }
                self.exit_signal = Some(signal);
            }
            ChannelMsg::Eof => {
                self.eof = true;
                // Exit status may still follow EOF.
                return self.exit_status.is_none() && self.exit_signal.is_none();
            }
            ChannelMsg::Close => return false,
            // Reply to the exec request: the server will not run it, and
            // OpenSSH keeps the channel open afterwards.
            ChannelMsg::Failure if !self.started() => {
                self.refused = true;
                return false;
            }
            _ => {}
        }
        true
    }

    fn started(&self) -> bool {
        !self.output.is_empty() || self.exit_status.is_some() || self.eof
    }

    fn push(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
    }

    fn finish(self, command: &str) -> Result<CommandOutput> {
        if self.refused {
            return Err(Error::Session {
                operation: format!("command `{}`", command),
                reason: "server refused to execute the command".to_string(),
            });
        }

        if let Some(signal) = self.exit_signal {
            return Err(Error::Run {
                command: command.to_string(),
                reason: format!("killed by signal {}", signal),
            });
        }

        let exit_status = self.exit_status.ok_or_else(|| Error::Run {
            command: command.to_string(),
            reason: "channel closed without an exit status".to_string(),
        })?;

        Ok(CommandOutput {
            output: String::from_utf8_lossy(&self.output).into_owned(),
            exit_status,
        })
    }
}

impl Client {
    /// Run `command` with the configured command timeout.
    ///
    /// A nonzero exit status is returned in the output, not as an error.
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.run_with_timeout(command, self.config().command_timeout)
            .await
    }

    /// Run `command`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// * `Session` - the channel could not be opened or the server refused the exec request
    /// * `Run` - the command ended by signal or without an exit status
    /// * `Timeout` - `timeout` elapsed; the channel is closed
    pub async fn run_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut channel = self.open_channel("command session").await?;

        if let Err(e) = channel.exec(true, command).await {
            let _ = channel.close().await;
            return Err(Error::Session {
                operation: format!("command `{}`", command),
                reason: format!("failed to execute command: {}", e),
            });
        }
        debug!("Executing on {}: {}", self.host(), command);

        let mut collector = OutputCollector::default();
        let result = tokio::time::timeout(timeout, async {
            while let Some(msg) = channel.wait().await {
                if !collector.handle(msg) {
                    break;
                }
            }
        })
        .await;

        // Always close the channel gracefully to keep the session alive
        let _ = channel.close().await;

        if result.is_err() {
            warn!(
                "Command timed out after {:?} ({} bytes collected): {}",
                timeout,
                collector.output.len(),
                command
            );
            return Err(Error::timeout(format!("command `{}`", command), timeout));
        }

        let output = collector.finish(command)?;
        debug!("Command exited with status {}: {}", output.exit_status, command);
        Ok(output)
    }
}
