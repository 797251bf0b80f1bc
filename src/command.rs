//! Remote command execution over an exec channel.
//!
//! A [`RemoteCommand`] drives one command on its own duplex channel and
//! exposes the same begin/end completion style as the expect engine:
//! `begin_execute` returns a [`PendingOperation`] immediately, the output
//! is collected on a background task, and `end_execute` finalizes the token
//! with the command's standard output.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace};
use tokio::sync::mpsc;

use crate::error::{CommandError, Result, UsageError};
use crate::events::ByteStream;
use crate::pending::{self, CompletionCallback, PendingOperation};
use crate::transport::{ExecChannel, ExecControl, ExecEvent};

/// Depth of an output tap channel.
const TAP_DEPTH: usize = 64;

#[derive(Debug, Default)]
struct CommandState {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

/// A single remote command execution.
///
/// Construct it over an [`ExecChannel`] (from
/// [`SshTransport::open_exec`](crate::transport::SshTransport::open_exec)
/// or a scripted channel in tests), then run it once with
/// [`execute`](Self::execute) or the begin/end pair.
pub struct RemoteCommand {
    command: String,
    origin: u64,
    channel: Option<ExecChannel>,
    control: mpsc::Sender<ExecControl>,
    state: Arc<Mutex<CommandState>>,
    stdout_tap: Option<mpsc::Sender<Bytes>>,
    stderr_tap: Option<mpsc::Sender<Bytes>>,
}

impl RemoteCommand {
    /// Create a command over its exec channel.
    pub fn new(channel: ExecChannel, command: impl Into<String>) -> Self {
        let control = channel.control.clone();
        Self {
            command: command.into(),
            origin: pending::next_origin(),
            channel: Some(channel),
            control,
            state: Arc::new(Mutex::new(CommandState::default())),
            stdout_tap: None,
            stderr_tap: None,
        }
    }

    /// The command text.
    pub fn command_text(&self) -> &str {
        &self.command
    }

    /// Tap the live standard output. Must be set up before execution
    /// begins; chunks are forwarded as they arrive and the stream ends
    /// with the command.
    pub fn take_output_stream(&mut self) -> ByteStream {
        let (tx, rx) = mpsc::channel(TAP_DEPTH);
        self.stdout_tap = Some(tx);
        ByteStream::new(rx)
    }

    /// Tap the live standard error, like
    /// [`take_output_stream`](Self::take_output_stream).
    pub fn take_error_stream(&mut self) -> ByteStream {
        let (tx, rx) = mpsc::channel(TAP_DEPTH);
        self.stderr_tap = Some(tx);
        ByteStream::new(rx)
    }

    /// Start the execution without blocking and return a completion token
    /// for the command's standard output.
    pub fn begin_execute(&mut self) -> Result<PendingOperation<String>> {
        self.begin_execute_with(None)
    }

    /// [`begin_execute`](Self::begin_execute) with an optional completion
    /// callback, fired once when the command finishes.
    pub fn begin_execute_with(
        &mut self,
        callback: Option<CompletionCallback>,
    ) -> Result<PendingOperation<String>> {
        let mut channel = self
            .channel
            .take()
            .ok_or(CommandError::AlreadyExecuting)?;

        let (op, handle) = PendingOperation::new(self.origin, callback);
        let state = Arc::clone(&self.state);
        let stdout_tap = self.stdout_tap.take();
        let stderr_tap = self.stderr_tap.take();
        let command = self.command.clone();

        tokio::spawn(async move {
            debug!("executing remote command {:?}", command);
            while let Some(event) = channel.events.recv().await {
                match event {
                    ExecEvent::Stdout(data) => {
                        trace!("command stdout: {} bytes", data.len());
                        state.lock().unwrap().stdout.extend_from_slice(&data);
                        if let Some(tap) = &stdout_tap {
                            let _ = tap.send(data).await;
                        }
                    }
                    ExecEvent::Stderr(data) => {
                        trace!("command stderr: {} bytes", data.len());
                        state.lock().unwrap().stderr.extend_from_slice(&data);
                        if let Some(tap) = &stderr_tap {
                            let _ = tap.send(data).await;
                        }
                    }
                    ExecEvent::Exit(status) => {
                        debug!("remote command exited with status {}", status);
                        state.lock().unwrap().exit_status = Some(status);
                    }
                }
            }
            // Channel closed: the command is finished.
            let stdout = {
                let st = state.lock().unwrap();
                String::from_utf8_lossy(&st.stdout).into_owned()
            };
            handle.complete(stdout);
        });

        Ok(op)
    }

    /// Finalize a token from [`begin_execute`](Self::begin_execute). A
    /// token from another command, or a second finalize, is a usage error.
    pub async fn end_execute(&self, op: &mut PendingOperation<String>) -> Result<String> {
        if op.origin() != self.origin {
            return Err(UsageError::ForeignOperation.into());
        }
        op.wait().await
    }

    /// Run the command to completion and return its standard output.
    pub async fn execute(&mut self) -> Result<String> {
        let mut op = self.begin_execute()?;
        self.end_execute(&mut op).await
    }

    /// Run the command with a hard deadline. Unlike expect timeouts, this
    /// path reports elapsing as an error and cancels the remote command.
    pub async fn execute_timeout(&mut self, timeout: Duration) -> Result<String> {
        let mut op = self.begin_execute()?;
        match tokio::time::timeout(timeout, self.end_execute(&mut op)).await {
            Ok(result) => result,
            Err(_) => {
                let _ = self.cancel_async().await;
                Err(CommandError::Timeout(timeout).into())
            }
        }
    }

    /// Ask the transport to terminate the remote command.
    pub async fn cancel_async(&self) -> Result<()> {
        self.control
            .send(ExecControl::Cancel)
            .await
            .map_err(|_| CommandError::ChannelClosed)?;
        Ok(())
    }

    /// Exit status reported by the remote side, once known.
    pub fn exit_status(&self) -> Option<u32> {
        self.state.lock().unwrap().exit_status
    }

    /// Standard output collected so far.
    pub fn result(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().stdout).into_owned()
    }

    /// Standard error collected so far.
    pub fn error(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().stderr).into_owned()
    }
}

impl std::fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("command", &self.command)
            .field("executing", &self.channel.is_none())
            .finish_non_exhaustive()
    }
}
