//! Transport layer producing plain duplex byte channels.
//!
//! Session negotiation, encryption, and authentication live behind
//! [`SshTransport`]; what the rest of the crate consumes is deliberately
//! dumb: a [`ShellChannel`] is raw bytes in and raw bytes out, an
//! [`ExecChannel`] is the per-command variant with an exit status. The
//! in-memory [`mem`] transport produces the same channel types for tests
//! and local wiring.

pub mod config;
pub mod mem;
mod ssh;

pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use ssh::SshTransport;

use bytes::Bytes;
use tokio::sync::mpsc;

/// A bidirectional raw byte channel to a remote shell.
///
/// Whatever sits on the far side (an SSH PTY channel, a loopback pair) is
/// the transport's business; the shell stream only sees bytes.
#[derive(Debug)]
pub struct ShellChannel {
    pub(crate) outbound: mpsc::Sender<Bytes>,
    pub(crate) inbound: mpsc::Receiver<Bytes>,
}

impl ShellChannel {
    /// Assemble a channel from its two directions. Transports call this;
    /// so can anything else that speaks raw bytes.
    pub fn new(outbound: mpsc::Sender<Bytes>, inbound: mpsc::Receiver<Bytes>) -> Self {
        Self { outbound, inbound }
    }
}

/// Something a running remote command reported.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    /// A chunk of standard output.
    Stdout(Bytes),

    /// A chunk of standard error.
    Stderr(Bytes),

    /// The remote exit status.
    Exit(u32),
}

/// Control messages flowing back to a running command's transport.
#[derive(Debug, Clone, Copy)]
pub enum ExecControl {
    /// Terminate the remote command.
    Cancel,
}

/// The duplex channel of a single remote command execution.
///
/// The event direction ends (sender dropped) when the remote side closes,
/// which is what signals completion to [`RemoteCommand`](crate::RemoteCommand).
#[derive(Debug)]
pub struct ExecChannel {
    pub(crate) events: mpsc::Receiver<ExecEvent>,
    pub(crate) control: mpsc::Sender<ExecControl>,
}

impl ExecChannel {
    /// Assemble an exec channel from its event and control directions.
    pub fn new(events: mpsc::Receiver<ExecEvent>, control: mpsc::Sender<ExecControl>) -> Self {
        Self { events, control }
    }
}
