//! In-memory transport for tests and local wiring.
//!
//! Produces the same channel types as the SSH transport, with the far side
//! held by the caller: inject bytes to simulate the remote shell, observe
//! what the stream writes.

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{ExecChannel, ExecControl, ExecEvent, ShellChannel};

/// Depth used for in-memory channels.
const MEM_DEPTH: usize = 64;

/// The far side of an in-memory shell channel.
#[derive(Debug)]
pub struct MemPeer {
    to_stream: mpsc::Sender<Bytes>,
    from_stream: mpsc::Receiver<Bytes>,
}

impl MemPeer {
    /// Deliver bytes to the stream, as a remote shell would.
    ///
    /// Returns `false` once the stream side is gone.
    pub async fn inject(&self, data: &[u8]) -> bool {
        self.to_stream
            .send(Bytes::copy_from_slice(data))
            .await
            .is_ok()
    }

    /// Observe the next chunk the stream wrote, or `None` when the stream
    /// closed its outbound side.
    pub async fn next_write(&mut self) -> Option<Bytes> {
        self.from_stream.recv().await
    }
}

/// Create a shell channel and its far-side peer.
pub fn channel_pair(capacity: usize) -> (ShellChannel, MemPeer) {
    let (to_stream, inbound) = mpsc::channel(capacity);
    let (outbound, from_stream) = mpsc::channel(capacity);
    (
        ShellChannel::new(outbound, inbound),
        MemPeer {
            to_stream,
            from_stream,
        },
    )
}

/// Create a shell channel whose writes come straight back as reads.
pub fn loopback(capacity: usize) -> ShellChannel {
    let (tx, rx) = mpsc::channel(capacity);
    ShellChannel::new(tx, rx)
}

/// Create an exec channel that plays `events` and then closes, plus a
/// receiver to observe control messages (cancellation).
pub fn scripted_exec(events: Vec<ExecEvent>) -> (ExecChannel, mpsc::Receiver<ExecControl>) {
    let (event_tx, event_rx) = mpsc::channel(MEM_DEPTH);
    let (control_tx, control_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        for event in events {
            if event_tx.send(event).await.is_err() {
                return;
            }
        }
    });

    (ExecChannel::new(event_rx, control_tx), control_rx)
}
