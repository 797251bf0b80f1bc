//! Stream lifecycle and data notifications.
//!
//! A [`ShellStream`](crate::ShellStream) broadcasts [`StreamEvent`]s to any
//! number of subscribers, independently of whether an expect is pending.
//! `DataReceived` fires on every append; `ErrorOccurred` is the only place a
//! failure with no pending caller becomes observable.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::{broadcast, mpsc};

use crate::error::Error;

/// Notification broadcast by a shell stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream is about to start.
    Starting,

    /// The stream started; the transport reader is running.
    Started,

    /// The stream is about to stop.
    Stopping,

    /// The stream stopped; pending waits have been force-completed.
    Stopped,

    /// Bytes were appended to the incoming buffer.
    DataReceived(Bytes),

    /// A failure occurred. Also carried to whichever call was pending.
    ErrorOccurred(Arc<Error>),
}

/// Turn a broadcast subscription into a `futures_core::Stream`.
///
/// Lagged subscribers skip dropped events rather than erroring; the stream
/// ends when the sender side is gone.
pub fn event_stream(
    receiver: broadcast::Receiver<StreamEvent>,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    futures_util::stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("event subscriber lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

/// A live stream of byte chunks, used for command output taps.
#[derive(Debug)]
pub struct ByteStream {
    rx: mpsc::Receiver<Bytes>,
}

impl ByteStream {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Receive the next chunk, or `None` once the producer finishes.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Stream for ByteStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.rx.poll_recv(cx)
    }
}
