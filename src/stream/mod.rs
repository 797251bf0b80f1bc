//! The shell stream: an expect engine over a duplex byte channel.
//!
//! A [`ShellStream`] sits on a [`ShellChannel`](crate::transport::ShellChannel)
//! supplied by a transport and lets any number of tasks declare patterns and
//! suspend until incoming data satisfies one, or a deadline elapses. The
//! transport feeds data from its own task; every append runs one FIFO
//! notification pass over the pending waits under a single critical section,
//! and actions run after the section is released.

mod buffer;
mod registry;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use log::{debug, trace, warn};
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, StreamError, TransportError, UsageError};
use crate::events::{self, StreamEvent};
use crate::pattern::{self, ExpectAction, Pattern};
use crate::pending::{self, CompletionCallback, PendingOperation};
use crate::transport::ShellChannel;

use buffer::IncomingBuffer;
use registry::WaitRegistry;

/// Shell stream lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created but not yet started.
    NotStarted,

    /// Started; the transport reader is running.
    Started,

    /// Stopped by the caller (or dropped).
    Stopped,

    /// The transport closed the channel underneath us.
    Faulted,
}

/// Configuration for shell stream behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Initial capacity of the incoming buffer.
    pub buffer_size: usize,

    /// Growth bound for the incoming buffer. Exceeding it with no pattern
    /// match fails every pending wait with a buffer-overflow error.
    pub max_buffer: usize,

    /// Line terminator used by `write_line` and `read_line`.
    pub line_terminator: String,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            max_buffer: 1024 * 1024,
            line_terminator: "\n".to_string(),
            event_capacity: 64,
        }
    }
}

/// A satisfied expect: which pattern won and the consumed text (everything
/// up to and including the match).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    /// Index of the matched pattern in declaration order.
    pub pattern_index: usize,

    /// The consumed text.
    pub text: String,
}

/// Outcome of registering a wait: either the buffer already satisfied a
/// pattern, or the wait is parked in the registry.
enum RegisterOutcome {
    Ready {
        matched: ExpectMatch,
        actions: Vec<ExpectAction>,
    },
    Pending {
        id: u64,
        rx: oneshot::Receiver<Result<ExpectMatch>>,
        /// Actions handed back to the caller when the registry does not
        /// keep them (blocking expect).
        actions: Option<Vec<ExpectAction>>,
    },
}

struct StreamState {
    status: Status,
    buffer: IncomingBuffer,
    waits: WaitRegistry,
    /// Inbound half of the channel, taken by `start`.
    inbound: Option<mpsc::Receiver<Bytes>>,
    reader: Option<JoinHandle<()>>,
}

struct StreamInner {
    origin: u64,
    config: StreamConfig,
    state: Mutex<StreamState>,
    events: broadcast::Sender<StreamEvent>,
    outbound: mpsc::Sender<Bytes>,
}

/// An expect engine over a remote shell's byte stream.
///
/// All methods take `&self`; wrap the stream in an `Arc` to share it across
/// tasks. Reads, writes, and any number of concurrent expect calls may
/// proceed independently.
///
/// # Example
///
/// ```rust
/// use shellstream::{ExpectAction, ShellStream, StreamConfig};
/// use shellstream::transport::mem;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), shellstream::Error> {
/// let (channel, peer) = mem::channel_pair(16);
/// let stream = ShellStream::new(channel, StreamConfig::default());
/// stream.start()?;
///
/// peer.inject(b"login: ").await;
/// let matched = stream
///     .expect(vec![ExpectAction::literal("login: ", |_| {})])
///     .await?;
/// assert_eq!(matched.text, "login: ");
/// # Ok(())
/// # }
/// ```
pub struct ShellStream {
    inner: Arc<StreamInner>,
}

impl ShellStream {
    /// Create a stream over a duplex byte channel. The stream is inert
    /// until [`start`](Self::start) is called.
    pub fn new(channel: ShellChannel, config: StreamConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let buffer = IncomingBuffer::new(config.buffer_size);
        Self {
            inner: Arc::new(StreamInner {
                origin: pending::next_origin(),
                config,
                state: Mutex::new(StreamState {
                    status: Status::NotStarted,
                    buffer,
                    waits: WaitRegistry::new(),
                    inbound: Some(channel.inbound),
                    reader: None,
                }),
                events,
                outbound: channel.outbound,
            }),
        }
    }

    // ---- lifecycle ------------------------------------------------------

    /// Start the stream: spawn the transport reader and begin accepting
    /// expect registrations.
    pub fn start(&self) -> Result<()> {
        let mut inbound = {
            let mut st = self.inner.state.lock().unwrap();
            match st.status {
                Status::NotStarted => {}
                Status::Started => return Err(UsageError::AlreadyStarted.into()),
                Status::Stopped | Status::Faulted => return Err(StreamError::Stopped.into()),
            }
            self.inner.emit(StreamEvent::Starting);
            st.status = Status::Started;
            st.inbound
                .take()
                .expect("inbound half present before first start")
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(data) = inbound.recv().await {
                StreamInner::feed(&inner, data);
            }
            StreamInner::on_transport_closed(&inner);
        });

        self.inner.state.lock().unwrap().reader = Some(handle);
        self.inner.emit(StreamEvent::Started);
        debug!("shell stream started");
        Ok(())
    }

    /// Stop the stream. Every pending wait completes with a stopped error
    /// and further registration is rejected.
    pub fn stop(&self) -> Result<()> {
        let (reader, completions) = {
            let mut st = self.inner.state.lock().unwrap();
            match st.status {
                Status::Started => {}
                Status::NotStarted => return Err(UsageError::NotStarted.into()),
                Status::Stopped | Status::Faulted => return Err(StreamError::Stopped.into()),
            }
            self.inner.emit(StreamEvent::Stopping);
            st.status = Status::Stopped;
            (
                st.reader.take(),
                st.waits.drain_all(|| StreamError::Stopped.into()),
            )
        };

        if let Some(handle) = reader {
            handle.abort();
        }
        for completion in completions {
            completion.deliver();
        }
        self.inner.emit(StreamEvent::Stopped);
        debug!("shell stream stopped");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn status(&self) -> Status {
        self.inner.state.lock().unwrap().status
    }

    /// Whether the stream is started.
    pub fn is_started(&self) -> bool {
        self.status() == Status::Started
    }

    // ---- events ---------------------------------------------------------

    /// Subscribe to stream events.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to stream events as a `futures_core::Stream`.
    pub fn event_stream(&self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        events::event_stream(self.inner.events.subscribe())
    }

    // ---- expect ---------------------------------------------------------

    /// Suspend until one of `actions` matches, run the matched action on
    /// the calling task, and return the match.
    pub async fn expect(&self, actions: Vec<ExpectAction>) -> Result<ExpectMatch> {
        match self.inner.register(actions, false)? {
            RegisterOutcome::Ready {
                matched,
                mut actions,
            } => {
                actions[matched.pattern_index].invoke(&matched.text);
                Ok(matched)
            }
            RegisterOutcome::Pending { rx, actions, .. } => {
                let mut actions = actions.expect("actions kept local for a blocking expect");
                let matched = StreamInner::await_indefinite(rx).await?;
                actions[matched.pattern_index].invoke(&matched.text);
                Ok(matched)
            }
        }
    }

    /// Like [`expect`](Self::expect), but give up silently after `timeout`:
    /// `Ok(None)` with no action run. The deadline is enforced on the
    /// monotonic clock whether or not data keeps arriving.
    pub async fn expect_timeout(
        &self,
        actions: Vec<ExpectAction>,
        timeout: Duration,
    ) -> Result<Option<ExpectMatch>> {
        match self.inner.register(actions, false)? {
            RegisterOutcome::Ready {
                matched,
                mut actions,
            } => {
                actions[matched.pattern_index].invoke(&matched.text);
                Ok(Some(matched))
            }
            RegisterOutcome::Pending { id, rx, actions } => {
                let mut actions = actions.expect("actions kept local for a blocking expect");
                match self.inner.await_deadline(id, rx, timeout).await? {
                    Some(matched) => {
                        actions[matched.pattern_index].invoke(&matched.text);
                        Ok(Some(matched))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Wait for literal `text`; return the consumed text, or `None` if the
    /// deadline elapses.
    pub async fn expect_text(&self, text: &str, timeout: Duration) -> Result<Option<String>> {
        let actions = vec![ExpectAction::new(Pattern::literal(text), |_| {})];
        Ok(self
            .expect_timeout(actions, timeout)
            .await?
            .map(|matched| matched.text))
    }

    /// Wait for `regex`; return the consumed text, or `None` if the
    /// deadline elapses.
    pub async fn expect_regex(&self, regex: Regex, timeout: Duration) -> Result<Option<String>> {
        let actions = vec![ExpectAction::new(Pattern::from(regex), |_| {})];
        Ok(self
            .expect_timeout(actions, timeout)
            .await?
            .map(|matched| matched.text))
    }

    /// Register an expect without blocking and return a completion token.
    /// The matched action runs on whichever task delivers the triggering
    /// data; collect the result with [`end_expect`](Self::end_expect).
    pub fn begin_expect(
        &self,
        actions: Vec<ExpectAction>,
    ) -> Result<PendingOperation<Option<String>>> {
        self.begin_expect_with(actions, None, None)
    }

    /// [`begin_expect`](Self::begin_expect) with an optional deadline and
    /// an optional completion callback. On deadline the token completes
    /// with `None` and no action runs.
    pub fn begin_expect_with(
        &self,
        actions: Vec<ExpectAction>,
        timeout: Option<Duration>,
        callback: Option<CompletionCallback>,
    ) -> Result<PendingOperation<Option<String>>> {
        let (op, handle) = PendingOperation::new(self.inner.origin, callback);
        match self.inner.register(actions, true)? {
            RegisterOutcome::Ready {
                matched,
                mut actions,
            } => {
                actions[matched.pattern_index].invoke(&matched.text);
                handle.complete(Some(matched.text));
            }
            RegisterOutcome::Pending { id, rx, .. } => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let outcome = match timeout {
                        None => StreamInner::await_indefinite(rx).await.map(Some),
                        Some(t) => inner.await_deadline(id, rx, t).await,
                    };
                    match outcome {
                        Ok(Some(matched)) => handle.complete(Some(matched.text)),
                        Ok(None) => handle.complete(None),
                        Err(e) => handle.fault(e),
                    }
                });
            }
        }
        Ok(op)
    }

    /// Finalize a token from [`begin_expect`](Self::begin_expect): suspend
    /// until completion and return what the blocking form would have.
    /// A token from another stream, or a second finalize, is a usage error.
    pub async fn end_expect(
        &self,
        op: &mut PendingOperation<Option<String>>,
    ) -> Result<Option<String>> {
        if op.origin() != self.inner.origin {
            return Err(UsageError::ForeignOperation.into());
        }
        op.wait().await
    }

    // ---- line reading ---------------------------------------------------

    /// Suspend until a full line arrives and return it, terminator
    /// stripped.
    pub async fn read_line(&self) -> Result<String> {
        let terminator = self.inner.config.line_terminator.clone();
        let matched = self
            .expect(vec![ExpectAction::new(
                Pattern::literal(terminator.clone()),
                |_| {},
            )])
            .await?;
        Ok(strip_line(matched.text, &terminator))
    }

    /// Like [`read_line`](Self::read_line) with a deadline; `Ok(None)` when
    /// no full line arrives in time.
    pub async fn read_line_timeout(&self, timeout: Duration) -> Result<Option<String>> {
        let terminator = self.inner.config.line_terminator.clone();
        let matched = self
            .expect_timeout(
                vec![ExpectAction::new(
                    Pattern::literal(terminator.clone()),
                    |_| {},
                )],
                timeout,
            )
            .await?;
        Ok(matched.map(|m| strip_line(m.text, &terminator)))
    }

    // ---- read / write ---------------------------------------------------

    /// Drain and return all buffered text without waiting.
    pub fn read(&self) -> Result<String> {
        let mut st = self.inner.state.lock().unwrap();
        ensure_started(st.status)?;
        let data = st.buffer.drain();
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Copy up to `out.len()` buffered bytes into `out`, consuming them.
    /// Returns the number of bytes copied (zero when nothing is buffered).
    pub fn read_into(&self, out: &mut [u8]) -> Result<usize> {
        let mut st = self.inner.state.lock().unwrap();
        ensure_started(st.status)?;
        Ok(st.buffer.copy_into(out))
    }

    /// Write text to the shell. Empty input writes nothing.
    pub async fn write(&self, text: &str) -> Result<()> {
        self.write_bytes(text.as_bytes()).await
    }

    /// Write raw bytes to the shell. Writes pass straight through to the
    /// transport with no internal buffering.
    pub async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        ensure_started(self.inner.state.lock().unwrap().status)?;
        if data.is_empty() {
            return Ok(());
        }
        self.inner
            .outbound
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| TransportError::Disconnected)?;
        Ok(())
    }

    /// Write a line followed by the configured terminator. An empty line
    /// writes only the terminator.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let terminator = &self.inner.config.line_terminator;
        let mut text = String::with_capacity(line.len() + terminator.len());
        text.push_str(line);
        text.push_str(terminator);
        self.write(&text).await
    }

    /// Flush the outbound side. Writes are pass-through, so this only
    /// validates stream state.
    pub fn flush(&self) -> Result<()> {
        ensure_started(self.inner.state.lock().unwrap().status)
    }

    // ---- accessors ------------------------------------------------------

    /// Whether unconsumed data is buffered.
    pub fn data_available(&self) -> bool {
        !self.inner.state.lock().unwrap().buffer.is_empty()
    }

    /// Configured initial capacity of the incoming buffer.
    pub fn buffer_size(&self) -> usize {
        self.inner.config.buffer_size
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().buffer.len()
    }

    /// Whether the incoming buffer is empty.
    pub fn is_empty(&self) -> bool {
        !self.data_available()
    }

    /// Total bytes consumed from the stream so far (the read cursor).
    pub fn position(&self) -> u64 {
        self.inner.state.lock().unwrap().buffer.total_consumed()
    }
}

impl Drop for ShellStream {
    fn drop(&mut self) {
        let (reader, completions) = {
            let mut st = self.inner.state.lock().unwrap();
            if st.status != Status::Started {
                return;
            }
            st.status = Status::Stopped;
            (
                st.reader.take(),
                st.waits.drain_all(|| StreamError::Stopped.into()),
            )
        };
        if let Some(handle) = reader {
            handle.abort();
        }
        for completion in completions {
            completion.deliver();
        }
        self.inner.emit(StreamEvent::Stopped);
    }
}

impl StreamInner {
    fn emit(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }

    /// Register a wait, evaluating the buffer immediately first so data
    /// already present resolves without waiting.
    fn register(&self, actions: Vec<ExpectAction>, store_actions: bool) -> Result<RegisterOutcome> {
        if actions.is_empty() {
            return Err(UsageError::NoPatterns.into());
        }

        let mut st = self.state.lock().unwrap();
        ensure_started(st.status)?;

        let patterns: Vec<Pattern> = actions.iter().map(|a| a.pattern().clone()).collect();
        if let Some(span) = pattern::find_first(&patterns, st.buffer.as_slice()) {
            let consumed = st.buffer.consume(span.end);
            trace!(
                "expect matched immediately: pattern {} ({} bytes)",
                span.pattern_index,
                span.end
            );
            return Ok(RegisterOutcome::Ready {
                matched: ExpectMatch {
                    pattern_index: span.pattern_index,
                    text: String::from_utf8_lossy(&consumed).into_owned(),
                },
                actions,
            });
        }

        if st.buffer.len() > self.config.max_buffer {
            return Err(StreamError::BufferOverflow {
                limit: self.config.max_buffer,
            }
            .into());
        }

        let (tx, rx) = oneshot::channel();
        let (stored, returned) = if store_actions {
            (Some(actions), None)
        } else {
            (None, Some(actions))
        };
        let id = st.waits.insert(patterns, stored, tx);
        Ok(RegisterOutcome::Pending {
            id,
            rx,
            actions: returned,
        })
    }

    /// Wait for a completion with no deadline.
    async fn await_indefinite(rx: oneshot::Receiver<Result<ExpectMatch>>) -> Result<ExpectMatch> {
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(StreamError::Abandoned.into()),
        }
    }

    /// Wait for a completion with a deadline. On expiry the wait is
    /// deregistered and `Ok(None)` returned; a completion that raced the
    /// deadline is honored.
    async fn await_deadline(
        &self,
        id: u64,
        mut rx: oneshot::Receiver<Result<ExpectMatch>>,
        timeout: Duration,
    ) -> Result<Option<ExpectMatch>> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome.map(Some),
            Ok(Err(_)) => Err(StreamError::Abandoned.into()),
            Err(_) => {
                let still_pending = self.state.lock().unwrap().waits.remove(id);
                if still_pending {
                    debug!("expect timed out after {:?}", timeout);
                    Ok(None)
                } else {
                    // A notification pass completed the wait just as the
                    // deadline fired. The outcome send happens after that
                    // pass releases the lock, so it may still be in flight;
                    // awaiting here is bounded by that send.
                    match rx.await {
                        Ok(outcome) => outcome.map(Some),
                        Err(_) => Err(StreamError::Abandoned.into()),
                    }
                }
            }
        }
    }

    /// Append transport data and run one notification pass. Called from
    /// the reader task; actions and event delivery happen after the
    /// critical section.
    fn feed(inner: &Arc<Self>, data: Bytes) {
        let (completions, overflow) = {
            let mut st = inner.state.lock().unwrap();
            let state = &mut *st;
            state.buffer.append(&data);
            trace!(
                "{} bytes received, {} buffered",
                data.len(),
                state.buffer.len()
            );

            let completions = state.waits.notify(&mut state.buffer);

            let overflow = if state.buffer.len() > inner.config.max_buffer
                && !state.waits.is_empty()
            {
                state.waits.drain_all(|| {
                    StreamError::BufferOverflow {
                        limit: inner.config.max_buffer,
                    }
                    .into()
                })
            } else {
                Vec::new()
            };
            (completions, overflow)
        };

        inner.emit(StreamEvent::DataReceived(data));
        for completion in completions {
            completion.deliver();
        }
        if !overflow.is_empty() {
            warn!(
                "incoming buffer exceeded {} bytes with no match, failing pending waits",
                inner.config.max_buffer
            );
            for completion in overflow {
                completion.deliver();
            }
            inner.emit(StreamEvent::ErrorOccurred(Arc::new(
                StreamError::BufferOverflow {
                    limit: inner.config.max_buffer,
                }
                .into(),
            )));
        }
    }

    /// The transport closed the channel: fault the stream and every
    /// pending wait.
    fn on_transport_closed(inner: &Arc<Self>) {
        let completions = {
            let mut st = inner.state.lock().unwrap();
            if st.status != Status::Started {
                return;
            }
            st.status = Status::Faulted;
            st.reader = None;
            st.waits.drain_all(|| StreamError::Closed.into())
        };

        warn!("transport closed the shell channel");
        for completion in completions {
            completion.deliver();
        }
        inner.emit(StreamEvent::ErrorOccurred(Arc::new(
            StreamError::Closed.into(),
        )));
        inner.emit(StreamEvent::Stopped);
    }
}

fn ensure_started(status: Status) -> Result<()> {
    match status {
        Status::Started => Ok(()),
        Status::NotStarted => Err(UsageError::NotStarted.into()),
        Status::Stopped => Err(StreamError::Stopped.into()),
        Status::Faulted => Err(StreamError::Closed.into()),
    }
}

/// Strip the configured terminator (and a preceding carriage return when
/// the terminator is a bare newline) from a consumed line.
fn strip_line(mut text: String, terminator: &str) -> String {
    if text.ends_with(terminator) {
        text.truncate(text.len() - terminator.len());
    }
    if terminator == "\n" && text.ends_with('\r') {
        text.pop();
    }
    text
}
