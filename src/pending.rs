//! Begin/end completion tokens.
//!
//! A [`PendingOperation`] represents a long-running call that was started
//! but whose result is collected later. The expect engine, command
//! execution, and the remote file surface all hand these out from their
//! `begin_*` methods and finalize them in the matching `end_*` methods.
//!
//! The producer half is an [`OperationHandle`]: `complete` and `fault`
//! consume the handle, so a token transitions to a terminal state exactly
//! once. Finalizing a token twice is a usage error, which protects against
//! double-consumption bugs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tokio::sync::oneshot;

use crate::error::{Result, StreamError, UsageError};

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const FAULTED: u8 = 2;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// Allocate an origin id for a component that hands out tokens.
///
/// `end_*` methods compare a token's origin against their own to reject
/// tokens produced elsewhere.
pub(crate) fn next_origin() -> u64 {
    NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed)
}

/// Callback invoked once when an operation reaches a terminal state.
///
/// It fires on a separate task, asynchronously with respect to the
/// producer; captured state plays the role of the user-state argument of
/// classic begin/end APIs.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Terminal state of a completion token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Not yet completed or faulted.
    Pending,
    /// Completed with a value.
    Completed,
    /// Completed with an error.
    Faulted,
}

/// Consumer half of an asynchronous operation.
///
/// `wait` blocks (suspends) until the producer completes or faults the
/// operation, then returns the value or re-raises the captured error. A
/// second `wait` on the same token returns
/// [`UsageError::OperationFinalized`].
#[derive(Debug)]
pub struct PendingOperation<T> {
    origin: u64,
    state: Arc<AtomicU8>,
    rx: Option<oneshot::Receiver<Result<T>>>,
}

/// Producer half of an asynchronous operation.
pub struct OperationHandle<T> {
    state: Arc<AtomicU8>,
    tx: oneshot::Sender<Result<T>>,
    callback: Option<CompletionCallback>,
}

impl<T> PendingOperation<T> {
    /// Create a token and its producer handle.
    pub fn new(origin: u64, callback: Option<CompletionCallback>) -> (Self, OperationHandle<T>) {
        let state = Arc::new(AtomicU8::new(PENDING));
        let (tx, rx) = oneshot::channel();
        (
            Self {
                origin,
                state: Arc::clone(&state),
                rx: Some(rx),
            },
            OperationHandle {
                state,
                tx,
                callback,
            },
        )
    }

    /// Current state of the operation.
    pub fn state(&self) -> OperationState {
        match self.state.load(Ordering::Acquire) {
            COMPLETED => OperationState::Completed,
            FAULTED => OperationState::Faulted,
            _ => OperationState::Pending,
        }
    }

    /// Whether the operation has reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.state() != OperationState::Pending
    }

    /// Whether the operation has already been finalized with `wait`.
    pub fn is_finalized(&self) -> bool {
        self.rx.is_none()
    }

    /// The id of the component that created this token.
    pub(crate) fn origin(&self) -> u64 {
        self.origin
    }

    /// Block until the operation reaches a terminal state, then return the
    /// value or re-raise the captured fault.
    pub async fn wait(&mut self) -> Result<T> {
        let rx = self
            .rx
            .take()
            .ok_or(UsageError::OperationFinalized)?;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(StreamError::Abandoned.into()),
        }
    }
}

impl<T: Send + 'static> OperationHandle<T> {
    /// Complete the operation with a value. Consumes the handle.
    pub fn complete(self, value: T) {
        self.finish(Ok(value), COMPLETED);
    }

    /// Fault the operation with an error. Consumes the handle.
    pub fn fault(self, error: crate::error::Error) {
        self.finish(Err(error), FAULTED);
    }

    fn finish(self, outcome: Result<T>, terminal: u8) {
        self.state.store(terminal, Ordering::Release);
        let _ = self.tx.send(outcome);
        if let Some(callback) = self.callback {
            tokio::spawn(async move { callback() });
        }
    }
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn complete_then_wait() {
        let (mut op, handle) = PendingOperation::new(1, None);
        assert_eq!(op.state(), OperationState::Pending);

        handle.complete(42u32);
        assert_eq!(op.state(), OperationState::Completed);
        assert_eq!(op.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn fault_is_reraised_at_wait() {
        let (mut op, handle) = PendingOperation::<u32>::new(1, None);
        handle.fault(StreamError::Closed.into());

        assert_eq!(op.state(), OperationState::Faulted);
        assert!(matches!(
            op.wait().await,
            Err(Error::Stream(StreamError::Closed))
        ));
    }

    #[tokio::test]
    async fn second_wait_is_a_usage_error() {
        let (mut op, handle) = PendingOperation::new(1, None);
        handle.complete("done");
        op.wait().await.unwrap();

        assert!(matches!(
            op.wait().await,
            Err(Error::Usage(UsageError::OperationFinalized))
        ));
    }

    #[tokio::test]
    async fn callback_fires_once_on_completion() {
        let (tx, rx) = oneshot::channel();
        let callback: CompletionCallback = Box::new(move || {
            tx.send(()).unwrap();
        });
        let (mut op, handle) = PendingOperation::new(1, Some(callback));

        handle.complete(7u8);
        rx.await.unwrap();
        assert_eq!(op.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_producer_surfaces_abandonment() {
        let (mut op, handle) = PendingOperation::<()>::new(1, None);
        drop(handle);

        assert!(matches!(
            op.wait().await,
            Err(Error::Stream(StreamError::Abandoned))
        ));
    }

    #[test]
    fn origins_are_unique() {
        assert_ne!(next_origin(), next_origin());
    }
}
