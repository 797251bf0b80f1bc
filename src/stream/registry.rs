//! Registry of pending expect waits.
//!
//! Each blocking or begin-style expect call that does not match immediately
//! parks a [`PendingWait`] here. Every buffer append runs one notification
//! pass: waits are evaluated in FIFO registration order, and each completion
//! consumes its matched span before the next wait is evaluated, so two waits
//! can never double-consume the same bytes. A wait completed later in the
//! same pass only sees the already-shortened buffer.
//!
//! Deadlines are not tracked here. The waiting side owns its timer and
//! deregisters on expiry, which keeps timeout enforcement on the monotonic
//! clock and independent of notification delivery.

use indexmap::IndexMap;
use log::trace;
use tokio::sync::oneshot;

use super::buffer::IncomingBuffer;
use crate::error::{Error, Result};
use crate::pattern::{self, ExpectAction, Pattern};
use crate::stream::ExpectMatch;

/// One caller's outstanding expect request.
pub(crate) struct PendingWait {
    /// Candidate patterns in declaration order.
    patterns: Vec<Pattern>,

    /// Actions owned by the registry for begin-style waits, where the match
    /// runs on whichever task delivers the triggering data. Blocking waits
    /// keep their actions on the calling task and leave this empty.
    actions: Option<Vec<ExpectAction>>,

    /// Completion slot.
    tx: oneshot::Sender<Result<ExpectMatch>>,
}

/// A wait resolved by a notification pass (or force-completed). Delivery —
/// running the action and sending the outcome — happens outside the
/// stream's critical section.
pub(crate) struct Completion {
    actions: Option<Vec<ExpectAction>>,
    tx: oneshot::Sender<Result<ExpectMatch>>,
    outcome: Result<ExpectMatch>,
}

impl Completion {
    /// Run the matched action (if the registry owns it) and fulfill the
    /// completion slot. Must be called with no locks held.
    pub(crate) fn deliver(self) {
        if let (Some(mut actions), Ok(matched)) = (self.actions, &self.outcome) {
            actions[matched.pattern_index].invoke(&matched.text);
        }
        let _ = self.tx.send(self.outcome);
    }
}

/// Pending waits in FIFO registration order.
pub(crate) struct WaitRegistry {
    waits: IndexMap<u64, PendingWait>,
    next_id: u64,
}

impl WaitRegistry {
    pub(crate) fn new() -> Self {
        Self {
            waits: IndexMap::new(),
            next_id: 0,
        }
    }

    /// Register a wait; insertion order is the notification order.
    pub(crate) fn insert(
        &mut self,
        patterns: Vec<Pattern>,
        actions: Option<Vec<ExpectAction>>,
        tx: oneshot::Sender<Result<ExpectMatch>>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.waits.insert(
            id,
            PendingWait {
                patterns,
                actions,
                tx,
            },
        );
        trace!("wait {} registered ({} pending)", id, self.waits.len());
        id
    }

    /// Deregister a wait (timeout path). Returns whether it was still
    /// pending; `false` means a notification pass completed it first.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        self.waits.shift_remove(&id).is_some()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }

    /// Run one notification pass after the buffer grew.
    ///
    /// Waits are visited in registration order; each satisfied wait consumes
    /// its matched span and is removed, and the pass continues with the
    /// shortened buffer.
    pub(crate) fn notify(&mut self, buffer: &mut IncomingBuffer) -> Vec<Completion> {
        let ids: Vec<u64> = self.waits.keys().copied().collect();
        let mut completions = Vec::new();

        for id in ids {
            let Some(wait) = self.waits.get(&id) else {
                continue;
            };
            if wait.tx.is_closed() {
                // The waiting future was dropped; discard the wait before
                // it can consume bytes nobody will receive.
                self.waits.shift_remove(&id);
                trace!("wait {} abandoned by its caller, discarded", id);
                continue;
            }
            if let Some(span) = pattern::find_first(&wait.patterns, buffer.as_slice()) {
                let consumed = buffer.consume(span.end);
                let text = String::from_utf8_lossy(&consumed).into_owned();
                trace!(
                    "wait {} matched pattern {} ({} bytes consumed)",
                    id,
                    span.pattern_index,
                    span.end
                );

                let wait = self
                    .waits
                    .shift_remove(&id)
                    .expect("wait present for the id just inspected");
                completions.push(Completion {
                    actions: wait.actions,
                    tx: wait.tx,
                    outcome: Ok(ExpectMatch {
                        pattern_index: span.pattern_index,
                        text,
                    }),
                });
            }
        }

        completions
    }

    /// Force-complete every pending wait with an error (stop, dispose,
    /// transport failure, buffer overflow). Actions are not run.
    pub(crate) fn drain_all(&mut self, error: impl Fn() -> Error) -> Vec<Completion> {
        self.waits
            .drain(..)
            .map(|(_, wait)| Completion {
                actions: None,
                tx: wait.tx,
                outcome: Err(error()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;

    fn literal_wait(
        registry: &mut WaitRegistry,
        text: &str,
    ) -> (u64, oneshot::Receiver<Result<ExpectMatch>>) {
        let (tx, rx) = oneshot::channel();
        let id = registry.insert(vec![Pattern::literal(text)], None, tx);
        (id, rx)
    }

    #[test]
    fn fifo_wait_gets_first_shot() {
        let mut registry = WaitRegistry::new();
        let mut buffer = IncomingBuffer::new(64);

        let (_, mut first) = literal_wait(&mut registry, "$ ");
        let (_, mut second) = literal_wait(&mut registry, "$ ");

        buffer.append(b"ok\n$ ");
        let completions = registry.notify(&mut buffer);
        assert_eq!(completions.len(), 1);
        for c in completions {
            c.deliver();
        }

        let matched = first.try_recv().unwrap().unwrap();
        assert_eq!(matched.text, "ok\n$ ");
        assert!(second.try_recv().is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn second_wait_sees_shortened_buffer_in_same_pass() {
        let mut registry = WaitRegistry::new();
        let mut buffer = IncomingBuffer::new(64);

        let (_, mut first) = literal_wait(&mut registry, "one");
        let (_, mut second) = literal_wait(&mut registry, "two");

        // Both patterns arrive in a single append; the FIFO pass gives
        // "one" to the first wait and only the remainder to the second.
        buffer.append(b"one and two");
        let completions = registry.notify(&mut buffer);
        assert_eq!(completions.len(), 2);
        for c in completions {
            c.deliver();
        }

        assert_eq!(first.try_recv().unwrap().unwrap().text, "one");
        assert_eq!(second.try_recv().unwrap().unwrap().text, " and two");
    }

    #[test]
    fn unmatched_wait_stays_pending() {
        let mut registry = WaitRegistry::new();
        let mut buffer = IncomingBuffer::new(64);

        let (_, mut rx) = literal_wait(&mut registry, "prompt>");
        buffer.append(b"nothing interesting");

        assert!(registry.notify(&mut buffer).is_empty());
        assert!(rx.try_recv().is_err());
        assert!(!registry.is_empty());
    }

    #[test]
    fn remove_reports_whether_still_pending() {
        let mut registry = WaitRegistry::new();
        let mut buffer = IncomingBuffer::new(64);

        let (id, _rx) = literal_wait(&mut registry, "x");
        buffer.append(b"x");
        for c in registry.notify(&mut buffer) {
            c.deliver();
        }

        assert!(!registry.remove(id));
    }

    #[test]
    fn drain_all_fails_every_wait() {
        let mut registry = WaitRegistry::new();

        let (_, mut a) = literal_wait(&mut registry, "a");
        let (_, mut b) = literal_wait(&mut registry, "b");

        for c in registry.drain_all(|| StreamError::Stopped.into()) {
            c.deliver();
        }

        assert!(a.try_recv().unwrap().is_err());
        assert!(b.try_recv().unwrap().is_err());
        assert!(registry.is_empty());
    }
}
