//! Correlation table for in-flight calls.
//!
//! Maps a call id to the single-use channel its caller is waiting on. Every
//! operation runs under one mutex, so a response racing a timeout for the same
//! id resolves to exactly one winner: whichever removes the entry first.

use crate::protocol::InboundFrame;
use crate::{ClientError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Default)]
struct PendingState {
    waiters: HashMap<String, oneshot::Sender<InboundFrame>>,
    closed: bool,
}

/// Thread-safe table of calls awaiting a response.
#[derive(Default)]
pub struct PendingCalls {
    state: Mutex<PendingState>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`.
    ///
    /// Fails if `id` is already pending or the table has been closed.
    pub fn register(&self, id: &str) -> Result<oneshot::Receiver<InboundFrame>> {
        let mut state = self.state.lock().expect("pending calls lock poisoned");
        if state.closed {
            return Err(ClientError::SessionClosed);
        }
        if state.waiters.contains_key(id) {
            return Err(ClientError::DuplicateCallId { id: id.to_string() });
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Deliver `frame` to the waiter for `id` and remove the registration.
    ///
    /// Returns `false` when nobody is waiting (late, duplicate or unsolicited).
    pub fn fulfill(&self, id: &str, frame: InboundFrame) -> bool {
        let sender = {
            let mut state = self.state.lock().expect("pending calls lock poisoned");
            state.waiters.remove(id)
        };

        match sender {
            // The receiver may have been dropped between removal and send;
            // the frame is simply discarded then.
            Some(tx) => tx.send(frame).is_ok(),
            None => {
                debug!("Dropping response for unknown call id {}", id);
                false
            }
        }
    }

    /// Remove the registration for `id` without delivering anything.
    pub fn cancel(&self, id: &str) -> bool {
        let mut state = self.state.lock().expect("pending calls lock poisoned");
        state.waiters.remove(id).is_some()
    }

    /// Drop every waiter and refuse further registrations.
    ///
    /// Waiters observe a closed channel immediately. Returns how many were pending.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock().expect("pending calls lock poisoned");
            state.closed = true;
            state.waiters.drain().collect()
        };
        drained.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        let state = self.state.lock().expect("pending calls lock poisoned");
        state.waiters.contains_key(id)
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("pending calls lock poisoned");
        state.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        let state = self.state.lock().expect("pending calls lock poisoned");
        state.closed
    }
}

/// Cancels a registration when dropped.
///
/// Held by the dispatcher for the whole wait so that abandoned futures,
/// timeouts and send failures all release the id. Cancelling after a
/// response was delivered is a no-op.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: &'a str,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingCalls, id: &'a str) -> Self {
        Self { pending, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}
