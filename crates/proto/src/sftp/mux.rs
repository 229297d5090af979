//! Request multiplexer.
//!
//! Correlates request IDs with the callers awaiting their replies. Every
//! operation registers a one-shot completion slot under its ID before its
//! bytes leave the client; the read loop routes each decoded reply to the
//! matching slot. The server may answer in any order.

use super::error::{Error, Result};
use super::message::Response;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// A completed slot carries the decoded reply, or the close cause if the
/// session went down first.
pub(crate) type Completion = oneshot::Receiver<Result<Response>>;

#[derive(Debug, Default)]
struct MuxState {
    pending: HashMap<u32, oneshot::Sender<Result<Response>>>,
    closed: Option<Error>,
}

/// The in-flight request table.
#[derive(Debug)]
pub(crate) struct Multiplexer {
    next_id: AtomicU32,
    state: Mutex<MuxState>,
}

impl Multiplexer {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            state: Mutex::new(MuxState::default()),
        }
    }

    /// Returns a fresh request ID.
    ///
    /// Monotonic with wrapping overflow and no uniqueness check: a request
    /// still in flight after 2^32 allocations would share an ID with a new
    /// one. See [`register`](Self::register) for how such overlap is
    /// handled.
    pub(crate) fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a completion slot under `id`.
    ///
    /// Must happen before the request bytes are flushed, so a fast reply
    /// always finds its waiter. An overlapping ID asserts in debug builds
    /// and silently replaces the stale slot in release builds; the caller
    /// owns the (wrap-around) hazard.
    pub(crate) fn register(&self, id: u32) -> Result<Completion> {
        let mut state = self.state.lock().expect("mux lock poisoned");

        if let Some(cause) = &state.closed {
            return Err(cause.clone());
        }

        let (tx, rx) = oneshot::channel();
        let prev = state.pending.insert(id, tx);
        debug_assert!(prev.is_none(), "request id {} already in flight", id);
        if prev.is_some() {
            warn!("request id {} already in flight, replacing its waiter", id);
        }

        Ok(rx)
    }

    /// Routes a decoded reply to its waiter.
    ///
    /// A reply with no matching waiter is dropped with a warning; a reply
    /// whose waiter has been cancelled is dropped silently (SFTP has no
    /// cancel packet, so late replies to abandoned requests are expected).
    pub(crate) fn route(&self, id: u32, response: Response) {
        let slot = {
            let mut state = self.state.lock().expect("mux lock poisoned");
            state.pending.remove(&id)
        };

        match slot {
            Some(tx) => {
                if tx.send(Ok(response)).is_err() {
                    trace!("waiter for request {} is gone, dropping reply", id);
                }
            }
            None => warn!("dropping reply for unknown request id {}", id),
        }
    }

    /// Tears the table down, failing every pending waiter with `cause`.
    ///
    /// Idempotent; only the first call sweeps. Returns whether this call
    /// performed the sweep.
    pub(crate) fn close(&self, cause: Error) -> bool {
        let drained = {
            let mut state = self.state.lock().expect("mux lock poisoned");
            if state.closed.is_some() {
                return false;
            }
            state.closed = Some(cause.clone());
            state.pending.drain().collect::<Vec<_>>()
        };

        for (id, tx) in drained {
            trace!("failing pending request {} on close", id);
            let _ = tx.send(Err(cause.clone()));
        }
        true
    }

    /// The cause recorded by [`close`](Self::close), if the table is closed.
    pub(crate) fn close_cause(&self) -> Option<Error> {
        self.state.lock().expect("mux lock poisoned").closed.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().expect("mux lock poisoned").closed.is_some()
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}
