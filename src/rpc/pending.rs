//! Outbound request correlation.
//!
//! Every outbound request registers a [`oneshot`] sender under a fresh id.
//! The reader completes it when the matching reply arrives; closing the
//! client fails every remaining entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{ClientError, Result};

/// Receiving half handed to the caller of `invoke`.
pub type ReplyReceiver = oneshot::Receiver<Result<Value>>;

#[derive(Debug, Default)]
struct PendingState {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Result<Value>>>,
}

/// Id-keyed table of in-flight outbound requests.
///
/// Ids increase monotonically from 1 for the lifetime of the table. Critical
/// sections never span an `.await`.
#[derive(Debug)]
pub struct PendingTable {
    next_id: AtomicU64,
    state: Mutex<PendingState>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    /// Create an empty, open table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(PendingState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id and register a waiter for it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::closed`] once [`fail_all`](Self::fail_all) has run.
    pub fn register(&self) -> Result<(u64, ReplyReceiver)> {
        let mut state = self.lock();
        if state.closed {
            return Err(ClientError::closed());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Ok((id, rx))
    }

    /// Deliver `outcome` to the waiter registered under `id`.
    ///
    /// Returns `false` when no such waiter exists (late or unknown reply).
    pub fn complete(&self, id: u64, outcome: Result<Value>) -> bool {
        let Some(tx) = self.lock().waiters.remove(&id) else {
            return false;
        };
        // The caller may have given up on the reply; that is not an error.
        let _ = tx.send(outcome);
        true
    }

    /// Drop the waiter for `id` without completing it.
    pub fn remove(&self, id: u64) {
        self.lock().waiters.remove(&id);
    }

    /// Fail every waiter with `err` and refuse further registrations.
    ///
    /// Returns the number of waiters failed.
    pub fn fail_all(&self, err: &ClientError) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.waiters.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(err.clone()));
        }
        count
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Whether no requests are awaiting a reply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the table has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
