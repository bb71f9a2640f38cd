//! Registry of in-flight calls keyed by sequence number.
//!
//! Sequence numbers are assigned from 1 upwards (0 never names a call).
//! The pending map and the closing/shutdown flags share one mutex so that
//! register, remove and drain always see a consistent view.
//!
//! # Lock order
//!
//! Paths that take both the client's send lock and this registry lock
//! take the send lock first. `register` is only called with the send lock
//! held, and `drain_all` is only called with the send lock held, so no
//! call can slip in between the shutdown flag being set and the writer
//! being released.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::PendingCall;
use crate::error::Error;

struct RegistryState {
    /// Next sequence number to hand out.
    seq: u64,
    pending: HashMap<u64, Box<dyn PendingCall>>,
    /// The user asked to close.
    closing: bool,
    /// The connection failed or was drained.
    shutdown: bool,
}

/// Thread-safe map of pending calls plus the client's lifecycle flags.
pub(crate) struct CallRegistry {
    state: Mutex<RegistryState>,
}

impl CallRegistry {
    /// Create an empty registry; the first call gets sequence 1.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `call` under the next sequence number.
    ///
    /// Hands the call back if the client is closing or shut down; the
    /// sequence counter is untouched in that case.
    pub fn register(&self, call: Box<dyn PendingCall>) -> Result<u64, Box<dyn PendingCall>> {
        let mut state = self.lock();
        if state.closing || state.shutdown {
            return Err(call);
        }
        let seq = state.seq;
        state.pending.insert(seq, call);
        state.seq += 1;
        Ok(seq)
    }

    /// Remove and return the call registered under `seq`.
    pub fn remove(&self, seq: u64) -> Option<Box<dyn PendingCall>> {
        self.lock().pending.remove(&seq)
    }

    /// Mark the connection shut down and fail every pending call with `err`.
    ///
    /// Returns how many calls were resolved.
    pub fn drain_all(&self, err: &Error) -> usize {
        let drained: Vec<(u64, Box<dyn PendingCall>)> = {
            let mut state = self.lock();
            state.shutdown = true;
            state.pending.drain().collect()
        };
        let count = drained.len();
        for (seq, call) in drained {
            call.complete(seq, Some(err.clone()));
        }
        count
    }

    /// Set the closing flag. Fails with [`Error::Shutdown`] the second time.
    pub fn mark_closing(&self) -> Result<(), Error> {
        let mut state = self.lock();
        if state.closing {
            return Err(Error::Shutdown);
        }
        state.closing = true;
        Ok(())
    }

    /// Whether a new call would be accepted right now.
    pub fn is_available(&self) -> bool {
        let state = self.lock();
        !state.closing && !state.shutdown
    }

    /// Number of calls waiting for a response.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }
}
