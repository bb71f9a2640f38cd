//! Call module - one in-flight request and how its outcome is delivered.
//!
//! A call is created by the client, registered under a sequence number,
//! written to the wire and resolved exactly once: by a response, by a
//! send failure, by cancellation, or by the connection shutting down.
//!
//! Two delivery styles exist:
//!
//! - asynchronous calls post a finished [`Call`] on an `mpsc` channel
//!   (several calls may share one channel)
//! - synchronous calls resolve a `oneshot` the caller is awaiting
//!
//! Both are stored in the [`CallRegistry`] as `Box<dyn PendingCall>`.

mod registry;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use crate::codec::{BodyDecode, Decoded, Encoding};
use crate::error::{Error, Result};

pub(crate) use registry::CallRegistry;

/// Capacity of the completion channel created when the caller supplies none.
pub const DEFAULT_DONE_CAPACITY: usize = 10;

/// A finished asynchronous call.
pub struct Call<R> {
    /// Sequence number the call was sent under (0 if it never was).
    pub seq: u64,
    /// `"<service>.<method>"`.
    pub service_method: String,
    /// The reply value. Untouched unless a body was decoded successfully.
    pub reply: R,
    /// Why the call failed, if it did.
    pub error: Option<Error>,
}

impl<R> Call<R> {
    /// Turn the call into its reply or its error.
    pub fn into_result(self) -> Result<R> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.reply),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Call<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("seq", &self.seq)
            .field("service_method", &self.service_method)
            .field("reply", &self.reply)
            .field("error", &self.error)
            .finish()
    }
}

/// A registered call waiting for its response.
pub(crate) trait PendingCall: BodyDecode {
    /// Where the response body is decoded.
    fn body(&mut self) -> &mut dyn BodyDecode;

    /// Deliver the outcome. Consumes the call, so it happens once.
    fn complete(self: Box<Self>, seq: u64, error: Option<Error>);
}

/// Call started with [`Client::go`](crate::Client::go).
pub(crate) struct AsyncCall<R> {
    service_method: String,
    reply: R,
    done: mpsc::Sender<Call<R>>,
}

impl<R> AsyncCall<R> {
    pub fn new(service_method: &str, reply: R, done: mpsc::Sender<Call<R>>) -> Self {
        Self {
            service_method: service_method.to_string(),
            reply,
            done,
        }
    }
}

impl<R: DeserializeOwned + Send> BodyDecode for AsyncCall<R> {
    fn decode_body(&mut self, encoding: Encoding, body: &[u8]) -> Result<()> {
        self.reply = encoding.decode(body)?;
        Ok(())
    }
}

impl<R: DeserializeOwned + Send> PendingCall for AsyncCall<R> {
    fn body(&mut self) -> &mut dyn BodyDecode {
        self
    }

    fn complete(self: Box<Self>, seq: u64, error: Option<Error>) {
        let call = Call {
            seq,
            service_method: self.service_method,
            reply: self.reply,
            error,
        };
        // Never block the reader on a slow consumer.
        match self.done.try_send(call) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(call)) => {
                tracing::warn!(
                    "rpc client: discarding Call reply due to insufficient Done chan capacity (seq={}, method={})",
                    call.seq,
                    call.service_method
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(seq, "rpc client: completion receiver dropped");
            }
        }
    }
}

/// Call started by one of the awaiting `Client::call*` methods.
pub(crate) struct SyncCall<R> {
    reply: Decoded<R>,
    done: oneshot::Sender<Result<R>>,
}

impl<R> SyncCall<R> {
    pub fn new(done: oneshot::Sender<Result<R>>) -> Self {
        Self {
            reply: Decoded::new(),
            done,
        }
    }
}

impl<R: DeserializeOwned + Send> BodyDecode for SyncCall<R> {
    fn decode_body(&mut self, encoding: Encoding, body: &[u8]) -> Result<()> {
        self.reply.decode_body(encoding, body)
    }
}

impl<R: DeserializeOwned + Send> PendingCall for SyncCall<R> {
    fn body(&mut self) -> &mut dyn BodyDecode {
        self
    }

    fn complete(self: Box<Self>, seq: u64, error: Option<Error>) {
        let outcome = match (error, self.reply.into_inner()) {
            (Some(err), _) => Err(err),
            (None, Some(reply)) => Ok(reply),
            (None, None) => Err(Error::ReadBody(format!("no body decoded for seq {}", seq))),
        };
        // The caller may already have given up.
        let _ = self.done.send(outcome);
    }
}

/// Shared between a call's sender task and whoever may cancel it.
///
/// The sender stores the sequence number after registering and then
/// checks the flag; the canceller sets the flag and then reads the
/// sequence number. With sequentially consistent ordering at least one
/// side sees the other, so a cancelled call never stays registered.
#[derive(Debug, Default)]
pub(crate) struct Ticket {
    seq: AtomicU64,
    cancelled: AtomicBool,
}

impl Ticket {
    /// Record the assigned sequence. Returns `false` if already cancelled.
    pub fn assign(&self, seq: u64) -> bool {
        self.seq.store(seq, Ordering::SeqCst);
        !self.cancelled.load(Ordering::SeqCst)
    }

    pub fn seq(&self) -> Option<u64> {
        match self.seq.load(Ordering::SeqCst) {
            0 => None,
            seq => Some(seq),
        }
    }

    /// Cancel the call; a response arriving later is discarded.
    pub fn cancel(&self, registry: &CallRegistry) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(seq) = self.seq() {
            if let Some(call) = registry.remove(seq) {
                call.complete(seq, Some(Error::Cancelled));
            }
        }
    }
}

/// Cancels the call when dropped unless disarmed first.
///
/// Held by an awaiting caller so that abandoning the future also
/// unregisters the call.
pub(crate) struct CancelOnDrop {
    ticket: Arc<Ticket>,
    registry: Arc<CallRegistry>,
    armed: bool,
}

impl CancelOnDrop {
    pub fn new(ticket: Arc<Ticket>, registry: Arc<CallRegistry>) -> Self {
        Self {
            ticket,
            registry,
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.ticket.cancel(&self.registry);
        }
    }
}

/// Handle to a call started with [`Client::go`](crate::Client::go).
///
/// Dropping the handle does not cancel the call.
pub struct CallHandle<R> {
    ticket: Arc<Ticket>,
    registry: Arc<CallRegistry>,
    done: Option<mpsc::Receiver<Call<R>>>,
}

impl<R> CallHandle<R> {
    pub(crate) fn new(
        ticket: Arc<Ticket>,
        registry: Arc<CallRegistry>,
        done: Option<mpsc::Receiver<Call<R>>>,
    ) -> Self {
        Self {
            ticket,
            registry,
            done,
        }
    }

    /// Sequence number, once the call has been registered.
    pub fn seq(&self) -> Option<u64> {
        self.ticket.seq()
    }

    /// Wait for the finished call.
    ///
    /// Returns `None` when the caller supplied its own completion channel
    /// (the call is delivered there) or the result was already taken.
    pub async fn done(&mut self) -> Option<Call<R>> {
        let call = self.done.as_mut()?.recv().await;
        self.done = None;
        call
    }

    /// Stop waiting for the response.
    ///
    /// If the call is still pending it completes with [`Error::Cancelled`]
    /// and a late response is discarded by the reader.
    pub fn cancel(&self) {
        self.ticket.cancel(&self.registry);
    }
}

impl<R> fmt::Debug for CallHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("seq", &self.seq())
            .finish()
    }
}
