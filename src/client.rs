//! Client builder and call façade.
//!
//! The [`ClientBuilder`] collects option overrides and the codec registry,
//! then bootstraps a connection:
//! 1. Dial the transport (bounded by the connect timeout)
//! 2. Optionally tunnel through HTTP `CONNECT`
//! 3. Send the options line and build the codec
//! 4. Spawn the reader loop
//!
//! The [`Client`] then multiplexes any number of concurrent calls over the
//! connection. Requests are written under one send lock so frames never
//! interleave; responses are matched to calls by sequence number and may
//! arrive in any order.
//!
//! # Example
//!
//! ```ignore
//! use muxrpc_client::Client;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct Args { a: i32, b: i32 }
//!
//! #[derive(Default, Deserialize)]
//! struct Reply { c: i32 }
//!
//! #[tokio::main]
//! async fn main() -> muxrpc_client::Result<()> {
//!     let client = Client::builder()
//!         .connect_timeout(std::time::Duration::from_secs(2))
//!         .dial("tcp", "127.0.0.1:9999")
//!         .await?;
//!
//!     let mut reply = Reply::default();
//!     client.call("Arith.Add", &Args { a: 1, b: 2 }, &mut reply).await?;
//!     assert_eq!(reply.c, 3);
//!
//!     client.close().await
//! }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::call::{
    AsyncCall, Call, CallHandle, CallRegistry, CancelOnDrop, PendingCall, SyncCall, Ticket,
    DEFAULT_DONE_CAPACITY,
};
use crate::codec::{Codec, CodecRegistry, CodecType, CodecWriter, Encoding, Header, NewCodecFn};
use crate::control::{negotiate, tunnel_http};
use crate::dispatch;
use crate::error::{Error, Result};
use crate::protocol::Options;
use crate::transport::{self, BoxedTransport, Transport};

/// Builder for configuring and connecting a client.
///
/// Fields left unset fall back to [`Options::default`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    codec_type: Option<CodecType>,
    connect_timeout: Option<Duration>,
    handle_timeout: Option<Duration>,
    codecs: CodecRegistry,
}

impl ClientBuilder {
    /// Create a builder with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use every field of `options`.
    pub fn options(mut self, options: Options) -> Self {
        self.codec_type = Some(options.codec_type);
        self.connect_timeout = Some(options.connect_timeout);
        self.handle_timeout = Some(options.handle_timeout);
        self
    }

    /// Select the codec by tag.
    ///
    /// Default: `application/msgpack`
    pub fn codec_type(mut self, codec_type: CodecType) -> Self {
        self.codec_type = Some(codec_type);
        self
    }

    /// Bound the whole connect phase. `Duration::ZERO` disables the bound.
    ///
    /// Default: 10s
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Per-request handling budget advertised to the server.
    ///
    /// Default: 0 (no limit)
    pub fn handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout = Some(timeout);
        self
    }

    /// Make a custom codec available under `codec_type`.
    pub fn register_codec(mut self, codec_type: CodecType, constructor: NewCodecFn) -> Self {
        self.codecs.register(codec_type, constructor);
        self
    }

    /// The options that will be sent, defaults filled in.
    pub fn build_options(&self) -> Options {
        let defaults = Options::default();
        Options {
            codec_type: self.codec_type.clone().unwrap_or(defaults.codec_type),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            handle_timeout: self.handle_timeout.unwrap_or(defaults.handle_timeout),
            ..defaults
        }
    }

    /// Dial `address` on `network` and bootstrap a client.
    pub async fn dial(self, network: &str, address: &str) -> Result<Client> {
        self.dial_with(network, address, false).await
    }

    /// Dial, tunnel through HTTP `CONNECT`, then bootstrap a client.
    pub async fn dial_http(self, network: &str, address: &str) -> Result<Client> {
        self.dial_with(network, address, true).await
    }

    /// Bootstrap a client over an already-connected stream.
    pub async fn connect<T: Transport>(self, stream: T) -> Result<Client> {
        let (options, new_codec) = self.resolve()?;
        bootstrap(Box::new(stream), options, new_codec, false).await
    }

    /// Tunnel through HTTP `CONNECT` on an already-connected stream.
    pub async fn connect_http<T: Transport>(self, stream: T) -> Result<Client> {
        let (options, new_codec) = self.resolve()?;
        bootstrap(Box::new(stream), options, new_codec, true).await
    }

    async fn dial_with(self, network: &str, address: &str, http: bool) -> Result<Client> {
        let (options, new_codec) = self.resolve()?;
        let stream = transport::dial(network, address, options.connect_timeout)
            .await
            .map_err(|e| {
                tracing::error!("rpc client: dial {} {} failed: {}", network, address, e);
                e
            })?;
        bootstrap(stream, options, new_codec, http).await
    }

    /// Configuration errors surface before any I/O.
    fn resolve(&self) -> Result<(Options, NewCodecFn)> {
        let options = self.build_options();
        let new_codec = self.codecs.resolve(&options.codec_type).map_err(|e| {
            tracing::error!("rpc client: codec error: {}", e);
            e
        })?;
        Ok((options, new_codec))
    }
}

/// Run the handshake. `stream` is owned by the handshake tasks and is
/// dropped, closing it, if any step fails.
async fn bootstrap(
    stream: BoxedTransport,
    options: Options,
    new_codec: NewCodecFn,
    http: bool,
) -> Result<Client> {
    let stream = if http {
        tunnel_http(stream, options.connect_timeout)
            .await
            .map_err(|e| {
                tracing::error!("rpc client: verify HTTP failed: {}", e);
                e
            })?
    } else {
        stream
    };
    let codec = negotiate(stream, &options, new_codec).await.map_err(|e| {
        tracing::error!("rpc client: init codec failed: {}", e);
        e
    })?;
    tracing::debug!(codec = %options.codec_type, "rpc client: connected");
    Ok(Client::with_codec(codec, options))
}

/// Dial with default options.
pub async fn dial(network: &str, address: &str) -> Result<Client> {
    ClientBuilder::new().dial(network, address).await
}

/// Dial through an HTTP `CONNECT` tunnel with default options.
pub async fn dial_http(network: &str, address: &str) -> Result<Client> {
    ClientBuilder::new().dial_http(network, address).await
}

/// State shared by the client, its send tasks and the reader loop.
pub(crate) struct Shared {
    /// Send lock. Held across registration and the write of one frame.
    /// `None` once the connection has been terminated.
    sending: tokio::sync::Mutex<Option<Box<dyn CodecWriter>>>,
    pub(crate) registry: Arc<CallRegistry>,
    encoding: Encoding,
    /// Set by a user close; stops the reader loop.
    closed: watch::Sender<bool>,
    /// Set with the terminal error before the drain; stops in-flight writes.
    terminating: watch::Sender<Option<Error>>,
}

impl Shared {
    pub(crate) fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn signal_closed(&self) {
        self.closed.send_replace(true);
    }

    /// Register `call` and write its request frame.
    async fn send(
        self: Arc<Self>,
        service_method: String,
        body: Vec<u8>,
        call: Box<dyn PendingCall>,
        ticket: Arc<Ticket>,
    ) {
        let mut guard = self.sending.lock().await;

        let seq = match self.registry.register(call) {
            Ok(seq) => seq,
            Err(call) => {
                call.complete(0, Some(Error::Shutdown));
                return;
            }
        };
        if !ticket.assign(seq) {
            // Cancelled before it had a sequence number.
            if let Some(call) = self.registry.remove(seq) {
                call.complete(seq, Some(Error::Cancelled));
            }
            return;
        }

        let header = Header::request(service_method, seq);
        tracing::trace!(seq, method = %header.service_method, "rpc client: request");
        let mut terminating = self.terminating.subscribe();
        let written = match guard.as_mut() {
            Some(writer) => tokio::select! {
                biased;
                err = wait_terminating(&mut terminating) => Err(err),
                written = writer.write(&header, &body) => written,
            },
            None => Err(Error::Shutdown),
        };
        if let Err(e) = written {
            tracing::debug!(seq, "rpc client: write failed: {}", e);
            if let Some(call) = self.registry.remove(seq) {
                call.complete(seq, Some(e));
            }
        }
    }

    /// Close the transport and fail every pending call with `err`.
    ///
    /// A write stalled on an unresponsive peer is abandoned with `err`
    /// first, then the send lock is taken before the registry lock.
    pub(crate) async fn terminate_calls(&self, err: Error) {
        self.terminating.send_replace(Some(err.clone()));
        let mut guard = self.sending.lock().await;
        if let Some(mut writer) = guard.take() {
            if let Err(e) = writer.close().await {
                tracing::debug!("rpc client: closing writer: {}", e);
            }
        }
        let drained = self.registry.drain_all(&err);
        drop(guard);
        if drained > 0 {
            tracing::debug!(drained, "rpc client: failed pending calls: {}", err);
        }
    }
}

/// Resolves once the closed flag is set or its sender is gone.
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves with the terminal error once one is published.
async fn wait_terminating(terminating: &mut watch::Receiver<Option<Error>>) -> Error {
    loop {
        let current = terminating.borrow_and_update().clone();
        if let Some(err) = current {
            return err;
        }
        if terminating.changed().await.is_err() {
            return Error::Shutdown;
        }
    }
}

/// A connected RPC client.
///
/// Cheap operations take `&self`, so a client can be shared behind an
/// `Arc` by many tasks. Dropping it shuts the connection down.
pub struct Client {
    shared: Arc<Shared>,
    options: Options,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start a client over an already negotiated codec.
    ///
    /// Spawns the reader loop, so it must run inside a Tokio runtime.
    pub fn with_codec(codec: Codec, options: Options) -> Self {
        let (reader, writer) = codec.into_parts();
        let (closed, _) = watch::channel(false);
        let (terminating, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            encoding: writer.encoding(),
            sending: tokio::sync::Mutex::new(Some(writer)),
            registry: Arc::new(CallRegistry::new()),
            closed,
            terminating,
        });
        let task = tokio::spawn(dispatch::receive(shared.clone(), reader));
        Self {
            shared,
            options,
            reader: Mutex::new(Some(task)),
        }
    }

    /// Options this client negotiated with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Start a call without waiting for it.
    ///
    /// The request is written by a background task. The finished [`Call`]
    /// is posted on `done` or, when `None`, on a channel owned by the
    /// returned handle. A full `done` channel drops the finished call
    /// with a warning, so size shared channels for the calls in flight.
    pub fn go<A, R>(
        &self,
        service_method: &str,
        args: &A,
        reply: R,
        done: Option<mpsc::Sender<Call<R>>>,
    ) -> CallHandle<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let (done, receiver) = match done {
            Some(done) => (done, None),
            None => {
                let (tx, rx) = mpsc::channel(DEFAULT_DONE_CAPACITY);
                (tx, Some(rx))
            }
        };
        let call = AsyncCall::new(service_method, reply, done);
        let ticket = self.start(service_method, args, Box::new(call));
        CallHandle::new(ticket, self.shared.registry.clone(), receiver)
    }

    /// Call `service_method` and wait for the reply.
    ///
    /// `reply` is only written on success.
    pub async fn call<A, R>(&self, service_method: &str, args: &A, reply: &mut R) -> Result<()>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        *reply = self
            .call_until(std::future::pending(), service_method, args)
            .await?;
        Ok(())
    }

    /// Like [`call`](Self::call), giving up when `cancel` resolves.
    ///
    /// A request already written is not retracted; its response is
    /// discarded when it arrives.
    pub async fn call_with_cancel<A, R, F>(
        &self,
        cancel: F,
        service_method: &str,
        args: &A,
        reply: &mut R,
    ) -> Result<()>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
        F: Future<Output = ()>,
    {
        let cancel = async {
            cancel.await;
            Error::Cancelled
        };
        *reply = self.call_until(cancel, service_method, args).await?;
        Ok(())
    }

    /// Like [`call`](Self::call), failing with
    /// [`Error::DeadlineExceeded`] after `timeout`.
    pub async fn call_timeout<A, R>(
        &self,
        timeout: Duration,
        service_method: &str,
        args: &A,
        reply: &mut R,
    ) -> Result<()>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let deadline = async {
            tokio::time::sleep(timeout).await;
            Error::DeadlineExceeded
        };
        *reply = self.call_until(deadline, service_method, args).await?;
        Ok(())
    }

    async fn call_until<A, R, F>(&self, cancel: F, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
        F: Future<Output = Error>,
    {
        let (tx, rx) = oneshot::channel();
        let ticket = self.start(service_method, args, Box::new(SyncCall::new(tx)));
        // Dropping this future mid-call also orphans the call.
        let mut guard = CancelOnDrop::new(ticket, self.shared.registry.clone());

        tokio::select! {
            outcome = rx => {
                guard.disarm();
                outcome.unwrap_or(Err(Error::Shutdown))
            }
            err = cancel => {
                drop(guard);
                Err(err)
            }
        }
    }

    /// Encode the arguments here and hand the write to a send task.
    fn start<A>(&self, service_method: &str, args: &A, call: Box<dyn PendingCall>) -> Arc<Ticket>
    where
        A: Serialize + ?Sized,
    {
        let ticket = Arc::new(Ticket::default());
        match self.shared.encoding.encode(args) {
            Ok(body) => {
                tokio::spawn(self.shared.clone().send(
                    service_method.to_string(),
                    body,
                    call,
                    ticket.clone(),
                ));
            }
            Err(e) => {
                tracing::debug!(method = service_method, "rpc client: encoding args failed: {}", e);
                call.complete(0, Some(e));
            }
        }
        ticket
    }

    /// Close the connection and wait until every pending call has failed.
    ///
    /// Returns [`Error::Shutdown`] if the client was already closed.
    pub async fn close(&self) -> Result<()> {
        self.shared.registry.mark_closing()?;
        self.shared.signal_closed();

        let task = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("rpc client: reader task failed: {}", e);
            }
        }
        Ok(())
    }

    /// Whether new calls are currently accepted.
    ///
    /// Advisory only: a concurrent close or connection failure may change
    /// the answer immediately.
    pub fn is_available(&self) -> bool {
        self.shared.registry.is_available()
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.registry.len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.shared.registry.mark_closing().is_ok() {
            self.shared.signal_closed();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("available", &self.is_available())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonCodec, MsgPackCodec};
    use tokio::io::{AsyncWriteExt, BufReader};

    #[test]
    fn test_builder_defaults() {
        let options = ClientBuilder::new().build_options();
        assert_eq!(options, Options::default());
        assert_eq!(options.codec_type, CodecType::MSGPACK);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert_eq!(options.handle_timeout, Duration::ZERO);
    }

    #[test]
    fn test_builder_overrides_keep_explicit_zero() {
        let options = Client::builder()
            .codec_type(CodecType::JSON)
            .connect_timeout(Duration::ZERO)
            .handle_timeout(Duration::from_secs(3))
            .build_options();
        assert_eq!(options.codec_type, CodecType::JSON);
        assert_eq!(options.connect_timeout, Duration::ZERO);
        assert_eq!(options.handle_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_builder_options_replaces_all() {
        let custom = Options {
            codec_type: CodecType::JSON,
            connect_timeout: Duration::from_millis(5),
            handle_timeout: Duration::from_millis(6),
            ..Options::default()
        };
        let options = Client::builder()
            .connect_timeout(Duration::from_secs(1))
            .options(custom.clone())
            .build_options();
        assert_eq!(options, custom);
    }

    #[tokio::test]
    async fn test_unknown_codec_fails_before_io() {
        let (client_end, _server_end) = tokio::io::duplex(64);
        let err = Client::builder()
            .codec_type(CodecType::new("application/gob"))
            .connect(client_end)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCodec(_)));
    }

    #[tokio::test]
    async fn test_registered_custom_codec() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let tag = CodecType::new("application/x-custom");
        let client = Client::builder()
            .register_codec(tag.clone(), JsonCodec::new_codec)
            .codec_type(tag.clone())
            .connect(client_end)
            .await
            .unwrap();

        let mut server = BufReader::new(server_end);
        let options = Options::read_from(&mut server).await.unwrap();
        assert_eq!(options.codec_type, tag);
        assert_eq!(client.options().codec_type, tag);
    }

    #[tokio::test]
    async fn test_encode_failure_resolves_without_registering() {
        let (client_end, _server_end) = tokio::io::duplex(4096);
        let client = Client::with_codec(
            MsgPackCodec::new_codec(Box::new(client_end)),
            Options::default(),
        );

        struct Unserializable;
        impl Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("refused"))
            }
        }

        let mut handle = client.go("A.B", &Unserializable, 0u32, None);
        let call = handle.done().await.unwrap();
        assert_eq!(call.seq, 0);
        assert!(call.error.is_some());
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_twice_and_availability() {
        let (client_end, _server_end) = tokio::io::duplex(4096);
        let client = Client::with_codec(
            MsgPackCodec::new_codec(Box::new(client_end)),
            Options::default(),
        );
        assert!(client.is_available());
        client.close().await.unwrap();
        assert!(!client.is_available());
        assert!(client.close().await.unwrap_err().is_shutdown());

        let mut reply = 0u32;
        let err = client.call("A.B", &1u32, &mut reply).await.unwrap_err();
        assert!(err.is_shutdown());
    }

    #[tokio::test]
    async fn test_close_releases_transport() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let client = Client::with_codec(
            MsgPackCodec::new_codec(Box::new(client_end)),
            Options::default(),
        );
        client.close().await.unwrap();

        // Both halves are gone, not just shut down for writing.
        let err = server_end.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
