//! Error types for muxrpc-client.
//!
//! Every variant is cheap to clone: sources that are not `Clone` are kept
//! behind an `Arc`, so a connection-fatal error can be handed to every
//! pending call unchanged.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::CodecType;

/// Connect-time step that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Establishing the transport connection.
    Dial,
    /// The HTTP CONNECT exchange.
    HttpTunnel,
    /// Writing the options message and building the codec.
    Negotiate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Dial => f.write_str("dial"),
            Phase::HttpTunnel => f.write_str("verify HTTP"),
            Phase::Negotiate => f.write_str("init codec"),
        }
    }
}

/// Main error type for all client operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[source] Arc<rmp_serde::encode::Error>),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[source] Arc<rmp_serde::decode::Error>),

    /// Protocol error (oversized or malformed frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No constructor is registered for the requested codec type.
    #[error("invalid codec type {0}")]
    InvalidCodec(CodecType),

    /// The transport dialer does not know this network family.
    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),

    /// A connect-time step did not finish within the connect timeout.
    #[error("rpc client: {0} timeout")]
    Timeout(Phase),

    /// The HTTP CONNECT exchange got a status other than the tunnel line.
    #[error("unexpected HTTP response: {0}")]
    UnexpectedHttpResponse(String),

    /// The HTTP CONNECT reply could not be parsed.
    #[error("malformed HTTP response: {0}")]
    MalformedHttpResponse(String),

    /// A background handshake task failed to run to completion.
    #[error("handshake task failed: {0}")]
    Handshake(String),

    /// Error string reported by the server in the response header.
    #[error("{0}")]
    Server(String),

    /// The response body could not be decoded into the reply.
    #[error("read body failed, err:{0}")]
    ReadBody(String),

    /// The caller cancelled a synchronous call.
    #[error("rpc client: call failed: context canceled")]
    Cancelled,

    /// A synchronous call ran past its deadline.
    #[error("rpc client: call failed: context deadline exceeded")]
    DeadlineExceeded,

    /// The client is closing or the connection has been shut down.
    #[error("connection is closed")]
    Shutdown,
}

impl Error {
    /// True for the shutdown sentinel.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Shutdown)
    }

    /// True when a value failed to decode from bytes that were fully read.
    ///
    /// Framing is intact after such an error, so only the affected call fails.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Json(_) | Error::MsgPackDecode(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::MsgPackEncode(Arc::new(err))
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::MsgPackDecode(Arc::new(err))
    }
}

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
