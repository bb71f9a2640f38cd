//! Transport module - the byte stream a codec runs over.
//!
//! Anything that is `AsyncRead + AsyncWrite` can carry a connection:
//! TCP and Unix sockets from [`dial`], or an in-memory `tokio::io::duplex`
//! pair in tests. Dropping the transport closes it.

mod dial;

use tokio::io::{AsyncRead, AsyncWrite};

pub use dial::dial;

/// Bidirectional byte stream owned by one client.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased transport handed to codec constructors.
pub type BoxedTransport = Box<dyn Transport>;
