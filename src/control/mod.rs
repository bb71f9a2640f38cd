//! Bootstrap module - turns a raw transport into a ready codec.
//!
//! Two paths lead to a codec:
//!
//! 1. **Direct**: write the [`Options`](crate::protocol::Options) line,
//!    then build the codec it names ([`negotiate`])
//! 2. **HTTP tunnel**: `CONNECT` to the RPC path first ([`tunnel_http`]),
//!    then continue as in the direct path
//!
//! Every step is bounded by the connect timeout; zero means no bound.
//!
//! # Example
//!
//! ```ignore
//! use muxrpc_client::codec::CodecRegistry;
//! use muxrpc_client::control::{negotiate, tunnel_http};
//! use muxrpc_client::protocol::Options;
//! use muxrpc_client::transport::dial;
//!
//! let options = Options::default();
//! let new_codec = CodecRegistry::default().resolve(&options.codec_type)?;
//! let stream = dial("tcp", "127.0.0.1:9999", options.connect_timeout).await?;
//! let stream = tunnel_http(stream, options.connect_timeout).await?;
//! let codec = negotiate(stream, &options, new_codec).await?;
//! ```

mod handshake;
mod tunnel;

pub use handshake::negotiate;
pub use tunnel::tunnel_http;
