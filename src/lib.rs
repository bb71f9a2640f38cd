//! # muxrpc-client
//!
//! Asynchronous RPC client that multiplexes many concurrent calls over a
//! single connection.
//!
//! ## Architecture
//!
//! - **Bootstrap**: dial, optional HTTP `CONNECT` tunnel, then one JSON
//!   options line naming the codec, all bounded by a connect timeout
//! - **Codec**: pluggable header + body framing (MessagePack or JSON built in)
//! - **Calls**: each request gets a sequence number; one reader task
//!   matches responses back to callers in any order
//!
//! ## Example
//!
//! ```ignore
//! use muxrpc_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> muxrpc_client::Result<()> {
//!     let client = muxrpc_client::dial("tcp", "127.0.0.1:9999").await?;
//!
//!     // Synchronous style
//!     let mut sum = 0i64;
//!     client.call("Arith.Add", &(1, 2), &mut sum).await?;
//!
//!     // Asynchronous style
//!     let mut handle = client.go("Arith.Mul", &(3, 4), 0i64, None);
//!     if let Some(call) = handle.done().await {
//!         println!("{:?}", call.into_result());
//!     }
//!
//!     client.close().await
//! }
//! ```

pub mod call;
pub mod codec;
pub mod control;
pub mod error;
pub mod protocol;
pub mod transport;

mod client;
mod dispatch;

pub use call::{Call, CallHandle};
pub use client::{dial, dial_http, Client, ClientBuilder};
pub use codec::{CodecType, Header};
pub use error::{Error, Result};
pub use protocol::Options;
