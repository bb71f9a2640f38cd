//! Protocol module - negotiation message, tunnel constants and framing.
//!
//! This module implements what is on the wire outside of codec payloads:
//! - the JSON options line written once per connection
//! - the HTTP CONNECT path and the expected tunnel status line
//! - 4-byte length-prefixed frames used by binary codecs

mod options;
mod wire_format;

pub use options::{
    Options, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HANDLE_TIMEOUT, MAGIC_NUMBER,
};
pub use wire_format::{
    encode_frame_into, read_frame, validate_length, DEFAULT_MAX_FRAME_SIZE,
    LENGTH_PREFIX_SIZE,
};

/// Path requested by the HTTP CONNECT tunnel.
pub const DEFAULT_RPC_PATH: &str = "/_muxrpc_";

/// Status (code and reason) a server answers a successful CONNECT with.
pub const CONNECTED: &str = "200 Connected to RPC";
