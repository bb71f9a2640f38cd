//! Codec module - header + body framing over a byte stream.
//!
//! A codec turns a [`BoxedTransport`] into a reader half and a writer half:
//!
//! - [`CodecReader`] reads a [`Header`], then the body that follows it,
//!   decoding into a caller-supplied destination or discarding it
//! - [`CodecWriter`] writes a header and its body as one logical frame
//!
//! The halves are handed out separately so exactly one reader and one
//! writer exist per connection. Codec constructors are looked up in a
//! [`CodecRegistry`] keyed by [`CodecType`].
//!
//! Two codecs ship with the crate:
//!
//! - [`MsgPackCodec`] - length-prefixed MessagePack (`application/msgpack`)
//! - [`JsonCodec`] - newline-delimited JSON (`application/json`)
//!
//! # Example
//!
//! ```
//! use muxrpc_client::codec::{CodecRegistry, CodecType, Encoding};
//!
//! let registry = CodecRegistry::default();
//! assert!(registry.get(&CodecType::MSGPACK).is_some());
//! assert!(registry.get(&CodecType::new("application/gob")).is_none());
//!
//! let bytes = Encoding::Json.encode(&[1, 2, 3]).unwrap();
//! let back: Vec<i32> = Encoding::Json.decode(&bytes).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

mod json;
mod msgpack;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::BoxedTransport;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

/// Boxed future returned by codec halves.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-frame envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    /// `"<service>.<method>"`.
    pub service_method: String,
    /// Sequence number chosen by the client; 0 never identifies a call.
    pub seq: u64,
    /// Empty on success, otherwise the server's error message.
    pub error: String,
}

impl Header {
    /// Create a request header (empty error).
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

/// Serialization format used for header and body values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// MessagePack, structs as maps.
    MsgPack,
    /// JSON.
    Json,
}

impl Encoding {
    /// Encode a value.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Encoding::MsgPack => MsgPackCodec::encode(value),
            Encoding::Json => JsonCodec::encode(value),
        }
    }

    /// Decode a value.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Encoding::MsgPack => MsgPackCodec::decode(bytes),
            Encoding::Json => JsonCodec::decode(bytes),
        }
    }
}

/// Tag naming a codec, sent to the server in the options message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodecType(Cow<'static, str>);

impl CodecType {
    /// Length-prefixed MessagePack.
    pub const MSGPACK: CodecType = CodecType(Cow::Borrowed("application/msgpack"));
    /// Newline-delimited JSON.
    pub const JSON: CodecType = CodecType(Cow::Borrowed("application/json"));

    /// Create a tag for a custom codec.
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self(tag.into())
    }

    /// The tag string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination a response body is decoded into.
pub trait BodyDecode: Send {
    /// Decode `body`, written in `encoding`, into `self`.
    fn decode_body(&mut self, encoding: Encoding, body: &[u8]) -> Result<()>;
}

/// Body destination that holds the decoded value.
#[derive(Debug)]
pub struct Decoded<T>(pub Option<T>);

impl<T> Decoded<T> {
    /// Empty destination.
    pub fn new() -> Self {
        Self(None)
    }

    /// Take the decoded value, if any.
    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

impl<T: DeserializeOwned + Send> BodyDecode for Decoded<T> {
    fn decode_body(&mut self, encoding: Encoding, body: &[u8]) -> Result<()> {
        self.0 = Some(encoding.decode(body)?);
        Ok(())
    }
}

/// Reading half of a codec. Owned by a single reader.
pub trait CodecReader: Send {
    /// Read the next header.
    fn read_header(&mut self) -> BoxFuture<'_, Result<Header>>;

    /// Read the body following the last header.
    ///
    /// With `None` the body is consumed and dropped, keeping the stream
    /// aligned on frame boundaries.
    fn read_body<'a>(
        &'a mut self,
        body: Option<&'a mut dyn BodyDecode>,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Writing half of a codec. Owned by a single writer at a time.
pub trait CodecWriter: Send {
    /// Format the body bytes passed to [`write`](Self::write) must use.
    fn encoding(&self) -> Encoding;

    /// Write `header` followed by the already-encoded `body`, then flush.
    fn write<'a>(&'a mut self, header: &'a Header, body: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Shut the write side of the stream down.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// A constructed codec: both halves over the same stream.
pub struct Codec {
    /// Reading half.
    pub reader: Box<dyn CodecReader>,
    /// Writing half.
    pub writer: Box<dyn CodecWriter>,
}

impl Codec {
    /// Pair up two halves.
    pub fn new(reader: Box<dyn CodecReader>, writer: Box<dyn CodecWriter>) -> Self {
        Self { reader, writer }
    }

    /// Split into `(reader, writer)`.
    pub fn into_parts(self) -> (Box<dyn CodecReader>, Box<dyn CodecWriter>) {
        (self.reader, self.writer)
    }
}

/// Codec constructor taking the raw stream.
pub type NewCodecFn = fn(BoxedTransport) -> Codec;

/// Maps codec tags to constructors.
#[derive(Clone)]
pub struct CodecRegistry {
    constructors: HashMap<CodecType, NewCodecFn>,
}

impl CodecRegistry {
    /// Create a registry with no codecs.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register (or replace) a constructor. Returns the previous one.
    pub fn register(&mut self, codec_type: CodecType, constructor: NewCodecFn) -> Option<NewCodecFn> {
        self.constructors.insert(codec_type, constructor)
    }

    /// Look a constructor up.
    pub fn get(&self, codec_type: &CodecType) -> Option<NewCodecFn> {
        self.constructors.get(codec_type).copied()
    }

    /// Look a constructor up, failing with [`Error::InvalidCodec`].
    pub fn resolve(&self, codec_type: &CodecType) -> Result<NewCodecFn> {
        self.get(codec_type)
            .ok_or_else(|| Error::InvalidCodec(codec_type.clone()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(CodecType::MSGPACK, MsgPackCodec::new_codec);
        registry.register(CodecType::JSON, JsonCodec::new_codec);
        registry
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}
