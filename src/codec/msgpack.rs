//! MsgPack codec using `rmp-serde` over length-prefixed frames.
//!
//! Each header and each body is one frame (see [`crate::protocol`]).
//!
//! **Use `to_vec_named`, not `to_vec`.** Structs are written as maps with
//! field names so that servers in other languages decode them by name,
//! not by position.
//!
//! # Example
//!
//! ```
//! use muxrpc_client::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Args {
//!     a: i32,
//!     b: i32,
//! }
//!
//! let args = Args { a: 1, b: 2 };
//! let encoded = MsgPackCodec::encode(&args).unwrap();
//! let decoded: Args = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, args);
//! ```

use bytes::BytesMut;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};

use super::{BodyDecode, BoxFuture, Codec, CodecReader, CodecWriter, Encoding, Header};
use crate::error::Result;
use crate::protocol::{encode_frame_into, read_frame, DEFAULT_MAX_FRAME_SIZE};
use crate::transport::BoxedTransport;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Build a codec over `transport`. Registered as `application/msgpack`.
    pub fn new_codec(transport: BoxedTransport) -> Codec {
        Self::with_max_frame_size(transport, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Build a codec that rejects frames larger than `max_frame_size`.
    pub fn with_max_frame_size(transport: BoxedTransport, max_frame_size: u32) -> Codec {
        let (read_half, write_half) = tokio::io::split(transport);
        Codec::new(
            Box::new(MsgPackReader {
                reader: BufReader::new(read_half),
                buf: BytesMut::with_capacity(4 * 1024),
                max_frame_size,
            }),
            Box::new(MsgPackWriter {
                writer: BufWriter::new(write_half),
                buf: BytesMut::with_capacity(4 * 1024),
            }),
        )
    }
}

struct MsgPackReader {
    reader: BufReader<ReadHalf<BoxedTransport>>,
    buf: BytesMut,
    max_frame_size: u32,
}

impl CodecReader for MsgPackReader {
    fn read_header(&mut self) -> BoxFuture<'_, Result<Header>> {
        Box::pin(async move {
            read_frame(&mut self.reader, &mut self.buf, self.max_frame_size).await?;
            MsgPackCodec::decode(&self.buf)
        })
    }

    fn read_body<'a>(
        &'a mut self,
        body: Option<&'a mut dyn BodyDecode>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            read_frame(&mut self.reader, &mut self.buf, self.max_frame_size).await?;
            match body {
                Some(dest) => dest.decode_body(Encoding::MsgPack, &self.buf),
                None => Ok(()),
            }
        })
    }
}

struct MsgPackWriter {
    writer: BufWriter<WriteHalf<BoxedTransport>>,
    buf: BytesMut,
}

impl CodecWriter for MsgPackWriter {
    fn encoding(&self) -> Encoding {
        Encoding::MsgPack
    }

    fn write<'a>(&'a mut self, header: &'a Header, body: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let header_bytes = MsgPackCodec::encode(header)?;
            self.buf.clear();
            encode_frame_into(&mut self.buf, &header_bytes)?;
            encode_frame_into(&mut self.buf, body)?;
            self.writer.write_all(&self.buf).await?;
            self.writer.flush().await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.writer.shutdown().await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoded;
    use serde::{Deserialize, Serialize};
    use tokio::io::duplex;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    #[serde(rename_all = "PascalCase")]
    struct Args {
        a: i32,
        b: i32,
    }

    fn pair() -> (Codec, Codec) {
        let (a, b) = duplex(64 * 1024);
        (
            MsgPackCodec::new_codec(Box::new(a)),
            MsgPackCodec::new_codec(Box::new(b)),
        )
    }

    #[test]
    fn test_header_is_a_named_map() {
        let encoded = MsgPackCodec::encode(&Header::request("Arith.Add", 1)).unwrap();
        // fixmap of three entries, not a fixarray
        assert_eq!(encoded[0], 0x83, "got {:02X}", encoded[0]);

        // Field names, not positions, carry the values.
        let by_name: std::collections::BTreeMap<String, serde_json::Value> =
            MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(by_name["ServiceMethod"].as_str(), Some("Arith.Add"));
        assert_eq!(by_name["Seq"].as_u64(), Some(1));
    }

    #[test]
    fn test_truncated_body_is_decode_error() {
        let encoded = MsgPackCodec::encode(&Args { a: 1, b: 2 }).unwrap();
        let result: Result<Args> = MsgPackCodec::decode(&encoded[..encoded.len() - 1]);
        assert!(result.unwrap_err().is_decode());
    }

    #[test]
    fn test_binary_body() {
        let data: Vec<u8> = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&data)).unwrap();

        // bin8
        assert_eq!(encoded[0], 0xc4, "Expected bin8 format");

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &data);
    }

    #[tokio::test]
    async fn test_frame_over_stream() {
        let (client, server) = pair();
        let (_, mut writer) = client.into_parts();
        let (mut reader, _) = server.into_parts();

        let body = MsgPackCodec::encode(&Args { a: 9, b: 1 }).unwrap();
        writer
            .write(&Header::request("Arith.Add", 3), &body)
            .await
            .unwrap();

        let header = reader.read_header().await.unwrap();
        assert_eq!(header.service_method, "Arith.Add");
        assert_eq!(header.seq, 3);
        assert!(header.error.is_empty());

        let mut dest = Decoded::<Args>::new();
        reader.read_body(Some(&mut dest)).await.unwrap();
        assert_eq!(dest.into_inner(), Some(Args { a: 9, b: 1 }));
    }

    #[tokio::test]
    async fn test_discarded_body_keeps_alignment() {
        let (client, server) = pair();
        let (_, mut writer) = client.into_parts();
        let (mut reader, _) = server.into_parts();

        let first = MsgPackCodec::encode(&vec![7u8; 300]).unwrap();
        let second = MsgPackCodec::encode(&"second").unwrap();
        writer.write(&Header::request("A.B", 1), &first).await.unwrap();
        writer.write(&Header::request("A.B", 2), &second).await.unwrap();

        assert_eq!(reader.read_header().await.unwrap().seq, 1);
        reader.read_body(None).await.unwrap();

        assert_eq!(reader.read_header().await.unwrap().seq, 2);
        let mut dest = Decoded::<String>::new();
        reader.read_body(Some(&mut dest)).await.unwrap();
        assert_eq!(dest.into_inner().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_close_gives_peer_eof() {
        let (client, server) = pair();
        let (_, mut writer) = client.into_parts();
        let (mut reader, _) = server.into_parts();

        writer.close().await.unwrap();
        let err = reader.read_header().await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(_)));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_decode_error() {
        let (client, server) = pair();
        let (_, mut writer) = client.into_parts();
        let (mut reader, _) = server.into_parts();

        let body = MsgPackCodec::encode(&"not a number").unwrap();
        writer.write(&Header::request("A.B", 1), &body).await.unwrap();

        reader.read_header().await.unwrap();
        let mut dest = Decoded::<u64>::new();
        let err = reader.read_body(Some(&mut dest)).await.unwrap_err();
        assert!(err.is_decode());
    }
}
