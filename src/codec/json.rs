//! JSON codec - one JSON value per line.
//!
//! A frame is the header object followed by the body value, each on its
//! own `\n`-terminated line. Compact serialization never emits a raw
//! newline, so line boundaries are frame boundaries.

use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};

use super::{BodyDecode, BoxFuture, Codec, CodecReader, CodecWriter, Encoding, Header};
use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::BoxedTransport;

/// Human-readable JSON codec.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value as compact JSON.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode a JSON value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Build a codec over `transport`. Registered as `application/json`.
    pub fn new_codec(transport: BoxedTransport) -> Codec {
        Self::with_max_line_size(transport, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Build a codec rejecting header or body lines longer than `max_line_size`.
    pub fn with_max_line_size(transport: BoxedTransport, max_line_size: u32) -> Codec {
        let (read_half, write_half) = tokio::io::split(transport);
        Codec::new(
            Box::new(JsonReader {
                reader: BufReader::new(read_half),
                line: Vec::new(),
                max_line_size,
            }),
            Box::new(JsonWriter {
                writer: BufWriter::new(write_half),
            }),
        )
    }
}

struct JsonReader {
    reader: BufReader<ReadHalf<BoxedTransport>>,
    line: Vec<u8>,
    max_line_size: u32,
}

impl JsonReader {
    async fn next_line(&mut self) -> Result<&[u8]> {
        self.line.clear();
        // Room for the content plus its newline.
        let limit = u64::from(self.max_line_size) + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await?;
        if read == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        if self.line.last() != Some(&b'\n') {
            if read as u64 >= limit {
                return Err(Error::Protocol(format!(
                    "JSON line exceeds maximum {}",
                    self.max_line_size
                )));
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended inside a JSON frame",
            )
            .into());
        }
        Ok(&self.line[..self.line.len() - 1])
    }
}

impl CodecReader for JsonReader {
    fn read_header(&mut self) -> BoxFuture<'_, Result<Header>> {
        Box::pin(async move {
            let line = self.next_line().await?;
            JsonCodec::decode(line)
        })
    }

    fn read_body<'a>(
        &'a mut self,
        body: Option<&'a mut dyn BodyDecode>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let line = self.next_line().await?;
            match body {
                Some(dest) => dest.decode_body(Encoding::Json, line),
                None => Ok(()),
            }
        })
    }
}

struct JsonWriter {
    writer: BufWriter<WriteHalf<BoxedTransport>>,
}

impl CodecWriter for JsonWriter {
    fn encoding(&self) -> Encoding {
        Encoding::Json
    }

    fn write<'a>(&'a mut self, header: &'a Header, body: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if body.contains(&b'\n') {
                return Err(Error::Protocol(
                    "JSON body must not contain a newline".to_string(),
                ));
            }
            let header_bytes = JsonCodec::encode(header)?;
            self.writer.write_all(&header_bytes).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.write_all(body).await?;
            self.writer.write_all(b"\n").await?;
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
    use tokio::io::{duplex, AsyncReadExt};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Reply {
        c: i32,
    }

    #[tokio::test]
    async fn test_wire_layout_is_two_lines() {
        let (a, mut b) = duplex(4096);
        let (_, mut writer) = JsonCodec::new_codec(Box::new(a)).into_parts();

        let body = JsonCodec::encode(&Reply { c: 3 }).unwrap();
        writer.write(&Header::request("Arith.Add", 1), &body).await.unwrap();
        writer.close().await.unwrap();

        let mut raw = String::new();
        b.read_to_string(&mut raw).await.unwrap();
        assert_eq!(
            raw,
            "{\"ServiceMethod\":\"Arith.Add\",\"Seq\":1,\"Error\":\"\"}\n{\"c\":3}\n"
        );
    }

    #[tokio::test]
    async fn test_round_trip_and_discard() {
        let (a, b) = duplex(4096);
        let (_, mut writer) = JsonCodec::new_codec(Box::new(a)).into_parts();
        let (mut reader, _) = JsonCodec::new_codec(Box::new(b)).into_parts();

        let first = JsonCodec::encode(&Reply { c: 1 }).unwrap();
        let second = JsonCodec::encode(&Reply { c: 2 }).unwrap();
        writer.write(&Header::request("X.Y", 10), &first).await.unwrap();
        writer.write(&Header::request("X.Y", 11), &second).await.unwrap();

        assert_eq!(reader.read_header().await.unwrap().seq, 10);
        reader.read_body(None).await.unwrap();
        assert_eq!(reader.read_header().await.unwrap().seq, 11);
        let mut dest = Decoded::<Reply>::new();
        reader.read_body(Some(&mut dest)).await.unwrap();
        assert_eq!(dest.into_inner(), Some(Reply { c: 2 }));
    }

    #[tokio::test]
    async fn test_rejects_body_with_newline() {
        let (a, _b) = duplex(4096);
        let (_, mut writer) = JsonCodec::new_codec(Box::new(a)).into_parts();
        let err = writer
            .write(&Header::request("X.Y", 1), b"{\n}")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_partial_line_is_io_error() {
        let (a, b) = duplex(4096);
        let (mut reader, _) = JsonCodec::new_codec(Box::new(b)).into_parts();
        let mut raw = a;
        tokio::io::AsyncWriteExt::write_all(&mut raw, b"{\"Seq\":1")
            .await
            .unwrap();
        drop(raw);

        let err = reader.read_header().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_line_without_newline_is_capped() {
        let (a, mut b) = duplex(4096);
        let (mut reader, _) = JsonCodec::with_max_line_size(Box::new(a), 16).into_parts();

        // Exactly at the limit is fine.
        b.write_all(b"\"0123456789abcd\"\n").await.unwrap();
        let mut dest = Decoded::<String>::new();
        reader.read_body(Some(&mut dest)).await.unwrap();
        assert_eq!(dest.into_inner().as_deref(), Some("0123456789abcd"));

        // A peer that never ends the line cannot grow the buffer unbounded.
        b.write_all(&[b'x'; 40]).await.unwrap();
        let err = reader.read_header().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
