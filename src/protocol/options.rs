//! Negotiation message sent once before any codec frame.
//!
//! The options travel as a single JSON object terminated by `\n`, so a
//! server can decode them before it knows which codec to build:
//!
//! ```text
//! {"MagicNumber":3927900,"CodecType":"application/msgpack","ConnectTimeout":10000000000,"HandleTimeout":0}
//! ```
//!
//! Durations are integer nanoseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecType;
use crate::error::{Error, Result};

/// Marks a connection as speaking this protocol.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default handle timeout (zero: the server imposes no limit).
pub const DEFAULT_HANDLE_TIMEOUT: Duration = Duration::ZERO;

/// Connection options negotiated with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Options {
    /// Always [`MAGIC_NUMBER`] on the wire.
    pub magic_number: u32,
    /// Codec used for every frame after the options.
    pub codec_type: CodecType,
    /// Bound on dial and bootstrap. Zero means no timeout.
    #[serde(with = "duration_nanos")]
    pub connect_timeout: Duration,
    /// Per-call handling budget requested from the server. Zero means no limit.
    #[serde(with = "duration_nanos")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: CodecType::MSGPACK,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: DEFAULT_HANDLE_TIMEOUT,
        }
    }
}

impl Options {
    /// Write the options as one JSON line and flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one JSON options line and check the magic number.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        let options: Options = serde_json::from_str(line.trim_end())?;
        if options.magic_number != MAGIC_NUMBER {
            return Err(Error::Protocol(format!(
                "invalid magic number {:#x}",
                options.magic_number
            )));
        }
        Ok(options)
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}
