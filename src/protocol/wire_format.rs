//! Length-prefixed frame encoding for binary codecs.
//!
//! Every encoded value travels as:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Length       │ Payload              │
//! │ 4 bytes      │ `Length` bytes       │
//! │ uint32 BE    │                      │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! A header and its body are two consecutive frames.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Append one length-prefixed frame to `buf`.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use muxrpc_client::protocol::{encode_frame_into, LENGTH_PREFIX_SIZE};
///
/// let mut buf = BytesMut::new();
/// encode_frame_into(&mut buf, b"hello").unwrap();
/// assert_eq!(buf.len(), LENGTH_PREFIX_SIZE + 5);
/// assert_eq!(&buf[..4], &[0, 0, 0, 5]);
/// ```
pub fn encode_frame_into(buf: &mut BytesMut, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        Error::Protocol(format!("Frame size {} does not fit in u32", payload.len()))
    })?;
    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(payload);
    Ok(())
}

/// Reject frames larger than `max_frame_size`.
pub fn validate_length(len: u32, max_frame_size: u32) -> Result<()> {
    if len > max_frame_size {
        return Err(Error::Protocol(format!(
            "Frame size {} exceeds maximum {}",
            len, max_frame_size
        )));
    }
    Ok(())
}

/// Read exactly one frame payload into `buf`, replacing its contents.
///
/// An EOF before the prefix or inside the payload surfaces as an I/O error.
pub async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut, max_frame_size: u32) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;
    let len = u32::from_be_bytes(prefix);
    validate_length(len, max_frame_size)?;

    buf.clear();
    buf.resize(len as usize, 0);
    reader.read_exact(&mut buf[..]).await?;
    Ok(())
}
