//! HTTP CONNECT tunnel set up before options negotiation.
//!
//! The exchange is plain text:
//!
//! ```text
//! > CONNECT /_muxrpc_ HTTP/1.0\n\n
//! < HTTP/1.0 200 Connected to RPC\n\n
//! ```
//!
//! Anything but the exact `200 Connected to RPC` status fails the dial.
//! The response is read through a `BufReader` that then becomes the
//! transport, so bytes buffered past the blank line are never lost.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::handshake::race_timeout;
use crate::error::{Error, Phase, Result};
use crate::protocol::{CONNECTED, DEFAULT_RPC_PATH};
use crate::transport::BoxedTransport;

/// Issue `CONNECT` on `transport` and require the tunnel status line.
pub async fn tunnel_http(transport: BoxedTransport, timeout: Duration) -> Result<BoxedTransport> {
    let task = tokio::spawn(async move {
        let mut stream = BufReader::new(transport);
        let request = format!("CONNECT {} HTTP/1.0\n\n", DEFAULT_RPC_PATH);
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let status = read_response_status(&mut stream).await?;
        if status != CONNECTED {
            return Err(Error::UnexpectedHttpResponse(status));
        }
        Ok(Box::new(stream) as BoxedTransport)
    });
    race_timeout(timeout, Phase::HttpTunnel, task).await
}

/// Read a response head and return its status (`"<code> <reason>"`).
async fn read_response_status<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(Error::MalformedHttpResponse("empty response".to_string()));
    }
    let status_line = line.trim_end_matches(['\r', '\n']);
    let (version, status) = status_line
        .split_once(' ')
        .ok_or_else(|| Error::MalformedHttpResponse(status_line.to_string()))?;
    let status = status.trim();
    let code_ok = status
        .get(..3)
        .map_or(false, |code| code.bytes().all(|b| b.is_ascii_digit()));
    if !version.starts_with("HTTP/") || !code_ok {
        return Err(Error::MalformedHttpResponse(status_line.to_string()));
    }
    let status = status.to_string();

    // Skip headers up to the blank line.
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::MalformedHttpResponse(
                "unexpected EOF in headers".to_string(),
            ));
        }
        if line.trim_end_matches(['\r', '\n']).is_empty() {
            return Ok(status);
        }
    }
}
