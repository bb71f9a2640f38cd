//! Network dialer bounded by the connect timeout.
//!
//! - `tcp`, `tcp4`, `tcp6`: TCP stream (the family restricts resolved addresses)
//! - `unix`: Unix Domain Socket (unix only)
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use muxrpc_client::transport::dial;
//!
//! let stream = dial("tcp", "127.0.0.1:9999", Duration::from_secs(1)).await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use super::BoxedTransport;
use crate::error::{Error, Phase, Result};

/// Connect to `address` on `network`.
///
/// A zero `timeout` waits for the operating system's own connect timeout.
pub async fn dial(network: &str, address: &str, timeout: Duration) -> Result<BoxedTransport> {
    match network {
        "tcp" | "tcp4" | "tcp6" => {
            let stream = with_timeout(timeout, connect_tcp(network, address)).await?;
            // Requests are small and latency bound.
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        "unix" => {
            let stream = with_timeout(timeout, async {
                Ok(tokio::net::UnixStream::connect(address).await?)
            })
            .await?;
            Ok(Box::new(stream))
        }
        other => Err(Error::UnsupportedNetwork(other.to_string())),
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout(Phase::Dial))?
}

async fn connect_tcp(network: &str, address: &str) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await?
        .filter(|addr| match network {
            "tcp4" => addr.is_ipv4(),
            "tcp6" => addr.is_ipv6(),
            _ => true,
        })
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err
        .unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no {} address found for {}", network, address),
            )
        })
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = dial("tcp", &addr, Duration::from_secs(1)).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        assert_eq!(&accept.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_dial_tcp6_filters_ipv4() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let err = dial("tcp6", &addr, Duration::ZERO).await.err().unwrap();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_unknown_network() {
        let err = dial("udp", "127.0.0.1:1", Duration::ZERO).await.err().unwrap();
        assert!(matches!(err, Error::UnsupportedNetwork(ref n) if n == "udp"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dial_unix() {
        let path = std::env::temp_dir().join(format!("muxrpc-dial-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        let stream = dial("unix", path.to_str().unwrap(), Duration::from_secs(1)).await;
        assert!(stream.is_ok());
        accept.await.unwrap().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
