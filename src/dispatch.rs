//! The reader loop: one task per connection matching responses to calls.
//!
//! Each iteration reads a header, looks the call up by sequence number
//! and reads the body into it. The loop stops on the first transport or
//! framing error, or when the client starts closing, and then fails every
//! call still pending with that error.

use std::sync::Arc;

use crate::call::{CallRegistry, PendingCall};
use crate::client::Shared;
use crate::codec::{BodyDecode, CodecReader, Header};
use crate::error::{Error, Result};

/// Run the reader loop until the connection ends, then drain.
pub(crate) async fn receive(shared: Arc<Shared>, mut reader: Box<dyn CodecReader>) {
    let mut closed = shared.subscribe_closed();
    let err = tokio::select! {
        err = read_loop(&shared.registry, reader.as_mut()) => err,
        _ = crate::client::wait_closed(&mut closed) => Error::Shutdown,
    };
    drop(reader);

    if err.is_shutdown() {
        tracing::debug!("rpc client: reader stopped, client closing");
    } else {
        tracing::error!("rpc client: reader stopped: {}", err);
    }
    shared.terminate_calls(err).await;
}

async fn read_loop(registry: &CallRegistry, reader: &mut dyn CodecReader) -> Error {
    loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => return e,
        };
        tracing::trace!(seq = header.seq, method = %header.service_method, "rpc client: response");
        if let Err(e) = dispatch_frame(registry, reader, header).await {
            return e;
        }
    }
}

/// Route one response. An `Err` means the stream is no longer usable.
async fn dispatch_frame(
    registry: &CallRegistry,
    reader: &mut dyn CodecReader,
    header: Header,
) -> Result<()> {
    let Some(call) = registry.remove(header.seq) else {
        // Cancelled, already failed on send, or never ours.
        tracing::debug!(seq = header.seq, "rpc client: discarding response for unknown call");
        return reader.read_body(None).await;
    };
    let mut call = Resolving::new(header.seq, call);

    if !header.error.is_empty() {
        let read = reader.read_body(None).await;
        call.complete(Some(Error::Server(header.error)));
        return read;
    }

    match reader.read_body(call.body()).await {
        Ok(()) => {
            call.complete(None);
            Ok(())
        }
        Err(e) if e.is_decode() => {
            // The frame was consumed; only this call is affected.
            call.complete(Some(Error::ReadBody(e.to_string())));
            Ok(())
        }
        Err(e) => {
            call.complete(Some(Error::ReadBody(e.to_string())));
            Err(e)
        }
    }
}

/// A call taken out of the registry whose body is still being read.
///
/// If the read is abandoned because the client closes, dropping this
/// completes the call with [`Error::Shutdown`].
struct Resolving {
    seq: u64,
    call: Option<Box<dyn PendingCall>>,
}

impl Resolving {
    fn new(seq: u64, call: Box<dyn PendingCall>) -> Self {
        Self {
            seq,
            call: Some(call),
        }
    }

    fn body(&mut self) -> Option<&mut dyn BodyDecode> {
        self.call.as_mut().map(|call| call.body())
    }

    fn complete(&mut self, error: Option<Error>) {
        if let Some(call) = self.call.take() {
            call.complete(self.seq, error);
        }
    }
}

impl Drop for Resolving {
    fn drop(&mut self) {
        self.complete(Some(Error::Shutdown));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::SyncCall;
    use crate::codec::{Encoding, MsgPackCodec};
    use crate::protocol::encode_frame_into;
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::oneshot;

    fn frame(buf: &mut BytesMut, header: &Header, body: &[u8]) {
        encode_frame_into(buf, &MsgPackCodec::encode(header).unwrap()).unwrap();
        encode_frame_into(buf, body).unwrap();
    }

    fn register(registry: &CallRegistry) -> (u64, oneshot::Receiver<Result<i32>>) {
        let (tx, rx) = oneshot::channel();
        let seq = registry.register(Box::new(SyncCall::new(tx))).ok().unwrap();
        (seq, rx)
    }

    #[tokio::test]
    async fn test_unknown_seq_does_not_desync() {
        let registry = CallRegistry::new();
        let (seq, rx) = register(&registry);

        let mut wire = BytesMut::new();
        let body = Encoding::MsgPack.encode(&"stray body").unwrap();
        frame(&mut wire, &Header::request("A.B", 99), &body);
        let body = Encoding::MsgPack.encode(&5i32).unwrap();
        frame(&mut wire, &Header::request("A.B", seq), &body);

        let (client, mut server) = tokio::io::duplex(4096);
        server.write_all(&wire).await.unwrap();
        drop(server);

        let (mut reader, _writer) = MsgPackCodec::new_codec(Box::new(client)).into_parts();
        let err = read_loop(&registry, reader.as_mut()).await;
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(rx.await.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_server_error_and_bad_body() {
        let registry = CallRegistry::new();
        let (failed, failed_rx) = register(&registry);
        let (garbled, garbled_rx) = register(&registry);
        let (ok, ok_rx) = register(&registry);

        let mut wire = BytesMut::new();
        let mut header = Header::request("A.B", failed);
        header.error = "method not found".to_string();
        frame(&mut wire, &header, &Encoding::MsgPack.encode(&()).unwrap());
        frame(
            &mut wire,
            &Header::request("A.B", garbled),
            &Encoding::MsgPack.encode(&"not a number").unwrap(),
        );
        frame(
            &mut wire,
            &Header::request("A.B", ok),
            &Encoding::MsgPack.encode(&1i32).unwrap(),
        );

        let (client, mut server) = tokio::io::duplex(4096);
        server.write_all(&wire).await.unwrap();
        drop(server);

        let (mut reader, _writer) = MsgPackCodec::new_codec(Box::new(client)).into_parts();
        read_loop(&registry, reader.as_mut()).await;

        let err = failed_rx.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "method not found");
        let err = garbled_rx.await.unwrap().unwrap_err();
        assert!(err.to_string().starts_with("read body failed, err:"));
        assert_eq!(ok_rx.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_body_read_completes_call() {
        let registry = CallRegistry::new();
        let (seq, rx) = register(&registry);

        // Header only; the body never arrives.
        let mut wire = BytesMut::new();
        encode_frame_into(
            &mut wire,
            &MsgPackCodec::encode(&Header::request("A.B", seq)).unwrap(),
        )
        .unwrap();
        let (client, mut server) = tokio::io::duplex(4096);
        server.write_all(&wire).await.unwrap();

        let (mut reader, _writer) = MsgPackCodec::new_codec(Box::new(client)).into_parts();
        let stopped = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            read_loop(&registry, reader.as_mut()),
        )
        .await;
        assert!(stopped.is_err());
        assert!(rx.await.unwrap().unwrap_err().is_shutdown());
        drop(server);
    }
}
