//! Options negotiation and the connect-timeout race.
//!
//! Each handshake step runs on its own task. The dialing task waits for
//! whichever finishes first: the step or the connect timeout. A zero
//! timeout means wait forever, never "time out immediately".
//!
//! On timeout the step's task is aborted. The task owns the transport,
//! so aborting it drops the stream and closes the connection instead of
//! leaving a writer parked on a socket nobody will read.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::codec::{Codec, NewCodecFn};
use crate::error::{Error, Phase, Result};
use crate::protocol::Options;
use crate::transport::BoxedTransport;

/// Wait for `task`, bounded by `timeout` unless it is zero.
pub(crate) async fn race_timeout<T>(
    timeout: Duration,
    phase: Phase,
    task: JoinHandle<Result<T>>,
) -> Result<T> {
    let abort = task.abort_handle();
    let joined = if timeout.is_zero() {
        task.await
    } else {
        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                tracing::warn!("rpc client: {} timed out after {:?}", phase, timeout);
                return Err(Error::Timeout(phase));
            }
        }
    };
    joined.map_err(|e| Error::Handshake(e.to_string()))?
}

/// Send `options` and build the codec they name.
///
/// The options line is written before any codec frame; the server reads
/// it to pick the same codec.
pub async fn negotiate(
    transport: BoxedTransport,
    options: &Options,
    new_codec: NewCodecFn,
) -> Result<Codec> {
    let opts = options.clone();
    let task = tokio::spawn(async move {
        let mut transport = transport;
        if let Err(e) = opts.write_to(&mut transport).await {
            tracing::error!("rpc client: options encode failed: {}", e);
            return Err(e);
        }
        Ok(new_codec(transport))
    });
    race_timeout(options.connect_timeout, Phase::Negotiate, task).await
}
