//! ACP writer task.
//!
//! Receives already-serialized JSON lines from a tokio [`mpsc`] channel,
//! frames them with [`AcpCodec`] and writes each frame with a single
//! `write_all` so lines from concurrent callers never interleave on the wire.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::AcpCodec;

/// ACP writer task: writes outbound lines to the peer's input stream.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (graceful shutdown),
/// - `line_rx` is closed (all senders dropped), or
/// - a write fails (e.g. the agent process has exited).
///
/// Dropping `line_rx` on exit is what makes later sends fail, which the
/// connection reports as "process is not running".
pub async fn run_writer<W>(
    label: String,
    stream: W,
    mut line_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut stream = stream;
    let mut codec = AcpCodec::new();
    let mut frame = BytesMut::new();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "acp writer: cancellation received, stopping");
                break;
            }

            line = line_rx.recv() => {
                let Some(line) = line else {
                    debug!(label, "acp writer: line channel closed, stopping");
                    break;
                };

                frame.clear();
                if let Err(e) = codec.encode(line, &mut frame) {
                    warn!(label, error = %e, "acp writer: encode failed, dropping line");
                    continue;
                }

                if let Err(e) = stream.write_all(&frame).await {
                    warn!(label, error = %e, "acp writer: write failed, stopping");
                    break;
                }
                if let Err(e) = stream.flush().await {
                    warn!(label, error = %e, "acp writer: flush failed, stopping");
                    break;
                }
            }
        }
    }
}
