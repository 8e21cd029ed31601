//! ACP reader task.
//!
//! Reads newline-delimited JSON from an agent's stdout (or, on the agent
//! side, from the host's stdin), classifies each line as a [`Frame`], and
//! hands it to the owning [`Connection`] for dispatch.
//!
//! Lines come from a [`LineReader`], which enforces the 1 MiB per-line
//! limit before any JSON parsing happens.

use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::LineReader;
use crate::acp::connection::Connection;
use crate::AppError;

/// One decoded line from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The line parsed as JSON.
    Message(Value),
    /// The line was not valid JSON; surfaced as a protocol log entry.
    Unparsed(String),
}

/// Classify a single trimmed line.
#[must_use]
pub fn parse_frame(line: &str) -> Frame {
    match serde_json::from_str::<Value>(line) {
        Ok(value) => Frame::Message(value),
        Err(_) => Frame::Unparsed(line.to_owned()),
    }
}

/// ACP reader task: reads NDJSON lines from `stream` and dispatches them.
///
/// Lines are handed to [`Connection::dispatch_frame`] in arrival order.
/// Over-long lines are logged and skipped; they do **not** terminate the
/// reader. The task returns when the stream reaches EOF, on an unrecoverable
/// I/O error, or when `cancel` fires. Process exit handling belongs to the
/// supervisor, not to the reader.
pub async fn run_reader<R>(label: String, stream: R, connection: Connection, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = LineReader::new(stream);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(label, "acp reader: cancellation received, stopping");
                break;
            }

            item = lines.next_line() => {
                match item {
                    Ok(None) => {
                        debug!(label, "acp reader: EOF detected");
                        break;
                    }

                    Err(AppError::Acp(ref msg)) => {
                        warn!(label, error = msg.as_str(), "acp reader: framing error, skipping line");
                    }

                    Err(e) => {
                        warn!(label, error = %e, "acp reader: IO error, stopping");
                        break;
                    }

                    Ok(Some(line)) => {
                        debug!(label, direction = "in", line = %line, "acp rpc");
                        connection.dispatch_frame(parse_frame(&line));
                    }
                }
            }
        }
    }
}
