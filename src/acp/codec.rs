//! NDJSON framing for ACP streams.
//!
//! [`AcpCodec`] splits inbound bytes on `\n`, trims each line and drops the
//! blank ones, so the reader only ever sees candidate messages. Invalid
//! UTF-8 is decoded lossily: a garbled line becomes an unparsable frame
//! further up instead of an I/O error that would end the stream.
//!
//! Lines longer than [`MAX_LINE_BYTES`] are rejected without being
//! buffered in full; the codec then skips to the next newline and resumes.
//! [`LineReader`] drives the codec over an [`AsyncRead`] and, unlike
//! `FramedRead`, keeps going after such an error.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Maximum line length accepted by the ACP codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Read buffer growth per read call.
const READ_CHUNK: usize = 8 * 1024;

/// Newline-delimited JSON codec.
#[derive(Debug, Default)]
pub struct AcpCodec {
    /// Prefix of the buffer already searched for `\n`.
    scanned: usize,
    /// Dropping the tail of an over-long line.
    discarding: bool,
}

impl AcpCodec {
    /// Create a codec with the [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for AcpCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next non-empty line from `src`.
    ///
    /// Returns `Ok(None)` when `src` holds no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let start = self.scanned.min(src.len());
            let Some(offset) = src[start..].iter().position(|b| *b == b'\n') else {
                return self.buffer_partial(src);
            };
            let end = start + offset;
            let raw = src.split_to(end + 1);
            self.scanned = 0;

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if end > MAX_LINE_BYTES {
                return Err(line_too_long());
            }
            if let Some(line) = decode_line(&raw[..end]) {
                return Ok(Some(line));
            }
        }
    }

    /// Decode what is left when the stream ends.
    ///
    /// A trailing fragment without `\n` is still surfaced so a peer that
    /// exits mid-line does not lose its last message silently.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        let rest = src.split();
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return Ok(None);
        }
        Ok(decode_line(&rest))
    }
}

impl AcpCodec {
    /// No newline in `src`: remember how far we looked, or start discarding
    /// once the partial line is already too long.
    fn buffer_partial(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if self.discarding {
            src.clear();
            self.scanned = 0;
            return Ok(None);
        }
        if src.len() > MAX_LINE_BYTES {
            src.clear();
            self.scanned = 0;
            self.discarding = true;
            return Err(line_too_long());
        }
        self.scanned = src.len();
        Ok(None)
    }
}

impl Encoder<String> for AcpCodec {
    type Error = AppError;

    /// Append `item` and a single `\n` to `dst`.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Pulls trimmed, non-empty lines out of a byte stream.
///
/// # Examples
///
/// ```rust,ignore
/// use acp_host::acp::codec::LineReader;
///
/// let mut lines = LineReader::new(child_stdout);
/// while let Some(line) = lines.next_line().await? {
///     println!("{line}");
/// }
/// ```
#[derive(Debug)]
pub struct LineReader<R> {
    stream: R,
    codec: AcpCodec,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap `stream`.
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            codec: AcpCodec::new(),
            buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// Next line, or `Ok(None)` once the stream is exhausted.
    ///
    /// Cancel safe: dropping the future loses no buffered bytes.
    ///
    /// # Errors
    ///
    /// - `AppError::Acp` for an over-long line; the next call continues
    ///   after it.
    /// - `AppError::Io` when reading fails.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.eof {
                return self.codec.decode_eof(&mut self.buf);
            }
            if let Some(line) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(line));
            }
            self.buf.reserve(READ_CHUNK);
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let trimmed = line.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn line_too_long() -> AppError {
    AppError::Acp(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
}
