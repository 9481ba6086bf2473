//! NDJSON line decoder for agent output streams.
//!
//! The runtime delivers stdout in fixed-size chunks that are not aligned to
//! record boundaries: one chunk may carry several records, half a record, or
//! end between `\r` and `\n`. [`FrameDecoder`] buffers raw bytes and yields
//! each newline-terminated line exactly once, in arrival order.
//!
//! Lines are decoded as UTF-8 *after* reassembly, so a multi-byte character
//! split across two chunks survives intact. Invalid sequences are replaced
//! with U+FFFD rather than failing the stream.
//!
//! [`FrameDecoder`] also implements [`Decoder`], so it can frame an
//! [`AsyncRead`](tokio::io::AsyncRead) directly through
//! [`FramedRead`](tokio_util::codec::FramedRead). Unlike a plain
//! `LinesCodec` it has no line-length cap: agent records carrying whole file
//! contents must never be dropped.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Incremental newline-delimited line decoder.
///
/// # Examples
///
/// ```rust
/// use agentbox::stream::codec::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// assert!(decoder.feed(b"{\"type\":\"assi").is_empty());
/// assert_eq!(decoder.feed(b"stant\"}\n\n{}\n"), vec![
///     "{\"type\":\"assistant\"}".to_owned(),
///     "{}".to_owned(),
/// ]);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Unterminated tail of the byte stream.
    buf: BytesMut,
    /// Offset up to which `buf` is known to contain no `\n`.
    next_index: usize,
    /// Set once the framed source reported end of stream.
    eof: bool,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk without extracting any lines.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Split off the next complete, non-empty line.
    ///
    /// The trailing delimiter and surrounding whitespace are stripped.
    /// Whitespace-only lines are consumed and skipped. Returns `None` when
    /// the buffer holds no further `\n`; the remainder stays buffered.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let offset = self.buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n');

            let Some(offset) = offset else {
                self.next_index = self.buf.len();
                return None;
            };

            let end = self.next_index + offset;
            let raw = self.buf.split_to(end + 1);
            self.next_index = 0;

            let line = decode_line(&raw[..end]);
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Append `chunk` and return every line it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.push(chunk);
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Flush the unterminated tail at end of stream.
    ///
    /// Returns the remaining bytes as a line when they contain anything other
    /// than whitespace. The buffer is empty afterwards.
    pub fn finish(&mut self) -> Option<String> {
        let raw = self.buf.split();
        self.next_index = 0;
        let line = decode_line(&raw);
        (!line.is_empty()).then_some(line)
    }

    /// Number of buffered bytes not yet emitted as a line.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether a [`FramedRead`](tokio_util::codec::FramedRead) driving this
    /// decoder has reached end of stream.
    #[must_use]
    pub fn reached_eof(&self) -> bool {
        self.eof
    }
}

impl Decoder for FrameDecoder {
    type Item = String;
    type Error = AppError;

    /// Move everything `FramedRead` has buffered into the decoder and return
    /// the next complete line, if any.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if !src.is_empty() {
            let chunk = src.split();
            self.push(&chunk);
        }
        Ok(self.next_line())
    }

    /// At end of stream, drain complete lines first, then the unterminated
    /// tail.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        self.eof = true;
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => Ok(self.finish()),
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_owned()
}
