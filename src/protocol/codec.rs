//! NDJSON codec for control-server streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or oversized frame from a misbehaving server
//! cannot exhaust memory.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound). Both directions use UTF-8
//! line framing delimited by `\n`.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use robot_session::protocol::codec::FrameCodec;
//!
//! let reader = FramedRead::new(socket_read_half, FrameCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{ClientError, Result};

/// Default maximum line length accepted by the codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON codec for bidirectional control-server streams.
///
/// Each newline-terminated (`\n`) UTF-8 string is one complete frame.
///
/// # Decoder
///
/// Inbound lines longer than the configured limit return
/// [`ClientError::Protocol`]`("frame too long: …")` rather than allocating;
/// the codec then discards input up to the next newline. I/O errors are
/// mapped to [`ClientError::Io`].
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`. The limit is a decoder-side
/// concern and is not enforced during encoding.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with an explicit maximum line length.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    /// Configured maximum inbound line length.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_error(&self, e: LinesCodecError) -> ClientError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ClientError::Protocol(format!(
                "frame too long: exceeded {} bytes",
                self.max_length
            )),
            LinesCodecError::Io(io_err) => ClientError::Io(io_err.to_string()),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = ClientError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode(src).map_err(|e| self.map_error(e))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode_eof(src).map_err(|e| self.map_error(e))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = ClientError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(|e| self.map_error(e))
    }
}
