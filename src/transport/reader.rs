//! Inbound transport half.
//!
//! Reads newline-delimited JSON frames through [`FrameCodec`] and parses each
//! into an [`InboundFrame`]. Oversized lines and lines that are not valid
//! envelopes are logged and skipped; they do **not** close the transport.

use futures_util::StreamExt;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

use crate::protocol::codec::FrameCodec;
use crate::protocol::{parse_inbound_line, InboundFrame};
use crate::transport::BoxRead;
use crate::{ClientError, Result};

/// Receiving half of a [`Transport`](super::Transport).
pub struct TransportReader {
    framed: FramedRead<BoxRead, FrameCodec>,
    closed: bool,
    /// `FramedRead` yields one `None` after a decoder error.
    skip_error_eof: bool,
    /// After a decoder error `FramedRead` waits for new bytes before decoding
    /// again, so lines already buffered are decoded here first.
    draining: bool,
}

impl TransportReader {
    pub(crate) fn new(framed: FramedRead<BoxRead, FrameCodec>) -> Self {
        Self {
            framed,
            closed: false,
            skip_error_eof: false,
            draining: false,
        }
    }

    /// Yield the next well-formed inbound frame.
    ///
    /// Cancel-safe: dropping the future between frames loses no data, so it
    /// may be used as a `tokio::select!` branch.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TransportClosed`] on EOF, on an unrecoverable
    /// I/O error, and on every call after either.
    pub async fn receive(&mut self) -> Result<InboundFrame> {
        if self.closed {
            return Err(ClientError::TransportClosed);
        }

        loop {
            let item = if self.draining {
                match self.decode_buffered() {
                    Some(item) => Some(item),
                    None => {
                        self.draining = false;
                        continue;
                    }
                }
            } else {
                self.framed.next().await
            };

            match item {
                None if self.skip_error_eof => {
                    self.skip_error_eof = false;
                }

                None => {
                    debug!("transport reader: EOF detected");
                    self.closed = true;
                    return Err(ClientError::TransportClosed);
                }

                Some(Err(ClientError::Protocol(ref msg))) => {
                    // Codec-level error (e.g. frame too long): log and continue.
                    if !self.draining {
                        self.skip_error_eof = true;
                        self.draining = true;
                    }
                    warn!(error = msg.as_str(), "transport reader: framing error, skipping");
                }

                Some(Err(e)) => {
                    warn!(error = %e, "transport reader: IO error, closing");
                    self.closed = true;
                    return Err(ClientError::TransportClosed);
                }

                Some(Ok(line)) => match parse_inbound_line(&line) {
                    Ok(Some(frame)) => return Ok(frame),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, raw_line = %line, "transport reader: parse error, skipping line");
                    }
                },
            }
        }
    }

    /// Whether EOF or a fatal read error has been observed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Decode one complete line from bytes `FramedRead` already buffered.
    fn decode_buffered(&mut self) -> Option<Result<String>> {
        let mut buffer = std::mem::take(self.framed.read_buffer_mut());
        let item = self.framed.decoder_mut().decode(&mut buffer).transpose();
        *self.framed.read_buffer_mut() = buffer;
        item
    }
}
