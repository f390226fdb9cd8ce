//! Outbound transport half.
//!
//! Serialises each [`Command`] to a single-line JSON envelope and writes it,
//! newline terminated, through [`FrameCodec`].

use futures_util::SinkExt;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::protocol::codec::FrameCodec;
use crate::protocol::Command;
use crate::transport::BoxWrite;
use crate::{ClientError, Result};

/// Sending half of a [`Transport`](super::Transport).
pub struct TransportWriter {
    framed: FramedWrite<BoxWrite, FrameCodec>,
    closed: bool,
}

impl TransportWriter {
    pub(crate) fn new(framed: FramedWrite<BoxWrite, FrameCodec>) -> Self {
        Self {
            framed,
            closed: false,
        }
    }

    /// Transmit one command tagged with correlation id `id`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::TransportClosed`] if the transport was closed or a
    ///   previous write failed.
    /// - [`ClientError::Protocol`] if the command cannot be serialised.
    pub async fn send(&mut self, command: &Command, id: u64) -> Result<()> {
        if self.closed {
            return Err(ClientError::TransportClosed);
        }

        let line = command.encode(id)?;
        if let Err(e) = self.framed.send(line).await {
            warn!(request_id = id, kind = command.kind(), error = %e, "transport writer: write failed");
            self.closed = true;
            return Err(ClientError::TransportClosed);
        }

        debug!(request_id = id, kind = command.kind(), "transport writer: frame sent");
        Ok(())
    }

    /// Flush and shut down the outbound stream. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.framed.close().await {
            debug!(error = %e, "transport writer: close failed");
        }
    }

    /// Whether the writer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
