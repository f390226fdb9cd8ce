//! Session transport: one framed connection to the control server.
//!
//! [`Transport::open`] dials `address:port` with an explicit connect timeout
//! and splits the socket into a [`TransportReader`] / [`TransportWriter`]
//! pair. [`Transport::from_io`] wraps any in-memory or pre-connected stream
//! the same way, which is how tests attach a mock server.
//!
//! Submodules:
//! - `reader`: inbound half, yields decoded [`InboundFrame`](crate::protocol::InboundFrame)s.
//! - `writer`: outbound half, writes encoded command lines.

pub mod reader;
pub mod writer;

use std::io::ErrorKind;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::protocol::codec::FrameCodec;
use crate::{ClientError, Result};

pub use reader::TransportReader;
pub use writer::TransportWriter;

/// Boxed inbound byte stream.
pub(crate) type BoxRead = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed outbound byte stream.
pub(crate) type BoxWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// A connected, framed transport ready to be handed to a session.
pub struct Transport {
    reader: TransportReader,
    writer: TransportWriter,
}

impl Transport {
    /// Connect to the endpoint named in `config`.
    ///
    /// With `transport.retry_refused` set, refused attempts are retried every
    /// `transport.retry_interval_ms` until the connect timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectTimeout`]: no connection within the timeout.
    /// - [`ClientError::ConnectionRefused`]: refused and retry is disabled.
    /// - [`ClientError::Io`]: any other socket failure.
    pub async fn open(config: &SessionConfig) -> Result<Self> {
        let authority = config.endpoint.authority();
        let timeout = config.connect_timeout();

        let stream = tokio::time::timeout(timeout, connect_with_retry(config, &authority))
            .await
            .map_err(|_| {
                warn!(endpoint = %authority, ?timeout, "transport: connect timed out");
                ClientError::ConnectTimeout(authority.clone())
            })??;

        if let Err(err) = stream.set_nodelay(true) {
            debug!(endpoint = %authority, error = %err, "transport: set_nodelay failed");
        }

        info!(endpoint = %authority, "transport: connected");
        Ok(Self::from_io(stream, config.transport.max_frame_bytes))
    }

    /// Wrap an already-connected byte stream.
    #[must_use]
    pub fn from_io<T>(io: T, max_frame_bytes: usize) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let read_half: BoxRead = Box::pin(read_half);
        let write_half: BoxWrite = Box::pin(write_half);

        Self {
            reader: TransportReader::new(FramedRead::new(
                read_half,
                FrameCodec::with_max_length(max_frame_bytes),
            )),
            writer: TransportWriter::new(FramedWrite::new(
                write_half,
                FrameCodec::with_max_length(max_frame_bytes),
            )),
        }
    }

    /// Split into independently owned halves.
    #[must_use]
    pub fn into_split(self) -> (TransportReader, TransportWriter) {
        (self.reader, self.writer)
    }
}

/// Dial `authority`, retrying refusals when configured to.
async fn connect_with_retry(config: &SessionConfig, authority: &str) -> Result<TcpStream> {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match TcpStream::connect(authority).await {
            Ok(stream) => return Ok(stream),
            Err(err) if err.kind() == ErrorKind::ConnectionRefused => {
                if !config.transport.retry_refused {
                    return Err(ClientError::ConnectionRefused(authority.to_owned()));
                }
                debug!(endpoint = authority, attempt, "transport: connection refused, retrying");
                tokio::time::sleep(config.retry_interval()).await;
            }
            Err(err) => {
                return Err(ClientError::Io(format!("connect to {authority} failed: {err}")));
            }
        }
    }
}
