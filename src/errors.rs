//! Error types shared across the session client.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared client result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error enumeration covering every session failure mode.
///
/// Errors are `Clone` so a single transport failure can be broadcast to
/// every suspended caller (pending queries, action waits, streams).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The connection was not established within the connect timeout.
    ConnectTimeout(String),
    /// The server actively refused the connection.
    ConnectionRefused(String),
    /// The connection dropped while the session was open.
    ConnectionLost,
    /// A send or receive was attempted on a closed transport.
    TransportClosed,
    /// No response arrived for a request within the request timeout.
    RequestTimeout(Duration),
    /// The server answered a request with an error frame.
    RemoteError {
        /// Server-provided error code.
        code: String,
        /// Server-provided human-readable message.
        message: String,
    },
    /// A tracked action finished in a failed or cancelled state.
    ActionFailed {
        /// Reason reported by the server.
        reason: String,
    },
    /// The server refused to grant the named privilege.
    PrivilegeDenied(String),
    /// A gated command was issued before its privilege was granted.
    PrivilegeRequired(String),
    /// The session was closed by the caller.
    SessionClosed,
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed or unexpected protocol frame.
    Protocol(String),
    /// File-system or socket I/O failure.
    Io(String),
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectTimeout(endpoint) => write!(f, "connect timeout: {endpoint}"),
            Self::ConnectionRefused(endpoint) => write!(f, "connection refused: {endpoint}"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::TransportClosed => write!(f, "transport closed"),
            Self::RequestTimeout(after) => write!(f, "request timeout: no response after {after:?}"),
            Self::RemoteError { code, message } => write!(f, "remote error [{code}]: {message}"),
            Self::ActionFailed { reason } => write!(f, "action failed: {reason}"),
            Self::PrivilegeDenied(name) => write!(f, "privilege denied: {name}"),
            Self::PrivilegeRequired(name) => write!(f, "privilege required: {name}"),
            Self::SessionClosed => write!(f, "session closed"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}
