//! Session configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{ClientError, Result};

/// Address of the robot control server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EndpointConfig {
    /// Host name or IP address (simulator or physical robot).
    #[serde(default = "default_address")]
    pub address: String,
    /// TCP port of the JSON control server.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl EndpointConfig {
    /// `address:port` form suitable for socket connects and log fields.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

/// Configurable timeout values (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Upper bound on establishing the connection.
    #[serde(default = "default_connect_seconds")]
    pub connect_seconds: u64,
    /// Upper bound on waiting for a correlated response.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Upper bound on waiting for an action to finish; 0 means no timeout.
    #[serde(default)]
    pub action_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_seconds: default_connect_seconds(),
            request_seconds: default_request_seconds(),
            action_seconds: 0,
        }
    }
}

/// Stream framing and connect behaviour.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    /// Maximum accepted inbound line length in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Keep retrying refused connects until the connect timeout elapses.
    #[serde(default = "default_true")]
    pub retry_refused: bool,
    /// Delay between refused connect attempts.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            retry_refused: true,
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_connect_seconds() -> u64 {
    100
}

fn default_request_seconds() -> u64 {
    10
}

fn default_max_frame_bytes() -> usize {
    1_048_576
}

fn default_true() -> bool {
    true
}

fn default_retry_interval_ms() -> u64 {
    250
}

/// Smallest frame limit accepted by [`SessionConfig::validate`].
const MIN_FRAME_BYTES: usize = 1024;

/// Session configuration parsed from a TOML file.
///
/// Every section is optional; missing values fall back to the defaults used
/// by the bundled demonstration (`127.0.0.1:8080`, 100 s connect timeout).
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Control server address.
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// Connect, request and action timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Framing limits and connect retry policy.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl SessionConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ClientError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_seconds)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_seconds)
    }

    /// Action timeout, or `None` when actions may run indefinitely.
    #[must_use]
    pub fn action_timeout(&self) -> Option<Duration> {
        match self.timeouts.action_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Delay between refused connect attempts.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.transport.retry_interval_ms)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.address.trim().is_empty() {
            return Err(ClientError::Config("endpoint.address must not be empty".into()));
        }

        if self.endpoint.port == 0 {
            return Err(ClientError::Config(
                "endpoint.port must be greater than zero".into(),
            ));
        }

        if self.timeouts.connect_seconds == 0 {
            return Err(ClientError::Config(
                "timeouts.connect_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.request_seconds == 0 {
            return Err(ClientError::Config(
                "timeouts.request_seconds must be greater than zero".into(),
            ));
        }

        if self.transport.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(ClientError::Config(format!(
                "transport.max_frame_bytes must be at least {MIN_FRAME_BYTES}"
            )));
        }

        Ok(())
    }
}
